//! Per-run summary, persisted to the run history.

use crate::context::{RunContext, RunState, Step};
use chrono::{DateTime, NaiveDate, Utc};
use indexflow_core::warehouse::MergeReport;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A symbol dropped from the batch and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEntity {
    pub symbol: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Compact run stamp, also the staging directory key.
    pub run_id: String,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub state: RunState,
    pub failed_step: Option<Step>,
    pub error: Option<String>,
    pub entities: usize,
    pub fetched: Vec<String>,
    pub empty: Vec<String>,
    pub failed: Vec<FailedEntity>,
    pub batch_rows: usize,
    pub artifact: Option<PathBuf>,
    pub merge: Option<MergeReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(ctx: &RunContext) -> Self {
        let (window_start, window_end) = ctx.window_bounds();
        Self {
            run_id: ctx.stamp().compact(),
            window_start,
            window_end,
            state: ctx.state(),
            failed_step: None,
            error: None,
            entities: 0,
            fetched: Vec::new(),
            empty: Vec::new(),
            failed: Vec::new(),
            batch_rows: 0,
            artifact: None,
            merge: None,
            started_at: ctx.started_at(),
            finished_at: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }

    /// Command that re-merges this run's artifact without re-fetching, for a
    /// run that staged but failed to load.
    pub fn replay_hint(&self) -> Option<String> {
        match (&self.artifact, self.failed_step) {
            (Some(path), Some(Step::Load)) => {
                Some(format!("indexflow load --artifact {}", path.display()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexflow_core::domain::RunStamp;

    #[test]
    fn replay_hint_only_for_failed_loads() {
        let ctx = RunContext::trailing(RunStamp::parse("2024-06-04").unwrap(), 5);
        let mut report = RunReport::new(&ctx);
        assert_eq!(report.run_id, "20240604T000000Z");
        assert!(report.replay_hint().is_none());

        report.artifact = Some(PathBuf::from("staging/run=20240604T000000Z/prices.parquet"));
        report.failed_step = Some(Step::Load);
        assert_eq!(
            report.replay_hint().as_deref(),
            Some("indexflow load --artifact staging/run=20240604T000000Z/prices.parquet")
        );
    }
}
