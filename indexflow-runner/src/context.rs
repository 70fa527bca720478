//! Run-scoped state threaded through the pipeline steps.
//!
//! A [`RunContext`] is created per scheduled period and owned by the caller.
//! It carries the run stamp, the fetch window, the cancellation token, the
//! state machine position and the staged artifact location handed from the
//! staging step to the loading step. Nothing here is global.

use chrono::{DateTime, NaiveDate, Utc};
use indexflow_core::domain::{CancelToken, DateWindow, RunStamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The five pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Resolve,
    Fetch,
    Derive,
    Stage,
    Load,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Resolve => "resolve",
            Step::Fetch => "fetch",
            Step::Derive => "derive",
            Step::Stage => "stage",
            Step::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Resolving,
    Fetching,
    Deriving,
    Staging,
    Loading,
    Done,
    Failed { step: Step },
}

impl RunState {
    /// The step this state runs, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            RunState::Resolving => Some(Step::Resolve),
            RunState::Fetching => Some(Step::Fetch),
            RunState::Deriving => Some(Step::Derive),
            RunState::Staging => Some(Step::Stage),
            RunState::Loading => Some(Step::Load),
            RunState::Done | RunState::Failed { .. } => None,
        }
    }

    /// Successor on success.
    pub fn next(&self) -> Option<RunState> {
        match self {
            RunState::Resolving => Some(RunState::Fetching),
            RunState::Fetching => Some(RunState::Deriving),
            RunState::Deriving => Some(RunState::Staging),
            RunState::Staging => Some(RunState::Loading),
            RunState::Loading => Some(RunState::Done),
            RunState::Done | RunState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Resolving => f.write_str("resolving"),
            RunState::Fetching => f.write_str("fetching"),
            RunState::Deriving => f.write_str("deriving"),
            RunState::Staging => f.write_str("staging"),
            RunState::Loading => f.write_str("loading"),
            RunState::Done => f.write_str("done"),
            RunState::Failed { step } => write!(f, "failed at {step}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

pub struct RunContext {
    stamp: RunStamp,
    window: DateWindow,
    cancel: CancelToken,
    state: RunState,
    transitions: Vec<Transition>,
    artifact: Option<PathBuf>,
    started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(stamp: RunStamp, window: DateWindow) -> Self {
        Self {
            stamp,
            window,
            cancel: CancelToken::new(),
            state: RunState::Resolving,
            transitions: Vec::new(),
            artifact: None,
            started_at: Utc::now(),
        }
    }

    /// Window of `lookback_days` ending on the stamp's date.
    pub fn trailing(stamp: RunStamp, lookback_days: u32) -> Self {
        let window = DateWindow::trailing(stamp.date(), lookback_days);
        Self::new(stamp, window)
    }

    /// Share a cancellation token with another thread (signal handler, scheduler).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stamp(&self) -> &RunStamp {
        &self.stamp
    }

    pub fn window(&self) -> DateWindow {
        self.window
    }

    pub fn window_bounds(&self) -> (NaiveDate, NaiveDate) {
        (self.window.start, self.window.end)
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Location written by the staging step, once it has succeeded.
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn set_artifact(&mut self, path: PathBuf) {
        self.artifact = Some(path);
    }

    /// Move to the success successor of the current state.
    pub(crate) fn advance(&mut self) {
        if let Some(next) = self.state.next() {
            self.transition(next);
        }
    }

    pub(crate) fn fail(&mut self, step: Step) {
        if !self.state.is_terminal() {
            self.transition(RunState::Failed { step });
        }
    }

    fn transition(&mut self, to: RunState) {
        tracing::debug!(run = %self.stamp, from = %self.state, to = %to, "state transition");
        self.transitions.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx() -> RunContext {
        RunContext::trailing(RunStamp::parse("2024-06-04T21:30:00Z").unwrap(), 5)
    }

    #[test]
    fn starts_resolving_with_trailing_window() {
        let c = ctx();
        assert_eq!(c.state(), RunState::Resolving);
        let (start, end) = c.window_bounds();
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 6, 4).unwrap());
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 5, 30).unwrap());
        assert!(c.artifact().is_none());
    }

    #[test]
    fn advances_through_every_state() {
        let mut c = ctx();
        for _ in 0..5 {
            c.advance();
        }
        assert_eq!(c.state(), RunState::Done);
        assert_eq!(c.transitions().len(), 5);
        c.advance();
        assert_eq!(c.transitions().len(), 5);
    }

    #[test]
    fn failed_is_terminal() {
        let mut c = ctx();
        c.advance();
        c.fail(Step::Fetch);
        assert_eq!(c.state(), RunState::Failed { step: Step::Fetch });
        c.advance();
        c.fail(Step::Load);
        assert_eq!(c.state(), RunState::Failed { step: Step::Fetch });
    }

    #[derive(Debug, Clone)]
    enum Op {
        Advance,
        Fail,
    }

    proptest! {
        #[test]
        fn any_op_sequence_respects_step_order(
            ops in prop::collection::vec(prop_oneof![Just(Op::Advance), Just(Op::Fail)], 0..12)
        ) {
            let mut c = ctx();
            for op in ops {
                match op {
                    Op::Advance => c.advance(),
                    Op::Fail => {
                        if let Some(step) = c.state().step() {
                            c.fail(step);
                        }
                    }
                }
            }

            prop_assert!(c.transitions().len() <= 5);
            for pair in c.transitions().windows(2) {
                prop_assert_eq!(pair[0].to, pair[1].from);
            }
            for t in c.transitions() {
                prop_assert!(!t.from.is_terminal());
                if let RunState::Failed { step } = t.to {
                    prop_assert_eq!(t.from.step(), Some(step));
                } else {
                    prop_assert_eq!(t.from.next(), Some(t.to));
                }
            }
        }
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_string(&RunState::Failed { step: Step::Stage }).unwrap();
        assert_eq!(json, r#"{"state":"failed","step":"stage"}"#);
    }
}
