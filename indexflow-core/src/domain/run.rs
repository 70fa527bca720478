//! Run-scoped identifiers: the scheduler's run stamp, the fetch window and the
//! cancellation token shared by the steps of one run.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const COMPACT_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Execution timestamp handed to a run by the scheduler.
///
/// Precision is whole seconds, so the compact rendering used in staging paths
/// maps one-to-one onto stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunStamp(DateTime<Utc>);

impl RunStamp {
    pub fn new(at: DateTime<Utc>) -> Self {
        let secs = at.timestamp();
        Self(Utc.timestamp_opt(secs, 0).single().unwrap_or(at))
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Parse RFC 3339, the compact form, or a bare `YYYY-MM-DD` (midnight UTC).
    pub fn parse(s: &str) -> Result<Self, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::new(dt.with_timezone(&Utc)));
        }
        if let Some(stamp) = Self::parse_compact(s) {
            return Ok(stamp);
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self::new(date.and_time(NaiveTime::MIN).and_utc()));
        }
        Err(format!(
            "invalid run timestamp '{s}': use RFC 3339, YYYYMMDDTHHMMSSZ or YYYY-MM-DD"
        ))
    }

    pub fn parse_compact(s: &str) -> Option<Self> {
        chrono::NaiveDateTime::parse_from_str(s, COMPACT_FORMAT)
            .ok()
            .map(|naive| Self::new(naive.and_utc()))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Logical date of the run.
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }

    /// `YYYYMMDDTHHMMSSZ`, safe for file names.
    pub fn compact(&self) -> String {
        self.0.format(COMPACT_FORMAT).to_string()
    }
}

impl fmt::Display for RunStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.compact())
    }
}

/// Inclusive date range requested from the market-data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start > end {
            return Err(format!("window start {start} is after end {end}"));
        }
        Ok(Self { start, end })
    }

    /// The `lookback_days` calendar days ending at `end`.
    pub fn trailing(end: NaiveDate, lookback_days: u32) -> Self {
        Self {
            start: end
                .checked_sub_signed(Duration::days(i64::from(lookback_days)))
                .unwrap_or(NaiveDate::MIN),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Cooperative abort flag checked between entities and between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
