//! Market-data provider trait and per-entity fetch errors.
//!
//! The DataProvider trait abstracts over data sources (Yahoo Finance, canned
//! fixtures) so the fetch pool can swap implementations and tests can mock them.
//! A provider answers for one symbol at a time; its errors never describe more
//! than that symbol.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw daily OHLCV bar from a data provider (before cleaning and derivation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adj_close: f64,
}

/// Why a single symbol could not be fetched.
///
/// These are recorded against the symbol and the symbol is left out of the
/// batch; none of them aborts a run.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("fetch for '{symbol}' exceeded {secs}s")]
    Timeout { symbol: String, secs: u64 },

    #[error("run cancelled before '{symbol}' was fetched")]
    Cancelled { symbol: String },

    #[error("fetch error: {0}")]
    Other(String),
}

/// Trait for market-data providers.
///
/// Implementations handle the specifics of one source. Retries, rate limits and
/// response parsing live here; the bounded pool and the per-fetch deadline live
/// in [`crate::data::fetch`].
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily OHLCV bars for a symbol over an inclusive date range.
    ///
    /// A symbol with no trading days in the range yields `Ok(vec![])`.
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawBar>, FetchError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Progress callback for multi-symbol fetches.
///
/// Called from pool worker threads, so implementations must be `Sync`.
pub trait FetchProgress: Send + Sync {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol fetch completes with its row count or error.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<usize, FetchError>);

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits tracing events.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        tracing::debug!(symbol, "[{}/{}] fetching", index + 1, total);
    }

    fn on_complete(&self, symbol: &str, _index: usize, _total: usize, result: &Result<usize, FetchError>) {
        match result {
            Ok(0) => tracing::info!(symbol, "no rows in window"),
            Ok(rows) => tracing::debug!(symbol, rows, "fetched"),
            Err(e) => tracing::warn!(symbol, error = %e, "fetch failed; symbol excluded from batch"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, failed, total, "fetch complete");
    }
}

/// Silent reporter.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}
    fn on_complete(&self, _symbol: &str, _index: usize, _total: usize, _result: &Result<usize, FetchError>) {}
    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}
