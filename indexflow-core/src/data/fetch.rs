//! Multi-symbol fetch over a bounded worker pool.
//!
//! Every symbol becomes one task that returns a tagged [`FetchOutcome`]; errors
//! never cross the collection boundary. The whole entity list is processed
//! before returning, and the collected series are keyed by symbol so the result
//! is deterministic regardless of completion order.

use super::canonicalize::{canonicalize, count_anomalies};
use super::provider::{DataProvider, FetchError, FetchProgress, RawBar};
use crate::domain::{CancelToken, DateWindow};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Pool size and per-symbol deadline.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub workers: usize,
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            workers: 8,
            timeout: Duration::from_secs(30),
        }
    }
}

/// What one symbol's task produced.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched { symbol: String, bars: Vec<RawBar> },
    Failed { symbol: String, error: FetchError },
}

#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub symbol: String,
    pub error: FetchError,
}

/// Collected result of a fetch pass.
#[derive(Debug, Default)]
pub struct FetchSummary {
    /// Cleaned, date-sorted bars per symbol that returned at least one row.
    pub series: BTreeMap<String, Vec<RawBar>>,
    /// Symbols that returned zero rows; not failures.
    pub empty: Vec<String>,
    pub failures: Vec<FetchFailure>,
}

impl FetchSummary {
    pub fn total(&self) -> usize {
        self.series.len() + self.empty.len() + self.failures.len()
    }

    pub fn failed_symbols(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.symbol.as_str()).collect()
    }

    fn absorb(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Fetched { symbol, bars } => {
                let cleaned = canonicalize(bars);
                if cleaned.dropped_duplicates + cleaned.dropped_invalid > 0 {
                    tracing::warn!(
                        symbol = %symbol,
                        duplicates = cleaned.dropped_duplicates,
                        invalid = cleaned.dropped_invalid,
                        "dropped unusable bars"
                    );
                }
                let anomalies = count_anomalies(&cleaned.bars);
                if anomalies > 0 {
                    tracing::warn!(symbol = %symbol, anomalies, "bars with close outside high/low kept as reported");
                }
                if cleaned.bars.is_empty() {
                    self.empty.push(symbol);
                } else {
                    self.series.insert(symbol, cleaned.bars);
                }
            }
            FetchOutcome::Failed { symbol, error } => self.failures.push(FetchFailure { symbol, error }),
        }
    }
}

/// Fetch every symbol in `symbols` over `window`.
///
/// At most `opts.workers` fetches are in flight. A fetch that outlives
/// `opts.timeout` is recorded as [`FetchError::Timeout`] for its symbol; a
/// cancelled run records the remaining symbols as [`FetchError::Cancelled`].
pub fn fetch_all(
    provider: &Arc<dyn DataProvider>,
    symbols: &[String],
    window: DateWindow,
    opts: &FetchOptions,
    progress: &dyn FetchProgress,
    cancel: &CancelToken,
) -> FetchSummary {
    let total = symbols.len();
    let task = |(index, symbol): (usize, &String)| -> FetchOutcome {
        progress.on_start(symbol, index, total);
        let result = fetch_one(provider, symbol, window, opts.timeout, cancel);
        let counted = result.as_ref().map(|bars| bars.len()).map_err(|e| e.clone());
        progress.on_complete(symbol, index, total, &counted);
        match result {
            Ok(bars) => FetchOutcome::Fetched {
                symbol: symbol.clone(),
                bars,
            },
            Err(error) => FetchOutcome::Failed {
                symbol: symbol.clone(),
                error,
            },
        }
    };

    let outcomes: Vec<FetchOutcome> = match rayon::ThreadPoolBuilder::new()
        .num_threads(opts.workers.max(1))
        .thread_name(|i| format!("indexflow-fetch-{i}"))
        .build()
    {
        Ok(pool) => pool.install(|| symbols.par_iter().enumerate().map(task).collect()),
        Err(e) => {
            tracing::warn!(error = %e, "could not build fetch pool; fetching sequentially");
            symbols.iter().enumerate().map(task).collect()
        }
    };

    let mut summary = FetchSummary::default();
    for outcome in outcomes {
        summary.absorb(outcome);
    }
    summary.empty.sort();
    summary.failures.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    progress.on_batch_complete(summary.series.len() + summary.empty.len(), summary.failures.len(), total);
    summary
}

/// One symbol under a deadline.
///
/// The provider call runs on its own thread so a hung request cannot pin a
/// pool worker past the deadline; a timed-out thread is left to finish on its
/// own and its late answer is discarded.
fn fetch_one(
    provider: &Arc<dyn DataProvider>,
    symbol: &str,
    window: DateWindow,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Vec<RawBar>, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled {
            symbol: symbol.to_string(),
        });
    }
    if !provider.is_available() {
        return Err(FetchError::CircuitBreakerTripped);
    }

    let (tx, rx) = mpsc::channel();
    let worker_provider = Arc::clone(provider);
    let worker_symbol = symbol.to_string();
    std::thread::Builder::new()
        .name(format!("fetch-{symbol}"))
        .spawn(move || {
            let result = worker_provider.fetch(&worker_symbol, window.start, window.end);
            let _ = tx.send(result);
        })
        .map_err(|e| FetchError::Other(format!("failed to spawn fetch thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(FetchError::Timeout {
            symbol: symbol.to_string(),
            secs: timeout.as_secs(),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(FetchError::Other(format!(
            "fetch thread for {symbol} exited without a result"
        ))),
    }
}
