//! Canned in-memory provider.
//!
//! Serves fixed bars or fixed failures per symbol, optionally after a delay.
//! Used for offline runs and for exercising the fetch pool's isolation and
//! deadline handling without network access.

use super::provider::{DataProvider, FetchError, RawBar};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Canned {
    Bars(Vec<RawBar>),
    Fail(FetchError),
}

#[derive(Debug, Default)]
pub struct FixtureProvider {
    canned: HashMap<String, Canned>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<RawBar>) -> Self {
        self.canned.insert(symbol.to_string(), Canned::Bars(bars));
        self
    }

    pub fn with_failure(mut self, symbol: &str, error: FetchError) -> Self {
        self.canned.insert(symbol.to_string(), Canned::Fail(error));
        self
    }

    /// Sleep this long before answering for `symbol`.
    pub fn with_delay(mut self, symbol: &str, delay: Duration) -> Self {
        self.delays.insert(symbol.to_string(), delay);
        self
    }

    /// Number of `fetch` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataProvider for FixtureProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawBar>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(symbol) {
            std::thread::sleep(*delay);
        }
        match self.canned.get(symbol) {
            Some(Canned::Bars(bars)) => Ok(bars
                .iter()
                .filter(|b| start <= b.date && b.date <= end)
                .cloned()
                .collect()),
            Some(Canned::Fail(e)) => Err(e.clone()),
            None => Err(FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            }),
        }
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// A bar whose OHLC all sit at `close`.
pub fn flat_bar(date: NaiveDate, close: f64) -> RawBar {
    RawBar {
        date,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000,
        adj_close: close,
    }
}
