//! Derived observations and the per-run batch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One symbol's trading day with the computed change and range fields.
///
/// Computed fields are `None` when they cannot be derived: the change fields on
/// the first observation of a symbol in the fetched window, and any percentage
/// whose denominator is zero or not finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
    pub close_change: Option<f64>,
    pub close_pct_change: Option<f64>,
    pub daily_range: Option<f64>,
    pub daily_range_pct: Option<f64>,
}

impl DerivedBar {
    /// The warehouse key of this row.
    pub fn key(&self) -> (&str, NaiveDate) {
        (self.symbol.as_str(), self.date)
    }
}

/// All derived rows of one run, sorted by symbol then date.
///
/// Construction enforces at most one row per (date, symbol); when the input
/// carries duplicates the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    rows: Vec<DerivedBar>,
}

impl Batch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(mut rows: Vec<DerivedBar>) -> Self {
        // Stable sort keeps the first duplicate ahead of later ones.
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.date.cmp(&b.date)));
        rows.dedup_by(|later, earlier| later.key() == earlier.key());
        Self { rows }
    }

    pub fn rows(&self) -> &[DerivedBar] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct symbols in batch order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for row in &self.rows {
            if out.last() != Some(&row.symbol.as_str()) {
                out.push(&row.symbol);
            }
        }
        out
    }

    /// Earliest and latest date across every symbol.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let start = self.rows.iter().map(|r| r.date).min()?;
        let end = self.rows.iter().map(|r| r.date).max()?;
        Some((start, end))
    }

    /// Date range covered by each symbol.
    pub fn symbol_ranges(&self) -> BTreeMap<String, (NaiveDate, NaiveDate)> {
        symbol_ranges(&self.rows)
    }
}

/// Inclusive date range per symbol for an arbitrary slice of rows.
pub fn symbol_ranges(rows: &[DerivedBar]) -> BTreeMap<String, (NaiveDate, NaiveDate)> {
    let mut ranges: BTreeMap<String, (NaiveDate, NaiveDate)> = BTreeMap::new();
    for row in rows {
        ranges
            .entry(row.symbol.clone())
            .and_modify(|(lo, hi)| {
                *lo = (*lo).min(row.date);
                *hi = (*hi).max(row.date);
            })
            .or_insert((row.date, row.date));
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn row(symbol: &str, day: u32, close: f64) -> DerivedBar {
        DerivedBar {
            symbol: symbol.into(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            adj_close: close,
            volume: 100,
            close_change: None,
            close_pct_change: None,
            daily_range: Some(0.0),
            daily_range_pct: Some(0.0),
        }
    }

    #[test]
    fn batch_sorts_by_symbol_then_date() {
        let batch = Batch::from_rows(vec![row("MSFT", 5, 1.0), row("AAPL", 6, 2.0), row("AAPL", 4, 3.0)]);
        let keys: Vec<_> = batch.rows().iter().map(|r| (r.symbol.as_str(), r.date.day0())).collect();
        assert_eq!(keys, vec![("AAPL", 3), ("AAPL", 5), ("MSFT", 4)]);
        assert_eq!(batch.symbols(), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn batch_keeps_first_duplicate() {
        let batch = Batch::from_rows(vec![row("AAPL", 4, 1.0), row("AAPL", 4, 9.0)]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows()[0].close, 1.0);
    }

    #[test]
    fn ranges_per_symbol() {
        let batch = Batch::from_rows(vec![row("A", 1, 1.0), row("A", 9, 1.0), row("B", 4, 1.0)]);
        let ranges = batch.symbol_ranges();
        assert_eq!(ranges["A"].0.day(), 1);
        assert_eq!(ranges["A"].1.day(), 9);
        assert_eq!(ranges["B"].0, ranges["B"].1);
        assert_eq!(batch.date_range().map(|(s, e)| (s.day(), e.day())), Some((1, 9)));
    }

    #[test]
    fn empty_batch_has_no_range() {
        assert!(Batch::empty().date_range().is_none());
        assert!(Batch::empty().symbols().is_empty());
    }
}
