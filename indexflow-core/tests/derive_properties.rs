//! Property tests for metric derivation.
//!
//! 1. Length and order are preserved per symbol
//! 2. The first row of a series has no change fields
//! 3. close_change[i] = close[i] - close[i-1]
//! 4. The input series is left untouched
//! 5. A derived batch is sorted by (symbol, date) with unique keys

use chrono::NaiveDate;
use indexflow_core::data::RawBar;
use indexflow_core::derive::{derive_batch, derive_series};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (1.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_series() -> impl Strategy<Value = Vec<RawBar>> {
    prop::collection::vec((arb_price(), 0.0..5.0_f64, 0u64..5_000_000), 0..40).prop_map(|raw| {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        raw.into_iter()
            .enumerate()
            .map(|(i, (close, spread, volume))| RawBar {
                date: base + chrono::Duration::days(i as i64),
                open: close,
                high: close + spread,
                low: (close - spread).max(0.01),
                close,
                volume,
                adj_close: close,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn preserves_length_and_dates(bars in arb_series()) {
        let rows = derive_series("AAA", &bars);
        prop_assert_eq!(rows.len(), bars.len());
        for (row, bar) in rows.iter().zip(&bars) {
            prop_assert_eq!(row.date, bar.date);
            prop_assert_eq!(row.close, bar.close);
            prop_assert_eq!(row.symbol.as_str(), "AAA");
        }
    }

    #[test]
    fn first_row_change_unavailable(bars in arb_series()) {
        let rows = derive_series("AAA", &bars);
        if let Some(first) = rows.first() {
            prop_assert!(first.close_change.is_none());
            prop_assert!(first.close_pct_change.is_none());
        }
    }

    #[test]
    fn change_identity(bars in arb_series()) {
        let rows = derive_series("AAA", &bars);
        for i in 1..rows.len() {
            let expected = bars[i].close - bars[i - 1].close;
            let change = rows[i].close_change.expect("prior close is positive");
            prop_assert!((change - expected).abs() < 1e-9);
            let pct = rows[i].close_pct_change.expect("prior close is positive");
            prop_assert!((pct - expected / bars[i - 1].close * 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn input_not_mutated(bars in arb_series()) {
        let before = bars.clone();
        let _ = derive_series("AAA", &bars);
        prop_assert_eq!(before, bars);
    }

    #[test]
    fn batch_sorted_with_unique_keys(a in arb_series(), b in arb_series()) {
        let mut series = BTreeMap::new();
        series.insert("ZZZ".to_string(), a.clone());
        series.insert("AAA".to_string(), b.clone());
        let batch = derive_batch(&series);

        prop_assert_eq!(batch.len(), a.len() + b.len());
        let rows = batch.rows();
        for pair in rows.windows(2) {
            prop_assert!((pair[0].symbol.as_str(), pair[0].date) < (pair[1].symbol.as_str(), pair[1].date));
        }
        let keys: HashSet<_> = rows.iter().map(|r| r.key()).collect();
        prop_assert_eq!(keys.len(), rows.len());
    }
}
