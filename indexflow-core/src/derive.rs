//! Metric derivation: raw daily bars to warehouse rows.
//!
//! Pure functions. Each symbol's series is derived independently and its
//! length and order are preserved; inputs are never mutated.

use crate::data::provider::RawBar;
use crate::domain::{Batch, DerivedBar};
use std::collections::BTreeMap;

/// `numerator / denominator * 100`, or `None` when either side is unusable.
fn percent(numerator: f64, denominator: f64) -> Option<f64> {
    if !numerator.is_finite() || !denominator.is_finite() || denominator == 0.0 {
        return None;
    }
    let pct = numerator / denominator * 100.0;
    pct.is_finite().then_some(pct)
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Derive one symbol's rows from its date-ordered bars.
///
/// The first bar has no prior close, so its change fields are `None`.
pub fn derive_series(symbol: &str, bars: &[RawBar]) -> Vec<DerivedBar> {
    let mut prev_close: Option<f64> = None;
    bars.iter()
        .map(|bar| {
            let close_change = prev_close.and_then(|prev| finite(bar.close - prev));
            let close_pct_change = match (close_change, prev_close) {
                (Some(change), Some(prev)) => percent(change, prev),
                _ => None,
            };
            let daily_range = finite(bar.high - bar.low);
            let daily_range_pct = daily_range.and_then(|range| percent(range, bar.close));
            prev_close = Some(bar.close);

            DerivedBar {
                symbol: symbol.to_string(),
                date: bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                adj_close: bar.adj_close,
                volume: bar.volume,
                close_change,
                close_pct_change,
                daily_range,
                daily_range_pct,
            }
        })
        .collect()
}

/// Derive every fetched series into the run's batch.
pub fn derive_batch(series: &BTreeMap<String, Vec<RawBar>>) -> Batch {
    let rows: Vec<DerivedBar> = series
        .iter()
        .flat_map(|(symbol, bars)| derive_series(symbol, bars))
        .collect();
    Batch::from_rows(rows)
}
