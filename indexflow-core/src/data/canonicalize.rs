//! Bar cleaning ahead of derivation: sort, dedupe, drop unusable rows.

use super::provider::RawBar;

/// Cleaned bars for one symbol and what was thrown away.
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    pub bars: Vec<RawBar>,
    pub dropped_duplicates: usize,
    pub dropped_invalid: usize,
}

/// Sort by date, keep the first bar of each date, and drop bars whose close is
/// not a finite positive number.
pub fn canonicalize(mut bars: Vec<RawBar>) -> Cleaned {
    let before = bars.len();
    bars.retain(|b| b.close.is_finite() && b.close > 0.0);
    let dropped_invalid = before - bars.len();

    bars.sort_by_key(|b| b.date);
    let before = bars.len();
    bars.dedup_by_key(|b| b.date);
    let dropped_duplicates = before - bars.len();

    Cleaned {
        bars,
        dropped_duplicates,
        dropped_invalid,
    }
}

/// Flag suspicious bars without removing them: inverted high/low or a close
/// outside the day's range.
pub fn count_anomalies(bars: &[RawBar]) -> usize {
    bars.iter()
        .filter(|b| {
            b.high.is_finite()
                && b.low.is_finite()
                && (b.high < b.low || b.close > b.high || b.close < b.low)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixture::flat_bar;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn sorts_unordered_bars() {
        let cleaned = canonicalize(vec![flat_bar(d(3), 3.0), flat_bar(d(1), 1.0), flat_bar(d(2), 2.0)]);
        let dates: Vec<_> = cleaned.bars.iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![d(1), d(2), d(3)]);
    }

    #[test]
    fn keeps_first_of_duplicate_dates() {
        let cleaned = canonicalize(vec![flat_bar(d(1), 1.0), flat_bar(d(1), 9.0), flat_bar(d(2), 2.0)]);
        assert_eq!(cleaned.bars.len(), 2);
        assert_eq!(cleaned.bars[0].close, 1.0);
        assert_eq!(cleaned.dropped_duplicates, 1);
    }

    #[test]
    fn drops_nan_and_non_positive_close() {
        let cleaned = canonicalize(vec![flat_bar(d(1), f64::NAN), flat_bar(d(2), 0.0), flat_bar(d(3), 5.0)]);
        assert_eq!(cleaned.bars.len(), 1);
        assert_eq!(cleaned.dropped_invalid, 2);
    }

    #[test]
    fn inverted_range_is_an_anomaly() {
        let mut bar = flat_bar(d(1), 10.0);
        bar.high = 9.0;
        bar.low = 11.0;
        assert_eq!(count_anomalies(&[bar, flat_bar(d(2), 10.0)]), 1);
    }
}
