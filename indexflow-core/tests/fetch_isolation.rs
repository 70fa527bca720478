//! Fetch pool behavior: per-symbol failure isolation, deadlines, cancellation.

use chrono::NaiveDate;
use indexflow_core::data::fixture::flat_bar;
use indexflow_core::data::{
    fetch_all, DataProvider, FetchError, FetchOptions, FixtureProvider, NoProgress,
};
use indexflow_core::domain::{CancelToken, DateWindow};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
}

fn window() -> DateWindow {
    DateWindow::new(d(1), d(10)).unwrap()
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn one_failure_does_not_abort_the_batch() {
    let provider: Arc<dyn DataProvider> = Arc::new(
        FixtureProvider::new()
            .with_bars("AAA", vec![flat_bar(d(3), 10.0), flat_bar(d(4), 11.0)])
            .with_failure("BBB", FetchError::NetworkUnreachable("connection reset".into()))
            .with_bars("CCC", vec![flat_bar(d(3), 5.0)]),
    );

    let summary = fetch_all(
        &provider,
        &symbols(&["AAA", "BBB", "CCC"]),
        window(),
        &FetchOptions::default(),
        &NoProgress,
        &CancelToken::new(),
    );

    assert_eq!(summary.total(), 3);
    assert_eq!(summary.series.keys().collect::<Vec<_>>(), vec!["AAA", "CCC"]);
    assert_eq!(summary.failed_symbols(), vec!["BBB"]);
}

#[test]
fn zero_rows_is_not_a_failure() {
    let provider: Arc<dyn DataProvider> =
        Arc::new(FixtureProvider::new().with_bars("AAA", vec![flat_bar(d(20), 10.0)]));

    let summary = fetch_all(
        &provider,
        &symbols(&["AAA"]),
        window(),
        &FetchOptions::default(),
        &NoProgress,
        &CancelToken::new(),
    );

    assert!(summary.failures.is_empty());
    assert_eq!(summary.empty, vec!["AAA"]);
    assert!(summary.series.is_empty());
}

#[test]
fn slow_symbol_times_out_alone() {
    let provider: Arc<dyn DataProvider> = Arc::new(
        FixtureProvider::new()
            .with_bars("FAST", vec![flat_bar(d(3), 10.0)])
            .with_bars("SLOW", vec![flat_bar(d(3), 10.0)])
            .with_delay("SLOW", Duration::from_secs(5)),
    );
    let opts = FetchOptions {
        workers: 2,
        timeout: Duration::from_millis(200),
    };

    let started = Instant::now();
    let summary = fetch_all(
        &provider,
        &symbols(&["FAST", "SLOW"]),
        window(),
        &opts,
        &NoProgress,
        &CancelToken::new(),
    );

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(summary.series.contains_key("FAST"));
    assert_eq!(summary.failures.len(), 1);
    assert!(matches!(
        &summary.failures[0].error,
        FetchError::Timeout { symbol, .. } if symbol == "SLOW"
    ));
}

#[test]
fn result_is_independent_of_completion_order() {
    let provider: Arc<dyn DataProvider> = Arc::new(
        FixtureProvider::new()
            .with_bars("AAA", vec![flat_bar(d(3), 1.0)])
            .with_bars("BBB", vec![flat_bar(d(3), 2.0)])
            .with_bars("CCC", vec![flat_bar(d(3), 3.0)])
            .with_delay("AAA", Duration::from_millis(80)),
    );
    let opts = FetchOptions {
        workers: 3,
        ..FetchOptions::default()
    };

    let summary = fetch_all(
        &provider,
        &symbols(&["CCC", "AAA", "BBB"]),
        window(),
        &opts,
        &NoProgress,
        &CancelToken::new(),
    );

    assert_eq!(summary.series.keys().collect::<Vec<_>>(), vec!["AAA", "BBB", "CCC"]);
}

#[test]
fn cancelled_run_fetches_nothing() {
    let fixture = Arc::new(FixtureProvider::new().with_bars("AAA", vec![flat_bar(d(3), 1.0)]));
    let provider: Arc<dyn DataProvider> = fixture.clone();
    let cancel = CancelToken::new();
    cancel.cancel();

    let summary = fetch_all(
        &provider,
        &symbols(&["AAA", "BBB"]),
        window(),
        &FetchOptions::default(),
        &NoProgress,
        &cancel,
    );

    assert_eq!(fixture.calls(), 0);
    assert_eq!(summary.failures.len(), 2);
    assert!(summary
        .failures
        .iter()
        .all(|f| matches!(f.error, FetchError::Cancelled { .. })));
}

#[test]
fn unknown_symbol_is_isolated() {
    let provider: Arc<dyn DataProvider> =
        Arc::new(FixtureProvider::new().with_bars("AAA", vec![flat_bar(d(3), 1.0)]));

    let summary = fetch_all(
        &provider,
        &symbols(&["AAA", "DELISTED"]),
        window(),
        &FetchOptions {
            workers: 1,
            ..FetchOptions::default()
        },
        &NoProgress,
        &CancelToken::new(),
    );

    assert_eq!(summary.series.len(), 1);
    assert!(matches!(summary.failures[0].error, FetchError::SymbolNotFound { .. }));
}
