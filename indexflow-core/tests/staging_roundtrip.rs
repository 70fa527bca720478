//! Staging store: artifact layout, empty batches, corruption detection.

use chrono::NaiveDate;
use indexflow_core::domain::{Batch, DerivedBar, RunStamp};
use indexflow_core::staging::{StagingError, StagingStore};

fn bar(symbol: &str, day: u32, close: f64, change: Option<f64>) -> DerivedBar {
    DerivedBar {
        symbol: symbol.into(),
        date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        adj_close: close,
        volume: 1_000,
        close_change: change,
        close_pct_change: change.map(|c| c / (close - c) * 100.0),
        daily_range: Some(1.0),
        daily_range_pct: Some(100.0 / close),
    }
}

fn stamp(s: &str) -> RunStamp {
    RunStamp::parse(s).unwrap()
}

#[test]
fn written_batch_reads_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let store = StagingStore::new(dir.path());
    let batch = Batch::from_rows(vec![
        bar("AAA", 3, 10.0, None),
        bar("AAA", 4, 11.0, Some(1.0)),
        bar("BBB", 3, 7.0, None),
    ]);

    let artifact = store.write(&stamp("2024-06-04T21:30:00Z"), &batch).unwrap();

    assert!(artifact.path.ends_with("run=20240604T213000Z/prices.parquet"));
    assert_eq!(artifact.meta.row_count, 3);
    assert_eq!(artifact.meta.symbols, vec!["AAA", "BBB"]);
    assert_eq!(store.read(&artifact.path).unwrap(), batch);
}

#[test]
fn empty_batch_produces_valid_empty_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let store = StagingStore::new(dir.path());

    let artifact = store.write(&stamp("2024-06-04T21:30:00Z"), &Batch::empty()).unwrap();

    assert!(artifact.path.is_file());
    assert_eq!(artifact.meta.row_count, 0);
    assert_eq!(artifact.meta.start_date, None);
    assert!(store.read(&artifact.path).unwrap().is_empty());
}

#[test]
fn different_runs_never_collide_and_retries_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = StagingStore::new(dir.path());
    let first = Batch::from_rows(vec![bar("AAA", 3, 10.0, None)]);
    let retry = Batch::from_rows(vec![bar("AAA", 3, 10.0, None), bar("AAA", 4, 11.0, Some(1.0))]);

    let a = store.write(&stamp("2024-06-03T21:30:00Z"), &first).unwrap();
    let b = store.write(&stamp("2024-06-04T21:30:00Z"), &first).unwrap();
    assert_ne!(a.path, b.path);

    let b2 = store.write(&stamp("2024-06-04T21:30:00Z"), &retry).unwrap();
    assert_eq!(b.path, b2.path);
    assert_eq!(store.read(&b2.path).unwrap().len(), 2);

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].meta.run, "20240604T213000Z");
}

#[test]
fn tampered_artifact_fails_hash_check() {
    let dir = tempfile::tempdir().unwrap();
    let store = StagingStore::new(dir.path());
    let artifact = store
        .write(&stamp("2024-06-04T21:30:00Z"), &Batch::from_rows(vec![bar("AAA", 3, 10.0, None)]))
        .unwrap();

    let mut bytes = std::fs::read(&artifact.path).unwrap();
    bytes.push(0);
    std::fs::write(&artifact.path, bytes).unwrap();

    assert!(matches!(
        store.read(&artifact.path),
        Err(StagingError::HashMismatch { .. })
    ));
}

#[test]
fn unwritable_root_is_a_staging_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();
    let store = StagingStore::new(&blocker);

    let err = store
        .write(&stamp("2024-06-04T21:30:00Z"), &Batch::empty())
        .unwrap_err();
    assert!(matches!(err, StagingError::Io { .. }));
}

#[test]
fn failed_retry_keeps_previous_artifact_loadable() {
    let dir = tempfile::tempdir().unwrap();
    let store = StagingStore::new(dir.path());
    let run = stamp("2024-06-04T21:30:00Z");
    let first = Batch::from_rows(vec![bar("AAA", 3, 10.0, None)]);
    let artifact = store.write(&run, &first).unwrap();

    // Block the sidecar temp file so the retry fails midway.
    std::fs::create_dir(artifact.path.with_file_name("meta.json.tmp")).unwrap();
    let retry = Batch::from_rows(vec![bar("AAA", 3, 10.0, None), bar("AAA", 4, 11.0, Some(1.0))]);
    let err = store.write(&run, &retry).unwrap_err();
    assert!(matches!(err, StagingError::Io { .. }));

    assert_eq!(store.read(&artifact.path).unwrap(), first);
    assert!(!artifact.path.with_extension("parquet.tmp").exists());
    assert_eq!(store.list().unwrap()[0].meta, artifact.meta);
}
