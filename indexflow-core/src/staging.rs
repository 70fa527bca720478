//! Durable staging store for run batches.
//!
//! Layout: `{root}/run={YYYYMMDDTHHMMSSZ}/prices.parquet` plus a `meta.json`
//! sidecar. One directory per run stamp, so different periods never collide
//! and a retry of the same period replaces its own attempt.
//!
//! Writes are atomic (write to `.tmp`, rename into place). Reads validate the
//! column layout and, when a sidecar is present, the content hash.

use crate::data::schema::{SchemaError, WarehouseSchema};
use crate::domain::{Batch, DerivedBar, RunStamp};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ARTIFACT_FILE: &str = "prices.parquet";
const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staging I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("parquet: {0}")]
    Parquet(String),

    #[error("artifact schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("artifact sidecar: {0}")]
    Meta(String),

    #[error("artifact {path} content hash {actual} does not match sidecar {expected}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("artifact row {row}: {reason}")]
    Row { row: usize, reason: String },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StagingError + '_ {
    move |source| StagingError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Sidecar describing one staged artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub run: String,
    pub row_count: usize,
    pub symbol_count: usize,
    pub symbols: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub content_hash: String,
    pub written_at: DateTime<Utc>,
}

/// Location and description of a written artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub meta: ArtifactMeta,
}

pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, stamp: &RunStamp) -> PathBuf {
        self.root.join(format!("run={}", stamp.compact()))
    }

    /// Where the artifact for `stamp` lives, whether or not it exists yet.
    pub fn artifact_path(&self, stamp: &RunStamp) -> PathBuf {
        self.run_dir(stamp).join(ARTIFACT_FILE)
    }

    fn meta_path(artifact: &Path) -> PathBuf {
        artifact.with_file_name(META_FILE)
    }

    /// Write `batch` as the artifact for `stamp`. An empty batch still yields a
    /// valid, empty artifact.
    pub fn write(&self, stamp: &RunStamp, batch: &Batch) -> Result<StagedArtifact, StagingError> {
        let dir = self.run_dir(stamp);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let mut df = batch_to_dataframe(batch.rows())?;
        let mut bytes = Vec::new();
        ParquetWriter::new(&mut bytes)
            .finish(&mut df)
            .map_err(|e| StagingError::Parquet(format!("write: {e}")))?;

        let path = dir.join(ARTIFACT_FILE);
        let date_range = batch.date_range();
        let meta = ArtifactMeta {
            run: stamp.compact(),
            row_count: batch.len(),
            symbol_count: batch.symbols().len(),
            symbols: batch.symbols().into_iter().map(String::from).collect(),
            start_date: date_range.map(|(start, _)| start),
            end_date: date_range.map(|(_, end)| end),
            content_hash: blake3::hash(&bytes).to_hex().to_string(),
            written_at: Utc::now(),
        };
        let meta_json =
            serde_json::to_string_pretty(&meta).map_err(|e| StagingError::Meta(e.to_string()))?;

        // Both temp files land before anything is replaced, so a failed
        // retry leaves the previous artifact and sidecar untouched.
        let tmp_path = path.with_extension("parquet.tmp");
        let meta_path = Self::meta_path(&path);
        let meta_tmp = meta_path.with_extension("json.tmp");
        fs::write(&tmp_path, &bytes).map_err(io_err(&tmp_path))?;
        if let Err(e) = fs::write(&meta_tmp, meta_json) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StagingError::Io {
                path: meta_tmp,
                source: e,
            });
        }

        // A stale sidecar must not outlive the data it describes.
        if meta_path.exists() {
            fs::remove_file(&meta_path).map_err(io_err(&meta_path))?;
        }
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StagingError::Io {
                path: path.clone(),
                source: e,
            }
        })?;
        fs::rename(&meta_tmp, &meta_path).map_err(io_err(&meta_path))?;

        tracing::info!(path = %path.display(), rows = meta.row_count, symbols = meta.symbol_count, "staged batch");
        Ok(StagedArtifact { path, meta })
    }

    /// Sidecar for an artifact, if one was written beside it.
    pub fn read_meta(&self, artifact: &Path) -> Result<Option<ArtifactMeta>, StagingError> {
        let meta_path = Self::meta_path(artifact);
        if !meta_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&meta_path).map_err(io_err(&meta_path))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StagingError::Meta(format!("{}: {e}", meta_path.display())))
    }

    /// Read an artifact back into a batch.
    pub fn read(&self, artifact: &Path) -> Result<Batch, StagingError> {
        if !artifact.is_file() {
            return Err(StagingError::NotFound(artifact.to_path_buf()));
        }
        let bytes = fs::read(artifact).map_err(io_err(artifact))?;

        match self.read_meta(artifact)? {
            Some(meta) => {
                let actual = blake3::hash(&bytes).to_hex().to_string();
                if actual != meta.content_hash {
                    return Err(StagingError::HashMismatch {
                        path: artifact.to_path_buf(),
                        expected: meta.content_hash,
                        actual,
                    });
                }
            }
            None => tracing::warn!(path = %artifact.display(), "artifact has no sidecar; skipping hash check"),
        }

        let df = ParquetReader::new(Cursor::new(bytes))
            .finish()
            .map_err(|e| StagingError::Parquet(format!("read: {e}")))?;
        WarehouseSchema::validate(&df)?;
        let rows = dataframe_to_rows(&df)?;

        let mut seen = HashSet::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if !seen.insert(row.key()) {
                return Err(StagingError::Row {
                    row: i,
                    reason: format!("duplicate key ({}, {})", row.date, row.symbol),
                });
            }
        }
        drop(seen);
        Ok(Batch::from_rows(rows))
    }

    /// Every artifact under the root, newest run first.
    pub fn list(&self) -> Result<Vec<StagedArtifact>, StagingError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("run=") {
                continue;
            }
            let path = entry.path().join(ARTIFACT_FILE);
            if !path.is_file() {
                continue;
            }
            match self.read_meta(&path) {
                Ok(Some(meta)) => out.push(StagedArtifact { path, meta }),
                Ok(None) => tracing::warn!(path = %path.display(), "artifact without sidecar"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "unreadable sidecar"),
            }
        }
        out.sort_by(|a, b| b.meta.run.cmp(&a.meta.run));
        Ok(out)
    }
}

// ── Parquet conversion ──────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn batch_to_dataframe(rows: &[DerivedBar]) -> Result<DataFrame, StagingError> {
    let dates: Vec<i32> = rows
        .iter()
        .map(|r| (r.date - epoch()).num_days() as i32)
        .collect();
    let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
    let f = |get: fn(&DerivedBar) -> f64| rows.iter().map(get).collect::<Vec<f64>>();
    let opt = |get: fn(&DerivedBar) -> Option<f64>| rows.iter().map(get).collect::<Vec<Option<f64>>>();
    let volumes: Vec<u64> = rows.iter().map(|r| r.volume).collect();

    DataFrame::new(vec![
        Column::new("DATE".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| StagingError::Parquet(format!("date cast: {e}")))?,
        Column::new("SYMBOL".into(), symbols),
        Column::new("OPEN".into(), f(|r| r.open)),
        Column::new("HIGH".into(), f(|r| r.high)),
        Column::new("LOW".into(), f(|r| r.low)),
        Column::new("CLOSE".into(), f(|r| r.close)),
        Column::new("ADJ_CLOSE".into(), f(|r| r.adj_close)),
        Column::new("VOLUME".into(), volumes),
        Column::new("CLOSE_CHANGE".into(), opt(|r| r.close_change)),
        Column::new("CLOSE_PCT_CHANGE".into(), opt(|r| r.close_pct_change)),
        Column::new("DAILY_RANGE".into(), opt(|r| r.daily_range)),
        Column::new("DAILY_RANGE_PCT".into(), opt(|r| r.daily_range_pct)),
    ])
    .map_err(|e| StagingError::Parquet(format!("dataframe creation: {e}")))
}

fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<DerivedBar>, StagingError> {
    let col_err = |e: PolarsError| StagingError::Parquet(format!("column read: {e}"));
    let f64_col = |name: &str| -> Result<Float64Chunked, StagingError> {
        Ok(df.column(name).map_err(col_err)?.f64().map_err(col_err)?.clone())
    };

    let dates = df.column("DATE").map_err(col_err)?.date().map_err(col_err)?.clone();
    let symbols = df.column("SYMBOL").map_err(col_err)?.str().map_err(col_err)?.clone();
    let volumes = df.column("VOLUME").map_err(col_err)?.u64().map_err(col_err)?.clone();
    let open = f64_col("OPEN")?;
    let high = f64_col("HIGH")?;
    let low = f64_col("LOW")?;
    let close = f64_col("CLOSE")?;
    let adj_close = f64_col("ADJ_CLOSE")?;
    let close_change = f64_col("CLOSE_CHANGE")?;
    let close_pct_change = f64_col("CLOSE_PCT_CHANGE")?;
    let daily_range = f64_col("DAILY_RANGE")?;
    let daily_range_pct = f64_col("DAILY_RANGE_PCT")?;

    let missing = |row: usize, column: &str| StagingError::Row {
        row,
        reason: format!("null {column}"),
    };

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = dates.get(i).ok_or_else(|| missing(i, "DATE"))?;
        rows.push(DerivedBar {
            symbol: symbols.get(i).ok_or_else(|| missing(i, "SYMBOL"))?.to_string(),
            date: epoch() + chrono::Duration::days(i64::from(days)),
            open: open.get(i).unwrap_or(f64::NAN),
            high: high.get(i).unwrap_or(f64::NAN),
            low: low.get(i).unwrap_or(f64::NAN),
            close: close.get(i).unwrap_or(f64::NAN),
            adj_close: adj_close.get(i).unwrap_or(f64::NAN),
            volume: volumes.get(i).unwrap_or(0),
            close_change: close_change.get(i),
            close_pct_change: close_pct_change.get(i),
            daily_range: daily_range.get(i),
            daily_range_pct: daily_range_pct.get(i),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp() -> RunStamp {
        RunStamp::parse("2024-06-04T21:30:00Z").unwrap()
    }

    #[test]
    fn artifact_path_is_keyed_by_run() {
        let store = StagingStore::new("/staging");
        assert_eq!(
            store.artifact_path(&stamp()),
            PathBuf::from("/staging/run=20240604T213000Z/prices.parquet")
        );
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::new(dir.path());
        let err = store.read(&store.artifact_path(&stamp())).unwrap_err();
        assert!(matches!(err, StagingError::NotFound(_)));
    }

    #[test]
    fn empty_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::new(dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }
}
