//! Persistent analytical store and the idempotent loader.
//!
//! Only [`WarehouseLoader`] writes the table. A load reads a staged artifact
//! back and merges it in one transaction: for every symbol in the artifact the
//! rows inside that symbol's date range are deleted, then every artifact row is
//! inserted. Reloading the same artifact, or one overlapping it, therefore
//! leaves exactly one row per (date, symbol). Rows of symbols the artifact
//! does not carry are never touched.

pub mod duck;
mod migrations;

pub use duck::DuckWarehouse;

use crate::domain::DerivedBar;
use crate::staging::{StagingError, StagingStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fatal for the run: the artifact was not merged and the table is unchanged.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("artifact unusable: {0}")]
    Artifact(#[from] StagingError),

    #[error("duplicate key ({date}, {symbol}) in load input")]
    DuplicateKey { symbol: String, date: NaiveDate },

    #[error("table '{table}' schema mismatch: expected {expected:?}, found {found:?}")]
    TableSchema {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    #[error("row {symbol} {date}: {reason}")]
    Row {
        symbol: String,
        date: String,
        reason: String,
    },

    #[error("warehouse unavailable: {0}")]
    Unavailable(String),

    #[error("warehouse: {0}")]
    Database(#[from] duckdb::Error),
}

/// What a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub deleted: usize,
    pub inserted: usize,
}

/// Row count and date coverage of one symbol in the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub rows: u64,
    pub first: NaiveDate,
    pub last: NaiveDate,
}

pub trait Warehouse: Send + Sync {
    /// Apply `rows` as one all-or-nothing merge.
    fn merge(&self, rows: &[DerivedBar]) -> Result<MergeReport, LoadError>;

    fn row_count(&self) -> Result<u64, LoadError>;

    /// Every row, ordered by symbol then date.
    fn rows(&self) -> Result<Vec<DerivedBar>, LoadError>;

    fn rows_for(&self, symbol: &str) -> Result<Vec<DerivedBar>, LoadError>;

    fn symbol_summary(&self) -> Result<Vec<SymbolSummary>, LoadError>;
}

/// A table name safe to splice into SQL: ASCII letters, digits and
/// underscores, not starting with a digit.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject input that would violate (date, symbol) uniqueness.
pub fn check_unique_keys(rows: &[DerivedBar]) -> Result<(), LoadError> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.key()) {
            return Err(LoadError::DuplicateKey {
                symbol: row.symbol.clone(),
                date: row.date,
            });
        }
    }
    Ok(())
}

/// Outcome of loading one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub artifact: PathBuf,
    pub rows: usize,
    pub merge: MergeReport,
}

impl LoadReport {
    /// An empty artifact loads as a no-op.
    pub fn is_noop(&self) -> bool {
        self.rows == 0
    }
}

/// Moves staged artifacts into the warehouse.
pub struct WarehouseLoader<'a> {
    store: &'a StagingStore,
    warehouse: &'a dyn Warehouse,
}

impl<'a> WarehouseLoader<'a> {
    pub fn new(store: &'a StagingStore, warehouse: &'a dyn Warehouse) -> Self {
        Self { store, warehouse }
    }

    pub fn load(&self, artifact: &Path) -> Result<LoadReport, LoadError> {
        let batch = self.store.read(artifact)?;
        if batch.is_empty() {
            tracing::info!(artifact = %artifact.display(), "empty artifact; nothing to load");
            return Ok(LoadReport {
                artifact: artifact.to_path_buf(),
                rows: 0,
                merge: MergeReport::default(),
            });
        }

        let merge = self.warehouse.merge(batch.rows())?;
        tracing::info!(
            artifact = %artifact.display(),
            rows = batch.len(),
            deleted = merge.deleted,
            inserted = merge.inserted,
            "artifact merged"
        );
        Ok(LoadReport {
            artifact: artifact.to_path_buf(),
            rows: batch.len(),
            merge,
        })
    }
}
