//! DuckDB-backed warehouse.

use super::{
    check_unique_keys, is_plain_identifier, migrations, LoadError, MergeReport, SymbolSummary,
    Warehouse,
};
use crate::data::schema::COLUMNS;
use crate::domain::{symbol_ranges, DerivedBar};
use chrono::NaiveDate;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct DuckWarehouse {
    conn: Mutex<Connection>,
    table: String,
}

/// One table row as DuckDB hands it back, before date and volume conversion.
struct StoredRow {
    date: String,
    symbol: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    adj_close: Option<f64>,
    volume: Option<i64>,
    close_change: Option<f64>,
    close_pct_change: Option<f64>,
    daily_range: Option<f64>,
    daily_range_pct: Option<f64>,
}

impl StoredRow {
    fn into_bar(self) -> Result<DerivedBar, LoadError> {
        let bad = |reason: String| LoadError::Row {
            symbol: self.symbol.clone(),
            date: self.date.clone(),
            reason,
        };
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|e| bad(format!("unparseable date: {e}")))?;
        let volume = u64::try_from(self.volume.unwrap_or(0))
            .map_err(|_| bad(format!("negative volume {:?}", self.volume)))?;

        Ok(DerivedBar {
            symbol: self.symbol,
            date,
            open: self.open.unwrap_or(f64::NAN),
            high: self.high.unwrap_or(f64::NAN),
            low: self.low.unwrap_or(f64::NAN),
            close: self.close.unwrap_or(f64::NAN),
            adj_close: self.adj_close.unwrap_or(f64::NAN),
            volume,
            close_change: self.close_change,
            close_pct_change: self.close_pct_change,
            daily_range: self.daily_range,
            daily_range_pct: self.daily_range_pct,
        })
    }
}

fn nullable(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn quoted_columns() -> String {
    COLUMNS
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

impl DuckWarehouse {
    pub fn open(path: &Path, table: &str) -> Result<Self, LoadError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| LoadError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        Self::init(Connection::open(path)?, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, LoadError> {
        Self::init(Connection::open_in_memory()?, table)
    }

    fn init(conn: Connection, table: &str) -> Result<Self, LoadError> {
        if !is_plain_identifier(table) {
            return Err(LoadError::InvalidTable(table.to_string()));
        }
        migrations::run_migrations(&conn, table)?;
        let warehouse = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        };
        warehouse.verify_schema()?;
        Ok(warehouse)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A pre-existing table with different columns is refused up front.
    fn verify_schema(&self) -> Result<(), LoadError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT column_name FROM information_schema.columns
             WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let found = stmt
            .query_map([self.table.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let matches = found.len() == COLUMNS.len()
            && found.iter().zip(COLUMNS).all(|(f, e)| f.eq_ignore_ascii_case(e));
        if !matches {
            return Err(LoadError::TableSchema {
                table: self.table.clone(),
                expected: COLUMNS.iter().map(|c| c.to_string()).collect(),
                found,
            });
        }
        Ok(())
    }

    fn select_rows(&self, filter: Option<&str>) -> Result<Vec<DerivedBar>, LoadError> {
        let conn = self.lock();
        let where_clause = if filter.is_some() { "WHERE \"SYMBOL\" = ?" } else { "" };
        let sql = format!(
            "SELECT CAST(\"DATE\" AS VARCHAR), \"SYMBOL\", \"OPEN\", \"HIGH\", \"LOW\", \"CLOSE\",
                    \"ADJ_CLOSE\", \"VOLUME\", \"CLOSE_CHANGE\", \"CLOSE_PCT_CHANGE\",
                    \"DAILY_RANGE\", \"DAILY_RANGE_PCT\"
             FROM {} {where_clause}
             ORDER BY \"SYMBOL\", \"DATE\"",
            self.table
        );
        let mut stmt = conn.prepare(&sql)?;
        let map = |row: &duckdb::Row<'_>| -> duckdb::Result<StoredRow> {
            Ok(StoredRow {
                date: row.get(0)?,
                symbol: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                adj_close: row.get(6)?,
                volume: row.get(7)?,
                close_change: row.get(8)?,
                close_pct_change: row.get(9)?,
                daily_range: row.get(10)?,
                daily_range_pct: row.get(11)?,
            })
        };
        let stored = match filter {
            Some(symbol) => stmt.query_map([symbol], map)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?,
        };
        stored.into_iter().map(StoredRow::into_bar).collect()
    }
}

impl Warehouse for DuckWarehouse {
    fn merge(&self, rows: &[DerivedBar]) -> Result<MergeReport, LoadError> {
        check_unique_keys(rows)?;
        if rows.is_empty() {
            return Ok(MergeReport::default());
        }

        let mut volumes = Vec::with_capacity(rows.len());
        for row in rows {
            let volume = i64::try_from(row.volume).map_err(|_| LoadError::Row {
                symbol: row.symbol.clone(),
                date: row.date.to_string(),
                reason: format!("volume {} exceeds BIGINT", row.volume),
            })?;
            volumes.push(volume);
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut report = MergeReport::default();
        let mut delete = tx.prepare(&format!(
            "DELETE FROM {} WHERE \"SYMBOL\" = ?
               AND \"DATE\" BETWEEN CAST(? AS DATE) AND CAST(? AS DATE)",
            self.table
        ))?;
        for (symbol, (first, last)) in symbol_ranges(rows) {
            report.deleted += delete.execute(duckdb::params![
                symbol,
                first.to_string(),
                last.to_string()
            ])?;
        }
        drop(delete);

        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES (CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table,
            quoted_columns()
        ))?;
        for (row, volume) in rows.iter().zip(volumes) {
            insert.execute(duckdb::params![
                row.date.to_string(),
                row.symbol,
                nullable(row.open),
                nullable(row.high),
                nullable(row.low),
                nullable(row.close),
                nullable(row.adj_close),
                volume,
                row.close_change.and_then(nullable),
                row.close_pct_change.and_then(nullable),
                row.daily_range.and_then(nullable),
                row.daily_range_pct.and_then(nullable),
            ])?;
            report.inserted += 1;
        }
        drop(insert);

        tx.commit()?;
        tracing::debug!(table = %self.table, deleted = report.deleted, inserted = report.inserted, "merge committed");
        Ok(report)
    }

    fn row_count(&self) -> Result<u64, LoadError> {
        let conn = self.lock();
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(count.max(0) as u64)
    }

    fn rows(&self) -> Result<Vec<DerivedBar>, LoadError> {
        self.select_rows(None)
    }

    fn rows_for(&self, symbol: &str) -> Result<Vec<DerivedBar>, LoadError> {
        self.select_rows(Some(symbol))
    }

    fn symbol_summary(&self) -> Result<Vec<SymbolSummary>, LoadError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT \"SYMBOL\", COUNT(*), CAST(MIN(\"DATE\") AS VARCHAR), CAST(MAX(\"DATE\") AS VARCHAR)
             FROM {} GROUP BY \"SYMBOL\" ORDER BY \"SYMBOL\"",
            self.table
        ))?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(symbol, rows, first, last)| {
                let parse = |s: &str| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| LoadError::Row {
                        symbol: symbol.clone(),
                        date: s.to_string(),
                        reason: format!("unparseable date: {e}"),
                    })
                };
                Ok(SymbolSummary {
                    first: parse(&first)?,
                    last: parse(&last)?,
                    rows: rows.max(0) as u64,
                    symbol,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(symbol: &str, day: u32, close: f64) -> DerivedBar {
        DerivedBar {
            symbol: symbol.into(),
            date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            adj_close: close,
            volume: 500,
            close_change: None,
            close_pct_change: None,
            daily_range: Some(2.0),
            daily_range_pct: Some(2.0 / close * 100.0),
        }
    }

    #[test]
    fn opens_and_starts_empty() {
        let wh = DuckWarehouse::open_in_memory("stock_prices").unwrap();
        assert_eq!(wh.table(), "stock_prices");
        assert_eq!(wh.row_count().unwrap(), 0);
        assert!(wh.symbol_summary().unwrap().is_empty());
    }

    #[test]
    fn rejects_unsafe_table_name() {
        assert!(matches!(
            DuckWarehouse::open_in_memory("prices;drop"),
            Err(LoadError::InvalidTable(_))
        ));
    }

    #[test]
    fn rows_round_trip_through_table() {
        let wh = DuckWarehouse::open_in_memory("stock_prices").unwrap();
        let mut second = bar("AAA", 4, 11.0);
        second.close_change = Some(1.0);
        second.close_pct_change = Some(10.0);
        wh.merge(&[bar("AAA", 3, 10.0), second.clone()]).unwrap();

        let rows = wh.rows_for("AAA").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], second);
        assert_eq!(rows[0].close_change, None);
    }

    #[test]
    fn non_finite_prices_stored_as_null() {
        let wh = DuckWarehouse::open_in_memory("stock_prices").unwrap();
        let mut b = bar("AAA", 3, 10.0);
        b.open = f64::NAN;
        wh.merge(&[b]).unwrap();
        assert!(wh.rows_for("AAA").unwrap()[0].open.is_nan());
    }

    #[test]
    fn duplicate_input_is_rejected_before_writing() {
        let wh = DuckWarehouse::open_in_memory("stock_prices").unwrap();
        let err = wh.merge(&[bar("AAA", 3, 10.0), bar("AAA", 3, 12.0)]).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateKey { .. }));
        assert_eq!(wh.row_count().unwrap(), 0);
    }

    #[test]
    fn summary_reports_coverage() {
        let wh = DuckWarehouse::open_in_memory("stock_prices").unwrap();
        wh.merge(&[bar("AAA", 3, 10.0), bar("AAA", 5, 10.0), bar("BBB", 4, 7.0)]).unwrap();
        let summary = wh.symbol_summary().unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].symbol, "AAA");
        assert_eq!(summary[0].rows, 2);
        assert_eq!(summary[0].last, NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
    }
}
