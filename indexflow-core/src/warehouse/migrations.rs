//! Warehouse schema migrations, tracked by name.

use super::LoadError;
use duckdb::Connection;

pub fn run_migrations(conn: &Connection, table: &str) -> Result<(), LoadError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            name VARCHAR PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )?;

    run_migration(conn, &format!("001_{table}"), &create_prices(table))?;

    tracing::debug!(table, "warehouse migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<(), LoadError> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM migrations WHERE name = ?",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!(migration = name, "running warehouse migration");
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

/// (DATE, SYMBOL) has no table constraint; uniqueness is kept by the merge
/// transaction, which deletes a key range before re-inserting it.
fn create_prices(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    "DATE" DATE NOT NULL,
    "SYMBOL" VARCHAR NOT NULL,
    "OPEN" DOUBLE,
    "HIGH" DOUBLE,
    "LOW" DOUBLE,
    "CLOSE" DOUBLE,
    "ADJ_CLOSE" DOUBLE,
    "VOLUME" BIGINT,
    "CLOSE_CHANGE" DOUBLE,
    "CLOSE_PCT_CHANGE" DOUBLE,
    "DAILY_RANGE" DOUBLE,
    "DAILY_RANGE_PCT" DOUBLE
);
"#
    )
}
