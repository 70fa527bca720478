//! IndexFlow Core: domain types and the five pipeline building blocks.
//!
//! - Entity resolution from an index membership table
//! - Per-symbol market-data fetching with failure isolation
//! - Metric derivation (close change, daily range)
//! - Durable Parquet staging keyed by run timestamp
//! - Idempotent (date, symbol) merge into a DuckDB warehouse

pub mod data;
pub mod derive;
pub mod domain;
pub mod resolver;
pub mod staging;
pub mod warehouse;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the orchestrator hands across threads
    /// is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::DerivedBar>();
        require_sync::<domain::DerivedBar>();
        require_send::<domain::Batch>();
        require_sync::<domain::Batch>();
        require_send::<domain::RunStamp>();
        require_sync::<domain::RunStamp>();
        require_send::<domain::CancelToken>();
        require_sync::<domain::CancelToken>();

        require_send::<data::RawBar>();
        require_sync::<data::RawBar>();
        require_send::<data::FetchError>();
        require_sync::<data::FetchError>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();
        require_send::<data::FixtureProvider>();
        require_sync::<data::FixtureProvider>();

        require_send::<resolver::EntityResolver>();
        require_sync::<resolver::EntityResolver>();
        require_send::<staging::StagingStore>();
        require_sync::<staging::StagingStore>();
        require_send::<warehouse::DuckWarehouse>();
        require_sync::<warehouse::DuckWarehouse>();
    }

    /// The warehouse port stays object-safe so the runner can swap backends.
    #[test]
    fn warehouse_trait_is_object_safe() {
        fn _takes_dyn(w: &dyn warehouse::Warehouse) -> Result<u64, warehouse::LoadError> {
            w.row_count()
        }
    }
}
