//! Data ingestion: membership sources, market-data providers and the fetch pool

pub mod canonicalize;
pub mod circuit_breaker;
pub mod fetch;
pub mod fixture;
pub mod membership;
pub mod provider;
pub mod schema;
pub mod yahoo;

pub use canonicalize::{canonicalize, Cleaned};
pub use circuit_breaker::CircuitBreaker;
pub use fetch::{fetch_all, FetchFailure, FetchOptions, FetchOutcome, FetchSummary};
pub use fixture::FixtureProvider;
pub use membership::{
    CsvFileMembership, CsvUrlMembership, MembershipSource, MembershipTable, StaticMembership,
};
pub use provider::{DataProvider, FetchError, FetchProgress, LogProgress, NoProgress, RawBar};
pub use schema::{SchemaError, WarehouseSchema, COLUMNS};
pub use yahoo::{YahooProvider, YahooSettings};
