//! Domain types for indexflow

pub mod observation;
pub mod run;

pub use observation::{symbol_ranges, Batch, DerivedBar};
pub use run::{CancelToken, DateWindow, RunStamp};
