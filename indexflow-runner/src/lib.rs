//! IndexFlow Runner: configuration and orchestration of the daily pipeline.
//!
//! Builds on `indexflow-core` to provide:
//! - TOML pipeline configuration with defaults and validation
//! - Run context carrying the run stamp, window, cancellation and artifact handoff
//! - The resolve → fetch → derive → stage → load state machine
//! - JSONL run history

pub mod config;
pub mod context;
pub mod history;
pub mod pipeline;
pub mod report;

pub use config::{ConfigError, MembershipKind, PipelineConfig};
pub use context::{RunContext, RunState, Step, Transition};
pub use history::RunHistory;
pub use pipeline::{Pipeline, RunError, StepError};
pub use report::{FailedEntity, RunReport};
