//! Pipeline configuration, loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration that tracks S&P 500 membership from the public constituents
//! CSV and writes to `staging/` and `warehouse.duckdb` in the working directory.

use indexflow_core::data::{
    CircuitBreaker, CsvFileMembership, CsvUrlMembership, DataProvider, FetchOptions,
    MembershipSource, StaticMembership, YahooProvider, YahooSettings,
};
use indexflow_core::resolver::{default_aliases, EntityResolver};
use indexflow_core::warehouse::is_plain_identifier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Ten years of calendar days.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;
pub const MAX_RETRIES: u32 = 10;

pub const DEFAULT_MEMBERSHIP_URL: &str =
    "https://raw.githubusercontent.com/datasets/s-and-p-500-companies/main/data/constituents.csv";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config serialize error: {0}")]
    Serialize(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot build {component}: {reason}")]
    Build { component: &'static str, reason: String },
}

/// Where the membership table comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipKind {
    #[default]
    CsvUrl,
    CsvFile,
    /// `static_symbols` verbatim.
    Static,
    /// A sector-organized TOML universe file at `location`.
    Universe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub source: MembershipKind,
    pub location: String,
    pub identifier_aliases: Vec<String>,
    pub normalize_share_class: bool,
    pub static_symbols: Vec<String>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            source: MembershipKind::CsvUrl,
            location: DEFAULT_MEMBERSHIP_URL.to_string(),
            identifier_aliases: default_aliases(),
            normalize_share_class: true,
            static_symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Calendar days before the run date to request.
    pub lookback_days: u32,
    pub workers: usize,
    /// Deadline for one symbol, retries included.
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            lookback_days: 5,
            workers: 8,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub root: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("staging"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub path: PathBuf,
    pub table: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warehouse.duckdb"),
            table: "stock_prices".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("runs.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub membership: MembershipConfig,
    pub fetch: FetchConfig,
    pub staging: StagingConfig,
    pub warehouse: WarehouseConfig,
    pub history: HistoryConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.fetch.workers == 0 {
            return invalid("fetch.workers must be at least 1");
        }
        if self.fetch.timeout_secs == 0 {
            return invalid("fetch.timeout_secs must be at least 1");
        }
        if self.fetch.lookback_days == 0 {
            return invalid("fetch.lookback_days must be at least 1");
        }
        if self.fetch.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ConfigError::Invalid(format!(
                "fetch.lookback_days must be at most {MAX_LOOKBACK_DAYS}"
            )));
        }
        if self.fetch.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "fetch.max_retries must be at most {MAX_RETRIES}"
            )));
        }
        if self.membership.identifier_aliases.iter().all(|a| a.trim().is_empty()) {
            return invalid("membership.identifier_aliases must name at least one column");
        }
        match self.membership.source {
            MembershipKind::Static if self.membership.static_symbols.is_empty() => {
                return invalid("membership.static_symbols is empty for the static source");
            }
            MembershipKind::CsvUrl | MembershipKind::CsvFile | MembershipKind::Universe
                if self.membership.location.trim().is_empty() =>
            {
                return invalid("membership.location is required for this source");
            }
            _ => {}
        }
        if !is_plain_identifier(&self.warehouse.table) {
            return Err(ConfigError::Invalid(format!(
                "warehouse.table '{}' is not a plain SQL identifier",
                self.warehouse.table
            )));
        }
        Ok(())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            workers: self.fetch.workers,
            timeout: Duration::from_secs(self.fetch.timeout_secs),
        }
    }

    /// Per-request HTTP timeout: the symbol deadline split across every
    /// attempt, so a detached fetch stops retrying near the deadline.
    pub fn request_timeout(&self) -> Duration {
        let attempts = self.fetch.max_retries.saturating_add(1);
        (Duration::from_secs(self.fetch.timeout_secs) / attempts).max(Duration::from_secs(1))
    }

    pub fn membership_source(&self) -> Result<Box<dyn MembershipSource>, ConfigError> {
        let m = &self.membership;
        let source: Box<dyn MembershipSource> = match m.source {
            MembershipKind::CsvUrl => Box::new(
                CsvUrlMembership::new(&m.location, Duration::from_secs(self.fetch.timeout_secs))
                    .map_err(|e| ConfigError::Build {
                        component: "membership source",
                        reason: e.to_string(),
                    })?,
            ),
            MembershipKind::CsvFile => Box::new(CsvFileMembership::new(&m.location)),
            MembershipKind::Static => Box::new(StaticMembership::new(m.static_symbols.clone())),
            MembershipKind::Universe => {
                let content = std::fs::read_to_string(&m.location).map_err(|source| ConfigError::Read {
                    path: PathBuf::from(&m.location),
                    source,
                })?;
                Box::new(StaticMembership::from_universe_toml(&content).map_err(|e| {
                    ConfigError::Build {
                        component: "universe",
                        reason: e.to_string(),
                    }
                })?)
            }
        };
        Ok(source)
    }

    pub fn resolver(&self) -> Result<EntityResolver, ConfigError> {
        Ok(EntityResolver::new(self.membership_source()?)
            .with_aliases(self.membership.identifier_aliases.clone())
            .with_share_class_normalization(self.membership.normalize_share_class))
    }

    pub fn provider(&self) -> Result<Arc<dyn DataProvider>, ConfigError> {
        let settings = YahooSettings {
            request_timeout: self.request_timeout(),
            max_retries: self.fetch.max_retries,
            ..YahooSettings::default()
        };
        let provider = YahooProvider::new(Arc::new(CircuitBreaker::default_provider()), settings)
            .map_err(|e| ConfigError::Build {
                component: "market-data provider",
                reason: e.to_string(),
            })?;
        Ok(Arc::new(provider))
    }
}
