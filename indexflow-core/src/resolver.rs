//! Entity resolution: the symbols this run will track.
//!
//! Upstream membership tables drift: the identifier column has been published
//! as `Symbol`, `Ticker` and `Ticker symbol`. The resolver tries a configured
//! alias list before giving up, then cleans the column into a non-empty,
//! de-duplicated symbol list in source order.

use crate::data::membership::{MembershipSource, MembershipTable};
use std::collections::HashSet;
use thiserror::Error;

/// Fatal for the run: without entities there is nothing to fetch.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("membership source '{source_name}' unreachable: {reason}")]
    Unreachable { source_name: String, reason: String },

    #[error("membership table unreadable: {0}")]
    Parse(String),

    #[error("no identifier column in membership table (tried {aliases:?}, found {found:?})")]
    MissingIdentifierColumn { aliases: Vec<String>, found: Vec<String> },

    #[error("membership source '{source_name}' yielded no symbols")]
    Empty { source_name: String },
}

pub fn default_aliases() -> Vec<String> {
    ["Symbol", "Ticker", "Ticker symbol", "Ticker Symbol"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub struct EntityResolver {
    source: Box<dyn MembershipSource>,
    aliases: Vec<String>,
    normalize_share_class: bool,
}

impl EntityResolver {
    pub fn new(source: Box<dyn MembershipSource>) -> Self {
        Self {
            source,
            aliases: default_aliases(),
            normalize_share_class: true,
        }
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Rewrite `BRK.B` as `BRK-B`, the form market-data sources expect.
    pub fn with_share_class_normalization(mut self, enabled: bool) -> Self {
        self.normalize_share_class = enabled;
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn resolve(&self) -> Result<Vec<String>, ResolutionError> {
        let table = self.source.fetch_table()?;
        let symbols = self.resolve_table(&table)?;
        tracing::info!(source = self.source.name(), count = symbols.len(), "resolved entities");
        Ok(symbols)
    }

    /// Pick the identifier column and clean it.
    pub fn resolve_table(&self, table: &MembershipTable) -> Result<Vec<String>, ResolutionError> {
        let index = table
            .column_index(&self.aliases)
            .ok_or_else(|| ResolutionError::MissingIdentifierColumn {
                aliases: self.aliases.clone(),
                found: table.headers.clone(),
            })?;

        if let Some(header) = table.headers.get(index) {
            if !self.aliases.first().is_some_and(|a| a.trim().eq_ignore_ascii_case(header.trim())) {
                tracing::warn!(column = %header, "identifier column matched by alias");
            }
        }

        let mut seen = HashSet::new();
        let symbols: Vec<String> = table
            .column(index)
            .filter_map(|cell| self.normalize(cell))
            .filter(|symbol| seen.insert(symbol.clone()))
            .collect();

        if symbols.is_empty() {
            return Err(ResolutionError::Empty {
                source_name: self.source.name().to_string(),
            });
        }
        Ok(symbols)
    }

    fn normalize(&self, cell: &str) -> Option<String> {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return None;
        }
        let upper = trimmed.to_ascii_uppercase();
        Some(if self.normalize_share_class {
            upper.replace('.', "-")
        } else {
            upper
        })
    }
}
