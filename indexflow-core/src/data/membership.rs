//! Index membership sources.
//!
//! A source hands back the raw membership table; picking the identifier
//! column and cleaning symbols is the resolver's job. Sources are read-only.

use crate::resolver::ResolutionError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// Tabular membership list as published upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl MembershipTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Parse CSV with a header row. Ragged rows are tolerated.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, ResolutionError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| ResolutionError::Parse(format!("membership header: {e}")))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| ResolutionError::Parse(format!("membership row: {e}")))?;
            rows.push(record.iter().map(String::from).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Index of the first header matching any alias, compared
    /// case-insensitively after trimming. Aliases are tried in order.
    pub fn column_index(&self, aliases: &[String]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            let wanted = alias.trim();
            self.headers.iter().position(|h| h.trim().eq_ignore_ascii_case(wanted))
        })
    }

    /// Cells of one column; short rows contribute nothing.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().filter_map(move |row| row.get(index).map(String::as_str))
    }
}

/// A read-only provider of the current membership table.
pub trait MembershipSource: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_table(&self) -> Result<MembershipTable, ResolutionError>;
}

/// Membership CSV published at a URL.
pub struct CsvUrlMembership {
    url: String,
    client: reqwest::blocking::Client,
}

impl CsvUrlMembership {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ResolutionError> {
        let url = url.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ResolutionError::Unreachable {
                source_name: url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { url, client })
    }
}

impl MembershipSource for CsvUrlMembership {
    fn name(&self) -> &str {
        &self.url
    }

    fn fetch_table(&self) -> Result<MembershipTable, ResolutionError> {
        let unreachable = |reason: String| ResolutionError::Unreachable {
            source_name: self.url.clone(),
            reason,
        };

        let resp = self.client.get(&self.url).send().map_err(|e| unreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {status}")));
        }
        let body = resp.bytes().map_err(|e| unreachable(e.to_string()))?;
        MembershipTable::from_csv_reader(body.as_ref())
    }
}

/// Membership CSV on local disk.
pub struct CsvFileMembership {
    path: PathBuf,
    label: String,
}

impl CsvFileMembership {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self { path, label }
    }
}

impl MembershipSource for CsvFileMembership {
    fn name(&self) -> &str {
        &self.label
    }

    fn fetch_table(&self) -> Result<MembershipTable, ResolutionError> {
        let file = std::fs::File::open(&self.path).map_err(|e| ResolutionError::Unreachable {
            source_name: self.label.clone(),
            reason: e.to_string(),
        })?;
        MembershipTable::from_csv_reader(file)
    }
}

/// Sector-organized universe file: `[sectors]` maps a sector name to tickers.
#[derive(Debug, Deserialize)]
struct SectorUniverse {
    sectors: BTreeMap<String, Vec<String>>,
}

/// Fixed membership, either listed directly or read from a sector universe.
#[derive(Debug, Clone)]
pub struct StaticMembership {
    symbols: Vec<String>,
}

impl StaticMembership {
    pub const HEADER: &'static str = "Symbol";

    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }

    /// Flatten a TOML sector universe, sectors in name order.
    pub fn from_universe_toml(content: &str) -> Result<Self, ResolutionError> {
        let universe: SectorUniverse =
            toml::from_str(content).map_err(|e| ResolutionError::Parse(format!("universe TOML: {e}")))?;
        Ok(Self {
            symbols: universe.sectors.into_values().flatten().collect(),
        })
    }
}

impl MembershipSource for StaticMembership {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_table(&self) -> Result<MembershipTable, ResolutionError> {
        Ok(MembershipTable::new(
            vec![Self::HEADER.to_string()],
            self.symbols.iter().map(|s| vec![s.clone()]).collect(),
        ))
    }
}
