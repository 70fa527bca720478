//! Run history: JSONL append-only log of run reports.
//!
//! One JSON object per line, so a partial write can only damage the last line
//! and the file streams easily. Malformed lines are skipped on read.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::report::RunReport;

pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, report: &RunReport) -> io::Result<()> {
        let json = serde_json::to_string(report)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{json}")?;
        file.flush()
    }

    /// All reports, oldest first.
    pub fn read_all(&self) -> io::Result<Vec<RunReport>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut reports = Vec::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunReport>(&line) {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping malformed history line"
                ),
            }
        }

        Ok(reports)
    }

    /// The `n` most recent reports, newest first.
    pub fn recent(&self, n: usize) -> io::Result<Vec<RunReport>> {
        let mut all = self.read_all()?;
        all.reverse();
        all.truncate(n);
        Ok(all)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use indexflow_core::domain::RunStamp;

    fn report(day: &str) -> RunReport {
        RunReport::new(&RunContext::trailing(RunStamp::parse(day).unwrap(), 5))
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::new(dir.path().join("nested").join("runs.jsonl"));

        history.append(&report("2024-06-03")).unwrap();
        history.append(&report("2024-06-04")).unwrap();

        let all = history.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].run_id, "20240603T000000Z");
        assert_eq!(history.recent(1).unwrap()[0].run_id, "20240604T000000Z");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let history = RunHistory::new(&path);
        history.append(&report("2024-06-03")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        history.append(&report("2024-06-04")).unwrap();

        assert_eq!(history.read_all().unwrap().len(), 2);
    }

    #[test]
    fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::new(dir.path().join("absent.jsonl"));
        assert!(history.read_all().unwrap().is_empty());
    }
}
