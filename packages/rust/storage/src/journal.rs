//! Per-agent activity journal.
//!
//! Each record is one JSON file in the agent's logs directory, named
//! `<agent>_<millis>_<seq>.json`. The executive reads these back to compute
//! activity and failure counts, so every record is published atomically.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use khive_shared::{KhiveError, Result};

use crate::stage::{FilePattern, list_files, read_json, write_json_atomic};

/// Outcome recorded with a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Ok,
    Success,
    Process,
    Skip,
    Failed,
    Approved,
    Rejected,
    Delegated,
    Warning,
    Alert,
}

impl LogStatus {
    fn is_problem(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Rejected | Self::Warning | Self::Alert
        )
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Success => "SUCCESS",
            Self::Process => "PROCESS",
            Self::Skip => "SKIP",
            Self::Failed => "FAILED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Delegated => "DELEGATED",
            Self::Warning => "WARNING",
            Self::Alert => "ALERT",
        };
        f.write_str(s)
    }
}

/// One journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub role: String,
    pub action: String,
    pub status: LogStatus,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Writer for one agent's logs directory.
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    prefix: String,
    agent: String,
    role: String,
    seq: AtomicU64,
}

impl Journal {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        agent: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            agent: agent.into(),
            role: role.into(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a record and mirror it as a tracing event.
    pub fn record(
        &self,
        action: &str,
        status: LogStatus,
        detail: impl Into<String>,
        reason: Option<String>,
    ) -> Result<LogEntry> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            agent: self.agent.clone(),
            role: self.role.clone(),
            action: action.to_string(),
            status,
            detail: detail.into(),
            reason,
        };

        if status.is_problem() {
            warn!(
                agent = %entry.agent,
                action = %entry.action,
                status = %entry.status,
                reason = entry.reason.as_deref().unwrap_or(""),
                "{}",
                entry.detail
            );
        } else {
            info!(
                agent = %entry.agent,
                action = %entry.action,
                status = %entry.status,
                "{}",
                entry.detail
            );
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}_{}_{seq:04}.json",
            self.prefix,
            entry.timestamp.timestamp_millis()
        );
        write_json_atomic(&self.dir.join(name), &entry)?;

        Ok(entry)
    }

    /// Shorthand for records without a reason.
    pub fn note(&self, action: &str, status: LogStatus, detail: impl Into<String>) -> Result<()> {
        self.record(action, status, detail, None).map(|_| ())
    }

    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        read_entries(&self.dir)
    }
}

/// Read every journal record in `dir`, oldest file name first.
/// Unreadable records are skipped with a warning.
pub fn read_entries(dir: &Path) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for path in list_files(dir, &FilePattern::new("*.json"))? {
        match read_json::<LogEntry>(&path) {
            Ok(entry) => entries.push(entry),
            Err(KhiveError::Parse { message }) => {
                warn!(path = %path.display(), %message, "skipping malformed journal entry");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("khive-journal-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn records_are_written_and_read_back_in_order() {
        let tmp = temp_dir();
        let journal = Journal::new(&tmp, "lea", "LEA", "Quality Control");

        journal
            .record(
                "AUDIT",
                LogStatus::Rejected,
                "clip.mp4",
                Some("duration too short (5.0s < 10s)".into()),
            )
            .unwrap();
        journal.note("AUDIT", LogStatus::Approved, "other.mp4").unwrap();

        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, LogStatus::Rejected);
        assert!(entries[0].reason.as_deref().unwrap().contains("duration"));
        assert_eq!(entries[1].agent, "LEA");

        let names: Vec<_> = std::fs::read_dir(&tmp)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| n.starts_with("lea_") && n.ends_with(".json")));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&LogStatus::Delegated).unwrap();
        assert_eq!(json, "\"DELEGATED\"");
        assert_eq!(LogStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let tmp = temp_dir();
        std::fs::write(tmp.join("x_1_0000.json"), "not json").unwrap();
        let journal = Journal::new(&tmp, "x", "X", "r");
        journal.note("RUN", LogStatus::Ok, "ok").unwrap();
        assert_eq!(read_entries(&tmp).unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_directory_reads_empty() {
        let tmp = temp_dir();
        assert!(read_entries(&tmp.join("nope")).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
