//! Append-only attendance journal.
//!
//! One CSV line per recognition event: `name,YYYY-MM-DD,HH:MM:SS`. The file
//! is opened, appended, and flushed on every call; the journal is
//! deliberately not deduplicated (session-level dedup happens in the
//! recognition workflow's in-memory set).

use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal write failed for {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Append-only CSV journal of attendance events.
pub struct AttendanceJournal {
    path: PathBuf,
}

impl AttendanceJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one attendance line for `name` at `timestamp`, flushed before
    /// returning. Date and time are formatted from the same instant.
    pub fn append(&self, name: &str, timestamp: DateTime<Local>) -> Result<(), JournalError> {
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H:%M:%S");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| JournalError::Write {
                path: self.path.display().to_string(),
                source,
            })?;
        writeln!(file, "{name},{date},{time}").map_err(|source| JournalError::Write {
            path: self.path.display().to_string(),
            source,
        })?;
        file.flush().map_err(|source| JournalError::Write {
            path: self.path.display().to_string(),
            source,
        })?;

        tracing::debug!(name, %date, %time, "attendance recorded");
        Ok(())
    }

    /// Append one line for `name` at the current local wall-clock time.
    pub fn append_now(&self, name: &str) -> Result<(), JournalError> {
        self.append(name, Local::now())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
