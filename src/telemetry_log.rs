use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::telemetry::{TelemetryReading, SERIES_KEYS};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("telemetry log I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("telemetry log already closed")]
    Closed,
}

/// Append-only record of every persisted reading.
pub trait TelemetryLog {
    fn append(&mut self, reading: &TelemetryReading) -> Result<(), LogError>;
    fn close(&mut self) -> Result<(), LogError>;
}

/// CSV file, one row per reading, synced to disk after every row.
///
/// The file is flushed and synced on [`close`](TelemetryLog::close) and again
/// on drop, so unwinding out of the main loop still leaves a complete file.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    file: Option<File>,
    rows: u64,
}

impl CsvLog {
    /// Opens `path` for appending, writing the header if the file is new.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", SERIES_KEYS.join(","))?;
            file.sync_all()?;
        }

        info!(path = %path.display(), "telemetry log opened");
        Ok(Self {
            path,
            file: Some(file),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

pub fn csv_row(reading: &TelemetryReading) -> String {
    reading
        .channels()
        .iter()
        .enumerate()
        .map(|(i, (_, value))| {
            // Last column is the device clock, kept as an integer.
            if i == SERIES_KEYS.len() - 1 {
                reading.timestamp.to_string()
            } else {
                value.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl TelemetryLog for CsvLog {
    fn append(&mut self, reading: &TelemetryReading) -> Result<(), LogError> {
        let file = self.file.as_mut().ok_or(LogError::Closed)?;
        writeln!(file, "{}", csv_row(reading))?;
        file.flush()?;
        file.sync_all()?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), LogError> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush()?;
        file.sync_all()?;
        info!(path = %self.path.display(), rows = self.rows, "telemetry log closed");
        Ok(())
    }
}

impl Drop for CsvLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to close telemetry log");
        }
    }
}
