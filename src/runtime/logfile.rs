//! Per-group log files

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{Local, NaiveDate};

use crate::error::SyncResult;
use crate::models::ImportStatus;
use crate::status::{LogLevel, StatusSink, format_duration};

/// `IMPORT_LOG_{group}_{yyyy-MM-dd}.txt`
pub fn log_file_name(group: &str, date: NaiveDate) -> String {
    format!("IMPORT_LOG_{group}_{}.txt", date.format("%Y-%m-%d"))
}

/// Appends the log lines of one group to a dated text file
///
/// Warnings and errors are prefixed with `Warning - ` and `Error - `.
/// Progress and completion events are not written.
#[derive(Debug)]
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogSink {
    /// Open (or create) today's log file of `group` in `directory`
    pub fn open(directory: &Path, group: &str) -> SyncResult<Self> {
        let path = directory.join(log_file_name(group, Local::now().date_naive()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) {
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write log file");
        }
    }
}

impl StatusSink for FileLogSink {
    fn on_progress(&self, _status: &ImportStatus) {}

    fn on_operation_completed(&self, _status: &ImportStatus) {}

    fn on_log_message(&self, level: LogLevel, message: &str, _special: bool) {
        match level {
            LogLevel::Warning => self.write_line(&format!("Warning - {message}")),
            LogLevel::Error => self.write_line(&format!("Error - {message}")),
            LogLevel::Info | LogLevel::Success => self.write_line(message),
        }
    }

    fn on_metric(&self, name: &str, duration: Duration) {
        self.write_line(&format!("Metric {name} - {}", format_duration(duration)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(log_file_name("erp", date), "IMPORT_LOG_erp_2024-03-09.txt");
    }

    #[test]
    fn test_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileLogSink::open(dir.path(), "erp").unwrap();
        sink.on_log_message(LogLevel::Info, "starting", true);
        sink.on_log_message(LogLevel::Warning, "slow source", false);
        sink.on_log_message(LogLevel::Error, "target down", false);

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines, vec!["starting", "Warning - slow source", "Error - target down"]);
    }
}
