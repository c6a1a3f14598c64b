//! Status reporting
//!
//! The importer reports through a [`StatusSink`] passed in by the caller:
//! progress ticks, exactly one completion event per data copy, human-facing
//! log lines and duration metrics. Progress events are always delivered
//! before the completion event of the same run.
//!
//! Provided sinks:
//! - [`TracingSink`]: forwards everything to `tracing`
//! - [`RecordingSink`]: keeps events in memory (tests, summaries)
//! - [`ChannelSink`]: sends events over an unbounded tokio channel
//! - [`MultiSink`]: fans out to several sinks
//! - `ProgressBarSink` (feature `progress`): indicatif progress bars

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::models::ImportStatus;

pub mod progress;

#[cfg(feature = "progress")]
pub use progress::ProgressBarSink;
pub use progress::{format_duration, format_number};

/// Severity of a log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Success => write!(f, "success"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Receiver of importer events
pub trait StatusSink: Send + Sync {
    /// Progress tick of a running copy
    fn on_progress(&self, status: &ImportStatus);

    /// Terminal or schema-created status of a run
    fn on_operation_completed(&self, status: &ImportStatus);

    /// Human-facing log line; `special` marks section headlines
    fn on_log_message(&self, level: LogLevel, message: &str, special: bool);

    fn on_metric(&self, name: &str, duration: Duration);
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn StatusSink>;

/// Event as recorded or sent by [`RecordingSink`] and [`ChannelSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Progress(ImportStatus),
    Completed(ImportStatus),
    Log {
        level: LogLevel,
        message: String,
        special: bool,
    },
    Metric {
        name: String,
        duration: Duration,
    },
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn on_progress(&self, status: &ImportStatus) {
        tracing::debug!(
            table = %status.name,
            progress = status.progress,
            rows = status.progressed_rows,
            "progress"
        );
    }

    fn on_operation_completed(&self, status: &ImportStatus) {
        tracing::info!(
            table = %status.name,
            connection = %status.connection,
            status = %status.status,
            source_count = status.source_count,
            target_count = status.target_count,
            rows_inserted = status.rows_inserted,
            rows_updated = status.rows_updated,
            consistency = %status.consistency_fix,
            "operation completed"
        );
    }

    fn on_log_message(&self, level: LogLevel, message: &str, special: bool) {
        match level {
            LogLevel::Error => tracing::error!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Info | LogLevel::Success => tracing::info!(special, "{message}"),
        }
    }

    fn on_metric(&self, name: &str, duration: Duration) {
        tracing::info!(metric = name, elapsed_ms = duration.as_millis() as u64, "metric");
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: StatusEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Snapshot of the recorded events
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn completed(&self) -> Vec<ImportStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Completed(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<ImportStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Progress(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Log messages of the given level
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Log { level: l, message, .. } if l == level => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn metrics(&self) -> Vec<(String, Duration)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Metric { name, duration } => Some((name, duration)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl StatusSink for RecordingSink {
    fn on_progress(&self, status: &ImportStatus) {
        self.push(StatusEvent::Progress(status.clone()));
    }

    fn on_operation_completed(&self, status: &ImportStatus) {
        self.push(StatusEvent::Completed(status.clone()));
    }

    fn on_log_message(&self, level: LogLevel, message: &str, special: bool) {
        self.push(StatusEvent::Log {
            level,
            message: message.to_string(),
            special,
        });
    }

    fn on_metric(&self, name: &str, duration: Duration) {
        self.push(StatusEvent::Metric {
            name: name.to_string(),
            duration,
        });
    }
}

/// Sends events to a consumer task
///
/// Events sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<StatusEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }
}

impl StatusSink for ChannelSink {
    fn on_progress(&self, status: &ImportStatus) {
        self.send(StatusEvent::Progress(status.clone()));
    }

    fn on_operation_completed(&self, status: &ImportStatus) {
        self.send(StatusEvent::Completed(status.clone()));
    }

    fn on_log_message(&self, level: LogLevel, message: &str, special: bool) {
        self.send(StatusEvent::Log {
            level,
            message: message.to_string(),
            special,
        });
    }

    fn on_metric(&self, name: &str, duration: Duration) {
        self.send(StatusEvent::Metric {
            name: name.to_string(),
            duration,
        });
    }
}

/// Delivers every event to each inner sink, in order
#[derive(Clone, Default)]
pub struct MultiSink {
    sinks: Vec<SharedSink>,
}

impl MultiSink {
    pub fn new(sinks: Vec<SharedSink>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl StatusSink for MultiSink {
    fn on_progress(&self, status: &ImportStatus) {
        self.sinks.iter().for_each(|s| s.on_progress(status));
    }

    fn on_operation_completed(&self, status: &ImportStatus) {
        self.sinks.iter().for_each(|s| s.on_operation_completed(status));
    }

    fn on_log_message(&self, level: LogLevel, message: &str, special: bool) {
        self.sinks
            .iter()
            .for_each(|s| s.on_log_message(level, message, special));
    }

    fn on_metric(&self, name: &str, duration: Duration) {
        self.sinks.iter().for_each(|s| s.on_metric(name, duration));
    }
}
