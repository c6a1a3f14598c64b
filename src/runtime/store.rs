//! Per-table status log
//!
//! The store keeps one [`StatusLogEntry`] per table name: the current and
//! the previous terminal status, whether a run is in progress, and the
//! operator command ([`ApplyFunction`]) to apply on the next run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::write_resume_line;
use crate::error::{SyncError, SyncResult};
use crate::models::{ApplyFunction, ImportStatus, ProgressStatus, StatusKind};
use crate::status::{LogLevel, StatusSink};

/// Status log entry of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusLogEntry {
    pub name: String,
    pub connection: String,
    /// Latest status reported by an importer
    pub current: ImportStatus,
    /// Status before `current`
    pub last: Option<ImportStatus>,
    pub progress_status: ProgressStatus,
    pub progress_modified: DateTime<Utc>,
    pub apply_function: ApplyFunction,
}

impl StatusLogEntry {
    pub fn new(name: &str, connection: &str) -> Self {
        Self {
            name: name.to_string(),
            connection: connection.to_string(),
            current: ImportStatus::new(name, connection, StatusKind::None),
            last: None,
            progress_status: ProgressStatus::None,
            progress_modified: Utc::now(),
            apply_function: ApplyFunction::None,
        }
    }

    pub fn status(&self) -> StatusKind {
        self.current.status
    }

    pub fn last_status(&self) -> StatusKind {
        self.last.as_ref().map(|s| s.status).unwrap_or_default()
    }

    /// Both the current and the previous run failed
    pub fn failed_twice(&self) -> bool {
        self.status() == StatusKind::Error && self.last_status() == StatusKind::Error
    }

    /// Time since the last progress tick of a run still marked in progress
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.progress_status != ProgressStatus::Idle {
            return None;
        }
        (now - self.progress_modified).to_std().ok().or(Some(Duration::ZERO))
    }
}

/// Storage of the per-table status log
pub trait StatusStore: Send + Sync {
    /// Entry of a table, created on first access
    fn get_log(&self, name: &str, connection: &str) -> SyncResult<StatusLogEntry>;

    /// Mark the table as running and store its progress
    fn update_progress(&self, status: &ImportStatus) -> SyncResult<()>;

    /// Store a terminal status; the previous one becomes `last`
    ///
    /// Clears the in-progress mark and any pending apply function.
    fn update_status(&self, status: &ImportStatus) -> SyncResult<()>;

    fn set_apply_function(&self, name: &str, function: ApplyFunction) -> SyncResult<()>;

    fn reset_apply_function(&self, name: &str) -> SyncResult<()> {
        self.set_apply_function(name, ApplyFunction::None)
    }
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn apply_progress(entries: &mut BTreeMap<String, StatusLogEntry>, status: &ImportStatus) {
    let entry = entries
        .entry(key(&status.name))
        .or_insert_with(|| StatusLogEntry::new(&status.name, &status.connection));
    entry.progress_status = ProgressStatus::Idle;
    entry.progress_modified = Utc::now();
    entry.current.progress = status.progress;
    entry.current.progressed_rows = status.progressed_rows;
}

fn apply_status(entries: &mut BTreeMap<String, StatusLogEntry>, status: &ImportStatus) {
    let entry = entries
        .entry(key(&status.name))
        .or_insert_with(|| StatusLogEntry::new(&status.name, &status.connection));
    let mut current = status.clone();
    current.progress = 100;
    if current.status != StatusKind::Error {
        current.error_message = None;
    }
    entry.last = Some(std::mem::replace(&mut entry.current, current));
    entry.progress_status = ProgressStatus::None;
    entry.progress_modified = Utc::now();
    entry.apply_function = ApplyFunction::None;
}

/// In-memory status store
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    entries: Mutex<BTreeMap<String, StatusLogEntry>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, BTreeMap<String, StatusLogEntry>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::Runtime("status store lock poisoned".into()))
    }

    /// Insert or replace an entry
    pub fn insert(&self, entry: StatusLogEntry) -> SyncResult<()> {
        self.lock()?.insert(key(&entry.name), entry);
        Ok(())
    }

    pub fn entries(&self) -> Vec<StatusLogEntry> {
        self.lock()
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get_log(&self, name: &str, connection: &str) -> SyncResult<StatusLogEntry> {
        Ok(self
            .lock()?
            .entry(key(name))
            .or_insert_with(|| StatusLogEntry::new(name, connection))
            .clone())
    }

    fn update_progress(&self, status: &ImportStatus) -> SyncResult<()> {
        apply_progress(&mut *self.lock()?, status);
        Ok(())
    }

    fn update_status(&self, status: &ImportStatus) -> SyncResult<()> {
        apply_status(&mut *self.lock()?, status);
        Ok(())
    }

    fn set_apply_function(&self, name: &str, function: ApplyFunction) -> SyncResult<()> {
        match self.lock()?.get_mut(&key(name)) {
            Some(entry) => {
                entry.apply_function = function;
                Ok(())
            }
            None => Err(SyncError::Runtime(format!("No status entry for {name}"))),
        }
    }
}

/// Status store persisted as a JSON document
///
/// The whole document is rewritten on every terminal status. Progress ticks
/// only touch the file when the in-progress mark changes.
#[derive(Debug)]
pub struct JsonFileStatusStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, StatusLogEntry>>,
}

impl JsonFileStatusStore {
    /// Open the store, reading existing entries if the file exists
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            serde_json::from_str(&json)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, BTreeMap<String, StatusLogEntry>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::Runtime("status store lock poisoned".into()))
    }

    fn save(&self, entries: &BTreeMap<String, StatusLogEntry>) -> SyncResult<()> {
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl StatusStore for JsonFileStatusStore {
    fn get_log(&self, name: &str, connection: &str) -> SyncResult<StatusLogEntry> {
        let mut entries = self.lock()?;
        if let Some(entry) = entries.get(&key(name)) {
            return Ok(entry.clone());
        }
        let entry = StatusLogEntry::new(name, connection);
        entries.insert(key(name), entry.clone());
        self.save(&entries)?;
        Ok(entry)
    }

    fn update_progress(&self, status: &ImportStatus) -> SyncResult<()> {
        let mut entries = self.lock()?;
        let was_running = entries
            .get(&key(&status.name))
            .is_some_and(|e| e.progress_status == ProgressStatus::Idle);
        apply_progress(&mut entries, status);
        if !was_running {
            self.save(&entries)?;
        }
        Ok(())
    }

    fn update_status(&self, status: &ImportStatus) -> SyncResult<()> {
        let mut entries = self.lock()?;
        apply_status(&mut entries, status);
        self.save(&entries)
    }

    fn set_apply_function(&self, name: &str, function: ApplyFunction) -> SyncResult<()> {
        let mut entries = self.lock()?;
        match entries.get_mut(&key(name)) {
            Some(entry) => entry.apply_function = function,
            None => return Err(SyncError::Runtime(format!("No status entry for {name}"))),
        }
        self.save(&entries)
    }
}

/// Forwards importer events to a [`StatusStore`]
///
/// With a resume file, every completed table is appended to it. Store
/// failures are logged and do not interrupt the import.
#[derive(Clone)]
pub struct StoreSink {
    store: Arc<dyn StatusStore>,
    resume_file: Option<PathBuf>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            resume_file: None,
        }
    }

    pub fn with_resume_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.resume_file = Some(path.into());
        self
    }
}

impl StatusSink for StoreSink {
    fn on_progress(&self, status: &ImportStatus) {
        if let Err(e) = self.store.update_progress(status) {
            tracing::warn!(table = %status.name, error = %e, "failed to store progress");
        }
    }

    fn on_operation_completed(&self, status: &ImportStatus) {
        if let Err(e) = self.store.update_status(status) {
            tracing::warn!(table = %status.name, error = %e, "failed to store status");
        }
        if let Some(path) = &self.resume_file {
            if let Err(e) = write_resume_line(path, &status.name) {
                tracing::warn!(table = %status.name, error = %e, "failed to write resume file");
            }
        }
    }

    fn on_log_message(&self, _level: LogLevel, _message: &str, _special: bool) {}

    fn on_metric(&self, _name: &str, _duration: Duration) {}
}
