//! Run status reported to the status sink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Overall state of a table import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    #[default]
    None,
    /// Target schema created
    Initialized,
    Idle,
    Ok,
    /// Finished with count mismatch or duplicate keys
    Warning,
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::None => write!(f, "none"),
            StatusKind::Initialized => write!(f, "initialized"),
            StatusKind::Idle => write!(f, "idle"),
            StatusKind::Ok => write!(f, "ok"),
            StatusKind::Warning => write!(f, "warning"),
            StatusKind::Error => write!(f, "error"),
        }
    }
}

/// Verdict of the duplicate key check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum KeyIntegrityStatus {
    #[default]
    None,
    Idle,
    Ignored,
    Ok,
    DoubleKeys,
    Error,
}

/// Verdict of the consistency engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Consistency {
    /// No discrepancy was detected, the engine did not run
    #[default]
    NotChecked,
    /// Source and target are aligned
    Ok,
    /// No row-level mismatch found, but the totals differ
    CountDiffersButTrue,
    /// A row-level mismatch was found
    False,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consistency::NotChecked => write!(f, "not checked"),
            Consistency::Ok => write!(f, "ok"),
            Consistency::CountDiffersButTrue => write!(f, "count differs but true"),
            Consistency::False => write!(f, "false"),
        }
    }
}

/// Operator command stored with a table's status entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplyFunction {
    #[default]
    None,
    /// Clear the target and copy everything
    FlushData,
    /// Drop and recreate the target table
    RecreateTable,
}

/// Whether an import is currently running for a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    #[default]
    None,
    /// A run is in progress (or was interrupted)
    Idle,
}

/// Counters and verdicts of one table import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatus {
    pub name: String,
    pub connection: String,
    pub status: StatusKind,
    pub key_integrity: KeyIntegrityStatus,
    pub consistency_fix: Consistency,
    pub source_count: u64,
    pub target_count: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub correction_rows_inserted: u64,
    pub correction_rows_deleted: u64,
    pub total_rows_inserted: u64,
    pub total_rows_difference: i64,
    /// Percent done, 0..=100
    pub progress: u8,
    pub progressed_rows: u64,
    pub duration: Duration,
    pub consistency_fix_duration: Duration,
    pub error_message: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

impl ImportStatus {
    pub fn new(name: impl Into<String>, connection: impl Into<String>, status: StatusKind) -> Self {
        Self {
            name: name.into(),
            connection: connection.into(),
            status,
            modified: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Fill the derived totals from the copy and correction counters
    pub fn with_totals(mut self) -> Self {
        self.total_rows_inserted = self.rows_inserted + self.correction_rows_inserted;
        self.total_rows_difference =
            self.total_rows_inserted as i64 - self.correction_rows_deleted as i64;
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StatusKind::Ok | StatusKind::Warning | StatusKind::Error
        )
    }
}

/// Source/target count comparison of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResult {
    pub source_count: u64,
    pub target_count: u64,
    pub consistent: Consistency,
    pub advanced_consistent: Consistency,
}

impl CountResult {
    pub fn new(source_count: u64, target_count: u64) -> Self {
        Self {
            source_count,
            target_count,
            ..Default::default()
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.source_count == self.target_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let mut status = ImportStatus::new("t", "c", StatusKind::Ok);
        status.rows_inserted = 100;
        status.correction_rows_inserted = 5;
        status.correction_rows_deleted = 8;
        let status = status.with_totals();
        assert_eq!(status.total_rows_inserted, 105);
        assert_eq!(status.total_rows_difference, 97);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let status = ImportStatus::new("t", "c", StatusKind::Warning);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "warning");
        assert_eq!(json["consistencyFix"], "notChecked");
    }
}
