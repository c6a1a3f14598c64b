//! Import orchestrator
//!
//! [`DataImporter`] runs one table sync in one of four modes:
//! - `GenerateSchema`: create the target table from the source schema
//! - `CheckCount`: compare source and target row counts
//! - `AdvancedConsistencyCheck`: run the consistency engine without mutating
//! - `DataCopy`: boundary selection, paged copy, update pass, reconciliation
//!
//! Submodules:
//! - `columns`: column resolution against the source schema
//! - `boundary`: sync-mode borders and the staircase high-water mark
//! - `pipeline`: the overlapped copy and update pipelines
//! - `consistency`: the paged diff and repair engine

use std::time::Duration;

use crate::adapters::{SourceAdapter, TargetAdapter};
use crate::models::{Column, ImportModel, ImportStatus, StatusKind, Value};
use crate::query::{Comparator, KeyBatch, key_batches};
use crate::status::{LogLevel, SharedSink};

pub mod boundary;
pub mod columns;
pub mod consistency;
pub mod importer;
pub mod options;
pub mod pipeline;

pub use boundary::{Boundary, HighWaterMark};
pub use columns::ResolvedColumns;
pub use consistency::ConsistencyReport;
pub use importer::{DataImporter, OperationMode, RunOutcome};
pub use options::{
    DEFAULT_CONSISTENCY_PAGE_SIZE, DEFAULT_GAP_ITERATIONS, DEFAULT_PAGE_SIZE, ImporterOptions,
    ImporterOptionsBuilder,
};

/// Forwards the log lines and events of one table import to the sink
#[derive(Clone)]
pub(crate) struct Reporter {
    sink: SharedSink,
    table: String,
    connection: String,
}

impl Reporter {
    pub(crate) fn new(sink: SharedSink, model: &ImportModel) -> Self {
        Self {
            sink,
            table: model.name.clone(),
            connection: model.connection.clone(),
        }
    }

    pub(crate) fn info(&self, message: impl AsRef<str>) {
        self.sink.on_log_message(LogLevel::Info, message.as_ref(), false);
    }

    /// Section headline
    pub(crate) fn headline(&self, message: impl AsRef<str>) {
        self.sink.on_log_message(LogLevel::Info, message.as_ref(), true);
    }

    pub(crate) fn success(&self, message: impl AsRef<str>) {
        self.sink.on_log_message(LogLevel::Success, message.as_ref(), false);
    }

    pub(crate) fn warning(&self, message: impl AsRef<str>) {
        self.sink.on_log_message(LogLevel::Warning, message.as_ref(), false);
    }

    pub(crate) fn error(&self, message: impl AsRef<str>) {
        self.sink.on_log_message(LogLevel::Error, message.as_ref(), false);
    }

    pub(crate) fn progress(&self, percent: u8, rows: u64) {
        let mut status = ImportStatus::new(&self.table, &self.connection, StatusKind::None);
        status.progress = percent.min(100);
        status.progressed_rows = rows;
        self.sink.on_progress(&status);
    }

    pub(crate) fn completed(&self, status: &ImportStatus) {
        self.sink.on_operation_completed(status);
    }

    pub(crate) fn metric(&self, duration: Duration) {
        self.sink.on_metric(&self.table, duration);
    }

    /// Status skeleton for this table
    pub(crate) fn status(&self, kind: StatusKind) -> ImportStatus {
        ImportStatus::new(&self.table, &self.connection, kind)
    }
}

/// Everything the pipeline and the consistency engine share during a run
pub(crate) struct ImportContext<'a> {
    pub model: &'a ImportModel,
    pub source: &'a dyn SourceAdapter,
    pub target: &'a dyn TargetAdapter,
    pub columns: &'a ResolvedColumns,
    pub options: &'a ImporterOptions,
    pub reporter: &'a Reporter,
}

impl ImportContext<'_> {
    pub(crate) fn table(&self) -> &str {
        &self.model.name
    }

    /// Parameters per command, bounded by the target's own limit
    pub(crate) fn parameter_ceiling(&self) -> usize {
        self.options
            .parameter_ceiling
            .min(self.target.parameter_ceiling())
            .max(1)
    }

    /// Key lookups over `tuples`, batched under the parameter ceiling
    pub(crate) fn key_batches(&self, id_columns: &[Column], tuples: &[Vec<Value>], comparator: Comparator) -> Vec<KeyBatch> {
        key_batches(id_columns, tuples, comparator, self.parameter_ceiling())
    }
}
