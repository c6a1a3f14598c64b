//! Warehouse Sync - incremental, self-healing table synchronization
//!
//! Provides:
//! - A backend independent query algebra and its SQL, OData and in-memory renderings
//! - Source/target adapter traits with in-memory, DuckDB and OData implementations
//! - The table importer: boundary selection, paged copy, update pass and
//!   consistency reconciliation
//! - Status sinks for progress, completion events, log lines and metrics
//! - A runtime driving a catalog of table imports grouped by connection

pub mod adapters;
pub mod error;
pub mod import;
pub mod models;
pub mod query;
pub mod query_adapter;
pub mod runtime;
pub mod status;

// Re-export commonly used types
pub use adapters::{
    CreateTableRequest, MemoryAdapter, ProgressCallback, SourceAdapter, TableCreator, TargetAdapter,
};
#[cfg(feature = "duckdb-backend")]
pub use adapters::DuckDbAdapter;
#[cfg(feature = "api-backend")]
pub use adapters::{ODataAdapter, ODataConfig};
pub use error::{AdapterError, SyncError, SyncResult};
pub use import::{DataImporter, ImporterOptions, OperationMode, RunOutcome};
pub use models::{
    Column, Consistency, CountResult, DataSyncType, DataTable, DataType, ImportModel, ImportStatus,
    KeyIntegrityStatus, StatusKind, Table, UpdateMode, Value,
};
pub use query::{Comparator, Condition, SelectQuery, SortOrderField, UpdateQuery};
pub use query_adapter::{DataSetQueryAdapter, ODataQueryAdapter, QueryAdapter, SqlQueryAdapter};
pub use runtime::{AdapterFactory, MemoryStatusStore, Runner, RuntimeSettings, SourceCatalog, StatusStore};
pub use status::{LogLevel, RecordingSink, SharedSink, StatusSink, TracingSink};
