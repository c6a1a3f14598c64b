//! Source and target adapters
//!
//! Defines the contracts the importer drives and their implementations:
//! - MemoryAdapter: shared in-memory table (flat files loaded into memory, tests)
//! - DuckDbAdapter: embedded DuckDB target and source
//! - ODataAdapter: read-only OData HTTP source
//!
//! Adapters bind the query algebra to a connection. They render queries with
//! a [`QueryAdapter`](crate::query_adapter::QueryAdapter) and execute them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::models::{Column, ColumnTypeInfo, DataTable, ExpectedSize, Table, Value};
use crate::query::{Comparator, Condition, KeyBatch, SelectQuery, UpdateQuery, key_batches, tuples_condition};

pub mod memory;
pub mod schema;

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "api-backend")]
pub mod odata;

pub use memory::MemoryAdapter;
pub use schema::{SchemaFlavor, TableCreator};

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbAdapter;

#[cfg(feature = "api-backend")]
pub use odata::{ODataAdapter, ODataConfig};

/// Parameters a single SQL Server command may bind (the server accepts 2100)
pub const DEFAULT_PARAMETER_CEILING: usize = 2000;

/// Called by [`TargetAdapter::bulk_insert`] with the rows written so far in the call
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Everything needed to materialize a target table
#[derive(Debug, Clone, Default)]
pub struct CreateTableRequest {
    /// Target table name, possibly schema qualified
    pub table: String,
    /// Fields in projection order
    pub schema: DataTable,
    /// Names of the identity fields (primary key)
    pub id_columns: Vec<String>,
    /// Resolved columns, used for native precision and scale
    pub columns: Vec<Column>,
    pub expected_size: ExpectedSize,
    pub distribution_column: Option<String>,
    /// Do not add a surrogate identity column when no id is configured
    pub ignore_identity: bool,
}

/// Read side of a synchronization
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The table this adapter reads
    fn table(&self) -> &Table;

    /// Schema of the given columns, or of the whole table
    async fn schema(&self, columns: Option<&[Column]>) -> Result<DataTable, AdapterError>;

    async fn row_count(&self, condition: Option<&Condition>) -> Result<u64, AdapterError>;

    /// Maximum of a column; NULL for an empty selection
    async fn max_value(&self, column: &Column, condition: Option<&Condition>) -> Result<Value, AdapterError>;

    async fn run_query(&self, query: &SelectQuery) -> Result<DataTable, AdapterError>;

    /// Values of the given columns for every matching row
    async fn field_values(
        &self,
        columns: &[Column],
        condition: Option<&Condition>,
    ) -> Result<DataTable, AdapterError> {
        let query = SelectQuery::new(columns.to_vec(), self.table().clone()).with_condition(condition.cloned());
        self.run_query(&query).await
    }

    /// Native type names, precision and scale of a table's fields
    async fn extended_column_type_info(&self, _table_name: Option<&str>) -> Result<Vec<ColumnTypeInfo>, AdapterError> {
        Ok(Vec::new())
    }

    /// Page size imposed by the backend (e.g. server side paging limits)
    fn custom_page_size(&self) -> Option<usize> {
        None
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Write side of a synchronization
#[async_trait]
pub trait TargetAdapter: SourceAdapter {
    async fn table_exists(&self) -> Result<bool, AdapterError>;

    /// Create the table; returns false when it already existed
    async fn create_table(&self, request: &CreateTableRequest) -> Result<bool, AdapterError>;

    async fn delete_table(&self) -> Result<(), AdapterError>;

    async fn delete_all_rows(&self) -> Result<u64, AdapterError>;

    /// Delete matching rows, returning the number removed
    async fn delete(&self, condition: &Condition) -> Result<u64, AdapterError>;

    /// Append rows, mapping them to the table's fields by name
    async fn bulk_insert(
        &self,
        rows: DataTable,
        batch_size: usize,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, AdapterError>;

    /// Execute updates, returning the number of affected rows
    async fn batched_update(&self, queries: &[UpdateQuery]) -> Result<u64, AdapterError>;

    /// Identity tuples occurring more than once
    async fn duplicate_keys(&self, id_columns: &[Column]) -> Result<DataTable, AdapterError>;

    async fn has_duplicate_keys(&self, id_columns: &[Column]) -> Result<bool, AdapterError> {
        Ok(!self.duplicate_keys(id_columns).await?.is_empty())
    }

    /// Maximum parameters bound by one command
    fn parameter_ceiling(&self) -> usize {
        DEFAULT_PARAMETER_CEILING
    }

    /// Batched key lookups sized to [`parameter_ceiling`](Self::parameter_ceiling)
    fn conditions_for_values(&self, columns: &[Column], tuples: &[Vec<Value>], comparator: Comparator) -> Vec<KeyBatch> {
        key_batches(columns, tuples, comparator, self.parameter_ceiling())
    }

    /// One condition over the whole tuple set
    fn condition_for_values(&self, columns: &[Column], tuples: &[Vec<Value>], comparator: Comparator) -> Condition {
        tuples_condition(columns, tuples, comparator)
    }
}

/// Order and window rows in memory the way a backend would
pub(crate) fn sort_rows(rows: &mut [Vec<Value>], keys: &[(usize, bool)]) {
    rows.sort_by(|a, b| {
        for (idx, descending) in keys {
            let ord = a[*idx].cmp(&b[*idx]);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}
