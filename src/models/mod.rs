//! Models module
//!
//! Values, columns, tables, import configuration and run status shared by
//! the query algebra, the adapters and the importer.

pub mod column;
pub mod import_model;
pub mod status;
pub mod table;
pub mod value;

pub use column::{Column, ColumnKind, ColumnTypeInfo, JoinSpec};
pub use import_model::{
    DataSyncType, ExpectedSize, ImportModel, JoinModel, SourceType, TableType, UpdateMode,
    escape_field_name, split_field_list,
};
pub use status::{
    ApplyFunction, Consistency, CountResult, ImportStatus, KeyIntegrityStatus, ProgressStatus,
    StatusKind,
};
pub use table::{DEFAULT_ALIAS, DataTable, SchemaField, Table};
pub use value::{DataType, Value, parse_datetime};
