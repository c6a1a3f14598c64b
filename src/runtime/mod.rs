//! Runtime
//!
//! Drives a whole catalog of table imports:
//! - `settings`: runtime settings from TOML or `-key:value` arguments
//! - `catalog`: the `source.json` catalog, its filters and resume files
//! - `store`: the per-table status log and the sink feeding it
//! - `logfile`: dated per-group log files
//! - `runner`: group scheduling and the per-table schema/data sequence

pub mod catalog;
pub mod logfile;
pub mod runner;
pub mod settings;
pub mod store;

pub use catalog::{ImportGroup, SourceCatalog, resume_file_path, write_resume_line};
pub use logfile::{FileLogSink, log_file_name};
pub use runner::{AdapterFactory, RunReport, Runner, TableOutcome, TableResult};
pub use settings::{RuntimeSettings, SOURCE_CATALOG_FILE, filter_list};
pub use store::{JsonFileStatusStore, MemoryStatusStore, StatusLogEntry, StatusStore, StoreSink};
