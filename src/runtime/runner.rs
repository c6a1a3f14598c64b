//! Group runner
//!
//! Runs every table of a [`SourceCatalog`]: connection groups run one after
//! the other or concurrently, the tables of a group always run in catalog
//! order. Each table gets a schema pass followed by a data copy (or a count
//! check), with operator commands read from the [`StatusStore`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::catalog::{ImportGroup, SourceCatalog};
use super::logfile::FileLogSink;
use super::settings::RuntimeSettings;
use super::store::{StatusLogEntry, StatusStore, StoreSink};
use crate::adapters::{SourceAdapter, TargetAdapter};
use crate::error::{SyncError, SyncResult};
use crate::import::{DataImporter, OperationMode};
use crate::models::{ApplyFunction, ImportModel, StatusKind};
use crate::status::{LogLevel, MultiSink, SharedSink, TracingSink, format_duration};

/// Builds the adapters of one table
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn source(&self, model: &ImportModel) -> SyncResult<Arc<dyn SourceAdapter>>;

    async fn target(&self, model: &ImportModel) -> SyncResult<Arc<dyn TargetAdapter>>;
}

/// What happened to one table
#[derive(Debug, Clone, PartialEq)]
pub enum TableResult {
    /// Data copy or count check finished with this status
    Completed(StatusKind),
    /// Only the schema pass ran
    SchemaOnly,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableOutcome {
    pub group: String,
    pub name: String,
    pub result: TableResult,
}

/// Summary of a runner invocation
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub tables: Vec<TableOutcome>,
    pub duration: Duration,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &TableOutcome> {
        self.tables
            .iter()
            .filter(|t| matches!(t.result, TableResult::Failed(_)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TableOutcome> {
        self.tables
            .iter()
            .filter(|t| matches!(t.result, TableResult::Skipped(_)))
    }

    pub fn outcome(&self, name: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// State shared by the group tasks
struct Shared {
    settings: RuntimeSettings,
    factory: Arc<dyn AdapterFactory>,
    store: Arc<dyn StatusStore>,
    sink: SharedSink,
}

/// Runs the catalog against the adapters built by an [`AdapterFactory`]
pub struct Runner {
    shared: Arc<Shared>,
}

impl Runner {
    pub fn new(settings: RuntimeSettings, factory: Arc<dyn AdapterFactory>, store: Arc<dyn StatusStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                factory,
                store,
                sink: Arc::new(TracingSink),
            }),
        }
    }

    /// Sink receiving the log lines of every group and the run metric
    pub fn with_sink(self, sink: SharedSink) -> Self {
        let shared = Shared {
            settings: self.shared.settings.clone(),
            factory: Arc::clone(&self.shared.factory),
            store: Arc::clone(&self.shared.store),
            sink,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.shared.settings
    }

    /// Load the catalog from the source directory and run it
    pub async fn run(&self) -> SyncResult<RunReport> {
        self.shared.settings.validate().map_err(SyncError::config)?;
        let catalog = SourceCatalog::load(&self.shared.settings)?;
        self.run_catalog(catalog).await
    }

    /// Run an already loaded catalog
    ///
    /// Resume files are removed once every group has finished.
    pub async fn run_catalog(&self, catalog: SourceCatalog) -> SyncResult<RunReport> {
        let start = Instant::now();
        let sink = &self.shared.sink;
        sink.on_log_message(
            LogLevel::Info,
            &format!(
                "Starting import of {} tables in {} groups",
                catalog.len(),
                catalog.groups().len()
            ),
            true,
        );

        let mut tables = Vec::new();
        if self.shared.settings.parallel {
            let mut tasks = JoinSet::new();
            for group in catalog.groups().iter().cloned() {
                let shared = Arc::clone(&self.shared);
                let span = tracing::info_span!("group", group = %group.key);
                tasks.spawn(async move { run_group(&shared, group).await }.instrument(span));
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcomes) => tables.extend(outcomes),
                    Err(e) => {
                        tracing::error!(error = %e, "group task failed");
                        sink.on_log_message(LogLevel::Error, &format!("Group task failed: {e}"), false);
                    }
                }
            }
        } else {
            for group in catalog.groups().iter().cloned() {
                let span = tracing::info_span!("group", group = %group.key);
                tables.extend(run_group(&self.shared, group).instrument(span).await);
            }
        }

        catalog.cleanup_resume_files()?;
        let duration = start.elapsed();
        sink.on_metric("Import", duration);
        sink.on_log_message(
            LogLevel::Info,
            &format!("Finished Time taken at all - {}", format_duration(duration)),
            true,
        );
        Ok(RunReport { tables, duration })
    }
}

async fn run_group(shared: &Shared, group: ImportGroup) -> Vec<TableOutcome> {
    let mut sinks: Vec<SharedSink> = vec![Arc::clone(&shared.sink)];
    if !shared.settings.no_log_to_file {
        match FileLogSink::open(&shared.settings.log_directory, &group.key) {
            Ok(file) => sinks.push(Arc::new(file)),
            Err(e) => tracing::warn!(group = %group.key, error = %e, "group log file unavailable"),
        }
    }
    let log: SharedSink = Arc::new(MultiSink::new(sinks));
    tracing::info!(group = %group.key, tables = group.models.len(), "group started");

    let mut outcomes = Vec::with_capacity(group.models.len());
    for model in &group.models {
        let result = match run_table(shared, &group, model, &log).await {
            Ok(result) => result,
            Err(e) => {
                log.on_log_message(LogLevel::Error, &e.user_message(), false);
                TableResult::Failed(e.to_string())
            }
        };
        outcomes.push(TableOutcome {
            group: group.key.clone(),
            name: model.name.clone(),
            result,
        });
    }
    outcomes
}

async fn run_table(
    shared: &Shared,
    group: &ImportGroup,
    model: &ImportModel,
    log: &SharedSink,
) -> SyncResult<TableResult> {
    let settings = &shared.settings;
    let entry = shared.store.get_log(&model.name, &model.connection)?;
    if let Some(skip) = interrupted(settings, &entry, model, log) {
        return Ok(skip);
    }

    let source = shared.factory.source(model).await?;
    if model.ignore_import_if_source_is_not_available && !source.is_available().await {
        log.on_log_message(
            LogLevel::Info,
            &format!("{} - Skipping import process because source not available", model.name),
            false,
        );
        return Ok(TableResult::Skipped("source not available".into()));
    }
    let target = shared.factory.target(model).await?;

    let mut model = model.clone();
    if settings.avoid_consistency_correction {
        model.avoid_complete_consistency_correction = true;
    }

    let recreate = entry.apply_function == ApplyFunction::RecreateTable;
    if recreate {
        log.on_log_message(
            LogLevel::Warning,
            "Received RECREATE TABLE command via the status log - applying force mode to schema creation",
            false,
        );
    }
    let schema_sink: SharedSink = Arc::new(MultiSink::new(vec![
        Arc::clone(log),
        Arc::new(StoreSink::new(Arc::clone(&shared.store))),
    ]));
    let schema = DataImporter::new(
        model.clone(),
        Arc::clone(&source),
        Arc::clone(&target),
        OperationMode::GenerateSchema,
    )
    .with_force(settings.force || recreate)
    .with_sink(schema_sink);
    schema.run().await?;
    if recreate {
        shared.store.reset_apply_function(&model.name)?;
    }

    if settings.only_schema_mode {
        return Ok(TableResult::SchemaOnly);
    }

    let flush = entry.apply_function == ApplyFunction::FlushData;
    let auto_fix = settings.auto_fix_tables_in_error_state && entry.failed_twice();
    if flush || auto_fix {
        log.on_log_message(
            LogLevel::Warning,
            "Received FLUSH DATA command via the status log - applying force mode to the data import",
            false,
        );
    }

    let mode = if settings.check_count_mode {
        OperationMode::CheckCount
    } else {
        OperationMode::DataCopy
    };
    let data_sink: SharedSink = Arc::new(MultiSink::new(vec![
        Arc::clone(log),
        Arc::new(StoreSink::new(Arc::clone(&shared.store)).with_resume_file(&group.resume_file)),
    ]));
    let page_size = page_size(settings, &model, source.as_ref());
    let mut data = DataImporter::new(model.clone(), source, target, mode)
        .with_force(settings.force || flush || auto_fix)
        .with_sink(data_sink);
    if let Some(page_size) = page_size {
        data.set_page_size(page_size)?;
    }
    if settings.consistency_page_size > 0 {
        data.set_consistency_page_size(settings.consistency_page_size)?;
    }
    let outcome = data.run().await?;
    if flush {
        shared.store.reset_apply_function(&model.name)?;
    }
    Ok(TableResult::Completed(outcome.status.status))
}

/// Skip result for a table whose previous run is still marked in progress
fn interrupted(
    settings: &RuntimeSettings,
    entry: &StatusLogEntry,
    model: &ImportModel,
    log: &SharedSink,
) -> Option<TableResult> {
    let running = entry.running_for(Utc::now())?;
    let limit = Duration::from_secs(u64::from(settings.interrupt_after_hours) * 3600);
    if running > limit {
        log.on_log_message(
            LogLevel::Warning,
            &format!(
                "{} is in state idle since {} > {}h, INTERRUPTING NOW",
                model.name,
                format_duration(running),
                settings.interrupt_after_hours
            ),
            false,
        );
        None
    } else {
        log.on_log_message(
            LogLevel::Warning,
            &format!(
                "{} is in IDLE state since {} < {}h, ENDING NOW to not interrupt",
                model.name,
                format_duration(running),
                settings.interrupt_after_hours
            ),
            false,
        );
        Some(TableResult::Skipped("import in progress".into()))
    }
}

/// Page size by precedence: settings, then model, then the adapter's own
fn page_size(settings: &RuntimeSettings, model: &ImportModel, source: &dyn SourceAdapter) -> Option<usize> {
    [
        Some(settings.page_size),
        Some(model.pagesize),
        source.custom_page_size(),
    ]
    .into_iter()
    .flatten()
    .find(|p| *p > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use crate::models::{DataTable, ProgressStatus};

    fn memory(page_size: Option<usize>) -> MemoryAdapter {
        let adapter = MemoryAdapter::new("src", DataTable::default());
        match page_size {
            Some(p) => adapter.with_custom_page_size(p),
            None => adapter,
        }
    }

    #[test]
    fn test_page_size_precedence() {
        let mut settings = RuntimeSettings::new();
        let mut model = ImportModel::new("t", "t");
        assert_eq!(page_size(&settings, &model, &memory(None)), None);
        assert_eq!(page_size(&settings, &model, &memory(Some(50))), Some(50));
        model.pagesize = 100;
        assert_eq!(page_size(&settings, &model, &memory(Some(50))), Some(100));
        settings.page_size = 7;
        assert_eq!(page_size(&settings, &model, &memory(Some(50))), Some(7));
    }

    #[test]
    fn test_interrupted() {
        let settings = RuntimeSettings::new();
        let model = ImportModel::new("Orders", "Orders");
        let log: SharedSink = Arc::new(crate::status::RecordingSink::new());
        let mut entry = StatusLogEntry::new("Orders", "erp");
        assert!(interrupted(&settings, &entry, &model, &log).is_none());

        entry.progress_status = ProgressStatus::Idle;
        entry.progress_modified = Utc::now() - chrono::Duration::hours(1);
        assert!(matches!(
            interrupted(&settings, &entry, &model, &log),
            Some(TableResult::Skipped(_))
        ));

        entry.progress_modified = Utc::now() - chrono::Duration::hours(13);
        assert!(interrupted(&settings, &entry, &model, &log).is_none());
    }
}
