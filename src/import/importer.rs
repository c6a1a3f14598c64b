//! The table importer

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use super::boundary::{Boundary, HighWaterMark};
use super::columns::ResolvedColumns;
use super::consistency::{ConsistencyEngine, count_verdict};
use super::options::ImporterOptions;
use super::{ImportContext, Reporter, pipeline};
use crate::adapters::{CreateTableRequest, SourceAdapter, TargetAdapter};
use crate::error::{AdapterResultExt, SyncError, SyncResult};
use crate::models::{
    Consistency, CountResult, DataSyncType, ImportModel, ImportStatus, KeyIntegrityStatus, StatusKind,
    UpdateMode,
};
use crate::query::{Comparator, Condition};
use crate::status::{SharedSink, TracingSink};

/// What a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationMode {
    #[default]
    DataCopy,
    GenerateSchema,
    CheckCount,
    AdvancedConsistencyCheck,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationMode::DataCopy => write!(f, "data copy"),
            OperationMode::GenerateSchema => write!(f, "generate schema"),
            OperationMode::CheckCount => write!(f, "check count"),
            OperationMode::AdvancedConsistencyCheck => write!(f, "advanced consistency check"),
        }
    }
}

/// Result of [`DataImporter::run`]
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: ImportStatus,
    pub counts: CountResult,
}

/// Synchronizes one table from a source adapter into a target adapter
pub struct DataImporter {
    model: ImportModel,
    source: Arc<dyn SourceAdapter>,
    target: Arc<dyn TargetAdapter>,
    mode: OperationMode,
    options: ImporterOptions,
    sink: SharedSink,
}

impl DataImporter {
    /// Importer with default options; the page size follows the source's own limit if it has one
    pub fn new(
        model: ImportModel,
        source: Arc<dyn SourceAdapter>,
        target: Arc<dyn TargetAdapter>,
        mode: OperationMode,
    ) -> Self {
        let mut options = ImporterOptions::default();
        if let Some(page_size) = source.custom_page_size().filter(|p| *p > 0) {
            options.page_size = page_size;
        }
        Self {
            model,
            source,
            target,
            mode,
            options,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_options(mut self, options: ImporterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.options.force = force;
        self
    }

    pub fn set_page_size(&mut self, page_size: usize) -> SyncResult<()> {
        if page_size < 1 {
            return Err(SyncError::config("Pagesize should be greater than zero"));
        }
        self.options.page_size = page_size;
        Ok(())
    }

    pub fn set_consistency_page_size(&mut self, page_size: usize) -> SyncResult<()> {
        if page_size < 1 {
            return Err(SyncError::config("Consistency pagesize should be greater than zero"));
        }
        self.options.consistency_page_size = page_size;
        Ok(())
    }

    pub fn options(&self) -> &ImporterOptions {
        &self.options
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn model(&self) -> &ImportModel {
        &self.model
    }

    /// Run the configured operation
    ///
    /// Failures emit a terminal `Error` status before they are returned. The
    /// duration metric is emitted last in every case.
    pub async fn run(&self) -> SyncResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "import",
            table = %self.model.name,
            mode = %self.mode,
            run_id = %run_id
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> SyncResult<RunOutcome> {
        let reporter = Reporter::new(Arc::clone(&self.sink), &self.model);
        let start = Instant::now();
        let mut captured = CountResult::default();

        let result = match self.options.validate() {
            Err(err) => Err(err),
            Ok(()) => match self.mode {
                OperationMode::GenerateSchema => self.generate_schema(&reporter).await,
                OperationMode::CheckCount => self.check_count(&reporter, &mut captured).await,
                OperationMode::AdvancedConsistencyCheck => {
                    self.advanced_check(&reporter, &mut captured).await
                }
                OperationMode::DataCopy => self.data_copy(&reporter, &mut captured, start).await,
            },
        };

        let elapsed = start.elapsed();
        let result = result.map_err(|err| {
            let mut status = reporter.status(StatusKind::Error);
            status.source_count = captured.source_count;
            status.target_count = captured.target_count;
            status.duration = elapsed;
            status.error_message = Some(err.to_string());
            reporter.error(err.user_message());
            reporter.completed(&status);
            err
        });
        reporter.info(format!("Time taken {}", crate::status::format_duration(elapsed)));
        reporter.metric(elapsed);
        result
    }

    fn context<'a>(&'a self, columns: &'a ResolvedColumns, reporter: &'a Reporter) -> ImportContext<'a> {
        ImportContext {
            model: &self.model,
            source: self.source.as_ref(),
            target: self.target.as_ref(),
            columns,
            options: &self.options,
            reporter,
        }
    }

    async fn counts(&self, top: Option<&Condition>) -> SyncResult<CountResult> {
        let table = &self.model.name;
        let (source, target) = tokio::join!(self.source.row_count(top), self.target.row_count(None));
        Ok(CountResult::new(
            source.context(table, "count source rows")?,
            target.context(table, "count target rows")?,
        ))
    }

    async fn generate_schema(&self, reporter: &Reporter) -> SyncResult<RunOutcome> {
        let table = &self.model.name;
        reporter.headline(format!("{table}: generating target schema"));
        let mut exists = self
            .target
            .table_exists()
            .await
            .context(table, "check target table")?;
        if exists && self.options.force {
            reporter.warning(format!("{table}: force mode, dropping the existing target table"));
            self.target
                .delete_table()
                .await
                .context(table, "drop target table")?;
            exists = false;
        }

        let status = reporter.status(StatusKind::Initialized);
        if exists {
            reporter.info(format!("{table}: target table exists, schema left unchanged"));
            return Ok(RunOutcome {
                status,
                counts: CountResult::default(),
            });
        }

        let columns = ResolvedColumns::resolve(&self.model, self.source.as_ref()).await?;
        let request = CreateTableRequest {
            table: self.target.table().name.clone(),
            schema: columns.schema.clone(),
            id_columns: self.model.id_fields(),
            columns: columns.columns.clone(),
            expected_size: self.model.expected_size,
            distribution_column: self
                .model
                .distribution_column
                .clone()
                .filter(|c| !c.trim().is_empty()),
            ignore_identity: self.model.azure_dwh_ignore_identity,
        };
        let created = self
            .target
            .create_table(&request)
            .await
            .context(table, "create target table")?;
        if !created {
            return Err(SyncError::Schema {
                table: table.clone(),
                message: "target adapter did not create the table".into(),
            });
        }
        reporter.success(format!(
            "{table}: created target table with {} columns",
            columns.columns.len()
        ));
        reporter.completed(&status);
        Ok(RunOutcome {
            status,
            counts: CountResult::default(),
        })
    }

    async fn check_count(&self, reporter: &Reporter, captured: &mut CountResult) -> SyncResult<RunOutcome> {
        let table = &self.model.name;
        let mut counts = self.counts(None).await?;
        counts.consistent = count_verdict(counts.source_count, counts.target_count);
        *captured = counts;

        let mut status = reporter.status(StatusKind::Ok);
        status.source_count = counts.source_count;
        status.target_count = counts.target_count;
        if counts.is_aligned() {
            reporter.success(format!("{table}: counts match ({} rows)", counts.source_count));
        } else {
            status.status = StatusKind::Warning;
            reporter.warning(format!(
                "{table}: counts differ, source {} and target {}",
                counts.source_count, counts.target_count
            ));
        }
        Ok(RunOutcome { status, counts })
    }

    async fn advanced_check(&self, reporter: &Reporter, captured: &mut CountResult) -> SyncResult<RunOutcome> {
        let table = &self.model.name;
        reporter.headline(format!("{table}: advanced consistency check"));
        let columns = ResolvedColumns::resolve(&self.model, self.source.as_ref()).await?;
        let ctx = self.context(&columns, reporter);
        let report = ConsistencyEngine::new(&ctx, None, true).run().await?;

        let mut counts = CountResult::new(report.source_count, report.target_count);
        counts.consistent = count_verdict(report.source_count, report.target_count);
        counts.advanced_consistent = report.verdict;
        *captured = counts;

        let mut status = reporter.status(StatusKind::Ok);
        status.source_count = report.source_count;
        status.target_count = report.target_count;
        status.consistency_fix = report.verdict;
        status.consistency_fix_duration = report.duration;
        if report.verdict == Consistency::Ok {
            reporter.success(format!("{table}: source and target are consistent"));
        } else {
            status.status = StatusKind::Warning;
            reporter.warning(format!("{table}: consistency check result {}", report.verdict));
        }
        Ok(RunOutcome { status, counts })
    }

    async fn data_copy(&self, reporter: &Reporter, captured: &mut CountResult, started: Instant) -> SyncResult<RunOutcome> {
        let table = self.model.name.as_str();
        reporter.headline(format!("{table}: data copy from {}", self.model.source_name));
        let columns = ResolvedColumns::resolve(&self.model, self.source.as_ref()).await?;
        let ctx = self.context(&columns, reporter);

        let force = self.options.force || self.model.data_sync_type == DataSyncType::ForceDeleteExisting;
        let mut boundary = if force {
            Boundary::none()
        } else {
            self.boundary(&ctx).await?
        };

        let total = self
            .source
            .row_count(None)
            .await
            .context(table, "count source rows")?;
        captured.source_count = total;
        reporter.info(format!("{table}: {total} rows in {}", self.model.source_name));

        if force {
            self.clear_target(reporter).await?;
        }

        let partial = if boundary.bottom.is_some() {
            match self.source.row_count(boundary.combined().as_ref()).await {
                Ok(rows) => rows,
                Err(err) if err.is_complexity_limit() => {
                    reporter.warning(format!(
                        "{table}: boundary filter too complex for the source, copying everything"
                    ));
                    self.clear_target(reporter).await?;
                    boundary.bottom = None;
                    total
                }
                Err(err) => return Err(SyncError::backend(table, "count boundary rows", err)),
            }
        } else {
            total
        };
        reporter.info(format!("{table}: copying {partial} of {total} rows"));

        let inserted = pipeline::copy(&ctx, boundary.combined().as_ref(), partial).await?;
        let updated = self.update_pass(&ctx).await?;

        // Status check
        let mut counts = self.counts(boundary.top.as_ref()).await?;
        *captured = counts;
        let mut has_duplicates = if self.model.ignore_key_integrity_check {
            false
        } else {
            self.target
                .has_duplicate_keys(&columns.id_columns())
                .await
                .context(table, "check duplicate keys")?
        };

        let mut consistency = Consistency::NotChecked;
        let mut correction_inserted = 0;
        let mut correction_deleted = 0;
        let mut correction_duration = Duration::ZERO;
        if has_duplicates || !counts.is_aligned() {
            if self.model.avoid_complete_consistency_correction {
                reporter.warning(format!("{table}: consistency correction disabled, skipping"));
            } else {
                reporter.headline(format!(
                    "{table}: correcting consistency, source {} and target {}",
                    counts.source_count, counts.target_count
                ));
                let report = ConsistencyEngine::new(&ctx, boundary.top.as_ref(), false).run().await?;
                consistency = report.verdict;
                correction_inserted = report.inserted;
                correction_deleted = report.deleted;
                correction_duration = report.duration;
                has_duplicates = report.has_duplicates;
                counts.source_count = report.source_count;
                counts.target_count = report.target_count;
                *captured = counts;
                match consistency {
                    Consistency::Ok => reporter.success(format!("{table}: consistency corrected")),
                    _ => reporter.warning(format!(
                        "{table}: corrected consistency but the target is still misaligned, the next run continues"
                    )),
                }
            }
        }
        counts.consistent = count_verdict(counts.source_count, counts.target_count);
        counts.advanced_consistent = consistency;

        if counts.source_count != total {
            reporter.warning(format!(
                "{table}: source count changed during the run from {total} to {}",
                counts.source_count
            ));
        }

        let key_integrity = if self.model.ignore_key_integrity_check {
            reporter.info(format!("{table}: key integrity check skipped"));
            KeyIntegrityStatus::Ignored
        } else if has_duplicates {
            KeyIntegrityStatus::DoubleKeys
        } else {
            KeyIntegrityStatus::Ok
        };

        let mut status = reporter.status(StatusKind::Ok);
        status.key_integrity = key_integrity;
        status.consistency_fix = consistency;
        status.source_count = counts.source_count;
        status.target_count = counts.target_count;
        status.rows_inserted = inserted;
        status.rows_updated = updated;
        status.correction_rows_inserted = correction_inserted;
        status.correction_rows_deleted = correction_deleted;
        status.progress = 100;
        status.progressed_rows = inserted;
        status.duration = started.elapsed();
        status.consistency_fix_duration = correction_duration;
        let mut status = status.with_totals();

        let count_warning = !self.model.ignore_count_consistency_check && !counts.is_aligned();
        let key_warning = !self.model.ignore_key_integrity_check && has_duplicates;
        if count_warning || key_warning {
            status.status = StatusKind::Warning;
            if count_warning {
                reporter.warning(format!(
                    "{table}: finished with row count difference, source {} and target {}",
                    counts.source_count, counts.target_count
                ));
            }
            if key_warning {
                reporter.warning(format!("{table}: finished with duplicate keys in the target"));
            }
        } else {
            reporter.success(format!(
                "{table}: finished, integrity checks passed with {} target rows",
                counts.target_count
            ));
        }
        reporter.completed(&status);
        Ok(RunOutcome { status, counts })
    }

    async fn clear_target(&self, reporter: &Reporter) -> SyncResult<()> {
        let table = &self.model.name;
        let removed = self
            .target
            .delete_all_rows()
            .await
            .context(table, "clear target table")?;
        reporter.warning(format!("{table}: force mode, deleted {removed} target rows"));
        Ok(())
    }

    /// Borders of the configured sync mode
    async fn boundary(&self, ctx: &ImportContext<'_>) -> SyncResult<Boundary> {
        let table = ctx.table();
        let ids = ctx.columns.id_columns();
        let sync_type = self.model.data_sync_type;
        match sync_type {
            DataSyncType::None | DataSyncType::ForceDeleteExisting => Ok(Boundary::none()),
            DataSyncType::AppendById | DataSyncType::AppendByIdFirst => {
                log_mode(ctx, sync_type);
                let id = match ids.as_slice() {
                    [] => {
                        return Err(SyncError::config(format!(
                            "{table}: {sync_type} needs an id field"
                        )));
                    }
                    [id] => id,
                    [id, ..] if sync_type == DataSyncType::AppendByIdFirst => id,
                    _ => {
                        return Err(SyncError::config(format!(
                            "{table}: {sync_type} supports exactly one id field"
                        )));
                    }
                };
                if !id.data_type.is_integer() {
                    return Err(SyncError::config(format!(
                        "{table}: {sync_type} needs an integer id field, {} is {}",
                        id.name, id.data_type
                    )));
                }
                let target_rows = ctx
                    .target
                    .row_count(None)
                    .await
                    .context(table, "count target rows")?;
                if target_rows == 0 {
                    return Ok(Boundary::none());
                }
                let (source_max, target_max) = tokio::join!(
                    ctx.source.max_value(id, None),
                    ctx.target.max_value(id, None)
                );
                let source_max = source_max.context(table, "read source max id")?;
                let target_max = target_max.context(table, "read target max id")?;
                ctx.reporter.info(format!(
                    "{table}: copying ids above {target_max} up to {source_max}"
                ));
                Ok(Boundary {
                    bottom: Some(Condition::gt(id.clone(), target_max)),
                    top: Some(Condition::le(id.clone(), source_max)),
                })
            }
            DataSyncType::AppendByDate | DataSyncType::AppendByDateStrict => {
                log_mode(ctx, sync_type);
                if ctx.columns.insert_dates.is_empty() {
                    return Err(SyncError::config(format!(
                        "{table}: {sync_type} needs insert date fields"
                    )));
                }
                if ids.is_empty() {
                    return Err(SyncError::config(format!("{table}: {sync_type} needs an id field")));
                }
                let target_rows = ctx
                    .target
                    .row_count(None)
                    .await
                    .context(table, "count target rows")?;
                if target_rows == 0 {
                    return Ok(Boundary::none());
                }
                let strict = sync_type == DataSyncType::AppendByDateStrict;
                let mark = HighWaterMark::load(
                    table,
                    ctx.target,
                    &ctx.columns.insert_dates,
                    self.model.insert_query_date_format.as_deref(),
                )
                .await?;
                ctx.reporter
                    .info(format!("{table}: insert date high-water mark {}", mark.describe()));
                let staircase = mark.condition(!strict);
                if strict {
                    return Ok(Boundary {
                        bottom: staircase,
                        top: None,
                    });
                }
                // Rows at the boundary date already in the target
                let present = ctx
                    .target
                    .field_values(&ids, staircase.as_ref())
                    .await
                    .context(table, "read ids at the high-water mark")?;
                let names: Vec<&str> = ids.iter().map(|c| c.internal_name.as_str()).collect();
                let tuples = present.project(&names);
                let exclusion = (!tuples.is_empty())
                    .then(|| ctx.target.condition_for_values(&ids, &tuples, Comparator::Ne));
                Ok(Boundary {
                    bottom: Condition::both(staircase, exclusion),
                    top: None,
                })
            }
            DataSyncType::AppendByIdExclude => {
                log_mode(ctx, sync_type);
                if ids.is_empty() {
                    return Err(SyncError::config(format!("{table}: {sync_type} needs an id field")));
                }
                let target_rows = ctx
                    .target
                    .row_count(None)
                    .await
                    .context(table, "count target rows")?;
                if target_rows == 0 {
                    return Ok(Boundary::none());
                }
                let present = ctx
                    .target
                    .field_values(&ids, None)
                    .await
                    .context(table, "read existing ids")?;
                let names: Vec<&str> = ids.iter().map(|c| c.internal_name.as_str()).collect();
                let tuples = present.project(&names);
                ctx.reporter
                    .info(format!("{table}: excluding {} existing ids", tuples.len()));
                Ok(Boundary {
                    bottom: Some(ctx.target.condition_for_values(&ids, &tuples, Comparator::Ne)),
                    top: None,
                })
            }
        }
    }

    /// Rewrite changed rows, returning the affected count
    async fn update_pass(&self, ctx: &ImportContext<'_>) -> SyncResult<u64> {
        let table = ctx.table();
        let condition = match self.model.update_mode {
            UpdateMode::None => return Ok(0),
            UpdateMode::UpdateByModifiedDate => {
                if ctx.columns.update_dates.is_empty() {
                    return Err(SyncError::config(format!(
                        "{table}: update by modified date needs update date fields"
                    )));
                }
                let mark = HighWaterMark::load(
                    table,
                    ctx.target,
                    &ctx.columns.update_dates,
                    self.model.update_query_date_format.as_deref(),
                )
                .await?;
                ctx.reporter
                    .info(format!("{table}: update date high-water mark {}", mark.describe()));
                mark.condition(false)
            }
            UpdateMode::ForceUpdateAll => None,
        };
        if ctx.columns.id_columns().is_empty() {
            return Err(SyncError::config(format!("{table}: the update pass needs an id field")));
        }
        ctx.reporter.headline(format!("{table}: update pass ({})", self.model.update_mode));
        let rows = ctx
            .source
            .row_count(condition.as_ref())
            .await
            .context(table, "count rows to update")?;
        ctx.reporter.info(format!("{table}: {rows} rows to update"));
        if rows == 0 {
            return Ok(0);
        }
        let filtered = self.model.update_mode == UpdateMode::UpdateByModifiedDate;
        let affected = pipeline::update(ctx, condition.as_ref(), rows, filtered).await?;
        ctx.reporter.info(format!("{table}: updated {affected} rows"));
        Ok(affected)
    }
}

fn log_mode(ctx: &ImportContext<'_>, sync_type: DataSyncType) {
    ctx.reporter
        .info(format!("{}: {sync_type} mode selected", ctx.table()));
}
