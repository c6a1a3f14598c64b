//! Importer tests against the in-memory adapter

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use warehouse_sync::import::{DataImporter, ImporterOptions, OperationMode};
use warehouse_sync::models::{
    Consistency, DataSyncType, DataTable, DataType, ImportModel, KeyIntegrityStatus, SchemaField,
    StatusKind, UpdateMode, Value,
};
use warehouse_sync::status::{LogLevel, RecordingSink, StatusEvent};
use warehouse_sync::{MemoryAdapter, SyncError};

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn fields() -> Vec<SchemaField> {
    vec![
        SchemaField::new("Id", DataType::Long).not_null(),
        SchemaField::new("Name", DataType::String).with_max_length(100),
        SchemaField::new("Created", DataType::DateTime),
        SchemaField::new("Modified", DataType::DateTime),
    ]
}

fn row(id: i64) -> Vec<Value> {
    let stamp = base() + Duration::minutes(id);
    vec![
        Value::Int(id),
        Value::from(format!("item {id}")),
        Value::DateTime(stamp),
        Value::DateTime(stamp),
    ]
}

fn table(ids: impl IntoIterator<Item = i64>) -> DataTable {
    DataTable::new(fields()).with_rows(ids.into_iter().map(row).collect())
}

fn source(ids: impl IntoIterator<Item = i64>) -> MemoryAdapter {
    MemoryAdapter::new("dbo.Items", table(ids))
}

fn target(ids: impl IntoIterator<Item = i64>) -> MemoryAdapter {
    MemoryAdapter::new("Items", table(ids))
}

fn model(sync_type: DataSyncType) -> ImportModel {
    let mut model = ImportModel::new("Items", "dbo.Items")
        .with_ids("Id")
        .with_sync_type(sync_type);
    model.connection = "erp".to_string();
    model
}

fn importer(
    model: ImportModel,
    source: &MemoryAdapter,
    target: &MemoryAdapter,
    mode: OperationMode,
    sink: &Arc<RecordingSink>,
) -> DataImporter {
    let options = ImporterOptions::builder().page_size(100).build().unwrap();
    DataImporter::new(model, Arc::new(source.clone()), Arc::new(target.clone()), mode)
        .with_options(options)
        .with_sink(sink.clone())
}

async fn ids(adapter: &MemoryAdapter) -> Vec<i64> {
    let mut ids: Vec<i64> = adapter
        .tuples(&["Id"])
        .await
        .into_iter()
        .filter_map(|t| t[0].as_i64())
        .collect();
    ids.sort();
    ids
}

mod data_copy_tests {
    use super::*;

    #[tokio::test]
    async fn test_append_by_id_into_empty_target() {
        let source = source(1..=1000);
        let target = target([]);
        let sink = Arc::new(RecordingSink::new());

        let outcome = importer(model(DataSyncType::AppendById), &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(outcome.status.rows_inserted, 1000);
        assert_eq!(outcome.status.source_count, 1000);
        assert_eq!(outcome.status.target_count, 1000);
        assert_eq!(outcome.status.key_integrity, KeyIntegrityStatus::Ok);
        assert_eq!(outcome.status.consistency_fix, Consistency::NotChecked);
        assert_eq!(outcome.counts.consistent, Consistency::Ok);
        assert_eq!(ids(&target).await, (1..=1000).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_events_are_ordered() {
        let source = source(1..=250);
        let target = target([]);
        let sink = Arc::new(RecordingSink::new());

        importer(model(DataSyncType::AppendById), &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        let events = sink.events();
        let completed_at = events
            .iter()
            .position(|e| matches!(e, StatusEvent::Completed(_)))
            .unwrap();
        let last_progress = events
            .iter()
            .rposition(|e| matches!(e, StatusEvent::Progress(_)))
            .unwrap();
        assert!(last_progress < completed_at);
        assert_eq!(sink.completed().len(), 1);
        assert!(matches!(events.last(), Some(StatusEvent::Metric { .. })));

        let progress = sink.progress();
        assert!(progress.windows(2).all(|w| w[0].progressed_rows <= w[1].progressed_rows));
        assert_eq!(progress.last().map(|p| p.progress), Some(100));
        assert_eq!(progress.last().map(|p| p.progressed_rows), Some(250));
    }

    #[tokio::test]
    async fn test_append_by_id_is_incremental() {
        let source = source(1..=300);
        let target = target([]);
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendById);

        importer(model.clone(), &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();
        source.replace(Some(table(1..=420))).await;
        let outcome = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.rows_inserted, 120);
        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(ids(&target).await, (1..=420).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_second_run_without_changes_is_idempotent() {
        for sync_type in [
            DataSyncType::AppendById,
            DataSyncType::AppendByIdFirst,
            DataSyncType::AppendByIdExclude,
            DataSyncType::None,
        ] {
            let source = source(1..=150);
            let target = target([]);
            let sink = Arc::new(RecordingSink::new());

            for _ in 0..2 {
                importer(model(sync_type), &source, &target, OperationMode::DataCopy, &sink)
                    .run()
                    .await
                    .unwrap();
            }

            assert_eq!(target.snapshot().await.unwrap().len(), 150, "{sync_type}");
            assert_eq!(ids(&target).await, (1..=150).collect::<Vec<_>>(), "{sync_type}");
            assert!(sink.completed().iter().all(|s| s.status == StatusKind::Ok), "{sync_type}");
        }
    }

    #[tokio::test]
    async fn test_append_by_date_strict() {
        let source = source(1..=80);
        let target = target(1..=50);
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendByDateStrict).with_insert_dates("Created");

        let outcome = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.rows_inserted, 30);
        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(ids(&target).await, (1..=80).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_append_by_date_keeps_rows_sharing_the_last_date() {
        // Ten ids share each Created hour
        let hourly = |ids: std::ops::RangeInclusive<i64>| {
            DataTable::new(fields()).with_rows(
                ids.map(|id| {
                    let mut r = row(id);
                    r[2] = Value::DateTime(base() + Duration::hours(id / 10));
                    r
                })
                .collect(),
            )
        };
        let source = MemoryAdapter::new("dbo.Items", hourly(1..=60));
        let target = MemoryAdapter::new("Items", hourly(1..=45));
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendByDate).with_insert_dates("Created");

        let outcome = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.rows_inserted, 15);
        assert_eq!(outcome.status.consistency_fix, Consistency::NotChecked);
        assert_eq!(ids(&target).await, (1..=60).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_append_by_id_exclude_fills_gaps() {
        let source = source(1..=20);
        let target = target((2..=20).step_by(2));
        let sink = Arc::new(RecordingSink::new());

        let outcome = importer(model(DataSyncType::AppendByIdExclude), &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.rows_inserted, 10);
        assert_eq!(ids(&target).await, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_force_delete_existing_replaces_target() {
        let source = source(1..=10);
        let target = target(500..=510);
        let sink = Arc::new(RecordingSink::new());

        let outcome = importer(model(DataSyncType::ForceDeleteExisting), &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.rows_inserted, 10);
        assert_eq!(ids(&target).await, (1..=10).collect::<Vec<_>>());
        assert!(!sink.messages(LogLevel::Warning).is_empty());
    }

    #[tokio::test]
    async fn test_force_option_clears_append_mode() {
        let source = source(1..=10);
        let target = target(1..=10);
        let sink = Arc::new(RecordingSink::new());

        let outcome = importer(model(DataSyncType::AppendById), &source, &target, OperationMode::DataCopy, &sink)
            .with_force(true)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.rows_inserted, 10);
        assert_eq!(ids(&target).await, (1..=10).collect::<Vec<_>>());
    }
}

mod update_tests {
    use super::*;

    async fn rename(adapter: &MemoryAdapter, ids: &[i64], name: &str, modified: Option<NaiveDateTime>) {
        let mut data = adapter.snapshot().await.unwrap();
        for r in data.rows.iter_mut() {
            if let Some(id) = r[0].as_i64() {
                if ids.contains(&id) {
                    r[1] = Value::from(name);
                    if let Some(m) = modified {
                        r[3] = Value::DateTime(m);
                    }
                }
            }
        }
        adapter.replace(Some(data)).await;
    }

    async fn names(adapter: &MemoryAdapter) -> Vec<(i64, String)> {
        let mut names: Vec<(i64, String)> = adapter
            .tuples(&["Id", "Name"])
            .await
            .into_iter()
            .map(|t| (t[0].as_i64().unwrap(), t[1].to_string()))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_force_update_all() {
        let source = source(1..=30);
        let target = target(1..=30);
        rename(&source, &(1..=30).collect::<Vec<_>>(), "renamed", None).await;
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendById).with_update_mode(UpdateMode::ForceUpdateAll);

        let outcome = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.rows_inserted, 0);
        assert_eq!(outcome.status.rows_updated, 30);
        assert!(names(&target).await.iter().all(|(_, n)| n == "renamed"));
    }

    #[tokio::test]
    async fn test_update_by_modified_date() {
        let source = source(1..=20);
        let target = target(1..=20);
        rename(&source, &[5, 7], "changed", Some(base() + Duration::days(1))).await;
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendById)
            .with_update_mode(UpdateMode::UpdateByModifiedDate)
            .with_update_dates("Modified");

        let outcome = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.rows_updated, 2);
        let names = names(&target).await;
        assert_eq!(names[4], (5, "changed".to_string()));
        assert_eq!(names[6], (7, "changed".to_string()));
        assert_eq!(names[5], (6, "item 6".to_string()));
    }

    #[tokio::test]
    async fn test_ignored_update_columns_are_kept() {
        let source = source(1..=5);
        let target = target(1..=5);
        rename(&source, &[1, 2, 3, 4, 5], "renamed", None).await;
        let sink = Arc::new(RecordingSink::new());
        let mut model = model(DataSyncType::AppendById).with_update_mode(UpdateMode::ForceUpdateAll);
        model.ignore_update_columns = Some("[Name]".to_string());

        importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap();

        assert!(names(&target).await.iter().all(|(id, n)| *n == format!("item {id}")));
    }

    #[tokio::test]
    async fn test_update_needs_update_dates() {
        let source = source(1..=5);
        let target = target(1..=5);
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendById).with_update_mode(UpdateMode::UpdateByModifiedDate);

        let err = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}

mod configuration_error_tests {
    use super::*;

    #[tokio::test]
    async fn test_append_by_id_rejects_composite_key() {
        let source = source(1..=5);
        let target = target(1..=5);
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendById).with_ids("Id,Name");

        let err = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Config(_)));
        assert!(!err.is_recoverable());
        let completed = sink.completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, StatusKind::Error);
        assert!(completed[0].error_message.is_some());
        assert_eq!(sink.messages(LogLevel::Error).len(), 1);
        assert_eq!(sink.metrics().len(), 1);
    }

    #[tokio::test]
    async fn test_append_by_id_needs_integer_id() {
        let source = source(1..=5);
        let target = target(1..=5);
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendById).with_ids("Name");

        let err = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_append_by_date_needs_insert_dates() {
        let source = source(1..=5);
        let target = target(1..=5);
        let sink = Arc::new(RecordingSink::new());

        let err = importer(model(DataSyncType::AppendByDate), &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_unknown_id_field() {
        let source = source(1..=5);
        let target = target([]);
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendById).with_ids("Nope");

        let err = importer(model, &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_target_table_is_a_backend_error() {
        let source = source(1..=5);
        let target = MemoryAdapter::missing("Items");
        let sink = Arc::new(RecordingSink::new());

        let err = importer(model(DataSyncType::AppendById), &source, &target, OperationMode::DataCopy, &sink)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Backend { .. }));
        assert_eq!(sink.completed()[0].status, StatusKind::Error);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let source = source(1..=5);
        let target = target([]);
        let mut importer = DataImporter::new(
            model(DataSyncType::None),
            Arc::new(source),
            Arc::new(target),
            OperationMode::DataCopy,
        );
        assert!(importer.set_page_size(0).is_err());
        assert!(importer.set_consistency_page_size(0).is_err());
        assert!(importer.set_page_size(10).is_ok());
        assert_eq!(importer.options().page_size, 10);
    }

    #[test]
    fn test_custom_page_size_is_default() {
        let source = source(1..=5).with_custom_page_size(42);
        let importer = DataImporter::new(
            model(DataSyncType::None),
            Arc::new(source),
            Arc::new(target([])),
            OperationMode::DataCopy,
        );
        assert_eq!(importer.options().page_size, 42);
    }
}

mod schema_tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_missing_table() {
        let source = source(1..=5);
        let target = MemoryAdapter::missing("Items");
        let sink = Arc::new(RecordingSink::new());

        let outcome = importer(model(DataSyncType::AppendById), &source, &target, OperationMode::GenerateSchema, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.status, StatusKind::Initialized);
        let created = target.snapshot().await.unwrap();
        assert_eq!(created.fields.len(), 4);
        assert!(created.is_empty());
        assert_eq!(sink.completed().len(), 1);
        assert_eq!(sink.completed()[0].status, StatusKind::Initialized);
    }

    #[tokio::test]
    async fn test_existing_table_is_left_alone() {
        let source = source(1..=5);
        let target = target(1..=3);
        let sink = Arc::new(RecordingSink::new());

        let outcome = importer(model(DataSyncType::AppendById), &source, &target, OperationMode::GenerateSchema, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.status, StatusKind::Initialized);
        assert!(sink.completed().is_empty());
        assert_eq!(target.snapshot().await.unwrap().len(), 3);
        assert_eq!(target.mutations(), 0);
    }

    #[tokio::test]
    async fn test_force_recreates_table() {
        let source = source(1..=5);
        let target = MemoryAdapter::new(
            "Items",
            DataTable::new(vec![SchemaField::new("Legacy", DataType::String)]),
        );
        let sink = Arc::new(RecordingSink::new());

        importer(model(DataSyncType::AppendById), &source, &target, OperationMode::GenerateSchema, &sink)
            .with_force(true)
            .run()
            .await
            .unwrap();

        let created = target.snapshot().await.unwrap();
        assert!(created.index_of("Legacy").is_none());
        assert!(created.index_of("Id").is_some());
        assert_eq!(sink.completed().len(), 1);
    }
}

mod check_count_tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_match() {
        let source = source(1..=10);
        let target = target(1..=10);
        let sink = Arc::new(RecordingSink::new());

        let outcome = importer(model(DataSyncType::None), &source, &target, OperationMode::CheckCount, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(outcome.counts.consistent, Consistency::Ok);
        assert!(sink.completed().is_empty());
        assert_eq!(target.mutations(), 0);
    }

    #[tokio::test]
    async fn test_counts_differ() {
        let source = source(1..=10);
        let target = target(1..=7);
        let sink = Arc::new(RecordingSink::new());

        let outcome = importer(model(DataSyncType::None), &source, &target, OperationMode::CheckCount, &sink)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.status, StatusKind::Warning);
        assert_eq!(outcome.counts.source_count, 10);
        assert_eq!(outcome.counts.target_count, 7);
        assert_eq!(outcome.counts.consistent, Consistency::CountDiffersButTrue);
    }
}

mod source_quirk_tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use warehouse_sync::models::{Column, Table};
    use warehouse_sync::query::{Condition, SelectQuery};
    use warehouse_sync::{AdapterError, SourceAdapter};

    /// Source whose first filtered count exceeds the backend's expression limit
    struct LimitedSource {
        inner: MemoryAdapter,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl SourceAdapter for LimitedSource {
        fn table(&self) -> &Table {
            self.inner.table()
        }

        async fn schema(&self, columns: Option<&[Column]>) -> Result<DataTable, AdapterError> {
            self.inner.schema(columns).await
        }

        async fn row_count(&self, condition: Option<&Condition>) -> Result<u64, AdapterError> {
            if condition.is_some() && !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(AdapterError::ComplexityLimit(
                    "the query processor ran out of internal resources".to_string(),
                ));
            }
            self.inner.row_count(condition).await
        }

        async fn max_value(&self, column: &Column, condition: Option<&Condition>) -> Result<Value, AdapterError> {
            self.inner.max_value(column, condition).await
        }

        async fn run_query(&self, query: &SelectQuery) -> Result<DataTable, AdapterError> {
            self.inner.run_query(query).await
        }
    }

    #[tokio::test]
    async fn test_complex_boundary_falls_back_to_full_copy() {
        let source = Arc::new(LimitedSource {
            inner: source(1..=80),
            tripped: AtomicBool::new(false),
        });
        let mut stale = table(1..=50);
        stale.rows[9][1] = Value::from("stale");
        let target = MemoryAdapter::new("Items", stale);
        let sink = Arc::new(RecordingSink::new());

        let outcome = DataImporter::new(
            model(DataSyncType::AppendById),
            source.clone(),
            Arc::new(target.clone()),
            OperationMode::DataCopy,
        )
        .with_options(ImporterOptions::builder().page_size(30).build().unwrap())
        .with_sink(sink.clone())
        .run()
        .await
        .unwrap();

        assert!(source.tripped.load(Ordering::SeqCst));
        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(outcome.status.rows_inserted, 80);
        assert_eq!(ids(&target).await, (1..=80).collect::<Vec<_>>());
        let names = target.tuples(&["Id", "Name"]).await;
        assert!(names.contains(&vec![Value::Int(10), Value::from("item 10")]));
        assert!(!names.iter().any(|r| r[1] == Value::from("stale")));
        let warnings = sink.messages(LogLevel::Warning);
        assert!(warnings.iter().any(|m| m.contains("too complex")));
        assert!(warnings.iter().any(|m| m.contains("deleted 50 target rows")));
    }

    /// Source whose unfiltered count still includes rows deleted after counting
    struct ShrunkSource {
        inner: MemoryAdapter,
        vanished: u64,
    }

    #[async_trait]
    impl SourceAdapter for ShrunkSource {
        fn table(&self) -> &Table {
            self.inner.table()
        }

        async fn schema(&self, columns: Option<&[Column]>) -> Result<DataTable, AdapterError> {
            self.inner.schema(columns).await
        }

        async fn row_count(&self, condition: Option<&Condition>) -> Result<u64, AdapterError> {
            let rows = self.inner.row_count(condition).await?;
            Ok(if condition.is_none() { rows + self.vanished } else { rows })
        }

        async fn max_value(&self, column: &Column, condition: Option<&Condition>) -> Result<Value, AdapterError> {
            self.inner.max_value(column, condition).await
        }

        async fn run_query(&self, query: &SelectQuery) -> Result<DataTable, AdapterError> {
            self.inner.run_query(query).await
        }
    }

    #[tokio::test]
    async fn test_unfiltered_update_tolerates_empty_pages() {
        let inner = source(1..=30);
        let mut data = inner.snapshot().await.unwrap();
        for r in data.rows.iter_mut() {
            r[1] = Value::from("renamed");
        }
        inner.replace(Some(data)).await;
        let source = Arc::new(ShrunkSource { inner, vanished: 10 });
        let target = target(1..=30);
        let sink = Arc::new(RecordingSink::new());
        let model = model(DataSyncType::AppendById).with_update_mode(UpdateMode::ForceUpdateAll);

        let outcome = DataImporter::new(model, source, Arc::new(target.clone()), OperationMode::DataCopy)
            .with_options(ImporterOptions::builder().page_size(10).build().unwrap())
            .with_sink(sink.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(outcome.status.rows_updated, 30);
        let names = target.tuples(&["Name"]).await;
        assert!(names.iter().all(|n| n[0] == Value::from("renamed")));
    }
}
