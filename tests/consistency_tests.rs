//! Consistency reconciliation tests

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use warehouse_sync::import::{DataImporter, ImporterOptions, OperationMode, RunOutcome};
use warehouse_sync::models::{
    Consistency, DataSyncType, DataTable, DataType, ImportModel, KeyIntegrityStatus, SchemaField,
    StatusKind, Value,
};
use warehouse_sync::status::{LogLevel, RecordingSink};
use warehouse_sync::MemoryAdapter;

fn row(id: i64) -> Vec<Value> {
    let created = NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
        + Duration::seconds(id);
    vec![Value::Int(id), Value::from(format!("row {id}")), Value::DateTime(created)]
}

fn table(ids: impl IntoIterator<Item = i64>) -> DataTable {
    DataTable::new(vec![
        SchemaField::new("Id", DataType::Long).not_null(),
        SchemaField::new("Label", DataType::String),
        SchemaField::new("Created", DataType::DateTime),
    ])
    .with_rows(ids.into_iter().map(row).collect())
}

fn model() -> ImportModel {
    ImportModel::new("Facts", "dbo.Facts")
        .with_ids("Id")
        .with_sync_type(DataSyncType::AppendById)
}

async fn run(
    model: ImportModel,
    source: &MemoryAdapter,
    target: &MemoryAdapter,
    mode: OperationMode,
    consistency_page_size: usize,
) -> (RunOutcome, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let options = ImporterOptions::builder()
        .page_size(50)
        .consistency_page_size(consistency_page_size)
        .build()
        .unwrap();
    let outcome = DataImporter::new(model, Arc::new(source.clone()), Arc::new(target.clone()), mode)
        .with_options(options)
        .with_sink(sink.clone())
        .run()
        .await
        .unwrap();
    (outcome, sink)
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

mod correction_tests {
    use super::*;

    #[tokio::test]
    async fn test_gaps_and_orphans_converge() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=200));
        let target = MemoryAdapter::new(
            "Facts",
            table(
                (1..=200)
                    .filter(|id| ![10, 50, 150].contains(id))
                    .chain([1001, 1002]),
            ),
        );

        let (outcome, sink) = run(model(), &source, &target, OperationMode::DataCopy, 1_000_000).await;

        let status = &outcome.status;
        assert_eq!(status.status, StatusKind::Ok);
        assert_eq!(status.consistency_fix, Consistency::Ok);
        assert_eq!(status.rows_inserted, 0);
        assert_eq!(status.correction_rows_inserted, 3);
        assert_eq!(status.correction_rows_deleted, 2);
        assert_eq!(status.total_rows_inserted, 3);
        assert_eq!(status.total_rows_difference, 1);
        assert_eq!(status.key_integrity, KeyIntegrityStatus::Ok);
        assert_eq!(outcome.counts.source_count, 200);
        assert_eq!(outcome.counts.target_count, 200);
        assert_eq!(ids(&target).await, (1..=200).collect::<Vec<_>>());
        assert_eq!(sink.completed().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_are_purged_and_reinserted() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=50));
        let target = MemoryAdapter::new("Facts", table((1..=50).chain([7, 8])));

        let (outcome, sink) = run(model(), &source, &target, OperationMode::DataCopy, 1_000_000).await;

        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(outcome.status.correction_rows_deleted, 4);
        assert_eq!(outcome.status.correction_rows_inserted, 2);
        assert_eq!(outcome.status.key_integrity, KeyIntegrityStatus::Ok);
        assert_eq!(ids(&target).await, (1..=50).collect::<Vec<_>>());
        assert!(sink
            .messages(LogLevel::Warning)
            .iter()
            .any(|m| m.contains("duplicate keys")));
    }

    #[tokio::test]
    async fn test_converges_across_pages() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=100));
        let target = MemoryAdapter::new(
            "Facts",
            table((1..=100).filter(|id| ![5, 40, 77].contains(id))),
        );

        let (outcome, _) = run(model(), &source, &target, OperationMode::DataCopy, 16).await;

        assert_eq!(outcome.status.consistency_fix, Consistency::Ok);
        assert_eq!(outcome.status.correction_rows_inserted, 3);
        assert_eq!(outcome.status.correction_rows_deleted, 0);
        assert_eq!(ids(&target).await, (1..=100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_copied_rows_keep_their_values() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=12));
        let target = MemoryAdapter::new("Facts", table((1..=12).filter(|id| *id != 6)));

        run(model(), &source, &target, OperationMode::DataCopy, 1_000_000).await;

        let rows = target.tuples(&["Id", "Label", "Created"]).await;
        let six = rows.iter().find(|r| r[0] == Value::Int(6)).unwrap();
        assert_eq!(six, &row(6));
    }
}

mod check_only_tests {
    use super::*;

    #[tokio::test]
    async fn test_equal_counts_with_different_keys() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=20));
        let target = MemoryAdapter::new(
            "Facts",
            table((1..=20).filter(|id| *id != 15).chain([999])),
        );
        let before = target.mutations();

        let (outcome, sink) = run(
            model(),
            &source,
            &target,
            OperationMode::AdvancedConsistencyCheck,
            1_000_000,
        )
        .await;

        assert_eq!(outcome.status.status, StatusKind::Warning);
        assert_eq!(outcome.status.consistency_fix, Consistency::False);
        assert_eq!(outcome.counts.consistent, Consistency::Ok);
        assert_eq!(outcome.counts.advanced_consistent, Consistency::False);
        assert_eq!(target.mutations(), before);
        assert!(ids(&target).await.contains(&999));
        assert!(sink.completed().is_empty());
    }

    #[tokio::test]
    async fn test_consistent_tables() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=40));
        let target = MemoryAdapter::new("Facts", table(1..=40));

        let (outcome, _) = run(
            model(),
            &source,
            &target,
            OperationMode::AdvancedConsistencyCheck,
            7,
        )
        .await;

        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(outcome.status.consistency_fix, Consistency::Ok);
        assert_eq!(target.mutations(), 0);
    }

    #[tokio::test]
    async fn test_surplus_target_rows() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=20));
        let target = MemoryAdapter::new("Facts", table((1..=20).chain([999])));

        let (outcome, _) = run(
            model(),
            &source,
            &target,
            OperationMode::AdvancedConsistencyCheck,
            1_000_000,
        )
        .await;

        assert_eq!(outcome.status.consistency_fix, Consistency::False);
        assert_eq!(target.mutations(), 0);
    }
}

mod correction_flag_tests {
    use super::*;

    #[tokio::test]
    async fn test_count_correction_avoided() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=30));
        let target = MemoryAdapter::new("Facts", table((1..=30).filter(|id| *id != 3)));
        let mut model = model();
        model.avoid_count_consistency_correction = true;

        let (outcome, _) = run(model, &source, &target, OperationMode::DataCopy, 1_000_000).await;

        assert_eq!(outcome.status.consistency_fix, Consistency::CountDiffersButTrue);
        assert_eq!(outcome.status.status, StatusKind::Warning);
        assert_eq!(outcome.status.correction_rows_inserted, 0);
        assert_eq!(ids(&target).await.len(), 29);
    }

    #[tokio::test]
    async fn test_complete_correction_avoided() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=30));
        let target = MemoryAdapter::new("Facts", table((1..=30).filter(|id| *id != 3)));
        let mut model = model();
        model.avoid_complete_consistency_correction = true;

        let (outcome, sink) = run(model, &source, &target, OperationMode::DataCopy, 1_000_000).await;

        assert_eq!(outcome.status.consistency_fix, Consistency::NotChecked);
        assert_eq!(outcome.status.status, StatusKind::Warning);
        assert_eq!(outcome.counts.consistent, Consistency::CountDiffersButTrue);
        assert_eq!(ids(&target).await.len(), 29);
        assert!(sink
            .messages(LogLevel::Warning)
            .iter()
            .any(|m| m.contains("consistency correction disabled")));
    }

    #[tokio::test]
    async fn test_ignored_count_check_finishes_ok() {
        let source = MemoryAdapter::new("dbo.Facts", table(1..=30));
        let target = MemoryAdapter::new("Facts", table((1..=30).filter(|id| *id != 3)));
        let mut model = model();
        model.avoid_complete_consistency_correction = true;
        model.ignore_count_consistency_check = true;

        let (outcome, _) = run(model, &source, &target, OperationMode::DataCopy, 1_000_000).await;

        assert_eq!(outcome.status.status, StatusKind::Ok);
    }
}

mod gap_loop_tests {
    use super::*;

    #[tokio::test]
    async fn test_leftover_duplicates_are_never_ok() {
        let source = MemoryAdapter::new("dbo.Facts", table([1, 1, 2]));
        let target = MemoryAdapter::new("Facts", table([2]));

        let (outcome, sink) = run(model(), &source, &target, OperationMode::DataCopy, 1_000_000).await;

        assert_eq!(outcome.status.consistency_fix, Consistency::CountDiffersButTrue);
        assert_eq!(outcome.status.status, StatusKind::Warning);
        assert_eq!(outcome.status.key_integrity, KeyIntegrityStatus::Ok);
        let mut remaining = ids(&target).await;
        remaining.dedup();
        assert_eq!(remaining.len(), ids(&target).await.len());
        assert!(sink
            .messages(LogLevel::Warning)
            .iter()
            .any(|m| m.contains("still misaligned")));
    }

    #[tokio::test]
    async fn test_exhausted_passes_report_count_difference() {
        // the repeated source key can never be inserted twice
        let source = MemoryAdapter::new("dbo.Facts", table([1, 2, 2, 3, 4]));
        let target = MemoryAdapter::new("Facts", table([1, 2, 3, 4]));
        let sink = Arc::new(RecordingSink::new());
        let options = ImporterOptions::builder()
            .page_size(50)
            .gap_iterations(2)
            .build()
            .unwrap();
        let mut model = model();
        model.ignore_key_integrity_check = true;

        let outcome = DataImporter::new(
            model,
            Arc::new(source.clone()),
            Arc::new(target.clone()),
            OperationMode::DataCopy,
        )
        .with_options(options)
        .with_sink(sink.clone())
        .run()
        .await
        .unwrap();

        assert_eq!(outcome.status.consistency_fix, Consistency::CountDiffersButTrue);
        assert_eq!(outcome.status.status, StatusKind::Warning);
        assert_eq!(outcome.counts.source_count, 5);
        assert_eq!(outcome.counts.target_count, 4);
        assert_eq!(target.mutations(), 0);
        assert!(sink
            .messages(LogLevel::Warning)
            .iter()
            .any(|m| m.contains("still misaligned after 2 correction passes")));
    }
}
