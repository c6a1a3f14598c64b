//! DuckDB backend tests
#![cfg(feature = "duckdb-backend")]

use std::sync::{Arc, Mutex};

use warehouse_sync::import::{DataImporter, ImporterOptions, OperationMode};
use warehouse_sync::models::{
    Column, Consistency, DataSyncType, DataType, ImportModel, JoinModel, StatusKind, UpdateMode,
    Value,
};
use warehouse_sync::query::{Condition, Range, SelectQuery, SortOrderField};
use warehouse_sync::query_adapter::SqlPaging;
use warehouse_sync::status::RecordingSink;
use warehouse_sync::{DuckDbAdapter, SourceAdapter, TargetAdapter};

fn database() -> (Arc<DuckDbAdapter>, Arc<DuckDbAdapter>) {
    let conn = Arc::new(Mutex::new(duckdb::Connection::open_in_memory().unwrap()));
    let source = DuckDbAdapter::with_connection(Arc::clone(&conn), "src_items");
    source
        .execute_batch(
            "CREATE TABLE src_items (Id BIGINT NOT NULL, Name VARCHAR, Created TIMESTAMP);
             INSERT INTO src_items
             SELECT i, 'item ' || i, TIMESTAMP '2024-01-01 00:00:00' + to_minutes(i)
             FROM range(1, 251) t(i);",
        )
        .unwrap();
    let target = DuckDbAdapter::with_connection(conn, "items");
    (Arc::new(source), Arc::new(target))
}

fn model() -> ImportModel {
    ImportModel::new("items", "src_items")
        .with_ids("Id")
        .with_sync_type(DataSyncType::AppendById)
}

async fn run(
    source: &Arc<DuckDbAdapter>,
    target: &Arc<DuckDbAdapter>,
    mode: OperationMode,
) -> warehouse_sync::RunOutcome {
    run_model(model(), source, target, mode).await
}

async fn run_model(
    model: ImportModel,
    source: &Arc<DuckDbAdapter>,
    target: &Arc<DuckDbAdapter>,
    mode: OperationMode,
) -> warehouse_sync::RunOutcome {
    let options = ImporterOptions::builder()
        .page_size(64)
        .consistency_page_size(100)
        .build()
        .unwrap();
    DataImporter::new(model, source.clone(), target.clone(), mode)
        .with_options(options)
        .with_sink(Arc::new(RecordingSink::new()))
        .run()
        .await
        .unwrap()
}

mod duckdb_adapter_tests {
    use super::*;

    #[tokio::test]
    async fn test_source_queries() {
        let (source, _) = database();
        let id = Column::new("Id", DataType::Long);

        assert_eq!(source.row_count(None).await.unwrap(), 250);
        assert_eq!(
            source
                .row_count(Some(&Condition::gt(id.clone(), 200)))
                .await
                .unwrap(),
            50
        );
        assert_eq!(source.max_value(&id, None).await.unwrap(), Value::Int(250));

        let schema = source.schema(None).await.unwrap();
        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.fields[0].data_type, DataType::Long);
        assert!(!schema.fields[0].nullable);
        assert_eq!(schema.fields[2].data_type, DataType::DateTime);

        let query = SelectQuery::new(vec![id.clone()], source.table().clone())
            .with_condition(Some(Condition::le(id.clone(), 3)))
            .with_sort_order(vec![SortOrderField::desc(id)]);
        let rows = source.run_query(&query).await.unwrap();
        assert_eq!(
            rows.rows,
            vec![vec![Value::Int(3)], vec![Value::Int(2)], vec![Value::Int(1)]]
        );
    }

    #[tokio::test]
    async fn test_schema_and_copy() {
        let (source, target) = database();
        assert!(!target.table_exists().await.unwrap());

        let schema = run(&source, &target, OperationMode::GenerateSchema).await;
        assert_eq!(schema.status.status, StatusKind::Initialized);
        assert!(target.table_exists().await.unwrap());

        let copy = run(&source, &target, OperationMode::DataCopy).await;
        assert_eq!(copy.status.status, StatusKind::Ok);
        assert_eq!(copy.status.rows_inserted, 250);
        assert_eq!(target.row_count(None).await.unwrap(), 250);

        source
            .execute_batch(
                "INSERT INTO src_items SELECT i, 'item ' || i, TIMESTAMP '2024-02-01 00:00:00' FROM range(251, 281) t(i);",
            )
            .unwrap();
        let incremental = run(&source, &target, OperationMode::DataCopy).await;
        assert_eq!(incremental.status.rows_inserted, 30);
        assert_eq!(target.row_count(None).await.unwrap(), 280);
    }

    #[tokio::test]
    async fn test_consistency_repairs_target() {
        let (source, target) = database();
        run(&source, &target, OperationMode::GenerateSchema).await;
        run(&source, &target, OperationMode::DataCopy).await;
        target
            .execute_batch(
                "DELETE FROM items WHERE Id IN (17, 120);
                 INSERT INTO items VALUES (99, 'item 99', NULL);",
            )
            .unwrap();

        let outcome = run(&source, &target, OperationMode::DataCopy).await;

        assert_eq!(outcome.status.consistency_fix, Consistency::Ok);
        assert_eq!(outcome.status.correction_rows_inserted, 3);
        assert_eq!(target.row_count(None).await.unwrap(), 250);
        let id = Column::new("Id", DataType::Long);
        assert!(!target.has_duplicate_keys(&[id]).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_only_leaves_target_alone() {
        let (source, target) = database();
        run(&source, &target, OperationMode::GenerateSchema).await;
        run(&source, &target, OperationMode::DataCopy).await;
        target
            .execute_batch("DELETE FROM items WHERE Id = 42;")
            .unwrap();

        let outcome = run(&source, &target, OperationMode::AdvancedConsistencyCheck).await;

        assert_eq!(outcome.status.consistency_fix, Consistency::False);
        assert_eq!(target.row_count(None).await.unwrap(), 249);
    }

    #[tokio::test]
    async fn test_row_number_paging_hides_ordinal() {
        let (source, target) = database();
        let source = Arc::new(
            DuckDbAdapter::with_connection(source.connection(), "src_items")
                .with_paging(SqlPaging::RowNumber),
        );
        let id = Column::new("Id", DataType::Long);

        let query = SelectQuery::new(vec![id.clone()], source.table().clone())
            .with_sort_order(vec![SortOrderField::asc(id)])
            .with_range(Range::new(10, 5));
        let page = source.run_query(&query).await.unwrap();
        assert_eq!(page.fields.len(), 1);
        assert_eq!(page.fields[0].name, "Id");
        assert_eq!(
            page.rows,
            (11..=15).map(|i| vec![Value::Int(i)]).collect::<Vec<_>>()
        );

        run(&source, &target, OperationMode::GenerateSchema).await;
        let copy = run(&source, &target, OperationMode::DataCopy).await;
        assert_eq!(copy.status.status, StatusKind::Ok);
        assert_eq!(target.row_count(None).await.unwrap(), 250);
        let schema = target.schema(None).await.unwrap();
        assert!(schema.fields.iter().all(|f| f.name != "CustomRowNumber"));
    }
}

mod duckdb_join_tests {
    use super::*;

    fn joined_database() -> (Arc<DuckDbAdapter>, Arc<DuckDbAdapter>) {
        let conn = Arc::new(Mutex::new(duckdb::Connection::open_in_memory().unwrap()));
        let source = DuckDbAdapter::with_connection(Arc::clone(&conn), "src_orders");
        source
            .execute_batch(
                "CREATE TABLE src_customers (Id BIGINT NOT NULL, Country VARCHAR);
                 INSERT INTO src_customers VALUES (1, 'NL'), (2, 'BE'), (3, 'FR');
                 CREATE TABLE src_orders (Id BIGINT NOT NULL, CustomerId BIGINT, Amount BIGINT);
                 INSERT INTO src_orders
                 SELECT i, i % 3 + 1, i * 10 FROM range(1, 31) t(i);",
            )
            .unwrap();
        let target = DuckDbAdapter::with_connection(conn, "orders").with_local_join_fields(true);
        (Arc::new(source), Arc::new(target))
    }

    fn joined_model() -> ImportModel {
        let mut model = ImportModel::new("orders", "src_orders")
            .with_ids("Id")
            .with_sync_type(DataSyncType::AppendById)
            .with_update_mode(UpdateMode::ForceUpdateAll);
        model.join.push(JoinModel {
            name: "c".to_string(),
            source_name: "src_customers".to_string(),
            id_field_name: "Id".to_string(),
            parent_join_field_name: "CustomerId".to_string(),
            select_fields: "Country".to_string(),
        });
        model
    }

    fn count_country(target: &DuckDbAdapter, country: &str) -> i64 {
        let conn = target.connection();
        let conn = conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE c_Country = ?1",
            [country],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_force_update_refreshes_joined_fields() {
        let (source, target) = joined_database();
        run_model(joined_model(), &source, &target, OperationMode::GenerateSchema).await;
        let copy = run_model(joined_model(), &source, &target, OperationMode::DataCopy).await;
        assert_eq!(copy.status.status, StatusKind::Ok);
        assert_eq!(copy.status.rows_inserted, 30);
        assert_eq!(count_country(&target, "NL"), 10);

        source
            .execute_batch("UPDATE src_customers SET Country = 'DE' WHERE Id = 1;")
            .unwrap();
        let outcome = run_model(joined_model(), &source, &target, OperationMode::DataCopy).await;

        assert_eq!(outcome.status.status, StatusKind::Ok);
        assert_eq!(outcome.status.rows_inserted, 0);
        assert_eq!(outcome.status.rows_updated, 30);
        assert_eq!(count_country(&target, "NL"), 0);
        assert_eq!(count_country(&target, "DE"), 10);
        assert_eq!(count_country(&target, "BE"), 10);
        assert_eq!(target.row_count(None).await.unwrap(), 30);
    }
}
