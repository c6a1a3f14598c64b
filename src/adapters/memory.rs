//! In-memory table adapter
//!
//! Serves flat files that were loaded into a [`DataTable`] and doubles as the
//! reference backend in tests. Queries are evaluated directly against the rows;
//! the equivalent row-filter expression is logged for diagnostics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    CreateTableRequest, DEFAULT_PARAMETER_CEILING, ProgressCallback, SchemaFlavor, SourceAdapter,
    TableCreator, TargetAdapter, sort_rows,
};
use crate::error::AdapterError;
use crate::models::{Column, ColumnKind, ColumnTypeInfo, DataTable, SchemaField, Table, Value};
use crate::query::{Condition, SelectQuery, SortDirection, UpdateQuery};
use crate::query_adapter::{DataSetQueryAdapter, QueryAdapter};

/// Adapter over a shared in-memory table; `None` means the table does not exist
#[derive(Clone)]
pub struct MemoryAdapter {
    table: Table,
    data: Arc<RwLock<Option<DataTable>>>,
    mutations: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
    custom_page_size: Option<usize>,
    parameter_ceiling: usize,
}

impl MemoryAdapter {
    /// Adapter over an existing table
    pub fn new(name: impl Into<String>, data: DataTable) -> Self {
        Self::with_state(name, Some(data))
    }

    /// Adapter whose table has not been created yet
    pub fn missing(name: impl Into<String>) -> Self {
        Self::with_state(name, None)
    }

    fn with_state(name: impl Into<String>, data: Option<DataTable>) -> Self {
        Self {
            table: Table::new(name),
            data: Arc::new(RwLock::new(data)),
            mutations: Arc::new(AtomicU64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
            custom_page_size: None,
            parameter_ceiling: DEFAULT_PARAMETER_CEILING,
        }
    }

    pub fn with_custom_page_size(mut self, page_size: usize) -> Self {
        self.custom_page_size = Some(page_size);
        self
    }

    pub fn with_parameter_ceiling(mut self, ceiling: usize) -> Self {
        self.parameter_ceiling = ceiling.max(1);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of mutating commands executed so far
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Copy of the current table
    pub async fn snapshot(&self) -> Option<DataTable> {
        self.data.read().await.clone()
    }

    /// Replace the table content
    pub async fn replace(&self, data: Option<DataTable>) {
        *self.data.write().await = data;
    }

    /// Values of the given fields for every row, in storage order
    pub async fn tuples(&self, fields: &[&str]) -> Vec<Vec<Value>> {
        self.data
            .read()
            .await
            .as_ref()
            .map(|d| d.project(fields))
            .unwrap_or_default()
    }

    fn missing_table(&self) -> AdapterError {
        AdapterError::Schema(format!("table {} does not exist", self.table.name))
    }

    fn touch(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn log_filter(&self, operation: &str, condition: Option<&Condition>) {
        if let Some(condition) = condition {
            tracing::debug!(
                table = %self.table.name,
                operation,
                filter = %DataSetQueryAdapter::new().convert_condition(condition, "").text,
                "memory query"
            );
        }
    }
}

/// Field index of a column: local name first, remote name second
fn resolve(data: &DataTable, column: &Column) -> Option<usize> {
    data.index_of(&column.internal_name)
        .or_else(|| data.index_of(&column.name))
}

fn resolve_required(data: &DataTable, column: &Column) -> Result<usize, AdapterError> {
    resolve(data, column).ok_or_else(|| AdapterError::Schema(format!("unknown column {}", column.name)))
}

fn row_matches(data: &DataTable, row: &[Value], condition: Option<&Condition>) -> bool {
    match condition {
        None => true,
        Some(condition) => {
            let lookup = |c: &Column| resolve(data, c).and_then(|i| row.get(i));
            condition.matches(&lookup)
        }
    }
}

fn max_of<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    values
        .filter(|v| !v.is_null())
        .max()
        .cloned()
        .unwrap_or(Value::Null)
}

fn select(data: &DataTable, query: &SelectQuery) -> Result<DataTable, AdapterError> {
    let mut rows: Vec<Vec<Value>> = data
        .rows
        .iter()
        .filter(|r| row_matches(data, r, query.condition.as_ref()))
        .cloned()
        .collect();

    if query.columns.iter().any(|c| c.kind.is_aggregate()) {
        let mut fields = Vec::with_capacity(query.columns.len());
        let mut row = Vec::with_capacity(query.columns.len());
        for column in &query.columns {
            let value = match column.kind {
                ColumnKind::CountRows => Value::Int(rows.len() as i64),
                ColumnKind::MaxValue | ColumnKind::JoinedMaxValue(_) => {
                    let idx = resolve_required(data, column)?;
                    max_of(rows.iter().map(|r| &r[idx]))
                }
                _ => {
                    return Err(AdapterError::InvalidQuery(format!(
                        "column {} mixed with aggregates",
                        column.name
                    )));
                }
            };
            fields.push(SchemaField::new(column.internal_name.clone(), column.data_type));
            row.push(value);
        }
        return Ok(DataTable::new(fields).with_rows(vec![row]));
    }

    let keys = query
        .sort_order
        .iter()
        .map(|f| Ok((resolve_required(data, &f.column)?, f.direction == SortDirection::Desc)))
        .collect::<Result<Vec<_>, AdapterError>>()?;
    sort_rows(&mut rows, &keys);

    if let Some(range) = query.range {
        rows = rows.into_iter().skip(range.from).take(range.count).collect();
    }

    let indices = query
        .columns
        .iter()
        .map(|c| resolve_required(data, c))
        .collect::<Result<Vec<_>, _>>()?;
    let fields = query
        .columns
        .iter()
        .zip(&indices)
        .map(|(c, i)| SchemaField {
            name: c.internal_name.clone(),
            ..data.fields[*i].clone()
        })
        .collect();
    let rows = rows
        .into_iter()
        .map(|r| indices.iter().map(|i| r[*i].clone()).collect())
        .collect();
    Ok(DataTable::new(fields).with_rows(rows))
}

#[async_trait]
impl SourceAdapter for MemoryAdapter {
    fn table(&self) -> &Table {
        &self.table
    }

    async fn schema(&self, columns: Option<&[Column]>) -> Result<DataTable, AdapterError> {
        let guard = self.data.read().await;
        let data = guard.as_ref().ok_or_else(|| self.missing_table())?;
        match columns {
            None => Ok(data.schema()),
            Some(columns) => {
                let fields = columns
                    .iter()
                    .map(|c| {
                        let idx = resolve_required(data, c)?;
                        Ok(SchemaField {
                            name: c.internal_name.clone(),
                            ..data.fields[idx].clone()
                        })
                    })
                    .collect::<Result<Vec<_>, AdapterError>>()?;
                Ok(DataTable::new(fields))
            }
        }
    }

    async fn row_count(&self, condition: Option<&Condition>) -> Result<u64, AdapterError> {
        self.log_filter("count", condition);
        let guard = self.data.read().await;
        let data = guard.as_ref().ok_or_else(|| self.missing_table())?;
        Ok(data
            .rows
            .iter()
            .filter(|r| row_matches(data, r, condition))
            .count() as u64)
    }

    async fn max_value(&self, column: &Column, condition: Option<&Condition>) -> Result<Value, AdapterError> {
        self.log_filter("max", condition);
        let guard = self.data.read().await;
        let data = guard.as_ref().ok_or_else(|| self.missing_table())?;
        let idx = resolve_required(data, column)?;
        Ok(max_of(
            data.rows
                .iter()
                .filter(|r| row_matches(data, r, condition))
                .map(|r| &r[idx]),
        ))
    }

    async fn run_query(&self, query: &SelectQuery) -> Result<DataTable, AdapterError> {
        self.log_filter("select", query.condition.as_ref());
        let guard = self.data.read().await;
        let data = guard.as_ref().ok_or_else(|| self.missing_table())?;
        select(data, query)
    }

    async fn extended_column_type_info(&self, _table_name: Option<&str>) -> Result<Vec<ColumnTypeInfo>, AdapterError> {
        let guard = self.data.read().await;
        Ok(guard
            .as_ref()
            .map(|d| {
                d.fields
                    .iter()
                    .map(|f| ColumnTypeInfo::new(f.name.clone(), f.data_type.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn custom_page_size(&self) -> Option<usize> {
        self.custom_page_size
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetAdapter for MemoryAdapter {
    async fn table_exists(&self) -> Result<bool, AdapterError> {
        Ok(self.data.read().await.is_some())
    }

    async fn create_table(&self, request: &CreateTableRequest) -> Result<bool, AdapterError> {
        let mut guard = self.data.write().await;
        if guard.is_some() {
            return Ok(false);
        }
        let ddl = TableCreator::new(SchemaFlavor::SqlServer).create_table_sql(request)?;
        tracing::debug!(table = %self.table.name, ddl = %ddl, "create table");
        *guard = Some(request.schema.schema());
        self.touch();
        Ok(true)
    }

    async fn delete_table(&self) -> Result<(), AdapterError> {
        *self.data.write().await = None;
        self.touch();
        Ok(())
    }

    async fn delete_all_rows(&self) -> Result<u64, AdapterError> {
        let mut guard = self.data.write().await;
        let data = guard.as_mut().ok_or_else(|| self.missing_table())?;
        let removed = data.rows.len() as u64;
        data.rows.clear();
        self.touch();
        Ok(removed)
    }

    async fn delete(&self, condition: &Condition) -> Result<u64, AdapterError> {
        self.log_filter("delete", Some(condition));
        let mut guard = self.data.write().await;
        let data = guard.as_mut().ok_or_else(|| self.missing_table())?;
        let before = data.rows.len();
        let rows = std::mem::take(&mut data.rows);
        let kept: Vec<Vec<Value>> = rows
            .into_iter()
            .filter(|r| !row_matches(data, r, Some(condition)))
            .collect();
        data.rows = kept;
        self.touch();
        Ok((before - data.rows.len()) as u64)
    }

    async fn bulk_insert(
        &self,
        rows: DataTable,
        batch_size: usize,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, AdapterError> {
        let mut guard = self.data.write().await;
        let data = guard.as_mut().ok_or_else(|| self.missing_table())?;
        let mapping: Vec<Option<usize>> = data.fields.iter().map(|f| rows.index_of(&f.name)).collect();
        let mut written = 0u64;
        for chunk in rows.rows.chunks(batch_size.max(1)) {
            for row in chunk {
                data.rows.push(
                    mapping
                        .iter()
                        .map(|i| i.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                        .collect(),
                );
            }
            written += chunk.len() as u64;
            if let Some(progress) = &progress {
                progress(written);
            }
        }
        self.touch();
        Ok(written)
    }

    async fn batched_update(&self, queries: &[UpdateQuery]) -> Result<u64, AdapterError> {
        let mut guard = self.data.write().await;
        let data = guard.as_mut().ok_or_else(|| self.missing_table())?;
        let mut affected = 0u64;
        for query in queries {
            let targets = query
                .assignments
                .iter()
                .map(|a| Ok((resolve_required(data, &a.column)?, a.value.clone())))
                .collect::<Result<Vec<_>, AdapterError>>()?;
            let matching: Vec<usize> = data
                .rows
                .iter()
                .enumerate()
                .filter(|(_, r)| row_matches(data, r, query.condition.as_ref()))
                .map(|(i, _)| i)
                .collect();
            for i in matching {
                for (idx, value) in &targets {
                    data.rows[i][*idx] = value.clone();
                }
                affected += 1;
            }
        }
        self.touch();
        Ok(affected)
    }

    async fn duplicate_keys(&self, id_columns: &[Column]) -> Result<DataTable, AdapterError> {
        let guard = self.data.read().await;
        let data = guard.as_ref().ok_or_else(|| self.missing_table())?;
        let indices = id_columns
            .iter()
            .map(|c| resolve_required(data, c))
            .collect::<Result<Vec<_>, _>>()?;
        let mut counts: HashMap<Vec<Value>, usize> = HashMap::new();
        let mut order = Vec::new();
        for row in &data.rows {
            let tuple: Vec<Value> = indices.iter().map(|i| row[*i].clone()).collect();
            let count = counts.entry(tuple.clone()).or_insert(0);
            if *count == 0 {
                order.push(tuple);
            }
            *count += 1;
        }
        let fields = id_columns
            .iter()
            .zip(&indices)
            .map(|(c, i)| SchemaField {
                name: c.internal_name.clone(),
                ..data.fields[*i].clone()
            })
            .collect();
        let rows = order.into_iter().filter(|t| counts[t] > 1).collect();
        Ok(DataTable::new(fields).with_rows(rows))
    }

    fn parameter_ceiling(&self) -> usize {
        self.parameter_ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataType;
    use crate::query::{Range, SortOrderField, UpdateAssign};

    fn sample() -> MemoryAdapter {
        let data = DataTable::new(vec![
            SchemaField::new("Id", DataType::Long).not_null(),
            SchemaField::new("Name", DataType::String),
        ])
        .with_rows(
            (1..=5)
                .map(|i| vec![Value::Int(i), Value::from(format!("n{i}"))])
                .collect(),
        );
        MemoryAdapter::new("dbo.Items", data)
    }

    fn id() -> Column {
        Column::new("Id", DataType::Long)
    }

    #[tokio::test]
    async fn test_sorted_paged_query() {
        let adapter = sample();
        let query = SelectQuery::new(vec![id()], Table::new("dbo.Items"))
            .with_condition(Some(Condition::gt(id(), 1)))
            .with_sort_order(vec![SortOrderField::desc(id())])
            .with_range(Range::new(1, 2));
        let result = adapter.run_query(&query).await.unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(4)], vec![Value::Int(3)]]);
    }

    #[tokio::test]
    async fn test_aggregates() {
        let adapter = sample();
        assert_eq!(adapter.row_count(None).await.unwrap(), 5);
        assert_eq!(
            adapter.max_value(&id(), Some(&Condition::lt(id(), 4))).await.unwrap(),
            Value::Int(3)
        );
        let count = SelectQuery::new(vec![Column::count_rows()], Table::new("dbo.Items"));
        assert_eq!(adapter.run_query(&count).await.unwrap().rows[0][0], Value::Int(5));
    }

    #[tokio::test]
    async fn test_mutations_and_duplicates() {
        let adapter = sample();
        let extra = DataTable::new(vec![SchemaField::new("Id", DataType::Long)])
            .with_rows(vec![vec![Value::Int(2)]]);
        assert_eq!(adapter.bulk_insert(extra, 10, None).await.unwrap(), 1);
        let dups = adapter.duplicate_keys(&[id()]).await.unwrap();
        assert_eq!(dups.rows, vec![vec![Value::Int(2)]]);

        assert_eq!(adapter.delete(&Condition::eq(id(), 2)).await.unwrap(), 2);
        let updated = adapter
            .batched_update(&[UpdateQuery::new(
                Table::new("dbo.Items"),
                vec![UpdateAssign { column: Column::new("Name", DataType::String), value: Value::from("x") }],
                Some(Condition::eq(id(), 3)),
            )])
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(adapter.tuples(&["Name"]).await[1], vec![Value::from("x")]);
        assert_eq!(adapter.mutations(), 3);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let adapter = MemoryAdapter::missing("dbo.Nope");
        assert!(!adapter.table_exists().await.unwrap());
        assert!(adapter.row_count(None).await.is_err());
    }
}
