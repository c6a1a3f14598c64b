//! DuckDB source and target adapter

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use duckdb::types::{TimeUnit, Type, Value as DuckValue};

use super::{
    CreateTableRequest, DEFAULT_PARAMETER_CEILING, ProgressCallback, SchemaFlavor, SourceAdapter,
    TableCreator, TargetAdapter,
};
use crate::error::AdapterError;
use crate::models::{Column, ColumnTypeInfo, DataTable, DataType, SchemaField, Table, Value};
use crate::query::{Condition, SelectQuery, UpdateQuery};
use crate::query_adapter::{QueryAdapter, RenderedQuery, SqlPaging, SqlQueryAdapter, strip_row_number};

/// Embedded DuckDB table
///
/// Several adapters may share one connection (e.g. a source and a target table
/// in the same database file).
pub struct DuckDbAdapter {
    table: Table,
    conn: Arc<Mutex<duckdb::Connection>>,
    renderer: SqlQueryAdapter,
    parameter_ceiling: usize,
}

impl DuckDbAdapter {
    /// Open or create a database file
    pub fn open(path: &str, table: impl Into<String>) -> Result<Self, AdapterError> {
        let conn = duckdb::Connection::open(path)?;
        Ok(Self::with_connection(Arc::new(Mutex::new(conn)), table))
    }

    /// Open an in-memory database (for testing)
    pub fn memory(table: impl Into<String>) -> Result<Self, AdapterError> {
        let conn = duckdb::Connection::open_in_memory()?;
        Ok(Self::with_connection(Arc::new(Mutex::new(conn)), table))
    }

    pub fn with_connection(conn: Arc<Mutex<duckdb::Connection>>, table: impl Into<String>) -> Self {
        Self {
            table: Table::new(table),
            conn,
            renderer: SqlQueryAdapter::duckdb(),
            parameter_ceiling: DEFAULT_PARAMETER_CEILING,
        }
    }

    /// Shared handle to the underlying connection
    pub fn connection(&self) -> Arc<Mutex<duckdb::Connection>> {
        Arc::clone(&self.conn)
    }

    /// Read joined fields from their flattened local copies (target side)
    pub fn with_local_join_fields(mut self, enabled: bool) -> Self {
        self.renderer = self.renderer.with_local_join_fields(enabled);
        self
    }

    /// Page ranged reads with another strategy (e.g. row numbers, to match
    /// the page boundaries of a legacy server)
    pub fn with_paging(mut self, paging: SqlPaging) -> Self {
        self.renderer.paging = paging;
        self
    }

    /// Run raw SQL statements
    pub fn execute_batch(&self, sql: &str) -> Result<(), AdapterError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, duckdb::Connection>, AdapterError> {
        self.conn
            .lock()
            .map_err(|_| AdapterError::Database("DuckDB connection lock poisoned".to_string()))
    }

    fn query(&self, rendered: &RenderedQuery) -> Result<DataTable, AdapterError> {
        tracing::trace!(sql = %rendered.text, parameters = rendered.parameters.len(), "duckdb query");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&rendered.text)?;
        let params: Vec<DuckValue> = rendered.parameters.iter().map(|p| to_duck(&p.value)).collect();
        let mut rows = stmt.query(duckdb::params_from_iter(params.iter()))?;

        // Column names are known after execution
        let fields: Vec<SchemaField> = match rows.as_ref() {
            Some(stmt) => (0..stmt.column_count())
                .map(|i| {
                    let name = stmt
                        .column_name(i)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|_| format!("col{i}"));
                    SchemaField::new(name, data_type_of(&stmt.column_type(i)))
                })
                .collect(),
            None => Vec::new(),
        };

        let mut table = DataTable::new(fields);
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(table.fields.len());
            for i in 0..table.fields.len() {
                let value: DuckValue = row.get(i)?;
                values.push(from_duck(value));
            }
            table.push_row(values);
        }
        Ok(table)
    }

    fn execute(&self, rendered: &RenderedQuery) -> Result<u64, AdapterError> {
        tracing::trace!(sql = %rendered.text, parameters = rendered.parameters.len(), "duckdb execute");
        let conn = self.lock()?;
        let params: Vec<DuckValue> = rendered.parameters.iter().map(|p| to_duck(&p.value)).collect();
        let affected = conn.execute(&rendered.text, duckdb::params_from_iter(params.iter()))?;
        Ok(affected as u64)
    }

    /// Field descriptions from the information schema
    fn describe(&self, table_name: &str) -> Result<Vec<(SchemaField, ColumnTypeInfo)>, AdapterError> {
        let table = Table::new(table_name);
        let short = table.short_name().to_string();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type, is_nullable, numeric_precision, numeric_scale, character_maximum_length
             FROM information_schema.columns WHERE table_name = ?1 ORDER BY ordinal_position",
        )?;
        let rows = stmt.query_map([short.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i32>>(3)?,
                row.get::<_, Option<i32>>(4)?,
                row.get::<_, Option<i32>>(5)?,
            ))
        })?;
        let mut fields = Vec::new();
        for row in rows {
            let (name, type_name, nullable, precision, scale, max_length) = row?;
            let data_type = DataType::from_native(&type_name);
            let mut field = SchemaField::new(name.clone(), data_type);
            field.nullable = nullable.eq_ignore_ascii_case("YES");
            field.max_length = max_length.and_then(|l| u32::try_from(l).ok());
            let mut info = ColumnTypeInfo::new(name, type_name);
            if data_type == DataType::Decimal {
                info.precision = precision.and_then(|p| u8::try_from(p).ok());
                info.scale = scale.and_then(|s| u8::try_from(s).ok());
            }
            fields.push((field, info));
        }
        Ok(fields)
    }
}

fn data_type_of(t: &Type) -> DataType {
    match t {
        Type::Boolean => DataType::Bool,
        Type::TinyInt | Type::SmallInt | Type::Int | Type::UTinyInt | Type::USmallInt => DataType::Int,
        Type::BigInt | Type::HugeInt | Type::UInt | Type::UBigInt => DataType::Long,
        Type::Float | Type::Double => DataType::Double,
        Type::Decimal => DataType::Decimal,
        Type::Timestamp | Type::Date32 => DataType::DateTime,
        Type::Blob => DataType::Binary,
        _ => DataType::String,
    }
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::Decimal(d) => d
            .parse::<f64>()
            .map(DuckValue::Double)
            .unwrap_or_else(|_| DuckValue::Text(d.clone())),
        Value::Text(s) => DuckValue::Text(s.clone()),
        Value::DateTime(dt) => DuckValue::Timestamp(TimeUnit::Microsecond, dt.and_utc().timestamp_micros()),
        Value::Guid(g) => DuckValue::Text(g.to_string()),
        Value::Binary(b) => DuckValue::Blob(b.clone()),
    }
}

fn timestamp(unit: TimeUnit, value: i64) -> Option<NaiveDateTime> {
    let micros = match unit {
        TimeUnit::Second => value.checked_mul(1_000_000)?,
        TimeUnit::Millisecond => value.checked_mul(1_000)?,
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    };
    DateTime::from_timestamp_micros(micros).map(|d| d.naive_utc())
}

fn from_duck(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(n) => Value::Int(n.into()),
        DuckValue::SmallInt(n) => Value::Int(n.into()),
        DuckValue::Int(n) => Value::Int(n.into()),
        DuckValue::BigInt(n) => Value::Int(n),
        DuckValue::HugeInt(n) => i64::try_from(n).map(Value::Int).unwrap_or(Value::Decimal(n.to_string())),
        DuckValue::UTinyInt(n) => Value::Int(n.into()),
        DuckValue::USmallInt(n) => Value::Int(n.into()),
        DuckValue::UInt(n) => Value::Int(n.into()),
        DuckValue::UBigInt(n) => i64::try_from(n).map(Value::Int).unwrap_or(Value::Decimal(n.to_string())),
        DuckValue::Float(f) => Value::Float(f.into()),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => Value::Decimal(d.to_string()),
        DuckValue::Timestamp(unit, v) => timestamp(unit, v).map(Value::DateTime).unwrap_or(Value::Null),
        DuckValue::Date32(days) => timestamp(TimeUnit::Second, i64::from(days) * 86_400)
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        DuckValue::Text(s) => Value::Text(s),
        DuckValue::Blob(b) => Value::Binary(b),
        other => Value::Text(format!("{other:?}")),
    }
}

#[async_trait]
impl SourceAdapter for DuckDbAdapter {
    fn table(&self) -> &Table {
        &self.table
    }

    async fn schema(&self, columns: Option<&[Column]>) -> Result<DataTable, AdapterError> {
        let own = self.describe(&self.table.name)?;
        let Some(columns) = columns else {
            return Ok(DataTable::new(own.into_iter().map(|(f, _)| f).collect()));
        };
        let mut fields = Vec::with_capacity(columns.len());
        for column in columns {
            let described = match column.kind.join() {
                Some(join) if !self.renderer.read_join_fields_from_local_copy => self.describe(&join.source_name)?,
                _ => own.clone(),
            };
            let field = described
                .into_iter()
                .map(|(f, _)| f)
                .find(|f| f.name.eq_ignore_ascii_case(&column.name) || f.name.eq_ignore_ascii_case(&column.internal_name))
                .ok_or_else(|| AdapterError::Schema(format!("unknown column {}", column.name)))?;
            fields.push(SchemaField {
                name: column.internal_name.clone(),
                ..field
            });
        }
        Ok(DataTable::new(fields))
    }

    async fn row_count(&self, condition: Option<&Condition>) -> Result<u64, AdapterError> {
        let rendered = self.renderer.convert_count_query(&self.table, condition);
        let result = self.query(&rendered)?;
        let count = result
            .rows
            .first()
            .and_then(|r| r.first())
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn max_value(&self, column: &Column, condition: Option<&Condition>) -> Result<Value, AdapterError> {
        let query = SelectQuery::new(vec![column.max_of()], self.table.clone()).with_condition(condition.cloned());
        let result = self.query(&self.renderer.convert_select_query(&query)?)?;
        Ok(result.rows.into_iter().next().and_then(|r| r.into_iter().next()).unwrap_or(Value::Null))
    }

    async fn run_query(&self, query: &SelectQuery) -> Result<DataTable, AdapterError> {
        let mut rows = self.query(&self.renderer.convert_select_query(query)?)?;
        if self.renderer.paging == SqlPaging::RowNumber {
            strip_row_number(&mut rows);
        }
        Ok(rows)
    }

    async fn extended_column_type_info(&self, table_name: Option<&str>) -> Result<Vec<ColumnTypeInfo>, AdapterError> {
        let name = table_name.unwrap_or(&self.table.name);
        Ok(self.describe(name)?.into_iter().map(|(_, info)| info).collect())
    }
}

#[async_trait]
impl TargetAdapter for DuckDbAdapter {
    async fn table_exists(&self) -> Result<bool, AdapterError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?1",
            [self.table.short_name()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn create_table(&self, request: &CreateTableRequest) -> Result<bool, AdapterError> {
        if self.table_exists().await? {
            return Ok(false);
        }
        let sql = TableCreator::new(SchemaFlavor::DuckDb).create_table_sql(request)?;
        tracing::debug!(table = %self.table.name, ddl = %sql, "create table");
        self.execute_batch(&sql)?;
        Ok(true)
    }

    async fn delete_table(&self) -> Result<(), AdapterError> {
        self.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}",
            self.renderer.table_reference(&self.table.name)
        ))
    }

    async fn delete_all_rows(&self) -> Result<u64, AdapterError> {
        self.execute(&self.renderer.convert_delete_query(&self.table, None))
    }

    async fn delete(&self, condition: &Condition) -> Result<u64, AdapterError> {
        self.execute(&self.renderer.convert_delete_query(&self.table, Some(condition)))
    }

    async fn bulk_insert(
        &self,
        rows: DataTable,
        batch_size: usize,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, AdapterError> {
        let fields = self.describe(&self.table.name)?;
        let mapping: Vec<Option<usize>> = fields.iter().map(|(f, _)| rows.index_of(&f.name)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.renderer.table_reference(&self.table.name),
            fields
                .iter()
                .map(|(f, _)| self.renderer.quote(&f.name))
                .collect::<Vec<_>>()
                .join(","),
            vec!["?"; fields.len()].join(",")
        );

        let mut written = 0u64;
        for chunk in rows.rows.chunks(batch_size.max(1)) {
            {
                let mut conn = self.lock()?;
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(&sql)?;
                    for row in chunk {
                        let values: Vec<DuckValue> = mapping
                            .iter()
                            .map(|i| i.and_then(|i| row.get(i)).map(to_duck).unwrap_or(DuckValue::Null))
                            .collect();
                        stmt.execute(duckdb::params_from_iter(values.iter()))?;
                    }
                }
                tx.commit()?;
            }
            written += chunk.len() as u64;
            if let Some(progress) = &progress {
                progress(written);
            }
        }
        Ok(written)
    }

    async fn batched_update(&self, queries: &[UpdateQuery]) -> Result<u64, AdapterError> {
        let commands = self.renderer.convert_update_batch(queries, self.parameter_ceiling)?;
        let mut affected = 0u64;
        for command in &commands {
            tracing::trace!(
                statements = command.statements.len(),
                parameters = command.parameter_count(),
                "duckdb update command"
            );
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            for statement in &command.statements {
                let params: Vec<DuckValue> = statement.parameters.iter().map(|p| to_duck(&p.value)).collect();
                affected += tx.execute(&statement.text, duckdb::params_from_iter(params.iter()))? as u64;
            }
            tx.commit()?;
        }
        Ok(affected)
    }

    async fn duplicate_keys(&self, id_columns: &[Column]) -> Result<DataTable, AdapterError> {
        self.query(&self.renderer.convert_duplicate_keys_query(&self.table, id_columns))
    }

    fn parameter_ceiling(&self) -> usize {
        self.parameter_ceiling
    }
}
