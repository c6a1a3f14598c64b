//! Relational SQL rendering (SQL Server / Azure DWH and DuckDB)

use std::collections::BTreeMap;

use crate::error::AdapterError;
use crate::models::{Column, ColumnKind, DataTable, JoinSpec, Table, Value};
use crate::query::{
    Comparator, Condition, Connector, Operand, SelectQuery, SortDirection, SortOrderField,
    UpdateQuery, pack_updates,
};

use super::{ConditionWriter, QueryAdapter, QueryParameter, RenderedQuery, write_condition};

/// Ordinal column injected by legacy row-number paging
pub const ROW_NUMBER_COLUMN: &str = "CustomRowNumber";

/// Update statements executed together
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateCommand {
    pub statements: Vec<RenderedQuery>,
}

impl UpdateCommand {
    /// The statements as one multi-statement text (named parameter dialects)
    pub fn text(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(";\n")
    }

    pub fn parameter_count(&self) -> usize {
        self.statements.iter().map(|s| s.parameters.len()).sum()
    }
}

/// Quoting and placeholder conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    /// `[schema].[name]`, named `@p_0` parameters
    SqlServer,
    /// `"schema"."name"`, positional `?` parameters
    DuckDb,
}

/// Paging strategy for ranged select queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlPaging {
    /// `OFFSET n ROWS FETCH NEXT m ROWS ONLY` (SQL Server 2012+)
    OffsetFetch,
    /// Wrapped `ROW_NUMBER()` subquery for older servers
    RowNumber,
    /// `LIMIT m OFFSET n`
    LimitOffset,
}

impl SqlPaging {
    /// Pick the SQL Server strategy for a server major version
    pub fn for_server_version(major_version: Option<u32>, force_legacy: bool) -> Self {
        match major_version {
            _ if force_legacy => SqlPaging::RowNumber,
            Some(v) if v < 11 => SqlPaging::RowNumber,
            _ => SqlPaging::OffsetFetch,
        }
    }
}

/// Renders the query algebra as parameterized SQL
#[derive(Debug, Clone)]
pub struct SqlQueryAdapter {
    pub dialect: SqlDialect,
    pub paging: SqlPaging,
    /// Address joined columns by their flattened local name instead of the
    /// remote `join.field` reference (used when querying the target copy)
    pub read_join_fields_from_local_copy: bool,
}

impl SqlQueryAdapter {
    pub fn new(dialect: SqlDialect, paging: SqlPaging) -> Self {
        Self {
            dialect,
            paging,
            read_join_fields_from_local_copy: false,
        }
    }

    pub fn sql_server(major_version: Option<u32>, force_legacy: bool) -> Self {
        Self::new(
            SqlDialect::SqlServer,
            SqlPaging::for_server_version(major_version, force_legacy),
        )
    }

    pub fn duckdb() -> Self {
        Self::new(SqlDialect::DuckDb, SqlPaging::LimitOffset)
    }

    pub fn with_local_join_fields(mut self, enabled: bool) -> Self {
        self.read_join_fields_from_local_copy = enabled;
        self
    }

    /// Quote one identifier
    pub fn quote(&self, identifier: &str) -> String {
        match self.dialect {
            SqlDialect::SqlServer => format!("[{}]", identifier.replace(']', "]]")),
            SqlDialect::DuckDb => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    /// Quote a possibly schema-qualified table name
    pub fn table_reference(&self, name: &str) -> String {
        let table = Table::new(name);
        match self.dialect {
            SqlDialect::SqlServer => {
                let (schema, short) = table.schema_and_name();
                format!("{}.{}", self.quote(schema), self.quote(short))
            }
            SqlDialect::DuckDb => name
                .split('.')
                .map(|part| self.quote(part.trim_matches(['[', ']', '"'])))
                .collect::<Vec<_>>()
                .join("."),
        }
    }

    fn qualified(&self, alias: &str, name: &str) -> String {
        format!("{}.{}", self.quote(alias), self.quote(name))
    }

    fn remote_reference(&self, column: &Column) -> String {
        match &column.kind {
            ColumnKind::Joined(_) | ColumnKind::JoinedMaxValue(_)
                if self.read_join_fields_from_local_copy =>
            {
                self.quote(&column.internal_name)
            }
            _ => self.qualified(&column.alias, &column.name),
        }
    }

    fn placeholder(&self, name: &str) -> String {
        match self.dialect {
            SqlDialect::SqlServer => format!("@{name}"),
            SqlDialect::DuckDb => "?".to_string(),
        }
    }

    /// Projection entry with an output alias when the local name differs
    fn projection(&self, column: &Column) -> String {
        let escaped = self.escape_column(column);
        match column.kind {
            ColumnKind::CountRows | ColumnKind::MaxValue | ColumnKind::JoinedMaxValue(_) => {
                format!("{escaped} AS {}", self.quote(&column.internal_name))
            }
            _ if column.internal_name != column.name
                && !(column.is_joined() && self.read_join_fields_from_local_copy) =>
            {
                format!("{escaped} AS {}", self.quote(&column.internal_name))
            }
            _ => escaped,
        }
    }

    fn join_clauses(&self, query: &SelectQuery) -> String {
        if self.read_join_fields_from_local_copy {
            return String::new();
        }
        let mut joins: BTreeMap<&str, &JoinSpec> = BTreeMap::new();
        for column in query.joined_columns() {
            if let Some(join) = column.kind.join() {
                joins.entry(join.name.as_str()).or_insert(join);
            }
        }
        let mut out = String::new();
        for join in joins.values() {
            let on = join
                .keys
                .iter()
                .map(|(join_field, parent_field)| {
                    format!(
                        "{} = {}",
                        self.qualified(&join.name, join_field),
                        self.qualified(&join.parent_alias, parent_field)
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            out.push_str(&format!(
                " LEFT JOIN {} {} ON {}",
                self.table_reference(&join.source_name),
                self.quote(&join.name),
                on
            ));
        }
        out
    }

    fn render_condition(
        &self,
        condition: &Condition,
        prefix: &str,
        start_index: usize,
        ignore_alias: bool,
    ) -> RenderedQuery {
        let mut writer = SqlConditionWriter {
            adapter: self,
            prefix,
            index: start_index,
            ignore_alias,
            parameters: Vec::new(),
        };
        let mut text = String::new();
        write_condition(&mut writer, condition, &mut text, false);
        RenderedQuery {
            text,
            parameters: writer.parameters,
        }
    }

    /// Render several updates grouped into commands, each binding at most
    /// `parameter_ceiling` parameters (a single oversized statement still
    /// gets its own command)
    pub fn convert_update_batch(
        &self,
        queries: &[UpdateQuery],
        parameter_ceiling: usize,
    ) -> Result<Vec<UpdateCommand>, AdapterError> {
        let mut n = 0;
        let mut commands = Vec::new();
        for slice in pack_updates(queries, parameter_ceiling) {
            let mut statements = Vec::with_capacity(slice.len());
            for query in slice {
                statements.push(self.convert_update_query(query, &format!("r{n}"))?);
                n += 1;
            }
            commands.push(UpdateCommand { statements });
        }
        Ok(commands)
    }

    /// `SELECT COUNT(*)` over a table with an optional filter
    pub fn convert_count_query(&self, table: &Table, condition: Option<&Condition>) -> RenderedQuery {
        let query = SelectQuery::new(vec![Column::count_rows()], table.clone())
            .with_condition(condition.cloned());
        self.render_select(&query)
    }

    /// `GROUP BY ... HAVING COUNT(*) > 1` over the identity columns
    pub fn convert_duplicate_keys_query(&self, table: &Table, id_columns: &[Column]) -> RenderedQuery {
        let keys = id_columns
            .iter()
            .map(|c| self.quote(&c.internal_name))
            .collect::<Vec<_>>()
            .join(",");
        RenderedQuery::new(format!(
            "SELECT {keys} FROM {} GROUP BY {keys} HAVING COUNT(*) > 1",
            self.table_reference(&table.name)
        ))
    }

    /// `DELETE FROM table WHERE condition`; the condition uses unqualified target names
    pub fn convert_delete_query(&self, table: &Table, condition: Option<&Condition>) -> RenderedQuery {
        let mut rendered = RenderedQuery::new(format!("DELETE FROM {}", self.table_reference(&table.name)));
        if let Some(condition) = condition {
            let cond = self.render_condition(condition, "p", 0, true);
            rendered.text.push_str(" WHERE ");
            rendered.text.push_str(&cond.text);
            rendered.parameters = cond.parameters;
        }
        rendered
    }

    fn render_select(&self, query: &SelectQuery) -> RenderedQuery {
        let projection = query
            .columns
            .iter()
            .map(|c| self.projection(c))
            .collect::<Vec<_>>()
            .join(",");
        let from = format!(
            " FROM {} {}{}",
            self.table_reference(&query.table.name),
            self.quote(&query.table.alias),
            self.join_clauses(query)
        );
        let condition = query
            .condition
            .as_ref()
            .map(|c| self.render_condition(c, "p", 0, false))
            .unwrap_or_default();
        let where_clause = if condition.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", condition.text)
        };
        let order = self.convert_sort_order(&query.sort_order);
        let order_or_default = if order.is_empty() {
            "(SELECT NULL)".to_string()
        } else {
            order.clone()
        };

        let text = match (query.range, self.paging) {
            (Some(range), SqlPaging::RowNumber) => format!(
                "SELECT * FROM (SELECT {projection},ROW_NUMBER() OVER (ORDER BY {order_or_default}) AS {rn}{from}{where_clause}) q WHERE q.{rn} > {} AND q.{rn} <= {} ORDER BY q.{rn}",
                range.from,
                range.to(),
                rn = self.quote(ROW_NUMBER_COLUMN),
            ),
            (Some(range), SqlPaging::OffsetFetch) => format!(
                "SELECT {projection}{from}{where_clause} ORDER BY {order_or_default} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                range.from, range.count
            ),
            (Some(range), SqlPaging::LimitOffset) => {
                let order_clause = if order.is_empty() {
                    String::new()
                } else {
                    format!(" ORDER BY {order}")
                };
                format!(
                    "SELECT {projection}{from}{where_clause}{order_clause} LIMIT {} OFFSET {}",
                    range.count, range.from
                )
            }
            (None, _) => {
                let order_clause = if order.is_empty() {
                    String::new()
                } else {
                    format!(" ORDER BY {order}")
                };
                format!("SELECT {projection}{from}{where_clause}{order_clause}")
            }
        };
        RenderedQuery {
            text,
            parameters: condition.parameters,
        }
    }
}

/// Remove the ordinal column injected by row-number paging
pub fn strip_row_number(table: &mut DataTable) -> bool {
    table.remove_field(ROW_NUMBER_COLUMN)
}

impl QueryAdapter for SqlQueryAdapter {
    fn escape_column(&self, column: &Column) -> String {
        match &column.kind {
            ColumnKind::CountRows => "COUNT(*)".to_string(),
            ColumnKind::MaxValue | ColumnKind::JoinedMaxValue(_) => {
                format!("MAX({})", self.remote_reference(column))
            }
            ColumnKind::Plain | ColumnKind::Joined(_) => self.remote_reference(column),
        }
    }

    fn convert_sort_order(&self, fields: &[SortOrderField]) -> String {
        fields
            .iter()
            .map(|f| {
                let dir = match f.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{} {dir}", self.remote_reference(&f.column))
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn convert_condition(&self, condition: &Condition, prefix: &str) -> RenderedQuery {
        self.render_condition(condition, prefix, 0, false)
    }

    fn convert_select_query(&self, query: &SelectQuery) -> Result<RenderedQuery, AdapterError> {
        if query.columns.is_empty() {
            return Err(AdapterError::InvalidQuery(format!(
                "select on {} without columns",
                query.table.name
            )));
        }
        Ok(self.render_select(query))
    }

    fn convert_update_query(&self, query: &UpdateQuery, prefix: &str) -> Result<RenderedQuery, AdapterError> {
        if query.assignments.is_empty() {
            return Err(AdapterError::InvalidQuery(format!(
                "update on {} without assignments",
                query.table.name
            )));
        }
        let mut parameters = Vec::with_capacity(query.parameter_count());
        let assigns = query
            .assignments
            .iter()
            .enumerate()
            .map(|(i, assign)| {
                let name = format!("{prefix}_{i}");
                let text = format!("{}={}", self.quote(&assign.column.internal_name), self.placeholder(&name));
                parameters.push(QueryParameter::for_column(
                    name,
                    &assign.column,
                    assign.value.clone(),
                ));
                text
            })
            .collect::<Vec<_>>()
            .join(",");
        let mut text = format!("UPDATE {} SET {assigns}", self.table_reference(&query.table.name));
        if let Some(condition) = &query.condition {
            let cond = self.render_condition(condition, prefix, query.assignments.len(), true);
            text.push_str(" WHERE ");
            text.push_str(&cond.text);
            parameters.extend(cond.parameters);
        }
        Ok(RenderedQuery { text, parameters })
    }
}

struct SqlConditionWriter<'a> {
    adapter: &'a SqlQueryAdapter,
    prefix: &'a str,
    index: usize,
    ignore_alias: bool,
    parameters: Vec<QueryParameter>,
}

impl SqlConditionWriter<'_> {
    fn column(&self, column: &Column) -> String {
        if self.ignore_alias {
            self.adapter.quote(&column.internal_name)
        } else {
            self.adapter.remote_reference(column)
        }
    }

    fn bind(&mut self, name: String, column: &Column, value: &Value) -> String {
        let placeholder = self.adapter.placeholder(&name);
        self.parameters
            .push(QueryParameter::for_column(name, column, value.clone()));
        placeholder
    }
}

impl ConditionWriter for SqlConditionWriter<'_> {
    fn connector(&self, connector: Connector) -> &'static str {
        match connector {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }

    fn constant(&self, value: bool) -> &'static str {
        if value { "1=1" } else { "1=0" }
    }

    fn leaf(&mut self, column: &Column, comparator: Comparator, operand: &Operand, out: &mut String) {
        let left = self.column(column);
        let i = self.index;
        self.index += 1;
        match operand {
            Operand::Value(Value::Null) => match comparator {
                Comparator::Eq => out.push_str(&format!("{left} IS NULL")),
                Comparator::Ne => out.push_str(&format!("{left} IS NOT NULL")),
                // ordering against NULL is never true
                _ => out.push_str(self.constant(false)),
            },
            Operand::Value(value) => {
                let placeholder = self.bind(format!("{}_{i}", self.prefix), column, value);
                out.push_str(&format!("{left} {} {placeholder}", comparator.symbol()));
            }
            Operand::Column(other) => {
                let right = self.column(other);
                out.push_str(&format!("{left} {} {right}", comparator.symbol()));
            }
            Operand::List(values) if values.is_empty() => {
                out.push_str(self.constant(comparator != Comparator::Eq));
            }
            Operand::List(values) if matches!(comparator, Comparator::Eq | Comparator::Ne) => {
                let placeholders = values
                    .iter()
                    .enumerate()
                    .map(|(j, v)| self.bind(format!("{}_{i}_{j}", self.prefix), column, v))
                    .collect::<Vec<_>>()
                    .join(",");
                let op = if comparator == Comparator::Eq { "IN" } else { "NOT IN" };
                out.push_str(&format!("{left} {op} ({placeholders})"));
            }
            Operand::List(values) => {
                let parts = values
                    .iter()
                    .enumerate()
                    .map(|(j, v)| {
                        let p = self.bind(format!("{}_{i}_{j}", self.prefix), column, v);
                        format!("{left} {} {p}", comparator.symbol())
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                out.push_str(&format!("({parts})"));
            }
        }
    }
}
