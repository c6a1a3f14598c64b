//! Query adapters
//!
//! Lower the query algebra into backend text: parameterized SQL for relational
//! targets, query strings for OData services and row-filter expressions for
//! in-memory tables.

pub mod dataset;
pub mod odata;
pub mod sql;

pub use dataset::DataSetQueryAdapter;
pub use odata::ODataQueryAdapter;
pub use sql::{ROW_NUMBER_COLUMN, SqlDialect, SqlPaging, SqlQueryAdapter, UpdateCommand, strip_row_number};

use crate::error::AdapterError;
use crate::models::{Column, DataType, Value};
use crate::query::{Comparator, Condition, Connector, Operand, SelectQuery, SortOrderField, UpdateQuery};

/// A bound query parameter
///
/// Length, precision and scale come from the column's native type so the
/// backend does not truncate values when binding them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameter {
    pub name: String,
    pub value: Value,
    pub data_type: DataType,
    pub size: Option<u32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub nullable: bool,
}

impl QueryParameter {
    pub fn for_column(name: String, column: &Column, value: Value) -> Self {
        Self {
            name,
            value,
            data_type: column.data_type,
            size: column.length,
            precision: column.precision(),
            scale: column.scale(),
            nullable: column.nullable,
        }
    }
}

/// Backend text plus the parameters it references
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedQuery {
    pub text: String,
    pub parameters: Vec<QueryParameter>,
}

impl RenderedQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Common contract of the backend translators
pub trait QueryAdapter: Send + Sync {
    /// Render a column reference
    fn escape_column(&self, column: &Column) -> String;

    /// Render a comma separated column list
    fn escape_columns(&self, columns: &[Column]) -> String {
        columns
            .iter()
            .map(|c| self.escape_column(c))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Render an ORDER BY list (without the keyword)
    fn convert_sort_order(&self, fields: &[SortOrderField]) -> String;

    /// Render a condition; `prefix` names the extracted parameters
    fn convert_condition(&self, condition: &Condition, prefix: &str) -> RenderedQuery;

    fn convert_select_query(&self, query: &SelectQuery) -> Result<RenderedQuery, AdapterError>;

    /// Render an update; condition parameters are numbered after the assignments
    fn convert_update_query(&self, query: &UpdateQuery, prefix: &str) -> Result<RenderedQuery, AdapterError>;
}

/// Dialect hooks used by [`write_condition`]
pub(crate) trait ConditionWriter {
    fn connector(&self, connector: Connector) -> &'static str;

    /// Text of an empty group: AND of nothing is true, OR of nothing is false
    fn constant(&self, value: bool) -> &'static str;

    fn leaf(&mut self, column: &Column, comparator: Comparator, operand: &Operand, out: &mut String);
}

/// Walk a condition tree, wrapping every nested group in parentheses
pub(crate) fn write_condition<W: ConditionWriter>(
    writer: &mut W,
    condition: &Condition,
    out: &mut String,
    nested: bool,
) {
    match condition {
        Condition::Compare {
            column,
            comparator,
            operand,
        } => writer.leaf(column, *comparator, operand, out),
        Condition::All(children) | Condition::Any(children) => {
            let connector = match condition {
                Condition::All(_) => Connector::And,
                _ => Connector::Or,
            };
            if children.is_empty() {
                out.push_str(writer.constant(connector == Connector::And));
                return;
            }
            let wrap = nested && children.len() > 1;
            if wrap {
                out.push('(');
            }
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                    out.push_str(writer.connector(connector));
                    out.push(' ');
                }
                write_condition(writer, child, out, true);
            }
            if wrap {
                out.push(')');
            }
        }
    }
}
