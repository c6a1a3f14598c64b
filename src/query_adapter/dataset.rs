//! Row-filter expressions for in-memory tables

use crate::error::AdapterError;
use crate::models::{Column, Value};
use crate::query::{Comparator, Condition, Connector, Operand, SelectQuery, SortDirection, SortOrderField, UpdateQuery};

use super::{ConditionWriter, QueryAdapter, RenderedQuery, write_condition};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Renders conditions in the `[column] op literal` filter syntax used for
/// logging and debugging in-memory sources
#[derive(Debug, Clone, Copy, Default)]
pub struct DataSetQueryAdapter;

impl DataSetQueryAdapter {
    pub fn new() -> Self {
        Self
    }

    fn literal(value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) => value.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => format!("'{}'", dt.format(DATE_FORMAT)),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }
}

impl QueryAdapter for DataSetQueryAdapter {
    fn escape_column(&self, column: &Column) -> String {
        format!("[{}]", column.internal_name)
    }

    fn convert_sort_order(&self, fields: &[SortOrderField]) -> String {
        fields
            .iter()
            .map(|f| match f.direction {
                SortDirection::Asc => format!("{} ASC", self.escape_column(&f.column)),
                SortDirection::Desc => format!("{} DESC", self.escape_column(&f.column)),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn convert_condition(&self, condition: &Condition, _prefix: &str) -> RenderedQuery {
        let mut text = String::new();
        write_condition(&mut DataSetWriter, condition, &mut text, false);
        RenderedQuery::new(text)
    }

    fn convert_select_query(&self, _query: &SelectQuery) -> Result<RenderedQuery, AdapterError> {
        Err(AdapterError::Unsupported(
            "select queries are evaluated directly against in-memory tables".into(),
        ))
    }

    fn convert_update_query(&self, _query: &UpdateQuery, _prefix: &str) -> Result<RenderedQuery, AdapterError> {
        Err(AdapterError::Unsupported(
            "update queries are evaluated directly against in-memory tables".into(),
        ))
    }
}

struct DataSetWriter;

impl ConditionWriter for DataSetWriter {
    fn connector(&self, connector: Connector) -> &'static str {
        match connector {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }

    fn constant(&self, value: bool) -> &'static str {
        if value { "1 = 1" } else { "1 = 0" }
    }

    fn leaf(&mut self, column: &Column, comparator: Comparator, operand: &Operand, out: &mut String) {
        let left = format!("[{}]", column.name);
        match operand {
            Operand::Value(v) => {
                out.push_str(&format!("{left} {} {}", comparator.symbol(), DataSetQueryAdapter::literal(v)))
            }
            Operand::Column(other) => out.push_str(&format!("{left} {} [{}]", comparator.symbol(), other.internal_name)),
            Operand::List(values) if values.is_empty() => out.push_str(self.constant(comparator != Comparator::Eq)),
            Operand::List(values) => {
                let items = values
                    .iter()
                    .map(DataSetQueryAdapter::literal)
                    .collect::<Vec<_>>()
                    .join(",");
                let op = if comparator == Comparator::Eq { "IN" } else { "NOT IN" };
                out.push_str(&format!("{left} {op} ({items})"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataType;
    use chrono::NaiveDate;

    #[test]
    fn test_date_and_string_literals() {
        let created = Column::new("Created", DataType::DateTime);
        let name = Column::new("Name", DataType::String);
        let at = NaiveDate::from_ymd_opt(2020, 1, 2)
            .and_then(|d| d.and_hms_milli_opt(3, 4, 5, 6))
            .unwrap();
        let c = Condition::and([Condition::ge(created, at), Condition::ne(name, "O'Neil")]);
        assert_eq!(
            DataSetQueryAdapter::new().convert_condition(&c, "").text,
            "[Created] >= '2020-01-02 03:04:05.006' AND [Name] <> 'O''Neil'"
        );
    }

    #[test]
    fn test_lists_and_sort() {
        let id = Column::new("Id", DataType::Long);
        let c = Condition::not_in_list(id.clone(), vec![Value::Int(1), Value::Int(2)]);
        let adapter = DataSetQueryAdapter::new();
        assert_eq!(adapter.convert_condition(&c, "").text, "[Id] NOT IN (1,2)");
        assert_eq!(
            adapter.convert_sort_order(&[SortOrderField::desc(id.clone()), SortOrderField::asc(id)]),
            "[Id] DESC,[Id] ASC"
        );
        assert!(adapter.convert_select_query(&SelectQuery::new(vec![], crate::models::Table::new("t"))).is_err());
    }
}
