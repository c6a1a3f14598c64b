//! OData query string rendering

use crate::error::AdapterError;
use crate::models::{Column, Value};
use crate::query::{Comparator, Condition, Connector, Operand, SelectQuery, SortDirection, SortOrderField, UpdateQuery};

use super::{ConditionWriter, QueryAdapter, RenderedQuery, write_condition};

const EDM_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Renders select queries as `?$skip=..&$top=..&$filter=..&$orderby=..`
#[derive(Debug, Clone, Default)]
pub struct ODataQueryAdapter {
    /// Appended verbatim to every query string (e.g. `$format=json`)
    pub default_query_params_suffix: Option<String>,
}

impl ODataQueryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suffix(mut self, suffix: Option<String>) -> Self {
        self.default_query_params_suffix = suffix.filter(|s| !s.trim().is_empty());
        self
    }

    fn literal(value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Int(_) | Value::Float(_) => value.to_string(),
            Value::Decimal(d) => format!("{d}M"),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => format!("datetime'{}'", dt.format(EDM_DATETIME_FORMAT)),
            Value::Guid(g) => format!("guid'{g}'"),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    fn operator(comparator: Comparator) -> &'static str {
        match comparator {
            Comparator::Eq => "eq",
            Comparator::Ne => "ne",
            Comparator::Gt => "gt",
            Comparator::Ge => "ge",
            Comparator::Lt => "lt",
            Comparator::Le => "le",
        }
    }
}

impl QueryAdapter for ODataQueryAdapter {
    fn escape_column(&self, column: &Column) -> String {
        column.name.clone()
    }

    fn convert_sort_order(&self, fields: &[SortOrderField]) -> String {
        fields
            .iter()
            .map(|f| match f.direction {
                SortDirection::Asc => f.column.internal_name.clone(),
                SortDirection::Desc => format!("{} desc", f.column.internal_name),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn convert_condition(&self, condition: &Condition, _prefix: &str) -> RenderedQuery {
        let mut text = String::new();
        write_condition(&mut ODataWriter, condition, &mut text, false);
        RenderedQuery::new(text)
    }

    fn convert_select_query(&self, query: &SelectQuery) -> Result<RenderedQuery, AdapterError> {
        let mut params: Vec<String> = Vec::new();
        if let Some(range) = query.range {
            params.push(format!("$skip={}", range.from));
            if range.count > 0 {
                params.push(format!("$top={}", range.count));
            }
        }
        if let Some(condition) = &query.condition {
            let filter = self.convert_condition(condition, "").text;
            if !filter.is_empty() {
                params.push(format!("$filter={}", urlencoding::encode(&filter)));
            }
        }
        if !query.sort_order.is_empty() {
            params.push(format!(
                "$orderby={}",
                urlencoding::encode(&self.convert_sort_order(&query.sort_order))
            ));
        }
        if let Some(suffix) = &self.default_query_params_suffix {
            params.push(suffix.trim_start_matches(['?', '&']).to_string());
        }
        if params.is_empty() {
            return Ok(RenderedQuery::default());
        }
        Ok(RenderedQuery::new(format!("?{}", params.join("&"))))
    }

    fn convert_update_query(&self, query: &UpdateQuery, _prefix: &str) -> Result<RenderedQuery, AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "OData sources are read only, cannot update {}",
            query.table.name
        )))
    }
}

struct ODataWriter;

impl ConditionWriter for ODataWriter {
    fn connector(&self, connector: Connector) -> &'static str {
        match connector {
            Connector::And => "and",
            Connector::Or => "or",
        }
    }

    fn constant(&self, value: bool) -> &'static str {
        if value { "true" } else { "false" }
    }

    fn leaf(&mut self, column: &Column, comparator: Comparator, operand: &Operand, out: &mut String) {
        let op = ODataQueryAdapter::operator(comparator);
        match operand {
            Operand::Value(v) => out.push_str(&format!("{} {op} {}", column.name, ODataQueryAdapter::literal(v))),
            Operand::Column(other) => out.push_str(&format!("{} {op} {}", column.name, other.name)),
            Operand::List(values) if values.is_empty() => out.push_str(self.constant(comparator != Comparator::Eq)),
            Operand::List(values) => {
                let joiner = format!(" {} ", self.connector(comparator.list_connector()));
                let parts = values
                    .iter()
                    .map(|v| format!("{} {op} {}", column.name, ODataQueryAdapter::literal(v)))
                    .collect::<Vec<_>>()
                    .join(&joiner);
                if values.len() > 1 {
                    out.push_str(&format!("({parts})"));
                } else {
                    out.push_str(&parts);
                }
            }
        }
    }
}
