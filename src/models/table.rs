//! Tables and in-memory row sets

use serde::{Deserialize, Serialize};

use super::value::{DataType, Value};

/// Alias used for the primary table of a query
pub const DEFAULT_ALIAS: &str = "main";

/// A remote table reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub alias: String,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: DEFAULT_ALIAS.to_string(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Split a `schema.table` name, defaulting the schema to `dbo`
    pub fn schema_and_name(&self) -> (&str, &str) {
        let name = self.name.as_str();
        match name.split_once('.') {
            Some((schema, table)) => (schema.trim_matches(['[', ']']), table.trim_matches(['[', ']'])),
            None => ("dbo", name.trim_matches(['[', ']'])),
        }
    }

    /// Table name without schema
    pub fn short_name(&self) -> &str {
        self.schema_and_name().1
    }
}

/// Schema entry of a tabular result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub data_type: DataType,
    pub max_length: Option<u32>,
    pub nullable: bool,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            max_length: None,
            nullable: true,
        }
    }

    pub fn with_max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A row set with its schema
///
/// Also used on its own (without rows) as the schema description of a table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataTable {
    pub fields: Vec<SchemaField>,
    pub rows: Vec<Vec<Value>>,
}

impl DataTable {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self {
            fields,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    /// Position of a field (case-insensitive)
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    /// Value of a named field in a row
    pub fn value<'a>(&self, row: &'a [Value], name: &str) -> Option<&'a Value> {
        self.index_of(name).and_then(|i| row.get(i))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// Drop a field and its values from every row
    pub fn remove_field(&mut self, name: &str) -> bool {
        match self.index_of(name) {
            Some(idx) => {
                self.fields.remove(idx);
                for row in &mut self.rows {
                    if idx < row.len() {
                        row.remove(idx);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Extract the given fields of every row, in order
    ///
    /// Missing fields produce NULL.
    pub fn project(&self, names: &[&str]) -> Vec<Vec<Value>> {
        let indices: Vec<Option<usize>> = names.iter().map(|n| self.index_of(n)).collect();
        self.rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|i| i.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }

    /// Schema only copy
    pub fn schema(&self) -> DataTable {
        DataTable::new(self.fields.clone())
    }
}
