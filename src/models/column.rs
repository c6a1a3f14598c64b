//! Column model used by queries and schema creation

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::value::DataType;

/// Native type details captured from the remote schema
///
/// Kept so the target schema and query parameters preserve the exact
/// precision of numeric and temporal fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColumnTypeInfo {
    /// Remote column name
    pub name: String,
    /// Native type name (e.g. `decimal`, `datetime2`)
    pub type_name: String,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl ColumnTypeInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            precision: None,
            scale: None,
        }
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// A joined table definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Alias of the joined table
    pub name: String,
    /// Remote name of the joined table
    pub source_name: String,
    /// Pairs of (joined table field, parent table field)
    pub keys: Vec<(String, String)>,
    /// Alias of the parent table
    pub parent_alias: String,
}

/// Variant of a column
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ColumnKind {
    #[default]
    Plain,
    /// Field of a joined table
    Joined(Arc<JoinSpec>),
    /// `COUNT(*)` aggregate
    CountRows,
    /// `MAX(column)` aggregate
    MaxValue,
    /// `MAX(column)` over a joined table's field
    JoinedMaxValue(Arc<JoinSpec>),
}

impl ColumnKind {
    pub fn join(&self) -> Option<&JoinSpec> {
        match self {
            ColumnKind::Joined(join) | ColumnKind::JoinedMaxValue(join) => Some(join),
            _ => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            ColumnKind::CountRows | ColumnKind::MaxValue | ColumnKind::JoinedMaxValue(_)
        )
    }
}

/// Identity of a data field
///
/// `internal_name` is the name after materialization in the target,
/// `name` + `alias` address the field remotely.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Column {
    pub internal_name: String,
    pub name: String,
    pub alias: String,
    pub data_type: DataType,
    pub length: Option<u32>,
    pub nullable: bool,
    pub is_identity: bool,
    pub ignore_on_update: bool,
    pub type_info: Option<ColumnTypeInfo>,
    pub kind: ColumnKind,
}

impl Column {
    /// Create a plain column whose internal and remote names match
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            internal_name: name.clone(),
            name,
            alias: super::table::DEFAULT_ALIAS.to_string(),
            data_type,
            nullable: true,
            ..Default::default()
        }
    }

    /// Create a column of a joined table; its internal name is `{join}_{field}`
    pub fn joined(join: Arc<JoinSpec>, field: impl Into<String>, data_type: DataType) -> Self {
        let name = field.into();
        Self {
            internal_name: format!("{}_{}", join.name, name),
            alias: join.name.clone(),
            name,
            data_type,
            nullable: true,
            kind: ColumnKind::Joined(join),
            ..Default::default()
        }
    }

    /// `COUNT(*)` aggregate column
    pub fn count_rows() -> Self {
        Self {
            internal_name: "CountRows".to_string(),
            name: "CountRows".to_string(),
            data_type: DataType::Long,
            kind: ColumnKind::CountRows,
            ..Default::default()
        }
    }

    /// `MAX` aggregate over this column
    pub fn max_of(&self) -> Self {
        let kind = match &self.kind {
            ColumnKind::Joined(join) => ColumnKind::JoinedMaxValue(Arc::clone(join)),
            _ => ColumnKind::MaxValue,
        };
        Self {
            kind,
            ..self.clone()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_internal_name(mut self, internal_name: impl Into<String>) -> Self {
        self.internal_name = internal_name.into();
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_type_info(mut self, info: ColumnTypeInfo) -> Self {
        self.type_info = Some(info);
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.nullable = false;
        self
    }

    pub fn ignored_on_update(mut self) -> Self {
        self.ignore_on_update = true;
        self
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.kind, ColumnKind::Joined(_))
    }

    /// Native precision if known
    pub fn precision(&self) -> Option<u8> {
        self.type_info.as_ref().and_then(|i| i.precision)
    }

    /// Native scale if known
    pub fn scale(&self) -> Option<u8> {
        self.type_info.as_ref().and_then(|i| i.scale)
    }

    /// Whether `name` addresses this column (case-insensitive), optionally
    /// qualified as `alias.name`
    pub fn matches_name(&self, qualified: &str) -> bool {
        match qualified.split_once('.') {
            Some((alias, name)) => {
                self.alias.eq_ignore_ascii_case(alias) && self.internal_name.eq_ignore_ascii_case(name)
            }
            None => self.internal_name.eq_ignore_ascii_case(qualified),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_column_names() {
        let join = Arc::new(JoinSpec {
            name: "cust".into(),
            source_name: "dbo.Customers".into(),
            keys: vec![("Id".into(), "CustomerId".into())],
            parent_alias: "main".into(),
        });
        let col = Column::joined(join, "Country", DataType::String);
        assert_eq!(col.internal_name, "cust_Country");
        assert_eq!(col.alias, "cust");
        assert!(col.is_joined());
        assert!(matches!(col.max_of().kind, ColumnKind::JoinedMaxValue(_)));
    }

    #[test]
    fn test_matches_qualified_name() {
        let col = Column::new("Created", DataType::DateTime);
        assert!(col.matches_name("created"));
        assert!(col.matches_name("main.Created"));
        assert!(!col.matches_name("other.Created"));
    }
}
