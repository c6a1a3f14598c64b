//! Import configuration as read from the source catalog

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Declares an enum whose values serialize by name and deserialize from
/// either the name or the numeric code used by the catalog files.
macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Numeric code of the value
            pub fn code(&self) -> u8 {
                match self {
                    $( $name::$variant => $code ),+
                }
            }

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $( $code => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( $name::$variant => write!(f, $text) ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                if let Ok(code) = s.parse::<u8>() {
                    return $name::from_code(code)
                        .ok_or_else(|| format!("Invalid {} code: {}", stringify!($name), code));
                }
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(format!("Invalid {}: {}", stringify!($name), s))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match CodeOrName::deserialize(deserializer)? {
                    CodeOrName::Code(code) => $name::from_code(code).ok_or_else(|| {
                        serde::de::Error::custom(format!("Invalid {} code: {}", stringify!($name), code))
                    }),
                    CodeOrName::Name(name) => name.parse().map_err(serde::de::Error::custom),
                    CodeOrName::Null => Ok($name::default()),
                }
            }
        }
    };
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CodeOrName {
    Code(u8),
    Name(String),
    Null,
}

coded_enum! {
    /// Incremental sync strategy
    DataSyncType {
        /// Copy everything on every run
        #[default]
        None = 0 => "none",
        AppendById = 1 => "appendbyid",
        AppendByDate = 2 => "appendbydate",
        AppendByIdExclude = 3 => "appendbyidexclude",
        AppendByIdFirst = 4 => "appendbyidfirst",
        ForceDeleteExisting = 5 => "forcedeleteexisting",
        AppendByDateStrict = 6 => "appendbydatestrict",
    }
}

coded_enum! {
    /// Update pass applied after the copy
    UpdateMode {
        #[default]
        None = 0 => "none",
        UpdateByModifiedDate = 1 => "updateByModifiedDate",
        ForceUpdateAll = 2 => "forceupdateall",
    }
}

coded_enum! {
    /// Expected target table size, drives storage hints
    ExpectedSize {
        #[default]
        None = 0 => "none",
        VeryLarge = 1 => "verylarge",
        Large = 2 => "large",
        Big = 3 => "big",
        Medium = 4 => "medium",
        Small = 5 => "small",
    }
}

coded_enum! {
    /// Kind of source backend
    SourceType {
        #[default]
        Sql = 0 => "sql",
        OData = 1 => "odata",
        DataSet = 2 => "dataset",
    }
}

coded_enum! {
    /// Warehouse table role
    TableType {
        #[default]
        None = 0 => "none",
        Fact = 1 => "fact",
        Dim = 2 => "dim",
    }
}

/// A joined table whose fields are copied along with the parent row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JoinModel {
    /// Alias of the join, prefix of the copied field names
    pub name: String,
    pub source_name: String,
    /// Key fields of the joined table
    pub id_field_name: String,
    /// Fields of the parent table matched against `id_field_name`
    pub parent_join_field_name: String,
    pub select_fields: String,
}

/// Configuration of one table import, read-only for the importer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportModel {
    /// Target table name
    pub name: String,
    /// Connection group key
    pub connection: String,
    pub source_name: String,
    pub id_field_name: Option<String>,
    pub insert_query_date_field_name: Option<String>,
    pub insert_query_date_format: Option<String>,
    pub update_query_date_field_name: Option<String>,
    pub update_query_date_format: Option<String>,
    pub ignore_update_columns: Option<String>,
    pub default_query_params_suffix: Option<String>,
    pub query_sub_url: Option<String>,
    pub distribution_column: Option<String>,
    pub data_sync_type: DataSyncType,
    pub update_mode: UpdateMode,
    pub expected_size: ExpectedSize,
    pub source_type: SourceType,
    #[serde(rename = "type")]
    pub table_type: TableType,
    pub pagesize: usize,
    pub azure_dwh_ignore_identity: bool,
    pub join: Vec<JoinModel>,
    pub ignore_key_integrity_check: bool,
    pub ignore_import_if_source_is_not_available: bool,
    pub ignore_count_consistency_check: bool,
    pub avoid_count_consistency_correction: bool,
    pub avoid_complete_consistency_correction: bool,
}

/// Split a comma separated field list, trimming blanks and `[`/`]`
pub fn split_field_list(list: Option<&str>) -> Vec<String> {
    list.map(|l| {
        l.split(',')
            .map(escape_field_name)
            .filter(|f| !f.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Strip whitespace and square brackets from a field name
pub fn escape_field_name(name: &str) -> String {
    name.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}

impl ImportModel {
    pub fn new(name: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_name: source_name.into(),
            ..Default::default()
        }
    }

    pub fn with_ids(mut self, ids: &str) -> Self {
        self.id_field_name = Some(ids.to_string());
        self
    }

    pub fn with_sync_type(mut self, sync_type: DataSyncType) -> Self {
        self.data_sync_type = sync_type;
        self
    }

    pub fn with_insert_dates(mut self, fields: &str) -> Self {
        self.insert_query_date_field_name = Some(fields.to_string());
        self
    }

    pub fn with_update_dates(mut self, fields: &str) -> Self {
        self.update_query_date_field_name = Some(fields.to_string());
        self
    }

    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    pub fn id_fields(&self) -> Vec<String> {
        split_field_list(self.id_field_name.as_deref())
    }

    /// Insert date fields, possibly qualified as `alias.field`
    pub fn insert_date_fields(&self) -> Vec<String> {
        qualified_list(self.insert_query_date_field_name.as_deref())
    }

    pub fn update_date_fields(&self) -> Vec<String> {
        qualified_list(self.update_query_date_field_name.as_deref())
    }

    pub fn ignore_update_fields(&self) -> Vec<String> {
        split_field_list(self.ignore_update_columns.as_deref())
    }

    /// Group key, trimmed and lowercased
    pub fn group_key(&self) -> String {
        self.connection.trim().to_lowercase()
    }
}

fn qualified_list(list: Option<&str>) -> Vec<String> {
    list.map(|l| {
        l.split(',')
            .map(|entry| {
                entry
                    .split('.')
                    .map(escape_field_name)
                    .collect::<Vec<_>>()
                    .join(".")
            })
            .filter(|f| !f.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

impl fmt::Display for ImportModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
