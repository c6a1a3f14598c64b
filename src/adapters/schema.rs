//! Target table DDL generation

use super::CreateTableRequest;
use crate::error::AdapterError;
use crate::models::{Column, DataType, ExpectedSize, SchemaField, Table, escape_field_name};

/// Backend family the DDL is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaFlavor {
    SqlServer,
    /// Azure SQL Data Warehouse: distribution and index hints, no PK constraint
    AzureDwh,
    DuckDb,
}

/// Builds `CREATE TABLE` statements from a source schema
#[derive(Debug, Clone)]
pub struct TableCreator {
    pub flavor: SchemaFlavor,
    /// Skip the primary key constraint
    pub avoid_primary_keys: bool,
    /// Add `IGNORE_DUP_KEY = ON` to SQL Server primary keys
    pub ignore_dup_key: bool,
}

impl TableCreator {
    pub fn new(flavor: SchemaFlavor) -> Self {
        Self {
            flavor,
            avoid_primary_keys: false,
            ignore_dup_key: true,
        }
    }

    pub fn with_avoid_primary_keys(mut self, avoid: bool) -> Self {
        self.avoid_primary_keys = avoid;
        self
    }

    fn quote(&self, name: &str) -> String {
        match self.flavor {
            SchemaFlavor::DuckDb => format!("\"{}\"", name.replace('"', "\"\"")),
            _ => format!("[{}]", name.replace(']', "]]")),
        }
    }

    fn table_name(&self, name: &str) -> String {
        let table = Table::new(name);
        let (schema, short) = table.schema_and_name();
        match self.flavor {
            SchemaFlavor::DuckDb if !name.contains('.') => self.quote(short),
            _ => format!("{}.{}", self.quote(schema), self.quote(short)),
        }
    }

    /// Column type for a schema field, honouring native type information
    pub fn column_type(&self, field: &SchemaField, column: Option<&Column>) -> String {
        let info = column.and_then(|c| c.type_info.as_ref());
        if self.flavor == SchemaFlavor::DuckDb {
            return match field.data_type {
                DataType::Int => "INTEGER".into(),
                DataType::Long => "BIGINT".into(),
                DataType::Decimal => format!(
                    "DECIMAL({}, {})",
                    info.and_then(|i| i.precision).unwrap_or(19).min(38),
                    info.and_then(|i| i.scale).unwrap_or(4)
                ),
                DataType::Double => "DOUBLE".into(),
                DataType::String => "VARCHAR".into(),
                DataType::Bool => "BOOLEAN".into(),
                DataType::DateTime => "TIMESTAMP".into(),
                DataType::Guid => "UUID".into(),
                DataType::Binary => "BLOB".into(),
            };
        }
        match field.data_type {
            DataType::Int => "INT".into(),
            DataType::Long => "BIGINT".into(),
            DataType::Decimal => match info {
                Some(i) if matches!(i.type_name.to_lowercase().as_str(), "money" | "smallmoney") => {
                    i.type_name.to_uppercase()
                }
                Some(i) => format!(
                    "{}({}, {})",
                    i.type_name.to_uppercase(),
                    i.precision.unwrap_or(19),
                    i.scale.unwrap_or(4)
                ),
                None => "DECIMAL(19, 4)".into(),
            },
            DataType::Double => "FLOAT".into(),
            DataType::String => match field.max_length.or(column.and_then(|c| c.length)) {
                Some(len) if len > 0 && len <= 4000 => format!("NVARCHAR({len})"),
                _ => "NVARCHAR(MAX)".into(),
            },
            DataType::Bool => "BIT".into(),
            DataType::DateTime => match info {
                Some(i) if i.type_name.eq_ignore_ascii_case("datetime2") && i.precision.is_some() => {
                    format!("DATETIME2({})", i.precision.unwrap_or(7))
                }
                Some(i) if i.type_name.to_lowercase().starts_with("datetime") || i.type_name.eq_ignore_ascii_case("date") => {
                    i.type_name.to_uppercase()
                }
                _ => "DATETIME2".into(),
            },
            DataType::Guid => "UNIQUEIDENTIFIER".into(),
            DataType::Binary => "VARBINARY(MAX)".into(),
        }
    }

    /// Render the statement creating the requested table
    pub fn create_table_sql(&self, request: &CreateTableRequest) -> Result<String, AdapterError> {
        let pks: Vec<String> = request
            .id_columns
            .iter()
            .map(|c| escape_field_name(c))
            .filter(|c| !c.is_empty())
            .collect();
        let pk_list = pks.iter().map(|p| self.quote(p)).collect::<Vec<_>>().join(", ");

        let mut distribution_column = None;
        let mut with_lines = Vec::new();
        if self.flavor == SchemaFlavor::AzureDwh {
            // medium and small tables are replicated, larger ones hash distributed
            let replicated = request.expected_size.code() > ExpectedSize::Big.code();
            let columnstore = request.expected_size.code() < ExpectedSize::Medium.code();
            let configured = request
                .distribution_column
                .as_deref()
                .map(escape_field_name)
                .filter(|c| !c.is_empty());
            if !replicated && (configured.is_some() || !pks.is_empty()) {
                let column = configured.or_else(|| pks.first().cloned()).unwrap_or_default();
                if column.contains(',') {
                    return Err(AdapterError::Schema(format!(
                        "{}: only one distribution column is allowed, remove the comma from the settings",
                        request.table
                    )));
                }
                with_lines.push(format!("DISTRIBUTION = HASH ({})", self.quote(&column)));
                distribution_column = Some(column);
            } else if replicated {
                with_lines.push("DISTRIBUTION = REPLICATE".to_string());
            } else {
                with_lines.push("DISTRIBUTION = ROUND_ROBIN".to_string());
            }
            if !columnstore && !pks.is_empty() && !request.ignore_identity {
                with_lines.push(format!("CLUSTERED INDEX ({pk_list})"));
            } else {
                with_lines.push("CLUSTERED COLUMNSTORE INDEX".to_string());
            }
        }

        let mut lines = Vec::with_capacity(request.schema.fields.len() + 1);
        for field in &request.schema.fields {
            let column = request.columns.iter().find(|c| c.internal_name.eq_ignore_ascii_case(&field.name));
            let mut line = format!("\t{} {}", self.quote(&field.name), self.column_type(field, column));
            let single_integer_pk = pks.len() == 1
                && pks[0].eq_ignore_ascii_case(&field.name)
                && field.data_type.is_integer();
            if self.flavor == SchemaFlavor::AzureDwh
                && single_integer_pk
                && distribution_column.as_deref() != Some(field.name.as_str())
                && !request.ignore_identity
            {
                line.push_str(" IDENTITY(1,1)");
            }
            if !field.nullable {
                line.push_str(" NOT NULL");
            }
            lines.push(line);
        }

        if !pks.is_empty() && !self.avoid_primary_keys {
            match self.flavor {
                SchemaFlavor::SqlServer => {
                    let short = Table::new(request.table.as_str()).short_name().to_string();
                    let mut pk = format!("\tCONSTRAINT {} PRIMARY KEY CLUSTERED ({pk_list})", self.quote(&format!("PK_{short}")));
                    if self.ignore_dup_key {
                        pk.push_str(" WITH (IGNORE_DUP_KEY = ON)");
                    }
                    lines.push(pk);
                }
                // duplicate keys are repaired by the consistency engine, a
                // constraint would reject the rows it needs to see
                SchemaFlavor::AzureDwh | SchemaFlavor::DuckDb => {}
            }
        }

        let mut sql = format!("CREATE TABLE {} (\n{}\n)", self.table_name(&request.table), lines.join(",\n"));
        if !with_lines.is_empty() {
            sql.push_str(&format!(" WITH ({})", with_lines.join(",\n")));
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnTypeInfo, DataTable};

    fn request(expected_size: ExpectedSize) -> CreateTableRequest {
        CreateTableRequest {
            table: "dbo.Orders".into(),
            schema: DataTable::new(vec![
                SchemaField::new("Id", DataType::Long).not_null(),
                SchemaField::new("Name", DataType::String).with_max_length(40),
                SchemaField::new("Amount", DataType::Decimal),
            ]),
            id_columns: vec!["[Id]".into()],
            columns: vec![
                Column::new("Amount", DataType::Decimal)
                    .with_type_info(ColumnTypeInfo::new("Amount", "decimal").with_precision(18, 2)),
            ],
            expected_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_sql_server_primary_key() {
        let sql = TableCreator::new(SchemaFlavor::SqlServer)
            .create_table_sql(&request(ExpectedSize::None))
            .unwrap();
        assert!(sql.starts_with("CREATE TABLE [dbo].[Orders]"));
        assert!(sql.contains("[Id] BIGINT NOT NULL"));
        assert!(sql.contains("[Name] NVARCHAR(40)"));
        assert!(sql.contains("[Amount] DECIMAL(18, 2)"));
        assert!(sql.contains("CONSTRAINT [PK_Orders] PRIMARY KEY CLUSTERED ([Id]) WITH (IGNORE_DUP_KEY = ON)"));
    }

    #[test]
    fn test_azure_dwh_hints() {
        let creator = TableCreator::new(SchemaFlavor::AzureDwh);
        let large = creator.create_table_sql(&request(ExpectedSize::Large)).unwrap();
        assert!(large.contains("DISTRIBUTION = HASH ([Id])"));
        assert!(large.contains("CLUSTERED COLUMNSTORE INDEX"));
        assert!(!large.contains("CONSTRAINT"));

        let small = creator.create_table_sql(&request(ExpectedSize::Small)).unwrap();
        assert!(small.contains("DISTRIBUTION = REPLICATE"));
        assert!(small.contains("CLUSTERED INDEX ([Id])"));
        assert!(small.contains("[Id] BIGINT IDENTITY(1,1) NOT NULL"));

        let mut bad = request(ExpectedSize::Large);
        bad.distribution_column = Some("Id,Name".into());
        assert!(creator.create_table_sql(&bad).is_err());
    }

    #[test]
    fn test_duckdb_types() {
        let sql = TableCreator::new(SchemaFlavor::DuckDb)
            .create_table_sql(&CreateTableRequest {
                table: "orders".into(),
                ..request(ExpectedSize::None)
            })
            .unwrap();
        assert!(sql.starts_with("CREATE TABLE \"orders\""));
        assert!(sql.contains("\"Name\" VARCHAR"));
        assert!(sql.contains("\"Amount\" DECIMAL(18, 2)"));
    }
}
