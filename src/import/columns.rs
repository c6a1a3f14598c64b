//! Column resolution
//!
//! Turns the source schema and the import configuration into the columns a
//! run works with: plain columns, joined columns, identity and date fields.

use std::sync::Arc;

use crate::adapters::SourceAdapter;
use crate::error::{AdapterResultExt, SyncError, SyncResult};
use crate::models::{Column, DataTable, ImportModel, JoinSpec, split_field_list};
use crate::query::{SortDirection, SortOrderField};

/// Columns of one import, resolved against the source schema
#[derive(Debug, Clone, Default)]
pub struct ResolvedColumns {
    /// Projection of every copy and correction query: plain columns first,
    /// then joined columns
    pub columns: Vec<Column>,
    pub insert_dates: Vec<Column>,
    pub update_dates: Vec<Column>,
    /// Schema of [`columns`](Self::columns), used to create the target table
    pub schema: DataTable,
}

impl ResolvedColumns {
    /// Read the source schema and resolve the configured fields
    pub async fn resolve(model: &ImportModel, source: &dyn SourceAdapter) -> SyncResult<Self> {
        let table = &model.name;
        let alias = source.table().alias.clone();
        let id_fields = model.id_fields();
        let ignored = model.ignore_update_fields();

        let native = source.schema(None).await.context(table, "read source schema")?;
        for id in &id_fields {
            if native.index_of(id).is_none() {
                return Err(SyncError::config(format!(
                    "{table}: id field {id} does not exist in {}",
                    model.source_name
                )));
            }
        }

        let mut columns: Vec<Column> = native
            .fields
            .iter()
            .map(|field| {
                let mut column = Column::new(field.name.clone(), field.data_type)
                    .with_alias(alias.clone())
                    .with_nullable(field.nullable);
                column.length = field.max_length;
                column.is_identity = id_fields.iter().any(|id| id.eq_ignore_ascii_case(&field.name));
                column.ignore_on_update = ignored.iter().any(|f| f.eq_ignore_ascii_case(&field.name));
                column
            })
            .collect();

        let type_info = source
            .extended_column_type_info(None)
            .await
            .context(table, "read source column types")?;
        for column in &mut columns {
            column.type_info = type_info.iter().find(|i| i.name == column.name).cloned();
        }

        let mut joined = Vec::new();
        for join in &model.join {
            let join_fields = split_field_list(Some(&join.id_field_name));
            let parent_fields = split_field_list(Some(&join.parent_join_field_name));
            if join_fields.is_empty() || join_fields.len() != parent_fields.len() {
                return Err(SyncError::config(format!(
                    "{table}: join {} needs as many id fields as parent join fields",
                    join.name
                )));
            }
            let mut keys = Vec::with_capacity(join_fields.len());
            for (join_field, parent_field) in join_fields.into_iter().zip(parent_fields) {
                let parent = columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&parent_field))
                    .ok_or_else(|| {
                        SyncError::config(format!(
                            "{table}: parent join field {parent_field} of join {} does not exist",
                            join.name
                        ))
                    })?;
                keys.push((join_field, parent.name.clone()));
            }
            let spec = Arc::new(JoinSpec {
                name: join.name.clone(),
                source_name: join.source_name.clone(),
                keys,
                parent_alias: alias.clone(),
            });
            let join_info = source
                .extended_column_type_info(Some(&join.source_name))
                .await
                .context(table, "read joined column types")?;
            for field in split_field_list(Some(&join.select_fields)) {
                let mut column = Column::joined(Arc::clone(&spec), field, Default::default());
                column.type_info = join_info.iter().find(|i| i.name == column.name).cloned();
                joined.push(column);
            }
        }

        let schema = if joined.is_empty() {
            native
        } else {
            let all: Vec<Column> = columns.iter().chain(&joined).cloned().collect();
            let full = source
                .schema(Some(&all))
                .await
                .context(table, "read joined schema")?;
            for column in &mut joined {
                let field = full.field(&column.internal_name).ok_or_else(|| {
                    SyncError::Schema {
                        table: table.clone(),
                        message: format!("joined field {} missing from source schema", column.internal_name),
                    }
                })?;
                column.data_type = field.data_type;
                column.length = field.max_length;
                column.nullable = field.nullable;
            }
            full
        };
        columns.extend(joined);

        let insert_dates = find_all(table, &columns, &model.insert_date_fields(), "insert date")?;
        let update_dates = find_all(table, &columns, &model.update_date_fields(), "update date")?;

        tracing::debug!(
            table = %table,
            columns = columns.len(),
            ids = id_fields.len(),
            insert_dates = insert_dates.len(),
            update_dates = update_dates.len(),
            "resolved columns"
        );

        Ok(Self {
            columns,
            insert_dates,
            update_dates,
            schema,
        })
    }

    pub fn id_columns(&self) -> Vec<Column> {
        self.columns.iter().filter(|c| c.is_identity).cloned().collect()
    }

    /// Insert date fields, then identity columns not among them
    pub fn default_sort_order(&self, direction: SortDirection) -> Vec<SortOrderField> {
        self.insert_dates
            .iter()
            .chain(self.columns.iter().filter(|c| {
                c.is_identity
                    && !self
                        .insert_dates
                        .iter()
                        .any(|d| d.name.eq_ignore_ascii_case(&c.name))
            }))
            .map(|c| SortOrderField {
                column: c.clone(),
                direction,
            })
            .collect()
    }

    /// Update date fields, then identity columns
    pub fn update_sort_order(&self) -> Vec<SortOrderField> {
        self.update_dates
            .iter()
            .chain(self.columns.iter().filter(|c| c.is_identity))
            .map(|c| SortOrderField::asc(c.clone()))
            .collect()
    }

    /// Columns assigned by the update pass
    pub fn assignable(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_identity && !c.ignore_on_update)
    }
}

fn find_all(table: &str, columns: &[Column], names: &[String], kind: &str) -> SyncResult<Vec<Column>> {
    names
        .iter()
        .map(|name| {
            columns
                .iter()
                .find(|c| c.matches_name(name))
                .cloned()
                .ok_or_else(|| SyncError::config(format!("{table}: {kind} field {name} does not exist")))
        })
        .collect()
}
