//! OData HTTP source adapter
//!
//! Read-only. Rows are requested as JSON (`value` array of OData v4, or
//! `d.results` of OData v2), the schema is read from the service's `$metadata`
//! EDMX document.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};

use super::SourceAdapter;
use crate::error::AdapterError;
use crate::models::{Column, ColumnKind, ColumnTypeInfo, DataTable, DataType, SchemaField, Table, Value};
use crate::query::{Condition, SelectQuery, SortOrderField};
use crate::query_adapter::{ODataQueryAdapter, QueryAdapter};

/// Connection settings of an OData service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ODataConfig {
    /// Service root, e.g. `https://host/odata`
    pub service_url: String,
    /// Entity set path below the service root
    pub sub_url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Server side page limit
    pub page_size: Option<usize>,
}

impl ODataConfig {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Parse `URL=...;User ID=...;Password=...;Pagesize=...`
    pub fn from_connection_string(connection: &str) -> Result<Self, AdapterError> {
        let mut config = ODataConfig::default();
        for part in connection.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "url" => config.service_url = value.trim_end_matches('/').to_string(),
                "user id" => config.user = Some(value.to_string()),
                "password" => config.password = Some(value.to_string()),
                "pagesize" => {
                    config.page_size = Some(value.parse().map_err(|_| {
                        AdapterError::InvalidQuery(format!("invalid Pagesize in connection string: {value}"))
                    })?)
                }
                _ => {}
            }
        }
        if config.service_url.is_empty() {
            return Err(AdapterError::InvalidQuery(
                "connection string does not contain a URL".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn with_sub_url(mut self, sub_url: Option<String>) -> Self {
        self.sub_url = sub_url.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// URL of the entity set
    pub fn entity_url(&self) -> String {
        match &self.sub_url {
            Some(sub) => format!("{}/{}", self.service_url, sub.trim_matches('/')),
            None => self.service_url.clone(),
        }
    }
}

/// Source adapter over an OData entity set
pub struct ODataAdapter {
    table: Table,
    config: ODataConfig,
    renderer: ODataQueryAdapter,
    auth_header: Option<String>,
    client: reqwest::Client,
}

impl ODataAdapter {
    pub fn new(table: impl Into<String>, config: ODataConfig) -> Self {
        let auth_header = config.user.as_ref().map(|user| {
            let password = config.password.as_deref().unwrap_or_default();
            format!(
                "Basic {}",
                general_purpose::STANDARD.encode(format!("{user}:{password}"))
            )
        });
        Self {
            table: Table::new(table),
            config,
            renderer: ODataQueryAdapter::new(),
            auth_header,
            client: reqwest::Client::new(),
        }
    }

    /// Parameters appended to every request (e.g. `$format=json`)
    pub fn with_query_suffix(mut self, suffix: Option<String>) -> Self {
        self.renderer = self.renderer.with_suffix(suffix);
        self
    }

    fn suffix(&self) -> Option<&str> {
        self.renderer.default_query_params_suffix.as_deref()
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, AdapterError> {
        tracing::debug!(table = %self.table.name, url, "odata request");
        let mut request = self.client.get(url);
        if let Some(header) = &self.auth_header {
            request = request.header("Authorization", header);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AdapterError::Http(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(response)
    }

    async fn metadata(&self) -> Result<Vec<SchemaField>, AdapterError> {
        let url = format!("{}/$metadata", self.config.service_url);
        let body = self.get(&url).await?.text().await?;
        parse_metadata(&body, self.table.short_name())
    }

    async fn fetch(&self, query: &SelectQuery) -> Result<DataTable, AdapterError> {
        let rendered = self.renderer.convert_select_query(query)?;
        let url = format!("{}{}", self.config.entity_url(), rendered.text);
        let payload: serde_json::Value = self.get(&url).await?.json().await?;
        rows_from_payload(&payload, &query.columns)
    }
}

/// Extract the fields of one entity type from an EDMX document
pub fn parse_metadata(xml: &str, entity: &str) -> Result<Vec<SchemaField>, AdapterError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_entity = false;
    let mut found = false;
    let mut fields = Vec::new();
    let mut keys = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local_name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                let attr = |name: &str| {
                    e.attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
                        .map(|a| String::from_utf8_lossy(&a.value).to_string())
                };
                match local_name.as_str() {
                    "EntityType" => {
                        in_entity = attr("Name").as_deref() == Some(entity);
                        found |= in_entity;
                    }
                    "Property" if in_entity => {
                        let Some(name) = attr("Name") else { continue };
                        let type_name = attr("Type").unwrap_or_else(|| "Edm.String".to_string());
                        let data_type = DataType::from_native(&type_name);
                        let mut field = SchemaField::new(name, data_type);
                        field.max_length = match attr("MaxLength").and_then(|l| l.parse().ok()) {
                            Some(len) => Some(len),
                            None if data_type == DataType::String => Some(4000),
                            None => None,
                        };
                        if let Some(nullable) = attr("Nullable") {
                            field.nullable = !nullable.eq_ignore_ascii_case("false");
                        }
                        fields.push(field);
                    }
                    "PropertyRef" if in_entity => {
                        if let Some(name) = attr("Name") {
                            keys.push(name);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"EntityType" => in_entity = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AdapterError::Schema(format!(
                    "invalid $metadata document at position {}: {e}",
                    reader.error_position()
                )));
            }
            _ => {}
        }
    }

    if !found {
        return Err(AdapterError::Schema(format!("entity type {entity} not found in $metadata")));
    }
    for field in &mut fields {
        if keys.iter().any(|k| k == &field.name) {
            field.nullable = false;
        }
    }
    Ok(fields)
}

/// Convert a JSON feed into rows of the requested columns
pub fn rows_from_payload(payload: &serde_json::Value, columns: &[Column]) -> Result<DataTable, AdapterError> {
    let entries = payload
        .get("value")
        .or_else(|| payload.pointer("/d/results"))
        .or_else(|| payload.get("d"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| AdapterError::Serialization("response contains no entity array".to_string()))?;

    let fields = columns
        .iter()
        .map(|c| SchemaField::new(c.internal_name.clone(), c.data_type))
        .collect();
    let mut table = DataTable::new(fields);
    for entry in entries {
        let row = columns
            .iter()
            .map(|c| {
                entry
                    .get(&c.name)
                    .map(|v| Value::from(v).coerce(c.data_type))
                    .unwrap_or(Value::Null)
            })
            .collect();
        table.push_row(row);
    }
    Ok(table)
}

#[async_trait]
impl SourceAdapter for ODataAdapter {
    fn table(&self) -> &Table {
        &self.table
    }

    async fn schema(&self, columns: Option<&[Column]>) -> Result<DataTable, AdapterError> {
        let fields = self.metadata().await?;
        let Some(columns) = columns else {
            return Ok(DataTable::new(fields));
        };
        let mut selected = Vec::with_capacity(columns.len());
        for column in columns {
            if column.kind.join().is_some() {
                return Err(AdapterError::Unsupported(format!(
                    "joined column {} on an OData source",
                    column.internal_name
                )));
            }
            let field = fields
                .iter()
                .find(|f| f.name == column.name)
                .ok_or_else(|| AdapterError::Schema(format!("unknown column {}", column.name)))?;
            selected.push(SchemaField {
                name: column.internal_name.clone(),
                ..field.clone()
            });
        }
        Ok(DataTable::new(selected))
    }

    async fn row_count(&self, condition: Option<&Condition>) -> Result<u64, AdapterError> {
        let mut params = Vec::new();
        if let Some(condition) = condition {
            let filter = self.renderer.convert_condition(condition, "").text;
            params.push(format!("$filter={}", urlencoding::encode(&filter)));
        }
        if let Some(suffix) = self.suffix() {
            params.push(suffix.to_string());
        }
        let mut url = format!("{}/$count", self.config.entity_url());
        if !params.is_empty() {
            url = format!("{url}?{}", params.join("&"));
        }
        let body = self.get(&url).await?.text().await?;
        body.trim()
            .parse()
            .map_err(|_| AdapterError::Serialization(format!("invalid $count response: {body}")))
    }

    async fn max_value(&self, column: &Column, condition: Option<&Condition>) -> Result<Value, AdapterError> {
        let plain = Column {
            kind: ColumnKind::Plain,
            ..column.clone()
        };
        let not_null = Condition::ne(plain.clone(), Value::Null);
        let query = SelectQuery::new(vec![plain.clone()], self.table.clone())
            .with_condition(Condition::both(condition.cloned(), Some(not_null)))
            .with_sort_order(vec![SortOrderField::desc(plain)])
            .with_range(crate::query::Range::new(0, 1));
        let table = self.fetch(&query).await?;
        Ok(table.rows.into_iter().next().and_then(|r| r.into_iter().next()).unwrap_or(Value::Null))
    }

    async fn run_query(&self, query: &SelectQuery) -> Result<DataTable, AdapterError> {
        if let [column] = query.columns.as_slice() {
            match column.kind {
                ColumnKind::CountRows => {
                    let count = self.row_count(query.condition.as_ref()).await?;
                    return Ok(DataTable::new(vec![SchemaField::new(column.internal_name.clone(), DataType::Long)])
                        .with_rows(vec![vec![Value::Int(count as i64)]]));
                }
                ColumnKind::MaxValue => {
                    let max = self.max_value(column, query.condition.as_ref()).await?;
                    return Ok(DataTable::new(vec![SchemaField::new(column.internal_name.clone(), column.data_type)])
                        .with_rows(vec![vec![max]]));
                }
                _ => {}
            }
        }
        if query.columns.iter().any(|c| c.kind.is_aggregate() || c.kind.join().is_some()) {
            return Err(AdapterError::Unsupported(
                "OData sources support plain columns and single aggregates only".to_string(),
            ));
        }
        self.fetch(query).await
    }

    async fn extended_column_type_info(&self, _table_name: Option<&str>) -> Result<Vec<ColumnTypeInfo>, AdapterError> {
        Ok(Vec::new())
    }

    fn custom_page_size(&self) -> Option<usize> {
        self.config.page_size
    }

    async fn is_available(&self) -> bool {
        self.get(&format!("{}/$metadata", self.config.service_url)).await.is_ok()
    }
}
