//! ClickHouse implementation of the database abstraction layer
//!
//! Catalog lookups go through the typed `clickhouse` client with bound
//! parameters. Ad-hoc statements go through the HTTP interface directly with
//! `JSONCompact` output, since their result shape is only known at runtime.
use crate::connections::ConnectionConfig;
use crate::database::{
    CatalogColumn, ClientFactory, DatabaseClient, DatabaseError, DatabaseSummary,
    MetadataProvider, QueryResult, QueryStatistics, TableSummary,
};
use crate::password_sanitizer::sanitize_connection_url;
use async_trait::async_trait;
use clickhouse::sql::Identifier;
use clickhouse::{Client, Row};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;
use url::Url;

const EXCEPTION_CODE_HEADER: &str = "X-ClickHouse-Exception-Code";

static EXCEPTION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Code:\s*(\d+)").expect("valid exception regex"));

/// Pull the numeric exception code out of a ClickHouse error message
pub fn exception_code(message: &str) -> Option<u32> {
    EXCEPTION_CODE
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn map_clickhouse_error(context: &str, err: clickhouse::error::Error) -> DatabaseError {
    let message = err.to_string();
    match exception_code(&message) {
        Some(code) => DatabaseError::from_exception(Some(code), message),
        None => DatabaseError::MetadataError(format!("{context}: {message}")),
    }
}

/// Accept `host:8123` as shorthand for `http://host:8123`
pub fn normalize_url(raw: &str) -> Result<Url, DatabaseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DatabaseError::InvalidUrl("server URL is empty".to_string()));
    }
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| DatabaseError::InvalidUrl(format!("Failed to parse URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(DatabaseError::InvalidUrl(format!(
            "unsupported scheme '{scheme}', expected http or https"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct JsonCompactMeta {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JsonCompactStatistics {
    #[serde(default)]
    elapsed: f64,
    #[serde(default)]
    rows_read: u64,
    #[serde(default)]
    bytes_read: u64,
}

#[derive(Debug, Deserialize)]
struct JsonCompactResponse {
    meta: Vec<JsonCompactMeta>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    rows: Option<u64>,
    #[serde(default)]
    statistics: Option<JsonCompactStatistics>,
}

/// Map a `JSONCompact` body into a [`QueryResult`]
///
/// DDL statements return an empty body; statements carrying their own
/// `FORMAT` clause return text, which is surfaced one line per row.
pub fn parse_json_compact(body: &str) -> QueryResult {
    if body.trim().is_empty() {
        return QueryResult::default();
    }

    match serde_json::from_str::<JsonCompactResponse>(body) {
        Ok(response) => {
            let statistics = response.statistics.map(|s| QueryStatistics {
                elapsed: s.elapsed,
                rows_read: s.rows_read,
                bytes_read: s.bytes_read,
                rows: response.rows.unwrap_or(response.data.len() as u64),
            });
            QueryResult {
                columns: response.meta.into_iter().map(|m| m.name).collect(),
                rows: response.data,
                statistics,
                error: None,
            }
        }
        Err(_) => QueryResult {
            columns: vec!["result".to_string()],
            rows: body
                .lines()
                .filter(|line| !line.is_empty())
                .map(|line| vec![serde_json::Value::String(line.to_string())])
                .collect(),
            statistics: None,
            error: None,
        },
    }
}

/// ClickHouse metadata provider implementation
pub struct ClickHouseMetadataProvider {
    client: Client,
}

impl ClickHouseMetadataProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetadataProvider for ClickHouseMetadataProvider {
    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, DatabaseError> {
        debug!("[ClickHouseMetadataProvider::list_databases] Starting query");

        #[derive(Deserialize, Row)]
        struct DatabaseRow {
            name: String,
            engine: String,
        }

        let rows = self
            .client
            .query("SELECT name, engine FROM system.databases ORDER BY name")
            .fetch_all::<DatabaseRow>()
            .await
            .map_err(|e| map_clickhouse_error("Failed to list databases", e))?;

        debug!(
            "[ClickHouseMetadataProvider::list_databases] Found {} databases",
            rows.len()
        );
        Ok(rows
            .into_iter()
            .map(|r| DatabaseSummary {
                name: r.name,
                engine: r.engine,
            })
            .collect())
    }

    async fn database_engine(&self, database: &str) -> Result<Option<String>, DatabaseError> {
        #[derive(Deserialize, Row)]
        struct EngineRow {
            engine: String,
        }

        let row = self
            .client
            .query("SELECT engine FROM system.databases WHERE name = ?")
            .bind(database)
            .fetch_optional::<EngineRow>()
            .await
            .map_err(|e| map_clickhouse_error("Failed to look up database engine", e))?;

        Ok(row.map(|r| r.engine))
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<TableSummary>, DatabaseError> {
        debug!(
            "[ClickHouseMetadataProvider::list_tables] Starting query for database: {}",
            database
        );

        #[derive(Deserialize, Row)]
        struct TableRow {
            name: String,
            engine: String,
            total_rows: Option<u64>,
            total_bytes: Option<u64>,
        }

        let rows = self
            .client
            .query(
                "SELECT name, engine, total_rows, total_bytes FROM system.tables WHERE database = ? ORDER BY name",
            )
            .bind(database)
            .fetch_all::<TableRow>()
            .await
            .map_err(|e| map_clickhouse_error("Failed to list tables", e))?;

        debug!(
            "[ClickHouseMetadataProvider::list_tables] Found {} tables",
            rows.len()
        );
        Ok(rows
            .into_iter()
            .map(|r| TableSummary {
                name: r.name,
                engine: r.engine,
                total_rows: r.total_rows,
                total_bytes: r.total_bytes,
            })
            .collect())
    }

    async fn list_columns(
        &self,
        database: &str,
        table: Option<&str>,
    ) -> Result<Vec<CatalogColumn>, DatabaseError> {
        debug!(
            "[ClickHouseMetadataProvider::list_columns] Getting columns for database: {} table: {:?}",
            database, table
        );

        #[derive(Deserialize, Row)]
        struct ColumnRow {
            table: String,
            name: String,
            #[serde(rename = "type")]
            data_type: String,
            default_kind: String,
            default_expression: String,
            is_in_primary_key: u8,
            position: u64,
        }

        const COLUMNS: &str = "SELECT table, name, type, default_kind, default_expression, is_in_primary_key, position FROM system.columns";

        let query = match table {
            Some(table) => self
                .client
                .query(&format!(
                    "{COLUMNS} WHERE database = ? AND table = ? ORDER BY position"
                ))
                .bind(database)
                .bind(table),
            None => self
                .client
                .query(&format!(
                    "{COLUMNS} WHERE database = ? ORDER BY table, position"
                ))
                .bind(database),
        };

        let rows = query
            .fetch_all::<ColumnRow>()
            .await
            .map_err(|e| map_clickhouse_error("Failed to get column details", e))?;

        Ok(rows
            .into_iter()
            .map(|r| CatalogColumn {
                table: r.table,
                name: r.name,
                data_type: r.data_type,
                default_kind: r.default_kind,
                default_expression: r.default_expression,
                is_in_primary_key: r.is_in_primary_key != 0,
                position: r.position,
            })
            .collect())
    }

    async fn show_create_table(
        &self,
        database: &str,
        table: &str,
    ) -> Result<String, DatabaseError> {
        self.client
            .query("SHOW CREATE TABLE ?.?")
            .bind(Identifier(database))
            .bind(Identifier(table))
            .fetch_one::<String>()
            .await
            .map_err(|e| map_clickhouse_error("Failed to show create table", e))
    }
}

/// ClickHouse database client implementation
pub struct ClickHouseClient {
    http: reqwest::Client,
    client: Client,
    endpoint: Url,
    connection: ConnectionConfig,
    metadata_provider: ClickHouseMetadataProvider,
}

impl ClickHouseClient {
    /// Build a client without touching the network
    pub fn new(connection: ConnectionConfig, timeout: Duration) -> Result<Self, DatabaseError> {
        let endpoint = normalize_url(&connection.url)?;
        debug!(
            "[ClickHouseClient::new] Creating client for: {}",
            sanitize_connection_url(endpoint.as_str())
        );

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                DatabaseError::ConnectionError(format!("Failed to create HTTP client: {e}"))
            })?;

        let mut client = Client::default()
            .with_url(endpoint.as_str().trim_end_matches('/'))
            .with_database(connection.default_database());
        if !connection.username.is_empty() {
            client = client.with_user(&connection.username);
        }
        if let Some(password) = connection.password.as_deref() {
            client = client.with_password(password);
        }

        let metadata_provider = ClickHouseMetadataProvider::new(client.clone());

        Ok(Self {
            http,
            client,
            endpoint,
            connection,
            metadata_provider,
        })
    }

    /// POST a statement to the HTTP interface and return the raw body
    async fn post_statement(
        &self,
        sql: &str,
        database: Option<&str>,
        with_format: bool,
    ) -> Result<String, DatabaseError> {
        let database = database
            .filter(|db| !db.is_empty())
            .unwrap_or_else(|| self.connection.default_database());

        debug!(
            "[ClickHouseClient::post_statement] Executing on {} (database {}): {}",
            sanitize_connection_url(self.endpoint.as_str()),
            database,
            sql
        );

        let mut request = self.http.post(self.endpoint.clone());
        if !self.connection.username.is_empty() {
            request = request.basic_auth(&self.connection.username, self.connection.password.as_ref());
        }

        let mut params = vec![("database", database)];
        if with_format {
            params.push(("default_format", "JSONCompact"));
        }

        let response = request
            .query(&params)
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| DatabaseError::ConnectionError(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let header_code = response
            .headers()
            .get(EXCEPTION_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());

        let body = response
            .text()
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to read response: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }

        let message = body.trim().to_string();
        let code = header_code.or_else(|| exception_code(&message));
        debug!(
            "[ClickHouseClient::post_statement] Server returned {} (code {:?})",
            status, code
        );
        if code.is_none() && (status.as_u16() == 401 || status.as_u16() == 403) {
            return Err(DatabaseError::ConnectionError(message));
        }
        Err(DatabaseError::from_exception(code, message))
    }
}

#[async_trait]
impl DatabaseClient for ClickHouseClient {
    async fn execute_query(
        &self,
        sql: &str,
        database: Option<&str>,
    ) -> Result<QueryResult, DatabaseError> {
        let body = self.post_statement(sql, database, true).await?;
        Ok(parse_json_compact(&body))
    }

    async fn execute_command(
        &self,
        sql: &str,
        database: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.post_statement(sql, database, false).await.map(|_| ())
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map_err(|e| {
                DatabaseError::ConnectionError(format!("Failed to connect to ClickHouse: {e}"))
            })?;
        Ok(())
    }

    fn get_connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    fn get_metadata_provider(&self) -> &dyn MetadataProvider {
        &self.metadata_provider
    }
}

/// Builds [`ClickHouseClient`]s, reusing one process-wide client for the default connection
pub struct ClickHouseClientFactory {
    default_client: Arc<ClickHouseClient>,
    timeout: Duration,
}

impl ClickHouseClientFactory {
    pub fn new(default_connection: ConnectionConfig, timeout: Duration) -> Result<Self, DatabaseError> {
        Ok(Self {
            default_client: Arc::new(ClickHouseClient::new(default_connection, timeout)?),
            timeout,
        })
    }
}

impl ClientFactory for ClickHouseClientFactory {
    fn connect(
        &self,
        connection: &ConnectionConfig,
    ) -> Result<Arc<dyn DatabaseClient>, DatabaseError> {
        if connection.same_target(self.default_client.get_connection()) {
            return Ok(self.default_client.clone() as Arc<dyn DatabaseClient>);
        }
        Ok(Arc::new(ClickHouseClient::new(connection.clone(), self.timeout)?))
    }
}
