//! Database abstraction layer
//!
//! The HTTP handlers never talk to ClickHouse directly: they go through a
//! [`DatabaseClient`] obtained from a [`ClientFactory`], which keeps the
//! orchestration code testable against a recording fake.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::connections::ConnectionConfig;

/// ClickHouse exception code for SYNTAX_ERROR
pub const SYNTAX_ERROR_CODE: u32 = 62;

/// Errors that can occur during database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Syntax error (code {code}): {message}")]
    Syntax { code: u32, message: String },

    #[error("Code: {code}. {message}")]
    Server { code: u32, message: String },

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Metadata error: {0}")]
    MetadataError(String),
}

impl DatabaseError {
    /// Classify a ClickHouse exception by its numeric code
    pub fn from_exception(code: Option<u32>, message: String) -> Self {
        match code {
            Some(SYNTAX_ERROR_CODE) => DatabaseError::Syntax {
                code: SYNTAX_ERROR_CODE,
                message,
            },
            Some(code) => DatabaseError::Server { code, message },
            None => DatabaseError::QueryError(message),
        }
    }

    pub fn is_syntax_error(&self) -> bool {
        matches!(self, DatabaseError::Syntax { .. })
    }
}

/// Execution statistics reported by the server alongside a result set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatistics {
    pub elapsed: f64,
    pub rows_read: u64,
    pub bytes_read: u64,
    pub rows: u64,
}

/// Tabular result of an ad-hoc statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<QueryStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Empty result carrying only an error message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            statistics: None,
            error: Some(message.into()),
        }
    }

    /// Index of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in the first row
    pub fn first_value(&self, column: &str) -> Option<&serde_json::Value> {
        let idx = self.column_index(column)?;
        self.rows.first().and_then(|row| row.get(idx))
    }
}

/// One entry of `system.databases`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSummary {
    pub name: String,
    pub engine: String,
}

/// One entry of `system.tables`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub name: String,
    pub engine: String,
    pub total_rows: Option<u64>,
    pub total_bytes: Option<u64>,
}

/// One entry of `system.columns`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub default_kind: String,
    pub default_expression: String,
    pub is_in_primary_key: bool,
    pub position: u64,
}

/// Catalog lookups used by the schema introspector and the AI context cache
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Databases visible to the connection, ordered by name
    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, DatabaseError>;

    /// Storage engine of a database, `None` when the database is unknown
    async fn database_engine(&self, database: &str) -> Result<Option<String>, DatabaseError>;

    /// Tables of a database, ordered by name
    async fn list_tables(&self, database: &str) -> Result<Vec<TableSummary>, DatabaseError>;

    /// Columns of one table, or of every table of the database when `table` is `None`
    async fn list_columns(
        &self,
        database: &str,
        table: Option<&str>,
    ) -> Result<Vec<CatalogColumn>, DatabaseError>;

    /// `SHOW CREATE TABLE` text
    async fn show_create_table(&self, database: &str, table: &str)
    -> Result<String, DatabaseError>;
}

/// Client bound to one ClickHouse connection
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Run a statement and return its tabular result (empty for DDL)
    async fn execute_query(
        &self,
        sql: &str,
        database: Option<&str>,
    ) -> Result<QueryResult, DatabaseError>;

    /// Run a statement whose result is discarded
    async fn execute_command(&self, sql: &str, database: Option<&str>)
    -> Result<(), DatabaseError>;

    /// Check credentials and reachability with `SELECT 1`
    async fn ping(&self) -> Result<(), DatabaseError>;

    fn get_connection(&self) -> &ConnectionConfig;

    fn get_metadata_provider(&self) -> &dyn MetadataProvider;
}

/// Builds clients for connection descriptors
pub trait ClientFactory: Send + Sync {
    fn connect(&self, connection: &ConnectionConfig)
    -> Result<Arc<dyn DatabaseClient>, DatabaseError>;
}
