//! PostgreSQL/MySQL federation through ClickHouse database and table engines

use crate::connections::{ConnectionConfig, DataSource};
use crate::error::{OwlError, OwlResult};
use crate::gateway::Gateway;
use crate::sql;
use serde::Deserialize;
use tracing::info;

/// How an external table is brought into ClickHouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Table engine reading the remote table on every query
    #[default]
    Link,
    /// One-off copy into a local MergeTree table
    Copy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectDataSourceRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source: Option<DataSource>,
    /// Saved data source to use instead of an inline `source`
    #[serde(default)]
    pub datasource_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportTableRequest {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub name: String,
    pub source: DataSource,
    #[serde(default)]
    pub source_table: String,
    #[serde(default)]
    pub source_schema: Option<String>,
    #[serde(default)]
    pub mode: ImportMode,
    #[serde(default)]
    pub order_by: Vec<String>,
}

/// Replace `name` with a federated database pointing at `source`
///
/// Any existing database of that name is dropped first, so connecting twice
/// with the same name is safe.
pub async fn connect_datasource(
    gateway: &Gateway,
    connection: &ConnectionConfig,
    name: &str,
    source: &DataSource,
) -> OwlResult<String> {
    source.validate()?;
    let engine = sql::federated_database_engine(source);
    let drop = sql::drop_database(name, true)?;
    let create = sql::create_database(name, Some(&engine))?;

    gateway
        .run_command(connection, &drop, Some("default"))
        .await?;
    gateway
        .run_command(connection, &create, Some("default"))
        .await?;

    info!(
        "Connected {} database {} to {}/{}",
        source.engine,
        name,
        source.address(),
        source.database
    );
    Ok(format!(
        "Database {name} connected to {} source {}",
        source.engine, source.database
    ))
}

/// Create a table from an external source, linked or copied per `mode`
pub async fn import_table(
    gateway: &Gateway,
    connection: &ConnectionConfig,
    request: ImportTableRequest,
) -> OwlResult<String> {
    request.source.validate()?;
    OwlError::require(&request.source_table, "sourceTable")?;

    let mut source = request.source;
    if let Some(schema) = request.source_schema.filter(|s| !s.trim().is_empty()) {
        source.schema = Some(schema);
    }

    let sql = match request.mode {
        ImportMode::Link => {
            sql::linked_table(&request.database, &request.name, &source, &request.source_table)?
        }
        ImportMode::Copy => sql::copied_table(
            &request.database,
            &request.name,
            &source,
            &request.source_table,
            &request.order_by,
        )?,
    };
    gateway
        .run_command(connection, &sql, Some(&request.database))
        .await?;

    Ok(match request.mode {
        ImportMode::Link => format!(
            "Table {}.{} linked to {}",
            request.database, request.name, request.source_table
        ),
        ImportMode::Copy => format!(
            "Table {}.{} created from {}",
            request.database, request.name, request.source_table
        ),
    })
}
