//! Schema introspection over the ClickHouse system catalog

use crate::database::{CatalogColumn, DatabaseClient, DatabaseSummary, TableSummary};
use crate::error::{OwlError, OwlResult};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// How a database is backed, derived from its engine in `system.databases`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatabaseFlavor {
    Native,
    PostgreSQL,
    MySQL,
}

impl DatabaseFlavor {
    pub fn from_engine(engine: &str) -> Self {
        match engine {
            "PostgreSQL" | "MaterializedPostgreSQL" => DatabaseFlavor::PostgreSQL,
            "MySQL" | "MaterializedMySQL" => DatabaseFlavor::MySQL,
            _ => DatabaseFlavor::Native,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub primary_key: bool,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl From<CatalogColumn> for ColumnDefinition {
    fn from(column: CatalogColumn) -> Self {
        let nullable = column.data_type.starts_with("Nullable(");
        let default = Some(column.default_expression).filter(|d| !d.is_empty());
        Self {
            name: column.name,
            data_type: column.data_type,
            primary_key: column.is_in_primary_key,
            nullable,
            default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub name: String,
    /// Database the table belongs to
    pub schema: String,
    pub engine: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

impl TableDefinition {
    fn new(database: &str, table: TableSummary, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: table.name,
            schema: database.to_string(),
            engine: table.engine,
            columns,
            total_rows: table.total_rows,
            total_bytes: table.total_bytes,
        }
    }
}

/// Full listing of one database
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSchema {
    pub database: String,
    pub flavor: DatabaseFlavor,
    pub tables: Vec<TableDefinition>,
}

pub struct SchemaIntrospector<'a> {
    client: &'a dyn DatabaseClient,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(client: &'a dyn DatabaseClient) -> Self {
        Self { client }
    }

    pub async fn list_databases(&self) -> OwlResult<Vec<DatabaseSummary>> {
        Ok(self.client.get_metadata_provider().list_databases().await?)
    }

    /// Falls back to [`DatabaseFlavor::Native`] when the engine cannot be read
    pub async fn flavor(&self, database: &str) -> DatabaseFlavor {
        match self
            .client
            .get_metadata_provider()
            .database_engine(database)
            .await
        {
            Ok(Some(engine)) => DatabaseFlavor::from_engine(&engine),
            Ok(None) => DatabaseFlavor::Native,
            Err(e) => {
                warn!(
                    "[SchemaIntrospector::flavor] Could not read engine of {}: {}",
                    database, e
                );
                DatabaseFlavor::Native
            }
        }
    }

    /// Every table of a database with its columns, using one tables query and one columns query
    pub async fn list_tables(&self, database: &str) -> OwlResult<DatabaseSchema> {
        let flavor = self.flavor(database).await;
        debug!(
            "[SchemaIntrospector::list_tables] Listing {} ({:?})",
            database, flavor
        );

        let metadata = self.client.get_metadata_provider();
        let tables = metadata.list_tables(database).await?;
        let columns = metadata.list_columns(database, None).await?;

        let mut by_table: HashMap<String, Vec<ColumnDefinition>> = HashMap::new();
        for column in columns {
            by_table
                .entry(column.table.clone())
                .or_default()
                .push(column.into());
        }

        let tables = tables
            .into_iter()
            .map(|table| {
                let columns = by_table.remove(&table.name).unwrap_or_default();
                TableDefinition::new(database, table, columns)
            })
            .collect();

        Ok(DatabaseSchema {
            database: database.to_string(),
            flavor,
            tables,
        })
    }

    pub async fn describe_table(&self, database: &str, table: &str) -> OwlResult<TableDefinition> {
        let metadata = self.client.get_metadata_provider();
        let summary = metadata
            .list_tables(database)
            .await?
            .into_iter()
            .find(|t| t.name == table)
            .ok_or_else(|| OwlError::NotFound(format!("Table {database}.{table} not found")))?;

        let columns = metadata
            .list_columns(database, Some(table))
            .await?
            .into_iter()
            .map(ColumnDefinition::from)
            .collect();

        Ok(TableDefinition::new(database, summary, columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClient;

    fn shop() -> FakeClient {
        FakeClient::new()
            .with_database("shop", "Atomic")
            .with_database("pg", "PostgreSQL")
            .with_table("shop", "orders", "MergeTree")
            .with_table("shop", "users", "MergeTree")
            .with_column("shop", "orders", "id", "UInt64", true)
            .with_column("shop", "orders", "note", "Nullable(String)", false)
            .with_column("shop", "users", "id", "UInt64", true)
    }

    #[tokio::test]
    async fn test_list_tables_groups_columns() {
        let client = shop();
        let schema = SchemaIntrospector::new(&client).list_tables("shop").await.unwrap();

        assert_eq!(schema.flavor, DatabaseFlavor::Native);
        assert_eq!(schema.tables.len(), 2);
        let orders = &schema.tables[0];
        assert_eq!(orders.name, "orders");
        assert_eq!(orders.schema, "shop");
        assert_eq!(orders.columns.len(), 2);
        assert!(orders.columns[0].primary_key);
        assert!(orders.columns[1].nullable);
        assert_eq!(schema.tables[1].columns.len(), 1);
    }

    #[tokio::test]
    async fn test_flavor_detection() {
        let client = shop();
        let introspector = SchemaIntrospector::new(&client);
        assert_eq!(introspector.flavor("pg").await, DatabaseFlavor::PostgreSQL);
        assert_eq!(introspector.flavor("unknown").await, DatabaseFlavor::Native);

        let broken = FakeClient::new().failing_catalog();
        assert_eq!(
            SchemaIntrospector::new(&broken).flavor("shop").await,
            DatabaseFlavor::Native
        );
    }

    #[tokio::test]
    async fn test_describe_table() {
        let client = shop();
        let introspector = SchemaIntrospector::new(&client);

        let users = introspector.describe_table("shop", "users").await.unwrap();
        assert_eq!(users.columns[0].name, "id");

        let missing = introspector.describe_table("shop", "nope").await;
        assert!(matches!(missing, Err(OwlError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_catalog_failure_propagates() {
        let client = FakeClient::new().failing_catalog();
        let result = SchemaIntrospector::new(&client).list_tables("shop").await;
        assert!(matches!(result, Err(OwlError::Query { .. })));
    }
}
