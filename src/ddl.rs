//! Table and database management operations
//!
//! Each operation checks its required fields, builds its statements with
//! [`crate::sql`] and runs them in order through the [`Gateway`]. The first
//! failing statement aborts the operation; nothing is rolled back.

use crate::connections::ConnectionConfig;
use crate::error::{OwlError, OwlResult};
use crate::gateway::Gateway;
use crate::sql::{self, AlterAction, ColumnSpec, CreateTable};
use serde::Deserialize;
use tracing::info;

fn default_engine() -> String {
    "MergeTree".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

impl From<ColumnRequest> for ColumnSpec {
    fn from(column: ColumnRequest) -> Self {
        ColumnSpec {
            name: column.name,
            data_type: column.data_type,
            nullable: column.nullable,
            default: column.default,
            primary_key: column.primary_key,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableRequest {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub columns: Vec<ColumnRequest>,
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default)]
    pub partition_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AlterActionRequest {
    AddColumn {
        name: String,
        #[serde(rename = "type")]
        data_type: String,
        #[serde(default)]
        nullable: bool,
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        after: Option<String>,
    },
    DropColumn {
        name: String,
    },
    ModifyColumn {
        name: String,
        #[serde(rename = "type")]
        data_type: String,
    },
    RenameColumn {
        from: String,
        to: String,
    },
    CommentColumn {
        name: String,
        comment: String,
    },
}

impl From<AlterActionRequest> for AlterAction {
    fn from(action: AlterActionRequest) -> Self {
        match action {
            AlterActionRequest::AddColumn {
                name,
                data_type,
                nullable,
                default,
                after,
            } => AlterAction::AddColumn {
                column: ColumnSpec {
                    nullable,
                    default,
                    ..ColumnSpec::new(name, data_type)
                },
                after,
            },
            AlterActionRequest::DropColumn { name } => AlterAction::DropColumn { name },
            AlterActionRequest::ModifyColumn { name, data_type } => {
                AlterAction::ModifyColumn { name, data_type }
            }
            AlterActionRequest::RenameColumn { from, to } => AlterAction::RenameColumn { from, to },
            AlterActionRequest::CommentColumn { name, comment } => {
                AlterAction::CommentColumn { name, comment }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterTableRequest {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub actions: Vec<AlterActionRequest>,
}

/// Request naming one existing table
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRequest {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameTableRequest {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub new_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateTableRequest {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub new_name: String,
    #[serde(default)]
    pub copy_data: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDatabaseRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub engine: Option<String>,
}

/// Stateless DDL operations bound to one connection
pub struct DdlOrchestrator<'a> {
    gateway: &'a Gateway,
    connection: &'a ConnectionConfig,
}

impl<'a> DdlOrchestrator<'a> {
    pub fn new(gateway: &'a Gateway, connection: &'a ConnectionConfig) -> Self {
        Self {
            gateway,
            connection,
        }
    }

    async fn run(&self, sql: &str, database: &str) -> OwlResult<()> {
        self.gateway
            .run_command(self.connection, sql, Some(database))
            .await
    }

    pub async fn create_table(&self, request: CreateTableRequest) -> OwlResult<String> {
        OwlError::require(&request.database, "database")?;
        OwlError::require(&request.name, "name")?;

        let statement = CreateTable {
            database: request.database,
            name: request.name,
            engine: request.engine,
            columns: request.columns.into_iter().map(ColumnSpec::from).collect(),
            order_by: request.order_by,
            partition_by: request.partition_by,
        };
        let sql = statement.to_sql()?;
        self.run(&sql, &statement.database).await?;

        info!("Created table {}.{}", statement.database, statement.name);
        Ok(format!(
            "Table {}.{} created successfully",
            statement.database, statement.name
        ))
    }

    pub async fn alter_table(&self, request: AlterTableRequest) -> OwlResult<String> {
        let actions: Vec<AlterAction> = request.actions.into_iter().map(AlterAction::from).collect();
        let sql = sql::alter_table(&request.database, &request.table, &actions)?;
        self.run(&sql, &request.database).await?;
        Ok(format!(
            "Table {}.{} altered successfully",
            request.database, request.table
        ))
    }

    pub async fn rename_table(&self, request: RenameTableRequest) -> OwlResult<String> {
        let sql = sql::rename_table(&request.database, &request.table, &request.new_name)?;
        self.run(&sql, &request.database).await?;
        Ok(format!(
            "Table {}.{} renamed to {}",
            request.database, request.table, request.new_name
        ))
    }

    pub async fn drop_table(&self, request: TableRequest) -> OwlResult<String> {
        let sql = sql::drop_table(&request.database, &request.table)?;
        self.run(&sql, &request.database).await?;
        info!("Dropped table {}.{}", request.database, request.table);
        Ok(format!(
            "Table {}.{} dropped successfully",
            request.database, request.table
        ))
    }

    pub async fn truncate_table(&self, request: TableRequest) -> OwlResult<String> {
        let sql = sql::truncate_table(&request.database, &request.table)?;
        self.run(&sql, &request.database).await?;
        Ok(format!(
            "Table {}.{} truncated successfully",
            request.database, request.table
        ))
    }

    /// Copy the structure, then optionally the rows; a failed copy keeps the new table
    pub async fn duplicate_table(&self, request: DuplicateTableRequest) -> OwlResult<String> {
        let create = sql::create_table_like(&request.database, &request.table, &request.new_name)?;
        let copy = sql::copy_rows(&request.database, &request.table, &request.new_name)?;

        self.run(&create, &request.database).await?;
        if request.copy_data {
            self.run(&copy, &request.database)
                .await
                .map_err(|e| match e {
                    OwlError::Syntax { message, .. } | OwlError::Query { message, .. } => {
                        OwlError::Query {
                            code: None,
                            message: format!("Table created but failed to copy data: {message}"),
                        }
                    }
                    other => OwlError::Query {
                        code: None,
                        message: format!("Table created but failed to copy data: {other}"),
                    },
                })?;
        }

        Ok(format!(
            "Table {}.{} duplicated to {}{}",
            request.database,
            request.table,
            request.new_name,
            if request.copy_data { " with data" } else { "" }
        ))
    }

    pub async fn create_database(&self, request: CreateDatabaseRequest) -> OwlResult<String> {
        let sql = sql::create_database(&request.name, request.engine.as_deref())?;
        self.run(&sql, "default").await?;
        info!("Created database {}", request.name);
        Ok(format!("Database {} created successfully", request.name))
    }

    pub async fn drop_database(&self, name: &str) -> OwlResult<String> {
        let sql = sql::drop_database(name, false)?;
        self.run(&sql, "default").await?;
        info!("Dropped database {}", name);
        Ok(format!("Database {name} dropped successfully"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClient, FakeFactory, test_connection};
    use serde_json::json;
    use std::sync::Arc;

    fn setup(client: FakeClient) -> (Gateway, Arc<FakeFactory>, ConnectionConfig) {
        let factory = Arc::new(FakeFactory::new(client));
        let connection = test_connection("default", "http://localhost:8123");
        (
            Gateway::new(factory.clone(), connection.clone()),
            factory,
            connection,
        )
    }

    fn create_request(value: serde_json::Value) -> CreateTableRequest {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_create_table_without_order_by() {
        let (gateway, factory, conn) = setup(FakeClient::new());
        let ddl = DdlOrchestrator::new(&gateway, &conn);

        ddl.create_table(create_request(json!({
            "database": "shop",
            "name": "events",
            "engine": "MergeTree",
            "columns": [{"name": "id", "type": "UInt64"}]
        })))
        .await
        .unwrap();

        assert_eq!(
            factory.default_client().executed(),
            vec!["CREATE TABLE shop.events (id UInt64) ENGINE = MergeTree ORDER BY tuple()"]
        );
    }

    #[tokio::test]
    async fn test_create_table_with_order_by() {
        let (gateway, factory, conn) = setup(FakeClient::new());
        let ddl = DdlOrchestrator::new(&gateway, &conn);

        ddl.create_table(create_request(json!({
            "database": "shop",
            "name": "events",
            "columns": [{"name": "id", "type": "UInt64"}],
            "orderBy": ["id"]
        })))
        .await
        .unwrap();

        assert!(factory.default_client().executed()[0].ends_with("ORDER BY (id)"));
    }

    #[tokio::test]
    async fn test_create_table_requires_name() {
        let (gateway, factory, conn) = setup(FakeClient::new());
        let ddl = DdlOrchestrator::new(&gateway, &conn);

        let err = ddl
            .create_table(create_request(json!({"database": "shop", "columns": []})))
            .await
            .unwrap_err();
        assert!(matches!(err, OwlError::Validation(_)));
        assert!(factory.default_client().executed().is_empty());
    }

    #[tokio::test]
    async fn test_alter_table_actions() {
        let (gateway, factory, conn) = setup(FakeClient::new());
        let ddl = DdlOrchestrator::new(&gateway, &conn);

        let request: AlterTableRequest = serde_json::from_value(json!({
            "database": "shop",
            "table": "users",
            "actions": [
                {"action": "addColumn", "name": "age", "type": "UInt8", "after": "id"},
                {"action": "dropColumn", "name": "legacy"}
            ]
        }))
        .unwrap();
        ddl.alter_table(request).await.unwrap();

        assert_eq!(
            factory.default_client().executed(),
            vec!["ALTER TABLE shop.users ADD COLUMN age UInt8 AFTER id, DROP COLUMN legacy"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_without_data_leaves_source_alone() {
        let (gateway, factory, conn) = setup(FakeClient::new());
        let ddl = DdlOrchestrator::new(&gateway, &conn);

        ddl.duplicate_table(DuplicateTableRequest {
            database: "shop".into(),
            table: "orders".into(),
            new_name: "orders_copy".into(),
            copy_data: false,
        })
        .await
        .unwrap();

        assert_eq!(
            factory.default_client().executed(),
            vec!["CREATE TABLE shop.orders_copy AS shop.orders"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_copy_failure_keeps_table() {
        let (gateway, factory, conn) =
            setup(FakeClient::new().fail_on("INSERT INTO", Some(241), "Memory limit exceeded"));
        let ddl = DdlOrchestrator::new(&gateway, &conn);

        let err = ddl
            .duplicate_table(DuplicateTableRequest {
                database: "shop".into(),
                table: "orders".into(),
                new_name: "orders_copy".into(),
                copy_data: true,
            })
            .await
            .unwrap_err();

        assert!(err
            .to_string()
            .starts_with("Table created but failed to copy data: Memory limit exceeded"));
        let executed = factory.default_client().executed();
        assert_eq!(executed.len(), 2);
        assert!(!executed.iter().any(|s| s.starts_with("DROP")));
    }

    #[tokio::test]
    async fn test_simple_table_operations() {
        let (gateway, factory, conn) = setup(FakeClient::new());
        let ddl = DdlOrchestrator::new(&gateway, &conn);
        let target = || TableRequest {
            database: "shop".into(),
            table: "orders".into(),
        };

        ddl.truncate_table(target()).await.unwrap();
        ddl.drop_table(target()).await.unwrap();
        ddl.rename_table(RenameTableRequest {
            database: "shop".into(),
            table: "a".into(),
            new_name: "b".into(),
        })
        .await
        .unwrap();
        ddl.create_database(CreateDatabaseRequest {
            name: "staging".into(),
            engine: None,
        })
        .await
        .unwrap();
        ddl.drop_database("staging").await.unwrap();

        assert_eq!(
            factory.default_client().executed(),
            vec![
                "TRUNCATE TABLE shop.orders",
                "DROP TABLE shop.orders",
                "RENAME TABLE shop.a TO shop.b",
                "CREATE DATABASE staging",
                "DROP DATABASE staging",
            ]
        );
    }
}
