//! Query gateway between the HTTP handlers and ClickHouse
//!
//! Picks the effective connection for a request and runs statements through a
//! [`ClientFactory`]. Ad-hoc queries report failures inline in the
//! [`QueryResult`]; statements issued by the DDL orchestrators return a
//! [`Result`] so callers can stop at the first failure.

use crate::connections::ConnectionConfig;
use crate::database::{ClientFactory, DatabaseClient, QueryResult};
use crate::error::{OwlError, OwlResult};
use crate::password_sanitizer::sanitize_connection_url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Plan viewer modes of `EXPLAIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExplainKind {
    #[default]
    Plan,
    Pipeline,
    Syntax,
    Ast,
}

impl fmt::Display for ExplainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExplainKind::Plan => "PLAN",
            ExplainKind::Pipeline => "PIPELINE",
            ExplainKind::Syntax => "SYNTAX",
            ExplainKind::Ast => "AST",
        })
    }
}

pub struct Gateway {
    factory: Arc<dyn ClientFactory>,
    default_connection: ConnectionConfig,
}

impl Gateway {
    pub fn new(factory: Arc<dyn ClientFactory>, default_connection: ConnectionConfig) -> Self {
        Self {
            factory,
            default_connection,
        }
    }

    /// Connection built from `CLICKHOUSE_*` settings
    pub fn default_connection(&self) -> &ConnectionConfig {
        &self.default_connection
    }

    /// `requested ?? session ?? environment defaults`
    pub fn effective_connection(
        &self,
        requested: Option<&ConnectionConfig>,
        session: Option<&ConnectionConfig>,
    ) -> ConnectionConfig {
        requested
            .filter(|c| !c.url.trim().is_empty())
            .or(session)
            .unwrap_or(&self.default_connection)
            .clone()
    }

    pub fn client_for(&self, connection: &ConnectionConfig) -> OwlResult<Arc<dyn DatabaseClient>> {
        Ok(self.factory.connect(connection)?)
    }

    /// Check that the server is reachable with the connection's credentials
    pub async fn ping(&self, connection: &ConnectionConfig) -> OwlResult<()> {
        debug!(
            "[Gateway::ping] Checking {}",
            sanitize_connection_url(&connection.url)
        );
        self.client_for(connection)?.ping().await?;
        Ok(())
    }

    /// Run an ad-hoc statement; failures come back in `QueryResult::error`
    pub async fn execute(
        &self,
        connection: &ConnectionConfig,
        sql: &str,
        database: Option<&str>,
    ) -> QueryResult {
        match self.run_query(connection, sql, database).await {
            Ok(result) => result,
            Err(e) => {
                debug!("[Gateway::execute] Query failed: {}", e);
                QueryResult::failed(e.to_string())
            }
        }
    }

    /// Run `EXPLAIN <kind> <sql>` with the inline error shape
    pub async fn explain(
        &self,
        connection: &ConnectionConfig,
        kind: ExplainKind,
        sql: &str,
        database: Option<&str>,
    ) -> QueryResult {
        let sql = sql.trim();
        if sql.is_empty() {
            return QueryResult::failed("Query is required");
        }
        self.execute(connection, &format!("EXPLAIN {kind} {sql}"), database)
            .await
    }

    /// Run a statement and return its rows
    pub async fn run_query(
        &self,
        connection: &ConnectionConfig,
        sql: &str,
        database: Option<&str>,
    ) -> OwlResult<QueryResult> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(OwlError::validation("Query is required"));
        }
        let client = self.client_for(connection)?;
        Ok(client.execute_query(sql, database).await?)
    }

    /// Run one DDL/DML statement; a statement with no result rows is a success
    pub async fn run_command(
        &self,
        connection: &ConnectionConfig,
        sql: &str,
        database: Option<&str>,
    ) -> OwlResult<()> {
        let client = self.client_for(connection)?;
        client.execute_command(sql, database).await.map_err(|e| {
            warn!("[Gateway::run_command] Statement failed: {}", e);
            e.into()
        })
    }
}
