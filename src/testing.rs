//! In-memory database doubles shared by the unit and HTTP tests

use crate::connections::ConnectionConfig;
use crate::database::{
    CatalogColumn, ClientFactory, DatabaseClient, DatabaseError, DatabaseSummary,
    MetadataProvider, QueryResult, TableSummary,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub fn test_connection(id: &str, url: &str) -> ConnectionConfig {
    ConnectionConfig {
        id: id.to_string(),
        name: id.to_string(),
        url: url.to_string(),
        username: "default".to_string(),
        password: Some("pw".to_string()),
        database: None,
    }
}

#[derive(Default)]
pub struct FakeMetadata {
    databases: Vec<DatabaseSummary>,
    tables: HashMap<String, Vec<TableSummary>>,
    columns: Vec<(String, CatalogColumn)>,
    create_statements: HashMap<String, String>,
    fail_catalog: bool,
}

impl FakeMetadata {
    fn check(&self) -> Result<(), DatabaseError> {
        if self.fail_catalog {
            return Err(DatabaseError::MetadataError("catalog unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataProvider for FakeMetadata {
    async fn list_databases(&self) -> Result<Vec<DatabaseSummary>, DatabaseError> {
        self.check()?;
        Ok(self.databases.clone())
    }

    async fn database_engine(&self, database: &str) -> Result<Option<String>, DatabaseError> {
        self.check()?;
        Ok(self
            .databases
            .iter()
            .find(|d| d.name == database)
            .map(|d| d.engine.clone()))
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<TableSummary>, DatabaseError> {
        self.check()?;
        Ok(self.tables.get(database).cloned().unwrap_or_default())
    }

    async fn list_columns(
        &self,
        database: &str,
        table: Option<&str>,
    ) -> Result<Vec<CatalogColumn>, DatabaseError> {
        self.check()?;
        Ok(self
            .columns
            .iter()
            .filter(|(db, c)| db == database && table.is_none_or(|t| c.table == t))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn show_create_table(
        &self,
        database: &str,
        table: &str,
    ) -> Result<String, DatabaseError> {
        self.create_statements
            .get(table)
            .cloned()
            .ok_or_else(|| DatabaseError::Server {
                code: 60,
                message: format!("Table {database}.{table} does not exist"),
            })
    }
}

/// Records every statement and answers from canned results
pub struct FakeClient {
    connection: ConnectionConfig,
    executed: Mutex<Vec<String>>,
    results: HashMap<String, QueryResult>,
    failures: Vec<(String, Option<u32>, String)>,
    metadata: FakeMetadata,
    reachable: bool,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            connection: test_connection("default", "http://localhost:8123"),
            executed: Mutex::new(Vec::new()),
            results: HashMap::new(),
            failures: Vec::new(),
            metadata: FakeMetadata::default(),
            reachable: true,
        }
    }

    pub fn with_result(mut self, sql: &str, result: QueryResult) -> Self {
        self.results.insert(sql.to_string(), result);
        self
    }

    /// Fail every statement containing `pattern`
    pub fn fail_on(mut self, pattern: &str, code: Option<u32>, message: &str) -> Self {
        self.failures
            .push((pattern.to_string(), code, message.to_string()));
        self
    }

    pub fn with_database(mut self, name: &str, engine: &str) -> Self {
        self.metadata.databases.push(DatabaseSummary {
            name: name.to_string(),
            engine: engine.to_string(),
        });
        self
    }

    pub fn with_table(mut self, database: &str, name: &str, engine: &str) -> Self {
        self.metadata
            .tables
            .entry(database.to_string())
            .or_default()
            .push(TableSummary {
                name: name.to_string(),
                engine: engine.to_string(),
                total_rows: Some(0),
                total_bytes: Some(0),
            });
        self
    }

    pub fn with_column(
        mut self,
        database: &str,
        table: &str,
        name: &str,
        data_type: &str,
        primary: bool,
    ) -> Self {
        let position = self
            .metadata
            .columns
            .iter()
            .filter(|(db, c)| db == database && c.table == table)
            .count() as u64
            + 1;
        self.metadata.columns.push((
            database.to_string(),
            CatalogColumn {
                table: table.to_string(),
                name: name.to_string(),
                data_type: data_type.to_string(),
                default_kind: String::new(),
                default_expression: String::new(),
                is_in_primary_key: primary,
                position,
            },
        ));
        self
    }

    pub fn with_create_table(mut self, table: &str, ddl: &str) -> Self {
        self.metadata
            .create_statements
            .insert(table.to_string(), ddl.to_string());
        self
    }

    pub fn failing_catalog(mut self) -> Self {
        self.metadata.fail_catalog = true;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Statements seen so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn record(&self, sql: &str) -> Result<(), DatabaseError> {
        self.executed.lock().unwrap().push(sql.to_string());
        if !self.reachable {
            return Err(DatabaseError::ConnectionError(
                "connection refused".to_string(),
            ));
        }
        match self.failures.iter().find(|(p, _, _)| sql.contains(p.as_str())) {
            Some((_, code, message)) => Err(DatabaseError::from_exception(*code, message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DatabaseClient for FakeClient {
    async fn execute_query(
        &self,
        sql: &str,
        _database: Option<&str>,
    ) -> Result<QueryResult, DatabaseError> {
        self.record(sql)?;
        Ok(self.results.get(sql).cloned().unwrap_or_default())
    }

    async fn execute_command(
        &self,
        sql: &str,
        _database: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.record(sql)
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        if self.reachable {
            Ok(())
        } else {
            Err(DatabaseError::ConnectionError(
                "connection refused".to_string(),
            ))
        }
    }

    fn get_connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    fn get_metadata_provider(&self) -> &dyn MetadataProvider {
        &self.metadata
    }
}

/// Hands out fake clients by server URL, falling back to a default one
pub struct FakeFactory {
    default_client: Arc<FakeClient>,
    by_url: HashMap<String, Arc<FakeClient>>,
    requested: Mutex<Vec<ConnectionConfig>>,
}

impl FakeFactory {
    pub fn new(default_client: FakeClient) -> Self {
        Self {
            default_client: Arc::new(default_client),
            by_url: HashMap::new(),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_server(mut self, url: &str, client: FakeClient) -> Self {
        self.by_url.insert(url.to_string(), Arc::new(client));
        self
    }

    pub fn default_client(&self) -> Arc<FakeClient> {
        self.default_client.clone()
    }

    pub fn client(&self, url: &str) -> Arc<FakeClient> {
        self.by_url
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.default_client.clone())
    }

    /// Connections passed to `connect`, in order
    pub fn requested(&self) -> Vec<ConnectionConfig> {
        self.requested.lock().unwrap().clone()
    }
}

impl ClientFactory for FakeFactory {
    fn connect(
        &self,
        connection: &ConnectionConfig,
    ) -> Result<Arc<dyn DatabaseClient>, DatabaseError> {
        self.requested.lock().unwrap().push(connection.clone());
        Ok(self.client(&connection.url) as Arc<dyn DatabaseClient>)
    }
}
