//! Connection descriptors and the repositories that persist them
//!
//! Saved ClickHouse connections and external (federated) data sources are kept
//! in small JSON files under the data directory. Passwords are encrypted at
//! rest with [`SecretCipher`] and masked whenever records are listed.
use async_trait::async_trait;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{OwlError, OwlResult};
use crate::password_encryption::SecretCipher;
use crate::password_sanitizer::sanitize_connection_url;

/// Placeholder returned instead of stored passwords
pub const MASKED_PASSWORD: &str = "********";

/// A ClickHouse server the console can talk to
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default, alias = "user")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

impl ConnectionConfig {
    /// Database used when a request does not name one
    pub fn default_database(&self) -> &str {
        self.database
            .as_deref()
            .filter(|db| !db.is_empty())
            .unwrap_or("default")
    }

    /// First four characters of the id, used to namespace cache files
    pub fn cache_prefix(&self) -> String {
        connection_prefix(&self.id)
    }

    /// Same server and credentials, ignoring id and display name
    pub fn same_target(&self, other: &ConnectionConfig) -> bool {
        self.url == other.url
            && self.username == other.username
            && self.password == other.password
            && self.database == other.database
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &sanitize_connection_url(&self.url))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| MASKED_PASSWORD))
            .field("database", &self.database)
            .finish()
    }
}

/// Cache namespace derived from a connection id
pub fn connection_prefix(id: &str) -> String {
    let prefix: String = id.chars().take(4).collect();
    if prefix.is_empty() {
        "anon".to_string()
    } else {
        prefix
    }
}

/// Engine of an external database reachable through ClickHouse federation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceEngine {
    #[serde(alias = "postgresql", alias = "postgres", alias = "Postgres")]
    PostgreSQL,
    #[serde(alias = "mysql")]
    MySQL,
}

impl SourceEngine {
    /// Name of the database/table engine in ClickHouse DDL
    pub fn engine_name(&self) -> &'static str {
        match self {
            SourceEngine::PostgreSQL => "PostgreSQL",
            SourceEngine::MySQL => "MySQL",
        }
    }

    /// Name of the matching ClickHouse table function
    pub fn table_function(&self) -> &'static str {
        match self {
            SourceEngine::PostgreSQL => "postgresql",
            SourceEngine::MySQL => "mysql",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            SourceEngine::PostgreSQL => 5432,
            SourceEngine::MySQL => 3306,
        }
    }
}

impl fmt::Display for SourceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.engine_name())
    }
}

/// External PostgreSQL/MySQL database descriptor
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub engine: SourceEngine,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    /// PostgreSQL schema, ignored for MySQL
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub ssl: bool,
}

impl DataSource {
    /// `host:port` address as ClickHouse expects it in engine arguments
    pub fn address(&self) -> String {
        let port = self.port.unwrap_or_else(|| self.engine.default_port());
        format!("{}:{}", self.host, port)
    }

    pub fn validate(&self) -> OwlResult<()> {
        OwlError::require(&self.host, "source.host")?;
        OwlError::require(&self.database, "source.database")?;
        OwlError::require(&self.username, "source.username")?;
        Ok(())
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("address", &self.address())
            .field("username", &self.username)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// A record that can be kept in a [`JsonFileRepository`]
pub trait StoredRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Human-readable kind used in error messages
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn secret(&self) -> Option<&str>;
    fn set_secret(&mut self, secret: Option<String>);

    /// Copy of the record with its password replaced by a mask
    fn masked(&self) -> Self {
        let mut copy = self.clone();
        if copy.secret().is_some_and(|s| !s.is_empty()) {
            copy.set_secret(Some(MASKED_PASSWORD.to_string()));
        }
        copy
    }
}

impl StoredRecord for ConnectionConfig {
    const KIND: &'static str = "connection";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn secret(&self) -> Option<&str> {
        self.password.as_deref()
    }

    fn set_secret(&mut self, secret: Option<String>) {
        self.password = secret;
    }
}

impl StoredRecord for DataSource {
    const KIND: &'static str = "datasource";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn secret(&self) -> Option<&str> {
        Some(self.password.as_str())
    }

    fn set_secret(&mut self, secret: Option<String>) {
        self.password = secret.unwrap_or_default();
    }
}

/// CRUD access to saved records
#[async_trait]
pub trait Repository<T: StoredRecord>: Send + Sync {
    async fn list(&self) -> OwlResult<Vec<T>>;
    async fn get(&self, id: &str) -> OwlResult<Option<T>>;
    /// Store a new record, assigning an id when it has none
    async fn add(&self, record: T) -> OwlResult<T>;
    /// Replace a record; a blank password keeps the stored one
    async fn update(&self, id: &str, record: T) -> OwlResult<T>;
    async fn remove(&self, id: &str) -> OwlResult<bool>;
}

pub type ConnectionRepository = dyn Repository<ConnectionConfig>;
pub type DataSourceRepository = dyn Repository<DataSource>;

/// Random 16-character hexadecimal identifier
pub fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Repository backed by a pretty-printed JSON array on disk
pub struct JsonFileRepository<T> {
    path: PathBuf,
    cipher: SecretCipher,
    lock: Mutex<()>,
    _marker: PhantomData<T>,
}

impl<T: StoredRecord> JsonFileRepository<T> {
    pub fn new(path: impl Into<PathBuf>, cipher: SecretCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> OwlResult<Vec<T>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let mut records: Vec<T> = serde_json::from_slice(&content)?;
        for record in &mut records {
            if let Some(secret) = record.secret().filter(|s| !s.is_empty()) {
                let plain = self.cipher.decrypt(secret)?;
                record.set_secret(Some(plain));
            }
        }
        Ok(records)
    }

    async fn write_all(&self, records: &[T]) -> OwlResult<()> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let mut copy = record.clone();
            if let Some(secret) = copy.secret().filter(|s| !s.is_empty()) {
                let encrypted = self.cipher.encrypt(secret)?;
                copy.set_secret(Some(encrypted));
            }
            stored.push(copy);
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&stored)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            "[JsonFileRepository::write_all] Saved {} {} record(s) to {}",
            stored.len(),
            T::KIND,
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl<T: StoredRecord> Repository<T> for JsonFileRepository<T> {
    async fn list(&self) -> OwlResult<Vec<T>> {
        let _guard = self.lock.lock().await;
        self.read_all().await
    }

    async fn get(&self, id: &str) -> OwlResult<Option<T>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.into_iter().find(|r| r.id() == id))
    }

    async fn add(&self, mut record: T) -> OwlResult<T> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;

        if record.id().trim().is_empty() {
            record.set_id(generate_id());
        }
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(OwlError::Validation(format!(
                "A {} with id '{}' already exists",
                T::KIND,
                record.id()
            )));
        }

        records.push(record.clone());
        self.write_all(&records).await?;
        Ok(record)
    }

    async fn update(&self, id: &str, mut record: T) -> OwlResult<T> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;

        let Some(existing) = records.iter_mut().find(|r| r.id() == id) else {
            return Err(OwlError::NotFound(format!("No {} with id '{id}'", T::KIND)));
        };

        record.set_id(id.to_string());
        let blank = record.secret().is_none_or(|s| s.is_empty() || s == MASKED_PASSWORD);
        if blank {
            record.set_secret(existing.secret().map(str::to_string));
        }
        *existing = record.clone();

        self.write_all(&records).await?;
        Ok(record)
    }

    async fn remove(&self, id: &str) -> OwlResult<bool> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_connection(id: &str) -> ConnectionConfig {
        ConnectionConfig {
            id: id.to_string(),
            name: "Local".to_string(),
            url: "http://localhost:8123".to_string(),
            username: "default".to_string(),
            password: Some("s3cret".to_string()),
            database: Some("analytics".to_string()),
        }
    }

    fn repository(dir: &TempDir) -> JsonFileRepository<ConnectionConfig> {
        JsonFileRepository::new(
            dir.path().join("connections.json"),
            SecretCipher::from_secret("test-secret"),
        )
    }

    #[tokio::test]
    async fn test_add_assigns_id_and_encrypts_at_rest() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);

        let added = repo.add(sample_connection("")).await.unwrap();
        assert_eq!(added.id.len(), 16);

        let raw = std::fs::read_to_string(repo.path()).unwrap();
        assert!(!raw.contains("s3cret"));
        assert!(raw.contains("enc:"));

        let loaded = repo.get(&added.id).await.unwrap().unwrap();
        assert_eq!(loaded.password.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_update_keeps_password_when_blank() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        repo.add(sample_connection("abcd1234")).await.unwrap();

        let mut edited = sample_connection("ignored");
        edited.name = "Renamed".to_string();
        edited.password = None;
        let updated = repo.update("abcd1234", edited).await.unwrap();

        assert_eq!(updated.id, "abcd1234");
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.password.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        let result = repo.update("nope", sample_connection("nope")).await;
        assert!(matches!(result, Err(OwlError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_and_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        let repo = repository(&dir);
        repo.add(sample_connection("one")).await.unwrap();
        assert!(repo.add(sample_connection("one")).await.is_err());

        assert!(repo.remove("one").await.unwrap());
        assert!(!repo.remove("one").await.unwrap());
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_masked_and_debug_hide_password() {
        let conn = sample_connection("x");
        assert_eq!(conn.masked().password.as_deref(), Some(MASKED_PASSWORD));
        assert!(!format!("{conn:?}").contains("s3cret"));
    }

    #[test]
    fn test_cache_prefix() {
        assert_eq!(sample_connection("abcdef").cache_prefix(), "abcd");
        assert_eq!(sample_connection("ab").cache_prefix(), "ab");
        assert_eq!(sample_connection("").cache_prefix(), "anon");
    }

    #[test]
    fn test_source_engine_aliases_and_address() {
        let source: DataSource = serde_json::from_value(serde_json::json!({
            "engine": "postgres",
            "host": "pg.internal",
            "username": "reader",
            "password": "pw",
            "database": "shop"
        }))
        .unwrap();
        assert_eq!(source.engine, SourceEngine::PostgreSQL);
        assert_eq!(source.address(), "pg.internal:5432");
        assert!(source.validate().is_ok());
    }

    #[test]
    fn test_connection_accepts_user_alias() {
        let conn: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "url": "http://ch:8123",
            "user": "admin"
        }))
        .unwrap();
        assert_eq!(conn.username, "admin");
        assert_eq!(conn.default_database(), "default");
    }
}
