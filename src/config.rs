use crate::ai_sql::AiSqlConfig;
use crate::cli::Args;
use crate::connections::ConnectionConfig;
use crate::error::{OwlError, OwlResult};
use crate::password_sanitizer::sanitize_connection_url;
use dirs::home_dir;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Id given to the connection built from `CLICKHOUSE_*` settings
pub const DEFAULT_CONNECTION_ID: &str = "default";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    #[serde(rename = "trace")]
    Trace,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub file_output: bool,
    #[serde(default = "default_log_file_path")]
    pub file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            file_output: false,
            file_path: default_log_file_path(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Saved connections and data sources live here
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Browser origins allowed to call the API with credentials
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            data_dir: None,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct ClickHouseConfig {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_clickhouse_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        ClickHouseConfig {
            url: default_clickhouse_url(),
            user: default_clickhouse_user(),
            password: String::new(),
            database: None,
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl std::fmt::Debug for ClickHouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConfig")
            .field("url", &sanitize_connection_url(&self.url))
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .finish()
    }
}

/// Fixed console credentials; when unset, logins are checked against ClickHouse
#[derive(Serialize, Deserialize, Default, Clone)]
pub struct DashboardConfig {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DashboardConfig {
    /// Both credentials, when both are set and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user, password))
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for DashboardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub secure_cookie: bool,
    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            secret: None,
            secure_cookie: false,
            idle_minutes: default_idle_minutes(),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("secure_cookie", &self.secure_cookie)
            .field("idle_minutes", &self.idle_minutes)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: None,
            max_entries: default_cache_max_entries(),
            max_age_hours: default_cache_max_age_hours(),
            sample_rows: default_sample_rows(),
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours.saturating_mul(3600))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ai: AiSqlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

fn default_query_timeout() -> u64 {
    300
}

fn default_idle_minutes() -> i64 {
    8 * 60
}

fn default_cache_max_entries() -> usize {
    500
}

fn default_cache_max_age_hours() -> u64 {
    168
}

fn default_sample_rows() -> usize {
    100
}

fn default_log_file_path() -> String {
    get_config_dir_impl()
        .map(|dir| dir.join("owl.log").to_string_lossy().into_owned())
        .unwrap_or_else(|| "owl.log".to_string())
}

fn get_config_dir_impl() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".config").join("owl"))
}

impl Config {
    /// `~/.config/owl`
    pub fn get_config_dir() -> Option<PathBuf> {
        get_config_dir_impl()
    }

    pub fn default_config_path() -> Option<PathBuf> {
        Self::get_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Read a TOML file; a missing default file yields the defaults
    pub fn load(path: Option<&Path>) -> OwlResult<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Config::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(OwlError::Config(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| OwlError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Full resolution: file, then environment, then command-line flags
    pub fn resolve(args: &Args) -> OwlResult<Self> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply_env(|name| std::env::var(name).ok());
        config.apply_args(args);
        config.ai.validate().map_err(OwlError::Config)?;
        Ok(config)
    }

    /// Override settings from environment variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(url) = get("CLICKHOUSE_URL") {
            self.clickhouse.url = url;
        }
        if let Some(user) = get("CLICKHOUSE_USER") {
            self.clickhouse.user = user;
        }
        if let Some(password) = get("CLICKHOUSE_PASSWORD") {
            self.clickhouse.password = password;
        }
        if let Some(database) = get("CLICKHOUSE_DATABASE") {
            self.clickhouse.database = Some(database);
        }
        if let Some(user) = get("DASHBOARD_USER") {
            self.dashboard.user = Some(user);
        }
        if let Some(password) = get("DASHBOARD_PASSWORD") {
            self.dashboard.password = Some(password);
        }
        if let Some(secret) = get("SESSION_SECRET") {
            self.session.secret = Some(secret);
        }
        if let Some(bind) = get("OWL_BIND") {
            self.server.bind = bind;
        }
        if let Some(dir) = get("OWL_DATA_DIR") {
            self.server.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get("OWL_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = get("OWL_LOG") {
            match parse_log_level(&level) {
                Some(level) => self.logging.level = level,
                None => warn!("Ignoring unknown OWL_LOG level '{}'", level),
            }
        }
        self.ai.apply_env(&lookup);
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(bind) = &args.bind {
            self.server.bind = bind.clone();
        }
        if let Some(url) = &args.clickhouse_url {
            self.clickhouse.url = url.clone();
        }
        if let Some(dir) = &args.data_dir {
            self.server.data_dir = Some(dir.clone());
        }
        if let Some(dir) = &args.cache_dir {
            self.cache.dir = Some(dir.clone());
        }
        if let Some(level) = args.log_level {
            self.logging.level = level;
        }
    }

    /// Make sure a session secret exists, returning true when one was generated
    pub fn ensure_session_secret(&mut self) -> bool {
        if self.session.secret.as_deref().is_some_and(|s| !s.is_empty()) {
            return false;
        }
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        self.session.secret = Some(hex::encode(bytes));
        warn!("SESSION_SECRET is not set; sessions and saved passwords will not survive a restart");
        true
    }

    pub fn session_secret(&self) -> &str {
        self.session.secret.as_deref().unwrap_or_default()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.server.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join("owl"))
                .unwrap_or_else(|| PathBuf::from("data"))
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("cache"))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.clickhouse.query_timeout_secs)
    }

    /// Connection used when neither the request nor the session names one
    pub fn default_connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            id: DEFAULT_CONNECTION_ID.to_string(),
            name: "Default".to_string(),
            url: self.clickhouse.url.clone(),
            username: self.clickhouse.user.clone(),
            password: Some(self.clickhouse.password.clone()).filter(|p| !p.is_empty()),
            database: self.clickhouse.database.clone(),
        }
    }

    pub fn to_toml(&self) -> OwlResult<String> {
        toml::to_string_pretty(self).map_err(|e| OwlError::Config(e.to_string()))
    }
}

pub fn parse_log_level(value: &str) -> Option<LogLevel> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}
