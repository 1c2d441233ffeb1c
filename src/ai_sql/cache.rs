//! Flat-file context cache for AI SQL generation
//!
//! Each cached table is two text files in the cache directory:
//! `{prefix}_{database}_{table}_schema.txt` holds the `SHOW CREATE TABLE`
//! output with federation passwords redacted, and
//! `{prefix}_{database}_{table}_data.txt` holds a pipe-delimited sample. The
//! file modification time is the fetch time. Name components are
//! percent-encoded, so `_` only ever separates them. The cache is bounded by
//! entry count and age; concurrent writers for the same table overwrite each
//! other.

use crate::ai_sql::error::{AiError, AiResult};
use crate::database::{DatabaseClient, QueryResult};
use crate::password_sanitizer::redact_engine_credentials;
use crate::sql;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Which half of a cached table a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Schema,
    Data,
}

impl CacheKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            CacheKind::Schema => "schema",
            CacheKind::Data => "data",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "schema" => Some(CacheKind::Schema),
            "data" => Some(CacheKind::Data),
            _ => None,
        }
    }
}

/// One file of the cache as reported by [`AiContextCache::list`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub connection_prefix: String,
    pub database: String,
    pub table: String,
    pub kind: CacheKind,
    pub fetched_at: DateTime<Utc>,
    pub size_bytes: u64,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    modified: SystemTime,
}

/// Cached text handed to the prompt builder
#[derive(Debug, Clone, PartialEq)]
pub struct CachedContext {
    pub database: String,
    pub table: String,
    pub kind: CacheKind,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheFailure {
    pub table: String,
    pub error: String,
}

/// Outcome of caching a batch of tables
#[derive(Debug, Default, Serialize)]
pub struct CacheReport {
    pub cached: Vec<String>,
    pub failed: Vec<CacheFailure>,
}

/// Characters kept verbatim in a file name component; `_` separates components
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-');

/// Percent-encode a name component so it holds no `_` or path separator
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

fn decode_component(value: &str) -> Option<String> {
    let decoded = percent_decode_str(value).decode_utf8().ok()?;
    (!decoded.is_empty()).then(|| decoded.into_owned())
}

pub fn cache_file_name(prefix: &str, database: &str, table: &str, kind: CacheKind) -> String {
    format!(
        "{}_{}_{}_{}.txt",
        encode_component(prefix),
        encode_component(database),
        encode_component(table),
        kind.suffix()
    )
}

/// Render a sample result as a header line followed by one ` | `-joined line per row
pub fn format_sample(result: &QueryResult) -> String {
    let mut lines = Vec::with_capacity(result.rows.len() + 1);
    lines.push(result.columns.join(" | "));
    for row in &result.rows {
        let values: Vec<String> = row
            .iter()
            .map(|value| match value {
                serde_json::Value::Null => "NULL".to_string(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        lines.push(values.join(" | "));
    }
    lines.join("\n")
}

/// Directory-backed cache of table DDL and sample rows
#[derive(Debug, Clone)]
pub struct AiContextCache {
    dir: PathBuf,
    max_entries: usize,
    max_age: Duration,
    sample_rows: usize,
}

impl AiContextCache {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize, max_age: Duration, sample_rows: usize) -> Self {
        Self {
            dir: dir.into(),
            max_entries,
            max_age,
            sample_rows,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_fresh(&self, modified: SystemTime, now: SystemTime) -> bool {
        // Modification times in the future count as fresh
        now.duration_since(modified)
            .map(|age| age <= self.max_age)
            .unwrap_or(true)
    }

    /// Fetch DDL and a sample for one table and write both files
    pub async fn cache_table(
        &self,
        client: &dyn DatabaseClient,
        prefix: &str,
        database: &str,
        table: &str,
    ) -> AiResult<()> {
        let sample_sql = sql::select_sample(database, table, self.sample_rows)
            .map_err(|e| AiError::ValidationError(e.to_string()))?;

        let ddl = client
            .get_metadata_provider()
            .show_create_table(database, table)
            .await?;
        let sample = client.execute_query(&sample_sql, Some(database)).await?;

        self.write_entry(prefix, database, table, CacheKind::Schema, &redact_engine_credentials(&ddl))
            .await?;
        self.write_entry(prefix, database, table, CacheKind::Data, &format_sample(&sample))
            .await?;
        Ok(())
    }

    /// Cache every table, collecting per-table failures instead of aborting
    pub async fn cache_tables(
        &self,
        client: &dyn DatabaseClient,
        prefix: &str,
        database: &str,
        tables: &[String],
    ) -> AiResult<CacheReport> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut report = CacheReport::default();
        for table in tables {
            match self.cache_table(client, prefix, database, table).await {
                Ok(()) => report.cached.push(table.clone()),
                Err(e) => {
                    warn!("Failed to cache context for {}.{}: {}", database, table, e);
                    report.failed.push(CacheFailure {
                        table: table.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.enforce_limits().await {
            warn!("Failed to prune AI context cache: {}", e);
        }

        info!(
            "Cached AI context for {} table(s) of {} ({} failed)",
            report.cached.len(),
            database,
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn write_entry(
        &self,
        prefix: &str,
        database: &str,
        table: &str,
        kind: CacheKind,
        content: &str,
    ) -> AiResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(cache_file_name(prefix, database, table, kind));
        tokio::fs::write(&path, content).await?;
        debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(path)
    }

    /// Cache files, optionally restricted to a connection prefix and a database
    pub async fn list(&self, prefix: Option<&str>, database: Option<&str>) -> AiResult<Vec<CacheEntry>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();

        while let Some(file) = dir.next_entry().await? {
            let name = file.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((conn, db, table, kind)) = parse_file_name(name) else {
                continue;
            };
            if prefix.is_some_and(|p| p != conn) || database.is_some_and(|d| d != db) {
                continue;
            }

            let metadata = file.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map_err(|e| AiError::CacheError(e.to_string()))?;
            entries.push(CacheEntry {
                connection_prefix: conn,
                database: db,
                table,
                kind,
                fetched_at: DateTime::<Utc>::from(modified),
                size_bytes: metadata.len(),
                path: file.path(),
                modified,
            });
        }

        entries.sort_by(|a, b| {
            (&a.connection_prefix, &a.database, &a.table, a.kind)
                .cmp(&(&b.connection_prefix, &b.database, &b.table, b.kind))
        });
        Ok(entries)
    }

    /// Fresh cached files for a connection and database, read into memory
    pub async fn load_context(&self, prefix: &str, database: &str) -> AiResult<Vec<CachedContext>> {
        let now = SystemTime::now();
        let mut context = Vec::new();
        for entry in self.list(Some(prefix), Some(database)).await? {
            if !self.is_fresh(entry.modified, now) {
                debug!("Skipping stale cache file {}", entry.path.display());
                continue;
            }
            match tokio::fs::read_to_string(&entry.path).await {
                Ok(content) => context.push(CachedContext {
                    database: database.to_string(),
                    table: entry.table,
                    kind: entry.kind,
                    content,
                }),
                // Removed by a concurrent invalidation
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(context)
    }

    /// Remove matching files, returning how many were deleted
    pub async fn invalidate(
        &self,
        prefix: Option<&str>,
        database: Option<&str>,
        table: Option<&str>,
    ) -> AiResult<usize> {
        let mut removed = 0;
        for entry in self.list(prefix, database).await? {
            if table.is_some_and(|t| t != entry.table) {
                continue;
            }
            remove_quietly(&entry.path).await?;
            removed += 1;
        }
        info!("Invalidated {} AI context cache file(s)", removed);
        Ok(removed)
    }

    /// Drop expired files, then the oldest tables beyond `max_entries`
    pub async fn enforce_limits(&self) -> AiResult<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut tables: HashMap<String, (SystemTime, Vec<PathBuf>)> = HashMap::new();

        for entry in self.list(None, None).await? {
            if !self.is_fresh(entry.modified, now) {
                remove_quietly(&entry.path).await?;
                removed += 1;
                continue;
            }
            let key = format!("{}_{}_{}", entry.connection_prefix, entry.database, entry.table);
            let slot = tables.entry(key).or_insert((entry.modified, Vec::new()));
            slot.0 = slot.0.max(entry.modified);
            slot.1.push(entry.path);
        }

        if tables.len() > self.max_entries {
            let mut by_age: Vec<_> = tables.into_values().collect();
            by_age.sort_by_key(|(modified, _)| *modified);
            let excess = by_age.len() - self.max_entries;
            for (_, paths) in by_age.into_iter().take(excess) {
                for path in paths {
                    remove_quietly(&path).await?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!("Pruned {} AI context cache file(s)", removed);
        }
        Ok(removed)
    }
}

async fn remove_quietly(path: &Path) -> AiResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Decode `{prefix}_{database}_{table}_{kind}.txt` into its components
fn parse_file_name(name: &str) -> Option<(String, String, String, CacheKind)> {
    let stem = name.strip_suffix(".txt")?;
    let mut parts = stem.split('_');
    let (Some(conn), Some(db), Some(table), Some(suffix), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };
    let kind = CacheKind::from_suffix(suffix)?;
    Some((
        decode_component(conn)?,
        decode_component(db)?,
        decode_component(table)?,
        kind,
    ))
}
