use axum::extract::{Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use super::{ApiJson, AppState};
use crate::ai_sql::{AiProviderType, CacheEntry, CacheReport, GenerateRequest};
use crate::connections::{ConnectionConfig, connection_prefix};
use crate::error::{OwlError, OwlResult};
use crate::session::AuthSession;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheTablesRequest {
    pub connection_id: Option<String>,
    pub connection: Option<ConnectionConfig>,
    pub database: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheFilter {
    pub connection_id: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
}

impl CacheFilter {
    fn prefix(&self) -> Option<String> {
        self.connection_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(connection_prefix)
    }
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub success: bool,
    pub removed: usize,
}

/// Inline connection, then the id (session, default or saved), then the session
async fn cache_connection(
    state: &AppState,
    auth: &AuthSession,
    connection_id: Option<&str>,
    inline: Option<ConnectionConfig>,
) -> OwlResult<ConnectionConfig> {
    if let Some(connection) = inline.filter(|c| !c.url.trim().is_empty()) {
        return Ok(connection);
    }
    let session_connection = state.connection_for(auth);
    let Some(id) = connection_id.filter(|id| !id.is_empty()) else {
        return Ok(session_connection);
    };
    if session_connection.id == id {
        return Ok(session_connection);
    }
    if state.gateway.default_connection().id == id {
        return Ok(state.gateway.default_connection().clone());
    }
    state
        .connections
        .get(id)
        .await?
        .ok_or_else(|| OwlError::NotFound(format!("No connection with id '{id}'")))
}

pub async fn cache_tables(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<CacheTablesRequest>,
) -> OwlResult<Json<CacheReport>> {
    OwlError::require(&request.database, "database")?;
    if request.tables.is_empty() {
        return Err(OwlError::validation("Missing required field: tables"));
    }

    let connection = cache_connection(
        &state,
        &auth,
        request.connection_id.as_deref(),
        request.connection,
    )
    .await?;
    // An explicit id names the cache namespace even for inline connections
    let prefix = request
        .connection_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(connection_prefix)
        .unwrap_or_else(|| connection.cache_prefix());

    let client = state.gateway.client_for(&connection)?;
    let report = state
        .ai
        .cache()
        .cache_tables(client.as_ref(), &prefix, &request.database, &request.tables)
        .await?;
    Ok(Json(report))
}

pub async fn list_cache(
    State(state): State<AppState>,
    _auth: AuthSession,
    Query(filter): Query<CacheFilter>,
) -> OwlResult<Json<Vec<CacheEntry>>> {
    let entries = state
        .ai
        .cache()
        .list(filter.prefix().as_deref(), filter.database.as_deref())
        .await?;
    Ok(Json(entries))
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    _auth: AuthSession,
    ApiJson(filter): ApiJson<CacheFilter>,
) -> OwlResult<Json<InvalidateResponse>> {
    let removed = state
        .ai
        .cache()
        .invalidate(
            filter.prefix().as_deref(),
            filter.database.as_deref(),
            filter.table.as_deref(),
        )
        .await?;
    Ok(Json(InvalidateResponse {
        success: true,
        removed,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerateSqlRequest {
    pub prompt: String,
    pub schema: Option<String>,
    pub provider: Option<AiProviderType>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub connection_id: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateSqlResponse {
    pub sql: String,
}

pub async fn generate_sql(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<GenerateSqlRequest>,
) -> OwlResult<Json<GenerateSqlResponse>> {
    OwlError::require(&request.prompt, "prompt")?;

    let prefix = match request.connection_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => connection_prefix(id),
        None => state.connection_for(&auth).cache_prefix(),
    };
    let generate = GenerateRequest {
        prompt: &request.prompt,
        schema: request.schema.as_deref().filter(|s| !s.trim().is_empty()),
        provider: request
            .provider
            .unwrap_or(state.ai.config().provider),
        api_key: request.api_key.as_deref().filter(|k| !k.is_empty()),
        model: request.model.as_deref().filter(|m| !m.is_empty()),
        connection_prefix: Some(&prefix),
        database: request.database.as_deref().filter(|d| !d.is_empty()),
    };

    let sql = state.ai.generate_sql(&generate).await?;
    Ok(Json(GenerateSqlResponse { sql }))
}
