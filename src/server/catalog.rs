use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::Deserialize;

use super::{Ack, ApiJson, AppState, CONNECTION_HEADER, ack};
use crate::connections::ConnectionConfig;
use crate::database::{DatabaseSummary, QueryResult};
use crate::ddl::{CreateDatabaseRequest, DdlOrchestrator};
use crate::error::{OwlError, OwlResult};
use crate::schema::{DatabaseSchema, SchemaIntrospector, TableDefinition};
use crate::session::AuthSession;
use crate::sql;

const DEFAULT_PREVIEW_ROWS: usize = 100;
const MAX_PREVIEW_ROWS: usize = 1000;

pub async fn list_databases(
    State(state): State<AppState>,
    auth: AuthSession,
) -> OwlResult<Json<Vec<DatabaseSummary>>> {
    let client = state.gateway.client_for(&state.connection_for(&auth))?;
    Ok(Json(SchemaIntrospector::new(client.as_ref()).list_databases().await?))
}

pub async fn create_database(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<CreateDatabaseRequest>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = DdlOrchestrator::new(&state.gateway, &connection)
        .create_database(request)
        .await?;
    Ok(ack(message))
}

pub async fn drop_database(
    State(state): State<AppState>,
    auth: AuthSession,
    Path(database): Path<String>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = DdlOrchestrator::new(&state.gateway, &connection)
        .drop_database(&database)
        .await?;
    Ok(ack(message))
}

pub async fn list_tables(
    State(state): State<AppState>,
    auth: AuthSession,
    Path(database): Path<String>,
) -> OwlResult<Json<DatabaseSchema>> {
    let client = state.gateway.client_for(&state.connection_for(&auth))?;
    Ok(Json(SchemaIntrospector::new(client.as_ref()).list_tables(&database).await?))
}

pub async fn describe_table(
    State(state): State<AppState>,
    auth: AuthSession,
    Path((database, table)): Path<(String, String)>,
) -> OwlResult<Json<TableDefinition>> {
    let client = state.gateway.client_for(&state.connection_for(&auth))?;
    Ok(Json(
        SchemaIntrospector::new(client.as_ref())
            .describe_table(&database, &table)
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PreviewParams {
    pub limit: Option<usize>,
}

pub async fn preview_table(
    State(state): State<AppState>,
    auth: AuthSession,
    Path((database, table)): Path<(String, String)>,
    Query(params): Query<PreviewParams>,
) -> OwlResult<Json<QueryResult>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PREVIEW_ROWS)
        .clamp(1, MAX_PREVIEW_ROWS);
    let sql = sql::select_sample(&database, &table, limit)?;
    let connection = state.connection_for(&auth);
    Ok(Json(
        state
            .gateway
            .run_query(&connection, &sql, Some(&database))
            .await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionTablesRequest {
    pub connection: Option<ConnectionConfig>,
    pub database: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseParam {
    pub database: Option<String>,
}

pub async fn connection_tables_get(
    State(state): State<AppState>,
    auth: AuthSession,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DatabaseParam>,
) -> OwlResult<Json<DatabaseSchema>> {
    let request = ConnectionTablesRequest {
        connection: None,
        database: params.database,
    };
    connection_tables(&state, &auth, &id, &headers, request).await
}

pub async fn connection_tables_post(
    State(state): State<AppState>,
    auth: AuthSession,
    Path(id): Path<String>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<ConnectionTablesRequest>,
) -> OwlResult<Json<DatabaseSchema>> {
    connection_tables(&state, &auth, &id, &headers, request).await
}

async fn connection_tables(
    state: &AppState,
    auth: &AuthSession,
    id: &str,
    headers: &HeaderMap,
    request: ConnectionTablesRequest,
) -> OwlResult<Json<DatabaseSchema>> {
    let connection = resolve_connection(state, auth, id, headers, request.connection).await?;
    let database = request
        .database
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| connection.default_database().to_string());

    let client = state.gateway.client_for(&connection)?;
    Ok(Json(
        SchemaIntrospector::new(client.as_ref())
            .list_tables(&database)
            .await?,
    ))
}

/// Body, then `X-ClickHouse-Connection`, then the saved connection, then the session
async fn resolve_connection(
    state: &AppState,
    auth: &AuthSession,
    id: &str,
    headers: &HeaderMap,
    from_body: Option<ConnectionConfig>,
) -> OwlResult<ConnectionConfig> {
    if let Some(connection) = from_body.filter(|c| !c.url.trim().is_empty()) {
        return Ok(connection);
    }
    if let Some(raw) = headers.get(CONNECTION_HEADER) {
        let raw = raw
            .to_str()
            .map_err(|_| OwlError::validation("Invalid X-ClickHouse-Connection header"))?;
        let connection: ConnectionConfig = serde_json::from_str(raw).map_err(|e| {
            OwlError::Validation(format!("Invalid X-ClickHouse-Connection header: {e}"))
        })?;
        return Ok(connection);
    }
    if let Some(saved) = state.connections.get(id).await? {
        return Ok(saved);
    }
    Ok(state.connection_for(auth))
}
