use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use tracing::debug;

use super::{ApiJson, AppState};
use crate::connections::ConnectionConfig;
use crate::database::QueryResult;
use crate::error::{OwlError, OwlResult};
use crate::gateway::ExplainKind;
use crate::monitoring::{MonitoringSnapshot, snapshot_query};
use crate::session::AuthSession;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub query: String,
    pub database: Option<String>,
    pub connection: Option<ConnectionConfig>,
    /// Only read by the explain endpoint
    pub kind: ExplainKind,
}

/// Malformed bodies are reported inline like any other query failure
fn inline(body: Result<ApiJson<QueryRequest>, OwlError>) -> Result<QueryRequest, Json<QueryResult>> {
    match body {
        Ok(ApiJson(request)) => Ok(request),
        Err(e) => {
            debug!("Unreadable query request: {}", e);
            Err(Json(QueryResult::failed(e.to_string())))
        }
    }
}

pub async fn run_query(
    State(state): State<AppState>,
    auth: AuthSession,
    body: Result<ApiJson<QueryRequest>, OwlError>,
) -> Json<QueryResult> {
    let request = match inline(body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let connection = state
        .gateway
        .effective_connection(request.connection.as_ref(), auth.connection());
    let database = request.database.as_deref().filter(|d| !d.is_empty());

    Json(state.gateway.execute(&connection, &request.query, database).await)
}

pub async fn explain(
    State(state): State<AppState>,
    auth: AuthSession,
    body: Result<ApiJson<QueryRequest>, OwlError>,
) -> Json<QueryResult> {
    let request = match inline(body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let connection = state
        .gateway
        .effective_connection(request.connection.as_ref(), auth.connection());
    let database = request.database.as_deref().filter(|d| !d.is_empty());

    Json(
        state
            .gateway
            .explain(&connection, request.kind, &request.query, database)
            .await,
    )
}

pub async fn monitoring(
    State(state): State<AppState>,
    auth: AuthSession,
) -> OwlResult<Json<MonitoringSnapshot>> {
    let connection = state.connection_for(&auth);
    let result = state
        .gateway
        .run_query(&connection, &snapshot_query(), None)
        .await?;
    Ok(Json(MonitoringSnapshot::from_result(&result)?))
}
