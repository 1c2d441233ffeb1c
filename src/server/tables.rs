use axum::extract::State;
use axum::response::Json;

use super::{Ack, ApiJson, AppState, ack};
use crate::ddl::{
    AlterTableRequest, CreateTableRequest, DdlOrchestrator, DuplicateTableRequest,
    RenameTableRequest, TableRequest,
};
use crate::error::{OwlError, OwlResult};
use crate::federation::{self, ConnectDataSourceRequest, ImportTableRequest};
use crate::session::AuthSession;

pub async fn create_table(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<CreateTableRequest>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = DdlOrchestrator::new(&state.gateway, &connection)
        .create_table(request)
        .await?;
    Ok(ack(message))
}

pub async fn alter_table(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<AlterTableRequest>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = DdlOrchestrator::new(&state.gateway, &connection)
        .alter_table(request)
        .await?;
    Ok(ack(message))
}

pub async fn rename_table(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<RenameTableRequest>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = DdlOrchestrator::new(&state.gateway, &connection)
        .rename_table(request)
        .await?;
    Ok(ack(message))
}

pub async fn drop_table(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<TableRequest>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = DdlOrchestrator::new(&state.gateway, &connection)
        .drop_table(request)
        .await?;
    Ok(ack(message))
}

pub async fn truncate_table(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<TableRequest>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = DdlOrchestrator::new(&state.gateway, &connection)
        .truncate_table(request)
        .await?;
    Ok(ack(message))
}

pub async fn duplicate_table(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<DuplicateTableRequest>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = DdlOrchestrator::new(&state.gateway, &connection)
        .duplicate_table(request)
        .await?;
    Ok(ack(message))
}

pub async fn import_table(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<ImportTableRequest>,
) -> OwlResult<Json<Ack>> {
    let connection = state.connection_for(&auth);
    let message = federation::import_table(&state.gateway, &connection, request).await?;
    Ok(ack(message))
}

/// Inline `source`, or a saved data source named by `datasourceId`
pub async fn connect_datasource(
    State(state): State<AppState>,
    auth: AuthSession,
    ApiJson(request): ApiJson<ConnectDataSourceRequest>,
) -> OwlResult<Json<Ack>> {
    OwlError::require(&request.name, "name")?;
    let source = match (request.source, request.datasource_id) {
        (Some(source), _) => source,
        (None, Some(id)) => state
            .datasources
            .get(&id)
            .await?
            .ok_or_else(|| OwlError::NotFound(format!("No datasource with id '{id}'")))?,
        (None, None) => return Err(OwlError::validation("Missing required field: source")),
    };

    let connection = state.connection_for(&auth);
    let message =
        federation::connect_datasource(&state.gateway, &connection, &request.name, &source).await?;
    Ok(ack(message))
}
