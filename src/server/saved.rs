use axum::extract::{Path, State};
use axum::response::Json;

use super::{Ack, ApiJson, AppState, ack};
use crate::connections::{ConnectionConfig, DataSource, Repository, StoredRecord};
use crate::error::{OwlError, OwlResult};
use crate::session::AuthSession;

async fn list_masked<T: StoredRecord>(repository: &dyn Repository<T>) -> OwlResult<Json<Vec<T>>> {
    let records = repository.list().await?;
    Ok(Json(records.iter().map(StoredRecord::masked).collect()))
}

async fn get_masked<T: StoredRecord>(repository: &dyn Repository<T>, id: &str) -> OwlResult<Json<T>> {
    repository
        .get(id)
        .await?
        .map(|record| Json(record.masked()))
        .ok_or_else(|| OwlError::NotFound(format!("No {} with id '{id}'", T::KIND)))
}

async fn remove<T: StoredRecord>(repository: &dyn Repository<T>, id: &str) -> OwlResult<Json<Ack>> {
    if repository.remove(id).await? {
        Ok(ack(format!("Removed {} {id}", T::KIND)))
    } else {
        Err(OwlError::NotFound(format!("No {} with id '{id}'", T::KIND)))
    }
}

fn check_connection(connection: &ConnectionConfig) -> OwlResult<()> {
    OwlError::require(&connection.url, "url")?;
    Ok(())
}

pub async fn list_connections(
    State(state): State<AppState>,
    _auth: AuthSession,
) -> OwlResult<Json<Vec<ConnectionConfig>>> {
    list_masked(state.connections.as_ref()).await
}

pub async fn get_connection(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
) -> OwlResult<Json<ConnectionConfig>> {
    get_masked(state.connections.as_ref(), &id).await
}

pub async fn add_connection(
    State(state): State<AppState>,
    _auth: AuthSession,
    ApiJson(connection): ApiJson<ConnectionConfig>,
) -> OwlResult<Json<ConnectionConfig>> {
    check_connection(&connection)?;
    let saved = state.connections.add(connection).await?;
    Ok(Json(saved.masked()))
}

pub async fn update_connection(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
    ApiJson(connection): ApiJson<ConnectionConfig>,
) -> OwlResult<Json<ConnectionConfig>> {
    check_connection(&connection)?;
    let saved = state.connections.update(&id, connection).await?;
    Ok(Json(saved.masked()))
}

pub async fn remove_connection(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
) -> OwlResult<Json<Ack>> {
    remove(state.connections.as_ref(), &id).await
}

pub async fn list_datasources(
    State(state): State<AppState>,
    _auth: AuthSession,
) -> OwlResult<Json<Vec<DataSource>>> {
    list_masked(state.datasources.as_ref()).await
}

pub async fn get_datasource(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
) -> OwlResult<Json<DataSource>> {
    get_masked(state.datasources.as_ref(), &id).await
}

pub async fn add_datasource(
    State(state): State<AppState>,
    _auth: AuthSession,
    ApiJson(source): ApiJson<DataSource>,
) -> OwlResult<Json<DataSource>> {
    source.validate()?;
    let saved = state.datasources.add(source).await?;
    Ok(Json(saved.masked()))
}

pub async fn update_datasource(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
    ApiJson(source): ApiJson<DataSource>,
) -> OwlResult<Json<DataSource>> {
    source.validate()?;
    let saved = state.datasources.update(&id, source).await?;
    Ok(Json(saved.masked()))
}

pub async fn remove_datasource(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
) -> OwlResult<Json<Ack>> {
    remove(state.datasources.as_ref(), &id).await
}
