//! JSON API consumed by the console UI
//!
//! Handlers are thin: they extract and validate the request, pick the
//! effective connection and delegate to the gateway, schema, DDL, federation
//! and AI modules. Errors leave through [`OwlError`]'s `IntoResponse`.

mod ai;
mod auth;
mod catalog;
mod query;
mod saved;
mod tables;


use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequest, Request, State};
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::Router;
use axum::response::Json;
use axum::routing::{delete, get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::SameSite;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing::{info, warn};

use crate::ai_sql::AiSqlEngine;
use crate::config::{Config, DashboardConfig};
use crate::connections::{ConnectionConfig, ConnectionRepository, DataSourceRepository};
use crate::error::{OwlError, OwlResult};
use crate::gateway::Gateway;
use crate::session::{AuthSession, SESSION_COOKIE, signing_key};

/// Header carrying a JSON-encoded [`ConnectionConfig`]
pub const CONNECTION_HEADER: &str = "x-clickhouse-connection";

/// Everything a handler needs, shared across requests
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub connections: Arc<ConnectionRepository>,
    pub datasources: Arc<DataSourceRepository>,
    pub ai: Arc<AiSqlEngine>,
    pub dashboard: DashboardConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        gateway: Gateway,
        connections: Arc<ConnectionRepository>,
        datasources: Arc<DataSourceRepository>,
        ai: AiSqlEngine,
        dashboard: DashboardConfig,
    ) -> Self {
        Self {
            gateway: Arc::new(gateway),
            connections,
            datasources,
            ai: Arc::new(ai),
            dashboard,
            started_at: Instant::now(),
        }
    }

    /// Session connection, else the environment defaults
    pub fn connection_for(&self, auth: &AuthSession) -> ConnectionConfig {
        self.gateway.effective_connection(None, auth.connection())
    }
}

/// `{success: true, message}` returned by mutating operations
#[derive(Debug, Serialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

pub fn ack(message: impl Into<String>) -> Json<Ack> {
    Json(Ack {
        success: true,
        message: message.into(),
    })
}

/// JSON body extractor whose rejection uses the API error envelope
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
    S: Send + Sync,
{
    type Rejection = OwlError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| OwlError::Validation(e.body_text()))?;
        Ok(ApiJson(value))
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(CONNECTION_HEADER)])
}

pub fn router(state: AppState, config: &Config) -> Router {
    let sessions = SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE)
        .with_secure(config.session.secure_cookie)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            config.session.idle_minutes,
        )))
        .with_signed(signing_key(config.session_secret()));

    Router::new()
        .route("/api/health", get(health))
        // Authentication
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/session", get(auth::current_session))
        .route("/api/connection/switch", post(auth::switch_connection))
        // Ad-hoc queries
        .route("/api/query", post(query::run_query))
        .route("/api/query/explain", post(query::explain))
        .route("/api/monitoring", get(query::monitoring))
        // Catalog
        .route(
            "/api/databases",
            get(catalog::list_databases).post(catalog::create_database),
        )
        .route(
            "/api/databases/{database}",
            delete(catalog::drop_database),
        )
        .route("/api/databases/{database}/tables", get(catalog::list_tables))
        .route(
            "/api/databases/{database}/tables/{table}",
            get(catalog::describe_table),
        )
        .route(
            "/api/databases/{database}/tables/{table}/preview",
            get(catalog::preview_table),
        )
        .route(
            "/connection/{id}/tables",
            get(catalog::connection_tables_get).post(catalog::connection_tables_post),
        )
        // Table management and federation
        .route("/api/tables/create", post(tables::create_table))
        .route("/api/tables/alter", post(tables::alter_table))
        .route("/api/tables/rename", post(tables::rename_table))
        .route("/api/tables/drop", post(tables::drop_table))
        .route("/api/tables/truncate", post(tables::truncate_table))
        .route("/api/tables/duplicate", post(tables::duplicate_table))
        .route(
            "/api/tables/create-from-postgres",
            post(tables::import_table),
        )
        .route("/api/datasources/connect", post(tables::connect_datasource))
        // Saved records
        .route(
            "/api/connections",
            get(saved::list_connections).post(saved::add_connection),
        )
        .route(
            "/api/connections/{id}",
            get(saved::get_connection)
                .put(saved::update_connection)
                .delete(saved::remove_connection),
        )
        .route(
            "/api/datasources",
            get(saved::list_datasources).post(saved::add_datasource),
        )
        .route(
            "/api/datasources/{id}",
            get(saved::get_datasource)
                .put(saved::update_datasource)
                .delete(saved::remove_datasource),
        )
        // AI assistance
        .route(
            "/api/ai/cache",
            get(ai::list_cache)
                .post(ai::cache_tables)
                .delete(ai::invalidate_cache),
        )
        .route("/api/ai/generate", post(ai::generate_sql))
        .layer(sessions)
        .layer(cors_layer(&config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Bind and serve until Ctrl-C
pub async fn serve(state: AppState, config: &Config) -> OwlResult<()> {
    let app = router(state, config);
    let listener = TcpListener::bind(&config.server.bind).await?;
    info!("ClickHouse Owl listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
    }
}
