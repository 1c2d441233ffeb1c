use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tower_sessions::Session;
use tracing::{info, warn};

use super::{AppState, ApiJson};
use crate::connections::ConnectionConfig;
use crate::error::{OwlError, OwlResult};
use crate::password_sanitizer::sanitize_connection_url;
use crate::session::{AuthSession, SESSION_KEY, SessionData, credentials_match};

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    #[serde(alias = "username")]
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub session: SessionData,
}

pub async fn login(
    State(state): State<AppState>,
    session: Session,
    ApiJson(request): ApiJson<LoginRequest>,
) -> OwlResult<Json<LoginResponse>> {
    let user = request.user.unwrap_or_default();
    let password = request.password.unwrap_or_default();

    let data = match state.dashboard.credentials() {
        Some((expected_user, expected_password)) => {
            if !credentials_match(&user, &password, expected_user, expected_password) {
                warn!("Rejected dashboard login for '{}'", user);
                return Err(OwlError::Unauthorized("Invalid credentials".to_string()));
            }
            SessionData::new(&user, None)
        }
        None => {
            let mut connection = state.gateway.default_connection().clone();
            if !user.is_empty() {
                connection.username = user.clone();
            }
            connection.password = Some(password).filter(|p| !p.is_empty());

            if let Err(e) = state.gateway.ping(&connection).await {
                warn!(
                    "Rejected login for '{}' on {}: {}",
                    connection.username,
                    sanitize_connection_url(&connection.url),
                    e
                );
                return Err(OwlError::Unauthorized("Invalid credentials".to_string()));
            }
            let username = connection.username.clone();
            SessionData::new(&username, Some(connection))
        }
    };

    session.cycle_id().await?;
    session.insert(SESSION_KEY, &data).await?;
    info!("User '{}' logged in", data.username);

    Ok(Json(LoginResponse {
        success: true,
        session: data.redacted(),
    }))
}

pub async fn logout(session: Session) -> OwlResult<Json<super::Ack>> {
    session.flush().await?;
    Ok(super::ack("Logged out"))
}

pub async fn current_session(auth: AuthSession) -> Json<SessionData> {
    Json(auth.data.redacted())
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct SwitchConnectionRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: String,
    #[serde(alias = "username")]
    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl SwitchConnectionRequest {
    fn into_connection(self) -> ConnectionConfig {
        // Stable id for ad-hoc servers so their cache files stay grouped
        let id = self.id.filter(|id| !id.is_empty()).unwrap_or_else(|| {
            let digest = Sha256::digest(format!("{}|{}", self.url, self.user).as_bytes());
            hex::encode(&digest[..8])
        });
        ConnectionConfig {
            name: self.name.unwrap_or_else(|| self.url.clone()),
            id,
            url: self.url,
            username: self.user,
            password: self.password.filter(|p| !p.is_empty()),
            database: self.database.filter(|d| !d.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SwitchResponse {
    pub success: bool,
    pub connection: ConnectionConfig,
}

/// Ping the new server, then make it the session connection
pub async fn switch_connection(
    State(state): State<AppState>,
    mut auth: AuthSession,
    ApiJson(request): ApiJson<SwitchConnectionRequest>,
) -> OwlResult<Json<SwitchResponse>> {
    OwlError::require(&request.url, "url")?;
    let connection = request.into_connection();

    state
        .gateway
        .ping(&connection)
        .await
        .map_err(|e| {
            OwlError::Connection(format!(
                "Cannot reach {}: {e}",
                sanitize_connection_url(&connection.url)
            ))
        })?;

    let mut data = auth.data.clone();
    data.connection = Some(connection.clone());
    auth.save(data).await?;
    info!(
        "Switched session connection to {}",
        sanitize_connection_url(&connection.url)
    );

    let mut visible = connection;
    visible.password = None;
    Ok(Json(SwitchResponse {
        success: true,
        connection: visible,
    }))
}
