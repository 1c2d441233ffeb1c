//! Browser session state and the login check
//!
//! The session lives in the server-side store of `tower-sessions`; the cookie
//! only carries its signed id. Handlers that need a logged-in user take an
//! [`AuthSession`] argument.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tower_sessions::Session;
use tower_sessions::cookie::Key;
use tracing::debug;

use crate::connections::ConnectionConfig;
use crate::error::{OwlError, OwlResult};

/// Key under which [`SessionData`] is stored
pub const SESSION_KEY: &str = "owl.session";

/// Name of the session id cookie
pub const SESSION_COOKIE: &str = "owl.sid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user_id: String,
    pub username: String,
    pub is_authenticated: bool,
    /// Connection chosen by login or by "switch connection"
    #[serde(default)]
    pub connection: Option<ConnectionConfig>,
}

impl SessionData {
    pub fn new(username: &str, connection: Option<ConnectionConfig>) -> Self {
        Self {
            user_id: username.to_string(),
            username: username.to_string(),
            is_authenticated: true,
            connection,
        }
    }

    /// Copy safe to send to the browser
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(connection) = copy.connection.as_mut() {
            connection.password = None;
        }
        copy
    }
}

/// Extractor for routes that require a logged-in user
pub struct AuthSession {
    pub session: Session,
    pub data: SessionData,
}

impl AuthSession {
    pub fn connection(&self) -> Option<&ConnectionConfig> {
        self.data.connection.as_ref()
    }

    /// Persist a changed [`SessionData`]
    pub async fn save(&mut self, data: SessionData) -> OwlResult<()> {
        self.session.insert(SESSION_KEY, &data).await?;
        self.data = data;
        Ok(())
    }
}

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = OwlError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| OwlError::Session(message.to_string()))?;

        match session.get::<SessionData>(SESSION_KEY).await? {
            Some(data) if data.is_authenticated => Ok(Self { session, data }),
            _ => {
                debug!("[AuthSession] Rejecting unauthenticated request");
                Err(OwlError::Unauthorized("Authentication required".to_string()))
            }
        }
    }
}

/// Cookie signing key derived from the session secret
pub fn signing_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

/// Compare credentials without leaking the position of the first mismatch
pub fn credentials_match(given_user: &str, given_password: &str, user: &str, password: &str) -> bool {
    let same = |a: &str, b: &str| {
        let left = Sha256::digest(a.as_bytes());
        let right = Sha256::digest(b.as_bytes());
        left.iter().zip(right.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    };
    // Both sides are always evaluated
    let user_ok = same(given_user, user);
    let password_ok = same(given_password, password);
    user_ok & password_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_connection;
    use rstest::rstest;

    #[rstest]
    #[case("admin", "hunter2", true)]
    #[case("admin", "hunter3", false)]
    #[case("root", "hunter2", false)]
    #[case("", "", false)]
    fn test_credentials_match(#[case] user: &str, #[case] password: &str, #[case] expected: bool) {
        assert_eq!(credentials_match(user, password, "admin", "hunter2"), expected);
    }

    #[test]
    fn test_redacted_drops_password() {
        let data = SessionData::new("admin", Some(test_connection("default", "http://ch:8123")));
        let redacted = data.redacted();
        assert_eq!(redacted.connection.as_ref().unwrap().password, None);
        assert_eq!(redacted.connection.unwrap().url, "http://ch:8123");
        assert!(data.connection.unwrap().password.is_some());
    }

    #[test]
    fn test_session_data_wire_format() {
        let value = serde_json::to_value(SessionData::new("admin", None)).unwrap();
        assert_eq!(value["userId"], "admin");
        assert_eq!(value["isAuthenticated"], true);
    }

    #[test]
    fn test_signing_key_is_deterministic() {
        assert_eq!(signing_key("secret").master(), signing_key("secret").master());
        assert_ne!(signing_key("secret").master(), signing_key("other").master());
    }
}
