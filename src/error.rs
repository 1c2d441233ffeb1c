//! Error type shared by every HTTP-facing operation
//!
//! Module-level errors (`DatabaseError`, `AiError`, `PasswordEncryptionError`)
//! convert into [`OwlError`], and [`OwlError`] maps onto an HTTP status and a
//! JSON body in exactly one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ai_sql::AiError;
use crate::database::DatabaseError;
use crate::password_encryption::PasswordEncryptionError;

pub type OwlResult<T> = Result<T, OwlError>;

#[derive(Error, Debug)]
pub enum OwlError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Syntax error (code {code}): {message}")]
    Syntax { code: u32, message: String },

    #[error("{message}")]
    Query { code: Option<u32>, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("AI provider error: {0}")]
    Provider(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Encryption error: {0}")]
    Encryption(#[from] PasswordEncryptionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OwlError {
    pub fn validation(message: impl Into<String>) -> Self {
        OwlError::Validation(message.into())
    }

    /// Fail with a validation error when a required field is blank
    pub fn require<'a>(value: &'a str, field: &str) -> Result<&'a str, OwlError> {
        if value.trim().is_empty() {
            Err(OwlError::Validation(format!("Missing required field: {field}")))
        } else {
            Ok(value)
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OwlError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            OwlError::Validation(_) | OwlError::Syntax { .. } => StatusCode::BAD_REQUEST,
            OwlError::NotFound(_) => StatusCode::NOT_FOUND,
            OwlError::Connection(_) | OwlError::Provider(_) => StatusCode::BAD_GATEWAY,
            OwlError::Query { .. }
            | OwlError::Cache(_)
            | OwlError::Config(_)
            | OwlError::Session(_)
            | OwlError::Encryption(_)
            | OwlError::Io(_)
            | OwlError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            OwlError::Unauthorized(_) => "Unauthorized",
            OwlError::Validation(_) => "ValidationError",
            OwlError::NotFound(_) => "NotFound",
            OwlError::Syntax { .. } => "SyntaxError",
            OwlError::Query { .. } => "QueryError",
            OwlError::Connection(_) => "ConnectionError",
            OwlError::Provider(_) => "ProviderError",
            OwlError::Cache(_) => "CacheError",
            OwlError::Config(_) => "ConfigError",
            OwlError::Session(_) => "SessionError",
            OwlError::Encryption(_) => "EncryptionError",
            OwlError::Io(_) => "IoError",
            OwlError::Serialization(_) => "SerializationError",
        }
    }
}

impl From<DatabaseError> for OwlError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Syntax { code, message } => OwlError::Syntax { code, message },
            DatabaseError::Server { code, message } => OwlError::Query {
                code: Some(code),
                message,
            },
            DatabaseError::QueryError(message) | DatabaseError::MetadataError(message) => {
                OwlError::Query {
                    code: None,
                    message,
                }
            }
            DatabaseError::ConnectionError(message) => OwlError::Connection(message),
            DatabaseError::InvalidUrl(message) => OwlError::Validation(message),
        }
    }
}

impl From<AiError> for OwlError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::ConfigurationError(msg) | AiError::ValidationError(msg) => {
                OwlError::Validation(msg)
            }
            AiError::CacheError(msg) => OwlError::Cache(msg),
            AiError::DatabaseError(db) => db.into(),
            AiError::IoError(io) => OwlError::Io(io),
            other => OwlError::Provider(other.user_message()),
        }
    }
}

impl From<tower_sessions::session::Error> for OwlError {
    fn from(err: tower_sessions::session::Error) -> Self {
        OwlError::Session(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

impl IntoResponse for OwlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, self);
        } else {
            debug!("Request rejected with {}: {}", status, self);
        }

        let body = ErrorBody {
            success: false,
            error: ErrorDetails {
                message: self.to_string(),
                error_type: self.error_type().to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(OwlError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED)]
    #[case(OwlError::validation("bad"), StatusCode::BAD_REQUEST)]
    #[case(OwlError::Syntax { code: 62, message: "x".into() }, StatusCode::BAD_REQUEST)]
    #[case(OwlError::Query { code: None, message: "x".into() }, StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(OwlError::Connection("down".into()), StatusCode::BAD_GATEWAY)]
    #[case(OwlError::Provider("down".into()), StatusCode::BAD_GATEWAY)]
    fn test_status_codes(#[case] err: OwlError, #[case] expected: StatusCode) {
        assert_eq!(err.status_code(), expected);
    }

    #[test]
    fn test_require_rejects_blank() {
        assert!(OwlError::require("  ", "name").is_err());
        assert_eq!(OwlError::require("t", "name").unwrap(), "t");
    }

    #[test]
    fn test_database_syntax_error_stays_distinct() {
        let err: OwlError = DatabaseError::Syntax {
            code: 62,
            message: "Syntax error".into(),
        }
        .into();
        assert!(matches!(err, OwlError::Syntax { code: 62, .. }));
    }
}
