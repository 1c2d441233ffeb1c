//! Error types for AI SQL generation

use thiserror::Error;

/// Result type for AI SQL operations
pub type AiResult<T> = Result<T, AiError>;

/// Errors that can occur during context caching and SQL generation
#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI provider error: {0}")]
    ProviderError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error: {status_code} - {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Timeout error: operation took longer than {timeout_secs}s")]
    TimeoutError { timeout_secs: u64 },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] crate::database::DatabaseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AiError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AiError::ProviderError(msg) => msg.clone(),
            AiError::ConfigurationError(msg) => {
                format!("{msg}. Check your config file or environment variables.")
            }
            AiError::NetworkError(msg) => format!("Network error: {msg}"),
            AiError::ApiError {
                status_code,
                message,
            } => format!("API error ({status_code}): {message}"),
            AiError::TimeoutError { timeout_secs } => {
                format!("Request timed out after {timeout_secs} seconds")
            }
            _ => self.to_string(),
        }
    }
}
