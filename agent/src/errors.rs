//! Error types for the BeachVar agent

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for the BeachVar agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Bad or expired device token / registry credential
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Backend or registry unreachable, or an unexpected HTTP status
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Container runtime failure (pull, restart, inspect)
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl AgentError {
    /// Classify a non-success HTTP status returned by `context`
    pub fn from_status(status: StatusCode, context: &str, body: &str) -> Self {
        let detail = if body.is_empty() {
            format!("{}: {}", context, status)
        } else {
            format!("{}: {} - {}", context, status, body)
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::AuthError(detail),
            StatusCode::NOT_FOUND => AgentError::NotFound(detail),
            _ => AgentError::NetworkError(detail),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, AgentError::AuthError(_))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AgentError::from_status(status, "HTTP request failed", ""),
            None => AgentError::NetworkError(err.to_string()),
        }
    }
}
