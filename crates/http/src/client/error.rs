//! Client error types

use crm_core::ApiFailure;
use thiserror::Error;

/// Failure to get any HTTP response at all
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Backend could not be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Failure to read or write persisted session state
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session storage is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// No response received
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Authentication failed and could not be recovered
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The API answered with `isSuccess: false`
    #[error("{0}")]
    Api(#[from] ApiFailure),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session persistence failed
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError { status, message },
        }
    }

    /// Whether the session is gone and the user has to sign in again
    pub const fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// Whether no response was received
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(TransportError::Request(err))
    }
}
