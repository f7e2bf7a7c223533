//! Error types for the dashboard core
//!
//! Errors are grouped by concern:
//! - GatewayError: remote reads, writes and the realtime change feed
//! - GateError: the local access gate
//! - ConfigError: loading and saving ~/.noilexel/config.json
//! - ExportError: writing invoice documents
//! - DashboardError: what the facade hands back to a front end

use std::path::PathBuf;
use thiserror::Error;

/// Failures talking to the remote data gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Realtime socket: {0}")]
    WebSocket(String),

    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    #[error("Collection not available: {0}")]
    NotFound(String),

    #[error("Change feed closed")]
    Closed,
}

impl GatewayError {
    /// Returns true if repeating the same request could succeed.
    ///
    /// Nothing retries today; the classification is surfaced in logs.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Http(e) => e.is_timeout() || e.is_connect(),
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            GatewayError::WebSocket(_) | GatewayError::Closed => true,
            GatewayError::Json(_) | GatewayError::InvalidUrl(_) | GatewayError::NotFound(_) => {
                false
            }
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::WebSocket(err.to_string())
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidUrl(err.to_string())
    }
}

/// Outcomes of the access gate that the caller must show to the user.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Access denied: wrong secret")]
    Rejected,

    #[error("Could not persist session marker: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    NoHome,

    #[error("Failed to read config at {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to write config: {0}")]
    Write(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist {}: {}", .path.display(), .message)]
    Persist { path: PathBuf, message: String },
}

/// Errors surfaced by the dashboard facade.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Dashboard is locked")]
    Locked,

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("No event with id {0}")]
    UnknownEvent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = GatewayError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = GatewayError::Api {
            status: 401,
            message: "bad key".into(),
        };
        assert!(!err.is_retryable());
        assert!(!GatewayError::NotFound("expenses".into()).is_retryable());
    }

    #[test]
    fn closed_feed_is_retryable() {
        assert!(GatewayError::Closed.is_retryable());
    }
}
