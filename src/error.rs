//! Custom error types for docpipe

use crate::retry::capability_error;
use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for docpipe operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing or malformed caller input. Never retried.
    #[error("{0}")]
    Validation(String),

    /// Content digest already registered; carries the existing document id
    #[error("Document already exists: {existing_id}")]
    Duplicate { existing_id: String },

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Rate limiting or temporary unavailability of an external capability
    #[error("Transient capability error: {0}")]
    TransientCapability(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Pipeline trigger failed: {0}")]
    PipelineTrigger(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Whether the retry layer may try the failed operation again
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientCapability(_))
    }

    /// Classify a non-success response from an external capability.
    ///
    /// 429 and the gateway/unavailable family are transient; everything else
    /// is fatal for the current run.
    pub fn from_status(service: &str, status: StatusCode, body: &str) -> Self {
        let message = format!("{} failed ({}): {}", service, status.as_u16(), body.trim());
        match status {
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => Error::TransientCapability(message),
            _ => capability_error(message),
        }
    }

    /// Classify a transport-level failure talking to an external capability
    pub fn from_transport(service: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::TransientCapability(format!("{} timed out: {}", service, err))
        } else {
            Error::Capability(format!("{} request failed: {}", service, err))
        }
    }

    /// True when a database error is a UNIQUE constraint violation
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Result type alias for docpipe
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = Error::from_status("OCR", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
        assert!(err.to_string().contains("429"));

        let err = Error::from_status("OCR", StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(err.is_transient());

        let err = Error::from_status("OCR", StatusCode::BAD_REQUEST, "bad payload");
        assert!(!err.is_transient());
        assert!(matches!(err, Error::Capability(_)));

        let err = Error::from_status(
            "Completion",
            StatusCode::BAD_REQUEST,
            r#"{"error":{"type":"rate_limit_error","message":"Rate limit reached"}}"#,
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_validation_message_is_bare() {
        let err = Error::Validation("Query must not be empty".to_string());
        assert_eq!(err.to_string(), "Query must not be empty");
    }
}
