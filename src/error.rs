//! Error types for bashclaw.
//!
//! Uses `thiserror` for the primary error enum, plus a structured
//! `ProviderError` classification that drives the HTTP retry policy.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured provider error classification.
///
/// Categorizes LLM provider HTTP failures so the transport layer can decide
/// whether to retry without string matching.
#[derive(Debug)]
pub enum ProviderError {
    /// 401/403 — Invalid API key or authentication failure
    Auth(String),
    /// 429 — Rate limit or quota exceeded
    RateLimit(String),
    /// 500/502/503 — Server-side errors
    ServerError(String),
    /// 400 and other non-retryable 4xx — bad request, malformed parameters
    InvalidRequest(String),
    /// 404 — Model or endpoint not found
    ModelNotFound(String),
    /// Connection failure or read timeout
    Network(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "rate limit error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "model not found: {}", msg),
            ProviderError::Network(msg) => write!(f, "network error: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Classify an HTTP status + body into a provider error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = format!("HTTP {}: {}", status, body);
        match status {
            401 | 403 => ProviderError::Auth(msg),
            429 => ProviderError::RateLimit(msg),
            404 => ProviderError::ModelNotFound(msg),
            400..=499 => ProviderError::InvalidRequest(msg),
            500 | 502 | 503 => ProviderError::ServerError(msg),
            _ => ProviderError::Unknown(msg),
        }
    }

    /// Returns `true` if this error is transient and the request should be
    /// retried: 429, 500/502/503, and network failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_) | ProviderError::ServerError(_) | ProviderError::Network(_)
        )
    }

    /// The HTTP status associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Network(_) | ProviderError::Unknown(_) => None,
        }
    }
}

impl From<ProviderError> for BashError {
    fn from(err: ProviderError) -> Self {
        BashError::ProviderTyped(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for bashclaw operations.
#[derive(Error, Debug)]
pub enum BashError {
    /// Configuration-related errors (invalid config, missing required fields)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider errors carried as plain text (e.g. malformed response JSON)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Classified provider error driving retry decisions
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Tool execution errors (invalid parameters, handler failures)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Session store errors (lock failures, persistence problems)
    #[error("Session error: {0}")]
    Session(String),

    /// Engine delegation errors (external CLI missing or failed)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Security violations (SSRF, path traversal, blocked commands)
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// MCP bridge errors (malformed frames, dispatch failures)
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Resource not found (agents, sessions, tools, spawn tasks)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for bashclaw operations.
pub type Result<T> = std::result::Result<T, BashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BashError::Config("missing model".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing model");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BashError = io_err.into();
        assert!(matches!(err, BashError::Io(_)));
    }

    #[test]
    fn test_provider_error_classification() {
        assert!(matches!(
            ProviderError::from_status(401, ""),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, ""),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            ProviderError::from_status(404, ""),
            ProviderError::ModelNotFound(_)
        ));
        assert!(matches!(
            ProviderError::from_status(400, ""),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            ProviderError::from_status(500, ""),
            ProviderError::ServerError(_)
        ));
        assert!(matches!(
            ProviderError::from_status(502, ""),
            ProviderError::ServerError(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, ""),
            ProviderError::ServerError(_)
        ));
    }

    #[test]
    fn test_provider_error_is_retryable() {
        assert!(ProviderError::RateLimit("429".into()).is_retryable());
        assert!(ProviderError::ServerError("500".into()).is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());

        assert!(!ProviderError::Auth("401".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("400".into()).is_retryable());
        assert!(!ProviderError::ModelNotFound("404".into()).is_retryable());
        assert!(!ProviderError::Unknown("???".into()).is_retryable());
    }

    #[test]
    fn test_provider_error_status_code() {
        assert_eq!(ProviderError::Auth("x".into()).status_code(), Some(401));
        assert_eq!(ProviderError::RateLimit("x".into()).status_code(), Some(429));
        assert_eq!(ProviderError::ServerError("x".into()).status_code(), Some(500));
        assert_eq!(ProviderError::Network("x".into()).status_code(), None);
    }

    #[test]
    fn test_provider_error_into_bash_error() {
        let pe = ProviderError::RateLimit("too fast".into());
        let be: BashError = pe.into();
        assert!(matches!(be, BashError::ProviderTyped(_)));
        assert!(be.to_string().contains("rate limit"));
    }

    #[test]
    fn test_security_violation_display() {
        let err = BashError::SecurityViolation("path traversal attempt".to_string());
        assert_eq!(
            err.to_string(),
            "Security violation: path traversal attempt"
        );
    }
}
