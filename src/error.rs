//! Error types for Parley
//!
//! This module defines the error taxonomy shared by transports, registries,
//! the session store and the router, using `thiserror` for ergonomic error
//! handling. Fallible functions return [`Result`], an `anyhow` alias, and
//! callers that need to branch on the failure kind recover the typed error
//! with `err.downcast_ref::<ParleyError>()`.

use thiserror::Error;

/// Main error type for Parley operations
///
/// Registries record any per-candidate failure and continue down the
/// fallback chain, surfacing only [`ParleyError::AllCandidatesFailed`] once
/// every candidate has been tried.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Configuration-related errors (file loading, global settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session absent or expired, unknown provider/server name, unknown tool
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required configuration field is missing or invalid
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A transport or provider could not connect or lost its connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A connected peer returned an application-level error
    #[error("Upstream error (code {code}): {message}")]
    UpstreamFailed {
        /// JSON-RPC error code or HTTP status
        code: i64,
        /// Message reported by the peer
        message: String,
    },

    /// Every fallback candidate failed
    #[error("All candidates failed for {target} (tried: {}): {last_error}", .attempted.join(", "))]
    AllCandidatesFailed {
        /// Tool name or "generate" for provider calls
        target: String,
        /// Candidate names in the order they were tried
        attempted: Vec<String>,
        /// Display text of the last underlying error
        last_error: String,
    },

    /// A reply violated the JSON-RPC envelope invariant
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A per-call deadline elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ParleyError {
    /// Short machine-friendly label, used for metric labels and events.
    pub fn kind(&self) -> &'static str {
        match self {
            ParleyError::Config(_) => "config",
            ParleyError::NotFound(_) => "not_found",
            ParleyError::ValidationFailed(_) => "validation_failed",
            ParleyError::ConnectionFailed(_) => "connection_failed",
            ParleyError::UpstreamFailed { .. } => "upstream_failed",
            ParleyError::AllCandidatesFailed { .. } => "all_candidates_failed",
            ParleyError::MalformedResponse(_) => "malformed_response",
            ParleyError::Timeout(_) => "timeout",
            ParleyError::Io(_) => "io",
            ParleyError::Serialization(_) => "serialization",
            ParleyError::Yaml(_) => "yaml",
            ParleyError::Http(_) => "http",
        }
    }
}

/// Returns the typed error behind an `anyhow::Error`, if there is one.
pub fn classify(err: &anyhow::Error) -> Option<&ParleyError> {
    err.downcast_ref::<ParleyError>()
}

/// Metric label for any error: the typed kind, or `other`.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    classify(err).map_or("other", ParleyError::kind)
}

/// Result type alias for Parley operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ParleyError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_not_found_display() {
        let error = ParleyError::NotFound("session abc".to_string());
        assert_eq!(error.to_string(), "Not found: session abc");
    }

    #[test]
    fn test_upstream_display_includes_code() {
        let error = ParleyError::UpstreamFailed {
            code: -32601,
            message: "Method not found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Upstream error (code -32601): Method not found"
        );
    }

    #[test]
    fn test_all_candidates_failed_display() {
        let error = ParleyError::AllCandidatesFailed {
            target: "list_files".to_string(),
            attempted: vec!["a".to_string(), "b".to_string()],
            last_error: "boom".to_string(),
        };
        let text = error.to_string();
        assert!(text.contains("list_files"));
        assert!(text.contains("a, b"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_classify_through_anyhow() {
        let err: anyhow::Error = ParleyError::NotFound("tool".into()).into();
        assert!(matches!(classify(&err), Some(ParleyError::NotFound(_))));

        let plain = anyhow::anyhow!("untyped");
        assert!(classify(&plain).is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ParleyError = io_error.into();
        assert!(matches!(error, ParleyError::Io(_)));
        assert_eq!(error.kind(), "io");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: ParleyError = json_error.into();
        assert!(matches!(error, ParleyError::Serialization(_)));
    }
}
