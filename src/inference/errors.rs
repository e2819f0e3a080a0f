//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility — these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the inference server failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The server did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response.
    #[error("{}", format_http_error(*status, url, detail))]
    HttpError {
        status: u16,
        url: String,
        detail: String,
    },

    /// Response body could not be read or decoded.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// An attached image could not be used.
    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },
}

impl InferenceError {
    /// Build an `HttpError` from a non-2xx response body.
    ///
    /// Ollama reports failures as `{"error": "..."}`; that field is preferred
    /// over the raw body text.
    pub fn from_http_body(status: u16, url: impl Into<String>, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.to_string());
        InferenceError::HttpError {
            status,
            url: url.into(),
            detail: detail.replace('\n', " ").trim().to_string(),
        }
    }

    /// Map a `reqwest` send error onto the taxonomy.
    pub fn from_transport(err: &reqwest::Error, endpoint: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// Whether the server could not be reached at all (as opposed to rejecting
    /// the request).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }
        )
    }

    /// The HTTP status, if this is an `HttpError`.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn format_http_error(status: u16, url: &str, detail: &str) -> String {
    if detail.is_empty() {
        format!("HTTP {status} / {url}")
    } else {
        format!("HTTP {status} / {url} / {detail}")
    }
}
