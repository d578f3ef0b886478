// Shared error types for the bundle dissector.
// Every failure in the fetch/decode pipeline is terminal for the bundle being
// fetched; `is_retryable` only classifies which ones a retry policy may re-run.
use std::time::Duration;

use thiserror::Error;

use crate::decoder::DecodeError;

/// Top-level error type for the receiver, decoder and traversal layers.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status} for {resource}")]
    HttpStatus { resource: String, status: u16 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid base64url payload: {0}")]
    InvalidEncoding(#[from] DecodeError),

    #[error("chunk at offset {offset} decoded to zero bytes")]
    NoProgress { offset: u64 },

    #[error("encoded span of {needed} bytes exceeds span capacity {capacity}")]
    SpanOverflow { needed: usize, capacity: usize },

    #[error("read timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Transient failures a retry policy may re-run: transport errors,
    /// read deadlines and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Network(_) | PipelineError::Timeout { .. } => true,
            PipelineError::HttpStatus { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Whether this is a 4xx answer, i.e. the requested resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::HttpStatus { status, .. } if (400..=499).contains(status))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not report the configured duration back
            PipelineError::Network(format!("timeout: {e}"))
        } else {
            PipelineError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::MalformedResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let unavailable = PipelineError::HttpStatus {
            resource: "tx".into(),
            status: 503,
        };
        let missing = PipelineError::HttpStatus {
            resource: "tx".into(),
            status: 404,
        };

        assert!(unavailable.is_retryable());
        assert!(!unavailable.is_not_found());
        assert!(!missing.is_retryable());
        assert!(missing.is_not_found());
    }

    #[test]
    fn decode_and_progress_errors_are_terminal() {
        assert!(PipelineError::Network("reset".into()).is_retryable());
        assert!(PipelineError::Timeout {
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!PipelineError::NoProgress { offset: 7 }.is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
        assert!(!PipelineError::InvalidEncoding(DecodeError::InvalidLength { len: 5 }).is_retryable());
    }

    #[test]
    fn http_status_message_names_the_resource() {
        let err = PipelineError::HttpStatus {
            resource: "abc123".into(),
            status: 404,
        };
        assert_eq!(err.to_string(), "HTTP 404 for abc123");
    }
}
