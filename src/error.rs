//! Error types for the gdax-book crate.
//!
//! This module defines the errors that can occur while fetching snapshots,
//! consuming the WebSocket feed, and mutating a replicated order book.
//!
//! Errors are split along the lines the synchronization engine cares about:
//!
//! - transport problems (`Http`, `WebSocket`, `Timeout`) which are worth retrying
//! - non-success responses (`Api`, `RateLimited`) where only some are retryable
//! - per-event data problems (`MalformedEvent`, `DuplicateOrder`, `UnknownOrder`)
//!   which are reported and skipped, never fatal

use thiserror::Error as ThisError;

use crate::types::OrderId;

/// The main error type for this crate
#[derive(Debug, ThisError)]
pub enum Error {
    /// HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configured URL could not be parsed
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid configuration (missing fields, bad format)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request signing failed (bad secret encoding)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// API returned a non-success response
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Rate limit exceeded
    #[error("Rate limited{}", .retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default())]
    RateLimited {
        /// Retry after this many milliseconds
        retry_after_ms: Option<u64>,
    },

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// The feed reported an error message
    #[error("Feed error: {0}")]
    Feed(String),

    /// An order id was opened twice
    #[error("Duplicate order: {0}")]
    DuplicateOrder(OrderId),

    /// An event referenced an order that is not resting in the book
    #[error("Unknown order: {0}")]
    UnknownOrder(OrderId),

    /// A diff record was missing required fields or had an unknown type
    #[error("Malformed event at sequence {sequence}: {reason}")]
    MalformedEvent {
        /// Sequence number carried by the record
        sequence: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Product is not tracked
    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
}

/// Error returned by the exchange API
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Error code from API (if provided)
    pub code: Option<String>,
    /// Error message
    pub message: String,
}

impl Error {
    /// Create a malformed-event error
    pub fn malformed(sequence: u64, reason: impl Into<String>) -> Self {
        Error::MalformedEvent {
            sequence,
            reason: reason.into(),
        }
    }

    /// Whether the failed operation is worth retrying.
    ///
    /// Transport failures, timeouts, rate limiting and server errors are
    /// retryable. Any other non-success status, undecodable bodies and local
    /// configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_decode() && !e.is_builder(),
            Error::WebSocket(_) | Error::ConnectionClosed | Error::Timeout => true,
            Error::RateLimited { .. } => true,
            Error::Api(e) => e.is_server_error(),
            _ => false,
        }
    }

    /// Whether this error describes a single bad event rather than a
    /// failure of the stream or of a request
    pub fn is_event_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedEvent { .. } | Error::DuplicateOrder(_) | Error::UnknownOrder(_)
        )
    }
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create an API error with an error code
    pub fn with_code(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = Error::Api(ApiError::new(404, "NotFound"));
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("NotFound"));
    }

    #[test]
    fn test_rate_limited_display() {
        let err = Error::RateLimited {
            retry_after_ms: Some(1000),
        };
        assert!(err.to_string().contains("1000"));
        assert_eq!(
            Error::RateLimited {
                retry_after_ms: None
            }
            .to_string(),
            "Rate limited"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::RateLimited {
            retry_after_ms: None
        }
        .is_retryable());
        assert!(Error::Api(ApiError::new(503, "busy")).is_retryable());
        assert!(!Error::Api(ApiError::new(404, "NotFound")).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_event_errors() {
        assert!(Error::malformed(7, "missing order_id").is_event_error());
        assert!(Error::UnknownOrder("a".into()).is_event_error());
        assert!(!Error::ConnectionClosed.is_event_error());
    }
}
