//! Error types for the broker monitor
//!
//! One enum per failure domain, collected under [`MonitorError`]. The split
//! mirrors the error taxonomy of the system: configuration errors are fatal
//! at the point of use, transport failures become connection-state
//! transitions, handler content errors abandon a single dispatch, and
//! inconsistent supervisory states are logged without recovery.

use thiserror::Error;

/// Main error type for broker monitor operations
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A handler was registered under an already-registered literal pattern.
    /// This is a programming/configuration error and fatal at registration.
    #[error("Duplicate topic registration: {0}")]
    DuplicateTopic(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Pattern(#[from] crate::protocol::topics::PatternError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Broker error: {0}")]
    Broker(#[from] crate::broker::BrokerError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

/// Content-level failures raised by topic handlers during dispatch.
///
/// A handler error abandons the dispatch for that handler only; the router
/// keeps notifying the remaining matched handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Empty {topic} message received")]
    EmptyPayload { topic: String },

    #[error("Malformed payload on {topic}: {source}")]
    MalformedPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing field '{field}' in {topic} message")]
    MissingField { topic: String, field: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Result type for broker monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;
