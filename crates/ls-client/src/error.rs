//! Error types for Lightstreamer client operations

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, LsError>;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors that can occur during client operations
#[derive(Error, Debug)]
pub enum LsError {
    /// Session creation or bind did not answer `OK`
    #[error("Session rejected by server: {}", .diagnostic.join(" / "))]
    SessionRejected { diagnostic: Vec<String> },

    /// Server sent `ERROR` on the stream connection
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Server sent `END` on the stream connection
    #[error("Session closed by server{}", .cause.map(|c| format!(" (cause {})", c)).unwrap_or_default())]
    ServerClosed { cause: Option<i32> },

    /// Server sent `SYNC ERROR`; the session must be recreated from scratch
    #[error("Session synchronization lost")]
    SyncLost,

    /// Control command `add` did not answer `OK`
    #[error("Subscription {key} rejected: {status}")]
    SubscriptionRejected { key: u32, status: String },

    /// Control command `delete` did not answer `OK`
    #[error("Unsubscription of {key} rejected: {status}")]
    UnsubscriptionRejected { key: u32, status: String },

    /// Table id / subscription key not registered in this session
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u32),

    /// Update line could not be parsed
    #[error("Malformed update: {0}")]
    MalformedUpdate(String),

    /// Operation requires an active session
    #[error("No active session")]
    NotConnected,

    /// connect() called while a session is already running
    #[error("Session already connected")]
    AlreadyConnected,

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LsError {
    /// Create a malformed-update error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedUpdate(message.into())
    }
}

/// Errors raised by an [`HttpTransport`](crate::transport::HttpTransport)
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server answered with a non-success HTTP status
    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection closed before a response could be read
    #[error("Connection closed")]
    Closed,
}
