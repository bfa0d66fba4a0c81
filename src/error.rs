//! Error types for the `smartstream` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, FeedError>`.

/// All possible errors produced by the streaming engine.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// A WebSocket-level error (dial, read, write, close).
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Failed to serialize or deserialize a JSON frame or snapshot.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A Redis command or pub/sub operation failed.
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The vendor rejected authentication on a streaming connection.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The connection exhausted its reconnect budget.
    #[error("reconnect attempts exhausted after {attempts} tries: {last_error}")]
    ReconnectExhausted {
        /// Number of attempts made in the failing epoch.
        attempts: u32,
        /// Description of the final failure.
        last_error: String,
    },

    /// The external session issuer could not produce a usable session.
    #[error("session error: {0}")]
    Session(String),

    /// A required configuration value is missing or malformed.
    #[error("config error: {0}")]
    Config(String),

    /// The caller provided an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FeedError>;
