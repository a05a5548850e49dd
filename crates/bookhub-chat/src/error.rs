//! Error types for the messaging client.

use std::path::PathBuf;

/// Messaging client errors.
///
/// Most of these never cross the public API: transport failures drive the
/// reconnect policy and malformed payloads are dropped, both with a log line.
/// They surface directly only from configuration loading and [`send`].
///
/// [`send`]: crate::ChatClient::send
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    /// The operation needs an open connection and there is none.
    #[error("Not connected")]
    NotConnected,
    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    /// Connecting or the handshake did not finish in time.
    #[error("Connection timed out")]
    Timeout,
    /// WebSocket-level failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    /// The peer violated the Socket.IO / Engine.IO protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// The server refused the namespace connection.
    #[error("Connection rejected by server: {0}")]
    ConnectRejected(String),
    /// The connection closed while it was still being established.
    #[error("Connection closed: {0}")]
    Closed(String),
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// Reading a configuration file failed.
    #[error("Failed to read '{path}': {message}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error message.
        message: String,
    },
    /// No Tokio runtime was available to drive the connection.
    #[error("No Tokio runtime available")]
    NoRuntime,
}

impl ChatError {
    /// Create an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for ChatError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for ChatError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

/// A specialized Result type for messaging operations.
pub type Result<T> = std::result::Result<T, ChatError>;
