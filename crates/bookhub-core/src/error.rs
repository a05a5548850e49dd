//! Error types for BookHub core.

/// Signal-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// The connection or subscription is invalid or has already been removed.
    #[error("Invalid or disconnected connection")]
    InvalidConnection,
    /// The signal has been dropped and is no longer available.
    #[error("Signal has been dropped")]
    SignalDropped,
}

/// A specialized Result type for core operations.
pub type Result<T> = std::result::Result<T, SignalError>;
