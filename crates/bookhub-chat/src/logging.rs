//! Tracing targets used by the messaging client.
//!
//! Every log line this crate writes carries one of these targets, so a
//! subscriber can turn individual subsystems up or down:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("bookhub_chat::transport=debug,bookhub_chat=info")
//!     .init();
//! ```

/// Target names for log filtering.
pub mod targets {
    /// Socket.IO transport: connect, handshake, heartbeat, close.
    pub const TRANSPORT: &str = "bookhub_chat::transport";
    /// Payload normalization and rejected payloads.
    pub const NORMALIZE: &str = "bookhub_chat::normalize";
    /// Echo and duplicate suppression.
    pub const FILTER: &str = "bookhub_chat::filter";
    /// Routing of events to registered callbacks.
    pub const DISPATCH: &str = "bookhub_chat::dispatch";
    /// Connection state transitions and reconnection.
    pub const LIFECYCLE: &str = "bookhub_chat::lifecycle";
}
