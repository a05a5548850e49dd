//! The messaging client and the pieces it is built from.

pub mod client;
pub mod filter;
pub mod lifecycle;
pub mod message;
pub mod normalize;
pub mod registry;

pub use client::ChatClient;
pub use filter::{MessageFilter, Stream, Verdict};
pub use lifecycle::{ConnectionState, Lifecycle, NextStep, Transition};
pub use message::{CanonicalMessage, OutboundMessage};
pub use normalize::{NormalizeError, normalize, unread_count};
pub use registry::{MessageSubscription, Registry, SubscriptionKey};

/// Wire event names.
pub mod events {
    /// Inbound chat message.
    pub const NEW_MESSAGE: &str = "new_message";
    /// Inbound chat message, alternate name.
    pub const MESSAGE_RECEIVED: &str = "message_received";
    /// Confirmation of a message this session sent.
    pub const MESSAGE_SENT: &str = "message_sent";
    pub const UNREAD_COUNT_UPDATE: &str = "unread_count_update";
    pub const CONVERSATION_UPDATE: &str = "conversation_update";
    /// Outbound chat message.
    pub const SEND_MESSAGE: &str = "send_message";
}
