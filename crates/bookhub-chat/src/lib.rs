//! Realtime messaging client for BookHub.
//!
//! This crate keeps one signed-in user connected to the chat backend and turns
//! whatever the backend sends into a single message shape for UI code:
//!
//! - **Transport**: Socket.IO over WebSocket, behind the [`Transport`] trait
//! - **Normalization**: payloads with any known field spelling or wrapper
//!   become a [`CanonicalMessage`]; payloads without sender and receiver ids
//!   are dropped
//! - **Filtering**: the user's own echoed messages and repeated ids are
//!   suppressed
//! - **Subscriptions**: one callback per [`SubscriptionKey`] (`All` or a
//!   conversation partner), plus unread-count and conversation-update signals
//! - **Lifecycle**: bounded reconnection with exponential backoff and
//!   connection-state notifications
//!
//! # Example
//!
//! ```ignore
//! use bookhub_chat::{ChatClient, ChatConfig, SubscriptionKey};
//!
//! let config = ChatConfig::load_toml("chat.toml")?;
//! let client = ChatClient::new(config);
//!
//! client.on_connection_change(|connected| {
//!     println!("chat {}", if connected { "online" } else { "offline" });
//! });
//! client.on_unread_count(|count| println!("{count} unread"));
//!
//! // Messages exchanged with user 42 only.
//! let thread = client.on_message(42, |msg| println!("{}: {}", msg.sender_name, msg.content));
//!
//! client.connect(7);
//! ```
//!
//! # Inbound events
//!
//! | Event | Effect |
//! |-------|--------|
//! | `new_message`, `message_received` | normalized, echo/duplicate filtered, dispatched |
//! | `message_sent` | normalized, marked read, duplicate filtered, dispatched |
//! | `unread_count_update` | count extracted and emitted |
//! | `conversation_update` | payload emitted verbatim |
//!
//! # Logging
//!
//! The crate logs through `tracing` under the targets in
//! [`logging::targets`]. Nothing is returned to callers for transport
//! failures or malformed payloads; they are only logged.

pub mod chat;
pub mod config;
mod error;
pub mod logging;
pub mod socketio;

pub use chat::{
    CanonicalMessage, ChatClient, ConnectionState, MessageSubscription, OutboundMessage,
    SubscriptionKey, events,
};
pub use config::{ChatConfig, EchoPolicy, MessagingConfig, ReconnectConfig};
pub use error::{ChatError, Result};
pub use socketio::{SocketIoTransport, Transport, TransportEvent};
