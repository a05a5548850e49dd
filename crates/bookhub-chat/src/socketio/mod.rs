//! Socket.IO client transport.
//!
//! [`packet`] holds the Engine.IO / Socket.IO text codec, [`transport`] the
//! [`Transport`] seam and its WebSocket implementation.

pub mod packet;
pub mod transport;

pub use packet::{EnginePacket, Handshake, SocketPacket};
pub use transport::{SocketIoTransport, Transport, TransportEvent};
