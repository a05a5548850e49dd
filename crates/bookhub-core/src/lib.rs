//! Core callback plumbing for BookHub realtime clients.
//!
//! This crate provides the pieces every higher layer uses to notify UI code:
//!
//! - **Signal/Slot System**: [`Signal`] fans one notification out to any number
//!   of callbacks, each isolated from the others' panics
//! - **Keyed Subscriptions**: [`KeyedSignal`] holds exactly one callback per
//!   key and dispatches only to keys matching a predicate
//!
//! # Signal/Slot Example
//!
//! ```
//! use bookhub_core::Signal;
//!
//! let connection_changed = Signal::<bool>::new();
//! let id = connection_changed.connect(|connected| {
//!     println!("connected: {connected}");
//! });
//! connection_changed.emit(true);
//! connection_changed.disconnect(id);
//! ```

mod error;
pub mod keyed;
pub mod logging;
pub mod signal;

pub use error::{Result, SignalError};
pub use keyed::{KeyedSignal, Subscription};
pub use signal::{ConnectionId, Signal};
