//! Fan-out notifications for connection status, unread counts and
//! conversation updates.
//!
//! A [`Signal`] owns a table of slots keyed by [`ConnectionId`]. Emitting
//! calls every slot on the emitting thread, in slot-table order.
//!
//! # Dispatch Rules
//!
//! Each slot runs behind its own panic boundary. A panicking slot is logged
//! at `error` level and skipped; its siblings still run and the slot stays
//! connected.
//!
//! The slot table is copied before dispatch and each slot is looked up again
//! right before it runs, so slots may connect or disconnect while an emit is
//! in progress:
//!
//! - a slot removed mid-emit is not called afterwards, even by the running emit
//! - a slot added mid-emit is first called by the next emit
//!
//! # Example
//!
//! ```
//! use bookhub_core::Signal;
//!
//! let unread_changed = Signal::<u32>::new();
//! let id = unread_changed.connect(|count| println!("{count} unread"));
//! assert_eq!(unread_changed.emit(3), 1);
//! unread_changed.disconnect(id);
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// Identifies one slot connected to a [`Signal`].
    ///
    /// Pass it to [`Signal::disconnect`] to remove the slot. Ids are never
    /// reused, so a stale id simply fails to disconnect anything.
    pub struct ConnectionId;
}

/// A shareable, type-erased slot.
pub(crate) type Slot<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// Multi-subscriber notification point.
///
/// `Signal<Args>` is `Send + Sync`; share it behind an `Arc` or embed it in
/// a shared struct.
pub struct Signal<Args> {
    slots: Mutex<SlotMap<ConnectionId, Slot<Args>>>,
}

impl<Args: 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: 'static> Signal<Args> {
    /// An empty signal.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Register `slot`. It runs on every later emit until disconnected.
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.slots.lock().insert(Arc::new(slot))
    }

    /// Remove one slot. Returns `false` if `id` was not connected.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.slots.lock().remove(id).is_some()
    }

    /// Remove every slot.
    pub fn disconnect_all(&self) {
        self.slots.lock().clear();
    }

    pub fn connection_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Call every connected slot with `args`.
    ///
    /// Returns how many slots returned normally.
    #[tracing::instrument(skip_all, target = "bookhub_core::signal", level = "trace")]
    pub fn emit(&self, args: Args) -> usize {
        let pending: Vec<(ConnectionId, Slot<Args>)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (id, Arc::clone(slot)))
            .collect();
        tracing::trace!(target: targets::SIGNAL, slots = pending.len(), "emit");

        pending
            .into_iter()
            .filter(|(id, _)| self.slots.lock().contains_key(*id))
            .filter(|(_, slot)| invoke_isolated(slot.as_ref(), &args, "signal slot"))
            .count()
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.slots.lock().len())
            .finish()
    }
}

/// Run `slot` behind a panic boundary. `true` if it returned normally.
pub(crate) fn invoke_isolated<Args>(
    slot: &(dyn Fn(&Args) + Send + Sync),
    args: &Args,
    context: &str,
) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| slot(args))) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                target: targets::SIGNAL,
                context,
                panic = %panic_message(payload.as_ref()),
                "slot panicked during dispatch"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
