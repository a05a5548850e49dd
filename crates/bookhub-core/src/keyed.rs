//! Keyed subscriptions: at most one slot per key.
//!
//! [`KeyedSignal`] is the map-shaped sibling of [`Signal`](crate::Signal).
//! Where a signal holds any number of anonymous slots, a keyed signal holds
//! exactly one slot per key, and subscribing under a key that is already
//! taken silently replaces the previous slot.
//!
//! Emission is filtered: [`KeyedSignal::emit_matching`] invokes only the slots
//! whose key satisfies a predicate. Dispatch follows the same rules as
//! `Signal::emit` (snapshot, re-check before each call, per-slot panic
//! boundary), so unsubscribing takes effect immediately even when it happens
//! inside another slot.
//!
//! # Example
//!
//! ```
//! use bookhub_core::KeyedSignal;
//!
//! let signal = KeyedSignal::<u32, String>::new();
//! let sub = signal.subscribe(7, |text| println!("room 7: {text}"));
//!
//! // Only keys matching the predicate are invoked.
//! signal.emit_matching(&"hello".to_string(), |key| *key == 7);
//!
//! assert!(sub.unsubscribe());
//! assert!(signal.is_empty());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::SignalError;
use crate::logging::targets;
use crate::signal::{Slot, invoke_isolated};

struct Entry<Args> {
    token: u64,
    slot: Slot<Args>,
}

struct KeyedTable<K, Args> {
    entries: BTreeMap<K, Entry<Args>>,
    next_token: u64,
}

impl<K: Ord, Args> KeyedTable<K, Args> {
    fn holds(&self, key: &K, token: u64) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.token == token)
    }
}

/// A map from key to a single slot, with predicate-filtered emission.
///
/// Keys are kept in their natural order, which is also the dispatch order.
pub struct KeyedSignal<K, Args> {
    table: Arc<Mutex<KeyedTable<K, Args>>>,
}

impl<K: Ord + Clone + 'static, Args: 'static> Default for KeyedSignal<K, Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone + 'static, Args: 'static> KeyedSignal<K, Args> {
    /// Create an empty keyed signal.
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(KeyedTable {
                entries: BTreeMap::new(),
                next_token: 0,
            })),
        }
    }

    /// Register `slot` under `key`, replacing any slot already held by the key.
    ///
    /// The returned [`Subscription`] removes this slot, and only this slot:
    /// once the key has been re-subscribed, the older handle becomes inert.
    pub fn subscribe<F>(&self, key: K, slot: F) -> Subscription<K, Args>
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        let mut table = self.table.lock();
        let token = table.next_token;
        table.next_token += 1;
        let replaced = table
            .entries
            .insert(
                key.clone(),
                Entry {
                    token,
                    slot: Arc::new(slot),
                },
            )
            .is_some();
        if replaced {
            tracing::debug!(target: targets::KEYED, "replaced existing subscription for key");
        }

        Subscription {
            table: Arc::downgrade(&self.table),
            key,
            token,
        }
    }

    /// Remove whatever slot is registered under `key`.
    pub fn unsubscribe_key(&self, key: &K) -> bool {
        self.table.lock().entries.remove(key).is_some()
    }

    /// Whether a slot is registered under `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.table.lock().entries.contains_key(key)
    }

    /// The currently registered keys, in dispatch order.
    pub fn keys(&self) -> Vec<K> {
        self.table.lock().entries.keys().cloned().collect()
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether no slots are registered.
    pub fn is_empty(&self) -> bool {
        self.table.lock().entries.is_empty()
    }

    /// Remove every registered slot.
    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }

    /// Invoke every slot whose key satisfies `predicate`.
    ///
    /// Returns the number of slots that ran to completion.
    pub fn emit_matching<P>(&self, args: &Args, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let snapshot: Vec<(K, u64, Slot<Args>)> = self
            .table
            .lock()
            .entries
            .iter()
            .filter(|(key, _)| predicate(*key))
            .map(|(key, entry)| (key.clone(), entry.token, entry.slot.clone()))
            .collect();
        tracing::trace!(target: targets::KEYED, matched = snapshot.len(), "emitting keyed signal");

        let mut completed = 0;
        for (key, token, slot) in snapshot {
            // Unsubscribed or replaced by an earlier slot during this emit.
            if !self.table.lock().holds(&key, token) {
                continue;
            }
            if invoke_isolated(slot.as_ref(), args, "keyed slot") {
                completed += 1;
            }
        }
        completed
    }
}

impl<K, Args> fmt::Debug for KeyedSignal<K, Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedSignal")
            .field("entries", &self.table.lock().entries.len())
            .finish()
    }
}

/// Handle returned by [`KeyedSignal::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to end it.
pub struct Subscription<K, Args> {
    table: Weak<Mutex<KeyedTable<K, Args>>>,
    key: K,
    token: u64,
}

impl<K: Ord, Args> Subscription<K, Args> {
    /// The key this subscription was registered under.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether this handle's slot is still the one registered for its key.
    pub fn is_active(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.lock().holds(&self.key, self.token))
    }

    /// Remove this subscription.
    ///
    /// Returns `true` if the slot was still registered and has been removed.
    /// No further dispatch reaches the slot once this returns.
    pub fn unsubscribe(self) -> bool {
        self.try_unsubscribe().is_ok()
    }

    /// Remove this subscription, reporting why nothing was removed.
    ///
    /// # Errors
    ///
    /// * [`SignalError::SignalDropped`] if the keyed signal no longer exists
    /// * [`SignalError::InvalidConnection`] if the slot was already removed or
    ///   replaced by a newer subscription under the same key
    pub fn try_unsubscribe(self) -> Result<(), SignalError> {
        let table = self.table.upgrade().ok_or(SignalError::SignalDropped)?;
        let mut table = table.lock();
        if !table.holds(&self.key, self.token) {
            return Err(SignalError::InvalidConnection);
        }
        table.entries.remove(&self.key);
        Ok(())
    }
}

impl<K: fmt::Debug, Args> fmt::Debug for Subscription<K, Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}
