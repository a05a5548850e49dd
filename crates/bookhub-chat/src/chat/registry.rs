//! Subscriber registries.

use std::fmt;
use std::str::FromStr;

use bookhub_core::{KeyedSignal, Signal, Subscription};
use serde_json::Value;

use super::message::CanonicalMessage;
use crate::logging::targets;

/// The key a message callback is registered under.
///
/// `All` receives every delivered message. `User(id)` receives messages
/// where `id` is the sender or the receiver, plus every message while `id`
/// is the session's own user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriptionKey {
    All,
    User(i64),
}

impl SubscriptionKey {
    /// Whether a callback under this key receives `message`.
    pub fn matches(&self, message: &CanonicalMessage, current_user: Option<i64>) -> bool {
        match *self {
            Self::All => true,
            Self::User(id) => message.involves(id) || current_user == Some(id),
        }
    }
}

impl From<i64> for SubscriptionKey {
    fn from(user_id: i64) -> Self {
        Self::User(user_id)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::User(id) => write!(f, "{id}"),
        }
    }
}

/// Error parsing a [`SubscriptionKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid subscription key '{0}', expected \"all\" or a user id")]
pub struct ParseKeyError(String);

impl FromStr for SubscriptionKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse()
            .map(Self::User)
            .map_err(|_| ParseKeyError(s.to_string()))
    }
}

/// Handle to a message callback; see [`Subscription::unsubscribe`].
pub type MessageSubscription = Subscription<SubscriptionKey, CanonicalMessage>;

/// All callbacks registered by UI code.
pub struct Registry {
    messages: KeyedSignal<SubscriptionKey, CanonicalMessage>,
    /// Emitted with the new count on every unread counter update.
    pub unread_count_changed: Signal<u32>,
    /// Emitted with the raw payload of every conversation update.
    pub conversation_updated: Signal<Value>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            messages: KeyedSignal::new(),
            unread_count_changed: Signal::new(),
            conversation_updated: Signal::new(),
        }
    }

    /// Register `callback` under `key`, replacing any callback already there.
    pub fn subscribe<F>(&self, key: SubscriptionKey, callback: F) -> MessageSubscription
    where
        F: Fn(&CanonicalMessage) + Send + Sync + 'static,
    {
        tracing::debug!(target: targets::DISPATCH, %key, "message subscription added");
        self.messages.subscribe(key, callback)
    }

    /// Whether a message callback is registered under `key`.
    pub fn is_subscribed(&self, key: SubscriptionKey) -> bool {
        self.messages.contains_key(&key)
    }

    /// Number of registered message callbacks.
    pub fn message_subscriber_count(&self) -> usize {
        self.messages.len()
    }

    /// Invoke every message callback whose key matches. Returns how many
    /// callbacks completed.
    pub fn dispatch_message(&self, message: &CanonicalMessage, current_user: Option<i64>) -> usize {
        let delivered = self
            .messages
            .emit_matching(message, |key| key.matches(message, current_user));
        tracing::debug!(target: targets::DISPATCH, id = %message.id, delivered, "message dispatched");
        delivered
    }

    pub fn dispatch_unread_count(&self, count: u32) -> usize {
        tracing::debug!(target: targets::DISPATCH, count, "unread count dispatched");
        self.unread_count_changed.emit(count)
    }

    pub fn dispatch_conversation_update(&self, payload: Value) -> usize {
        tracing::debug!(target: targets::DISPATCH, "conversation update dispatched");
        self.conversation_updated.emit(payload)
    }

    /// Drop every message, unread and conversation callback.
    pub fn clear(&self) {
        self.messages.clear();
        self.unread_count_changed.disconnect_all();
        self.conversation_updated.disconnect_all();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("messages", &self.messages.len())
            .field("unread", &self.unread_count_changed.connection_count())
            .field("conversations", &self.conversation_updated.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(sender_id: i64, receiver_id: i64) -> CanonicalMessage {
        CanonicalMessage {
            id: format!("{sender_id}-{receiver_id}"),
            sender_id,
            receiver_id,
            content: "hi".into(),
            created_at: "2024-03-01T10:00:00.000Z".into(),
            is_read: false,
            sender_name: format!("User {sender_id}"),
            receiver_name: format!("User {receiver_id}"),
        }
    }

    fn counter(registry: &Registry, key: SubscriptionKey) -> (Arc<AtomicUsize>, MessageSubscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let subscription = registry.subscribe(key, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (count, subscription)
    }

    #[test]
    fn test_key_matching() {
        let msg = message(42, 7);
        assert!(SubscriptionKey::All.matches(&msg, Some(7)));
        assert!(SubscriptionKey::User(42).matches(&msg, Some(7)));
        assert!(SubscriptionKey::User(7).matches(&msg, Some(7)));
        assert!(!SubscriptionKey::User(99).matches(&msg, Some(7)));
        assert!(SubscriptionKey::User(99).matches(&msg, Some(99)));
        assert!(!SubscriptionKey::User(99).matches(&msg, None));
    }

    #[test]
    fn test_key_parse_and_display() {
        assert_eq!("all".parse::<SubscriptionKey>(), Ok(SubscriptionKey::All));
        assert_eq!("ALL".parse::<SubscriptionKey>(), Ok(SubscriptionKey::All));
        assert_eq!(" 42 ".parse::<SubscriptionKey>(), Ok(SubscriptionKey::User(42)));
        assert!("bob".parse::<SubscriptionKey>().is_err());
        assert_eq!(SubscriptionKey::All.to_string(), "all");
        assert_eq!(SubscriptionKey::from(5).to_string(), "5");
    }

    #[test]
    fn test_dispatch_isolation_by_key() {
        let registry = Registry::new();
        let (all, _all_sub) = counter(&registry, SubscriptionKey::All);
        let (partner, _partner_sub) = counter(&registry, SubscriptionKey::User(42));

        assert_eq!(registry.dispatch_message(&message(42, 7), Some(7)), 2);
        assert_eq!(registry.dispatch_message(&message(99, 7), Some(7)), 1);

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(partner.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resubscribe_replaces() {
        let registry = Registry::new();
        let (first, first_sub) = counter(&registry, SubscriptionKey::All);
        let (second, _second_sub) = counter(&registry, SubscriptionKey::All);
        assert_eq!(registry.message_subscriber_count(), 1);

        registry.dispatch_message(&message(1, 2), None);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // The replaced handle must not remove the newer callback.
        assert!(!first_sub.unsubscribe());
        assert!(registry.is_subscribed(SubscriptionKey::All));
    }

    #[test]
    fn test_unsubscribe_is_immediate() {
        let registry = Registry::new();
        let (count, subscription) = counter(&registry, SubscriptionKey::All);
        registry.dispatch_message(&message(1, 2), None);
        assert!(subscription.unsubscribe());
        registry.dispatch_message(&message(1, 2), None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_block_siblings() {
        let registry = Registry::new();
        let _bad = registry.subscribe(SubscriptionKey::All, |_| panic!("broken widget"));
        let (count, _sub) = counter(&registry, SubscriptionKey::User(1));
        assert_eq!(registry.dispatch_message(&message(1, 2), None), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_secondary_signals_and_clear() {
        let registry = Registry::new();
        let counts = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let counts_clone = counts.clone();
        registry
            .unread_count_changed
            .connect(move |count| counts_clone.lock().push(*count));
        let updates = Arc::new(AtomicUsize::new(0));
        let updates_clone = updates.clone();
        registry.conversation_updated.connect(move |payload| {
            assert_eq!(payload["conversationId"], 3);
            updates_clone.fetch_add(1, Ordering::SeqCst);
        });
        let (_messages, _sub) = counter(&registry, SubscriptionKey::All);

        registry.dispatch_unread_count(4);
        registry.dispatch_conversation_update(serde_json::json!({ "conversationId": 3 }));
        assert_eq!(*counts.lock(), vec![4]);
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        registry.clear();
        assert_eq!(registry.message_subscriber_count(), 0);
        assert_eq!(registry.dispatch_unread_count(5), 0);
        assert_eq!(registry.dispatch_conversation_update(Value::Null), 0);
    }
}
