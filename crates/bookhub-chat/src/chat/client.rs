//! The messaging client.

use std::sync::{Arc, Weak};

use bookhub_core::{ConnectionId, Signal};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events;
use super::filter::{MessageFilter, Stream, Verdict};
use super::lifecycle::{ConnectionState, Lifecycle, NextStep, Transition};
use super::message::{CanonicalMessage, OutboundMessage};
use super::normalize::{normalize, unread_count};
use super::registry::{MessageSubscription, Registry, SubscriptionKey};
use crate::config::{ChatConfig, MessagingConfig, ReconnectConfig};
use crate::error::{ChatError, Result};
use crate::logging::targets;
use crate::socketio::{SocketIoTransport, Transport, TransportEvent};

/// Realtime messaging client for one signed-in user at a time.
///
/// The client owns the transport and a background driver task. The driver
/// opens the connection, announces the user with the join event, routes
/// inbound events to subscribers, and reconnects with backoff when the
/// connection drops. Every public method returns immediately; the outcome
/// of `connect` and `disconnect` is observed through
/// [`connection_changed`](Self::connection_changed) and
/// [`state_changed`](Self::state_changed).
///
/// Callbacks run on the driver task, one event at a time, in the order the
/// transport delivered the events. A panicking callback is logged and does
/// not affect other callbacks.
///
/// Clones share the same session.
///
/// # Example
///
/// ```ignore
/// let client = ChatClient::new(ChatConfig::new("https://chat.bookhub.example"));
///
/// client.on_connection_change(|connected| println!("connected: {connected}"));
/// let inbox = client.on_message(SubscriptionKey::All, |msg| {
///     println!("{}: {}", msg.sender_name, msg.content);
/// });
///
/// client.connect(1);
/// // later
/// client.send(1, 2, "Is the book still available?")?;
/// inbox.unsubscribe();
/// client.dispose();
/// ```
pub struct ChatClient<T: Transport = SocketIoTransport> {
    shared: Arc<Shared<T>>,
}

impl ChatClient<SocketIoTransport> {
    /// Create a client talking Socket.IO to the backend in `config`.
    pub fn new(config: ChatConfig) -> Self {
        let reconnect = config.reconnect.clone();
        let messaging = config.messaging.clone();
        Self::with_transport(SocketIoTransport::new(config), reconnect, messaging)
    }
}

impl<T: Transport> ChatClient<T> {
    /// Create a client over a custom transport.
    pub fn with_transport(
        transport: T,
        reconnect: ReconnectConfig,
        messaging: MessagingConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                filter: Mutex::new(MessageFilter::new(&messaging)),
                messaging,
                lifecycle: Mutex::new(Lifecycle::new(reconnect)),
                session: Mutex::new(SessionSlot::default()),
                transitions: ReentrantMutex::new(()),
                opening: tokio::sync::Mutex::new(()),
                registry: Registry::new(),
                connection_changed: Signal::new(),
                state_changed: Signal::new(),
            }),
        }
    }

    /// Start a session for `user_id`.
    ///
    /// An existing session is torn down first. Message subscriptions survive
    /// the switch; use [`disconnect`](Self::disconnect) for a full reset.
    pub fn connect(&self, user_id: i64) {
        let shared = &self.shared;
        let _order = shared.transitions.lock();
        let (generation, transition) = {
            let mut session = shared.session.lock();
            if let Some(driver) = session.driver.take() {
                driver.abort();
            }
            shared.transport.close();
            session.user_id = Some(user_id);
            session.generation += 1;
            (session.generation, shared.lifecycle.lock().begin_connect())
        };
        shared.filter.lock().clear();

        tracing::info!(target: targets::LIFECYCLE, user_id, "connecting");
        shared.notify(transition);
        self.start_driver(user_id, generation);
    }

    /// End the session.
    ///
    /// Closes the connection and removes every message, unread-count and
    /// conversation callback. Connection-change listeners stay registered.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        let _order = shared.transitions.lock();
        let transition = {
            let mut session = shared.session.lock();
            if let Some(driver) = session.driver.take() {
                driver.abort();
            }
            shared.transport.close();
            session.user_id = None;
            session.generation += 1;
            shared.lifecycle.lock().reset()
        };
        shared.filter.lock().clear();
        shared.registry.clear();

        if transition.changed() {
            tracing::info!(target: targets::LIFECYCLE, "disconnected");
        }
        shared.notify(transition);
    }

    /// [`disconnect`](Self::disconnect) and drop every state listener too.
    ///
    /// The client can still be connected again afterwards.
    pub fn dispose(&self) {
        self.disconnect();
        self.shared.connection_changed.disconnect_all();
        self.shared.state_changed.disconnect_all();
    }

    /// Close and immediately reopen the connection of the current session.
    ///
    /// Keeps the user and every subscription, and restarts the retry budget.
    pub fn force_reconnect(&self) {
        let shared = &self.shared;
        let _order = shared.transitions.lock();
        let (user_id, generation, transition) = {
            let mut session = shared.session.lock();
            let Some(user_id) = session.user_id else {
                tracing::warn!(target: targets::LIFECYCLE, "force_reconnect without a session");
                return;
            };
            if let Some(driver) = session.driver.take() {
                driver.abort();
            }
            shared.transport.close();
            session.generation += 1;
            (
                user_id,
                session.generation,
                shared.lifecycle.lock().begin_forced_reconnect(),
            )
        };

        tracing::info!(target: targets::LIFECYCLE, user_id, "forcing reconnect");
        shared.notify(transition);
        self.start_driver(user_id, generation);
    }

    /// Send a message on `send_message`.
    ///
    /// Fails with [`ChatError::NotConnected`] (and an error log) while the
    /// session is not connected; nothing is queued.
    pub fn send(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: impl Into<String>,
    ) -> Result<OutboundMessage> {
        if !self.is_connected() || !self.shared.transport.is_open() {
            tracing::error!(
                target: targets::TRANSPORT,
                sender_id,
                receiver_id,
                state = %self.state(),
                "cannot send message while not connected"
            );
            return Err(ChatError::NotConnected);
        }

        let message = OutboundMessage::new(sender_id, receiver_id, content);
        self.shared
            .transport
            .emit(events::SEND_MESSAGE, message.to_payload());
        Ok(message)
    }

    /// Register `callback` for messages matching `key`.
    ///
    /// A key holds one callback; registering again under the same key
    /// replaces the previous callback.
    pub fn on_message<F>(&self, key: impl Into<SubscriptionKey>, callback: F) -> MessageSubscription
    where
        F: Fn(&CanonicalMessage) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe(key.into(), callback)
    }

    /// Register a listener for entering (`true`) and leaving (`false`) the
    /// connected state. Reaching `Failed` also reports `false`.
    pub fn on_connection_change<F>(&self, callback: F) -> ConnectionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared
            .connection_changed
            .connect(move |connected| callback(*connected))
    }

    /// Register a listener for unread-count updates.
    pub fn on_unread_count<F>(&self, callback: F) -> ConnectionId
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.shared
            .registry
            .unread_count_changed
            .connect(move |count| callback(*count))
    }

    /// Register a listener for conversation-summary updates.
    pub fn on_conversation_update<F>(&self, callback: F) -> ConnectionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.registry.conversation_updated.connect(callback)
    }

    /// Connected / not connected notifications.
    pub fn connection_changed(&self) -> &Signal<bool> {
        &self.shared.connection_changed
    }

    /// Every [`ConnectionState`] transition.
    pub fn state_changed(&self) -> &Signal<ConnectionState> {
        &self.shared.state_changed
    }

    /// Unread-count notifications.
    pub fn unread_count_changed(&self) -> &Signal<u32> {
        &self.shared.registry.unread_count_changed
    }

    /// Conversation-summary notifications.
    pub fn conversation_updated(&self) -> &Signal<Value> {
        &self.shared.registry.conversation_updated
    }

    /// The subscriber registries.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The user of the current session.
    pub fn current_user_id(&self) -> Option<i64> {
        self.shared.session.lock().user_id
    }

    pub fn messaging_config(&self) -> &MessagingConfig {
        &self.shared.messaging
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    fn start_driver(&self, user_id: i64, generation: u64) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(drive(Arc::downgrade(&self.shared), user_id, generation));
                let mut session = self.shared.session.lock();
                if session.generation == generation {
                    session.driver = Some(task);
                } else {
                    task.abort();
                }
            }
            Err(_) => {
                tracing::error!(
                    target: targets::LIFECYCLE,
                    error = %ChatError::NoRuntime,
                    "cannot start connection"
                );
                self.shared
                    .apply(generation, |lifecycle| (lifecycle.fail(), ()));
            }
        }
    }
}

impl<T: Transport> Clone for ChatClient<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for ChatClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("user_id", &self.current_user_id())
            .field("state", &self.state())
            .field("registry", &self.shared.registry)
            .finish()
    }
}

#[derive(Default)]
struct SessionSlot {
    user_id: Option<i64>,
    driver: Option<JoinHandle<()>>,
    /// Bumped whenever a session starts or ends; a driver acts only while its
    /// generation is current.
    generation: u64,
}

struct Shared<T> {
    transport: T,
    messaging: MessagingConfig,
    lifecycle: Mutex<Lifecycle>,
    session: Mutex<SessionSlot>,
    filter: Mutex<MessageFilter>,
    /// Held while applying and announcing a transition so listeners observe
    /// transitions in the order they happened. Reentrant: listeners may call
    /// back into the client.
    transitions: ReentrantMutex<()>,
    /// Held by a driver from its generation check until its connection is
    /// either announced or closed, so at most one `open` is in flight.
    opening: tokio::sync::Mutex<()>,
    registry: Registry,
    connection_changed: Signal<bool>,
    state_changed: Signal<ConnectionState>,
}

impl<T: Transport> Shared<T> {
    /// Apply a lifecycle step for the driver of `generation` and announce it.
    /// Returns `None` when that driver is stale.
    fn apply<R>(
        &self,
        generation: u64,
        step: impl FnOnce(&mut Lifecycle) -> (Transition, R),
    ) -> Option<R> {
        let _order = self.transitions.lock();
        let (transition, result) = {
            let session = self.session.lock();
            if session.generation != generation {
                return None;
            }
            let mut lifecycle = self.lifecycle.lock();
            step(&mut *lifecycle)
        };
        self.notify(transition);
        Some(result)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session.lock().generation == generation
    }

    fn notify(&self, transition: Transition) {
        if !transition.changed() {
            return;
        }
        tracing::debug!(
            target: targets::LIFECYCLE,
            from = %transition.from,
            to = %transition.to,
            "connection state changed"
        );
        self.state_changed.emit(transition.to);
        if let Some(connected) = transition.connection_signal() {
            self.connection_changed.emit(connected);
        }
    }

    /// Route one inbound event to the matching subscribers.
    fn route(&self, name: &str, payload: Value, user_id: i64) {
        match name {
            events::NEW_MESSAGE | events::MESSAGE_RECEIVED => {
                self.deliver(name, &payload, Stream::Received, user_id);
            }
            events::MESSAGE_SENT => self.deliver(name, &payload, Stream::Sent, user_id),
            events::UNREAD_COUNT_UPDATE => {
                self.registry.dispatch_unread_count(unread_count(&payload));
            }
            events::CONVERSATION_UPDATE => {
                self.registry.dispatch_conversation_update(payload);
            }
            other => {
                tracing::debug!(target: targets::DISPATCH, event = other, "ignoring unhandled event");
            }
        }
    }

    fn deliver(&self, event: &str, payload: &Value, stream: Stream, user_id: i64) {
        let sent = stream == Stream::Sent;
        let mut message = match normalize(payload, sent) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(target: targets::NORMALIZE, event, error = %e, "dropping malformed message");
                tracing::trace!(target: targets::NORMALIZE, %payload, "malformed payload");
                return;
            }
        };
        if sent {
            message.is_read = true;
        }

        let verdict = self.filter.lock().check(stream, &message, Some(user_id));
        if verdict == Verdict::Deliver {
            self.registry.dispatch_message(&message, Some(user_id));
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(driver) = self.session.get_mut().driver.take() {
            driver.abort();
        }
    }
}

/// The driver task: connect, pump events, reconnect.
async fn drive<T: Transport>(shared: Weak<Shared<T>>, user_id: i64, generation: u64) {
    loop {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let opened = {
            let Some(strong) = shared.upgrade() else {
                return;
            };
            let _opening = strong.opening.lock().await;
            if !strong.is_current(generation) {
                return;
            }
            let opened = strong.transport.open(user_id, events_tx).await;
            if opened.is_ok() {
                if strong
                    .apply(generation, |lifecycle| (lifecycle.connected(), ()))
                    .is_none()
                {
                    // The session ended while the handshake was finishing.
                    // No newer driver can have opened while `_opening` is held.
                    strong.transport.close();
                    tracing::debug!(target: targets::LIFECYCLE, user_id, "closed superseded connection");
                    return;
                }
                tracing::info!(target: targets::LIFECYCLE, user_id, "connected");
                strong
                    .transport
                    .emit(&strong.messaging.join_event, json!({ "userId": user_id }));
            }
            opened
        };

        match opened {
            Ok(()) => {
                let reason = loop {
                    let event = events_rx.recv().await;
                    let Some(strong) = shared.upgrade() else {
                        return;
                    };
                    match event {
                        Some(TransportEvent::Event { name, payload }) => {
                            strong.route(&name, payload, user_id);
                        }
                        Some(TransportEvent::Closed { reason }) => break reason,
                        None => break "transport event channel closed".to_string(),
                    }
                };
                tracing::warn!(target: targets::LIFECYCLE, %reason, "connection lost");
            }
            Err(e) => {
                tracing::warn!(target: targets::LIFECYCLE, error = %e, "connection attempt failed");
            }
        }

        let next = {
            let Some(strong) = shared.upgrade() else {
                return;
            };
            let Some(next) = strong.apply(generation, Lifecycle::connection_lost) else {
                return;
            };
            next
        };

        match next {
            NextStep::Retry { attempt, delay } => {
                tracing::info!(
                    target: targets::LIFECYCLE,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                tokio::time::sleep(delay).await;
            }
            NextStep::GiveUp { attempts } => {
                tracing::error!(
                    target: targets::LIFECYCLE,
                    attempts,
                    "reconnection attempts exhausted, giving up"
                );
                return;
            }
        }
    }
}
