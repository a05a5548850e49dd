//! Shared helpers for the messaging client integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bookhub_chat::{ChatClient, ChatError, MessagingConfig, ReconnectConfig, Result};
use bookhub_chat::{Transport, TransportEvent};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Install a test subscriber so `RUST_LOG`-style output shows up with
/// `cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct MockState {
    failures_left: Mutex<u32>,
    opens: AtomicUsize,
    open_times: Mutex<Vec<Instant>>,
    user_ids: Mutex<Vec<i64>>,
    sink: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    open: AtomicBool,
    stall_next_open: Mutex<Option<Duration>>,
    emitted: Mutex<Vec<(String, Value)>>,
}

/// In-memory [`Transport`]: records what the client does and lets the test
/// play the server.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_next(&self, count: u32) {
        *self.state.failures_left.lock() = count;
    }

    /// Block the thread running the next `open` for `duration` right before
    /// it succeeds, the way a handshake's last leg finishes without yielding.
    pub fn stall_next_open(&self, duration: Duration) {
        *self.state.stall_next_open.lock() = Some(duration);
    }

    /// Deliver an inbound event on the open connection.
    pub fn inject(&self, name: &str, payload: Value) -> bool {
        self.state.sink.lock().as_ref().is_some_and(|sink| {
            sink.send(TransportEvent::Event {
                name: name.to_string(),
                payload,
            })
            .is_ok()
        })
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self, reason: &str) {
        self.state.open.store(false, Ordering::SeqCst);
        if let Some(sink) = self.state.sink.lock().take() {
            let _ = sink.send(TransportEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.state.open_times.lock().clone()
    }

    pub fn user_ids(&self) -> Vec<i64> {
        self.state.user_ids.lock().clone()
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.state.emitted.lock().clone()
    }

    pub fn emitted_named(&self, name: &str) -> Vec<Value> {
        self.state
            .emitted
            .lock()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl Transport for MockTransport {
    async fn open(
        &self,
        user_id: i64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<()> {
        self.close();
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.open_times.lock().push(Instant::now());
        self.state.user_ids.lock().push(user_id);

        let stall = self.state.stall_next_open.lock().take();
        if let Some(stall) = stall {
            std::thread::sleep(stall);
        }

        {
            let mut failures_left = self.state.failures_left.lock();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(ChatError::Closed("connection refused".into()));
            }
        }

        *self.state.sink.lock() = Some(events);
        self.state.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.state.open.store(false, Ordering::SeqCst);
        self.state.sink.lock().take();
    }

    fn emit(&self, event: &str, payload: Value) {
        if self.is_open() {
            self.state.emitted.lock().push((event.to_string(), payload));
        }
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }
}

/// A client over a fresh mock transport with default settings.
pub fn mock_client() -> (ChatClient<MockTransport>, MockTransport) {
    mock_client_with(ReconnectConfig::default(), MessagingConfig::default())
}

pub fn mock_client_with(
    reconnect: ReconnectConfig,
    messaging: MessagingConfig,
) -> (ChatClient<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    let client = ChatClient::with_transport(transport.clone(), reconnect, messaging);
    (client, transport)
}

/// Record every value a callback receives.
#[derive(Clone)]
pub struct Recorder<T> {
    values: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, value: T) {
        self.values.lock().push(value);
    }

    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Give the driver task a chance to drain pending events.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
