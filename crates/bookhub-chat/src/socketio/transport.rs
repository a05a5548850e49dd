//! The transport binding: one live Socket.IO connection.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::packet::{EnginePacket, Handshake, SocketPacket, connect_error_message};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::logging::targets;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Something the transport observed on an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A named inbound event. `payload` is the first event argument, or
    /// `null` when the event carried none.
    Event { name: String, payload: Value },
    /// The connection dropped without the client asking for it.
    Closed { reason: String },
}

/// A bidirectional, event-based connection to the chat backend.
///
/// [`ChatClient`](crate::ChatClient) is the only user of a transport and the
/// only component allowed to open or close it.
pub trait Transport: Send + Sync + 'static {
    /// Establish a connection for `user_id`, closing any existing one first.
    ///
    /// Resolves once the connection is ready to carry events. Inbound events
    /// and an eventual unrequested close are reported through `events`, which
    /// belongs to this connection only.
    fn open(
        &self,
        user_id: i64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Tear down the connection. Safe to call when nothing is open. A
    /// requested close is never reported as [`TransportEvent::Closed`].
    fn close(&self);

    /// Fire-and-forget send of a named event. Logged and discarded when the
    /// connection is not open.
    fn emit(&self, event: &str, payload: Value);

    /// Whether a connection is currently open.
    fn is_open(&self) -> bool;
}

enum Command {
    Send(String),
    Close,
}

struct Session {
    commands: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
    sid: String,
}

/// [`Transport`] speaking Socket.IO v5 over an Engine.IO v4 WebSocket.
pub struct SocketIoTransport {
    config: ChatConfig,
    session: Mutex<Option<Session>>,
}

impl SocketIoTransport {
    /// Create a transport for the backend described by `config`.
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// The configuration this transport connects with.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Engine.IO session id of the open connection.
    pub fn session_id(&self) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .filter(|session| session.open.load(Ordering::SeqCst))
            .map(|session| session.sid.clone())
    }

    fn build_request(&self, user_id: i64) -> Result<Request> {
        let url = self.config.socket_url(user_id)?;
        if url.scheme() == "wss" {
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        for (name, value) in &self.config.headers {
            let header_name = http::header::HeaderName::try_from(name.as_str())?;
            let header_value = http::header::HeaderValue::try_from(value.as_str())?;
            headers.insert(header_name, header_value);
        }
        Ok(request)
    }

    async fn handshake(&self, user_id: i64) -> Result<(WsSink, WsSource, Handshake)> {
        let request = self.build_request(user_id)?;
        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut source) = stream.split();

        let handshake = loop {
            match next_packet(&mut source).await? {
                EnginePacket::Open(handshake) => break handshake,
                EnginePacket::Close => {
                    return Err(ChatError::Closed("server closed before open".into()));
                }
                other => {
                    tracing::debug!(target: targets::TRANSPORT, ?other, "ignoring packet before open");
                }
            }
        };

        let namespace = self.config.namespace.as_str();
        let connect = SocketPacket::connect(namespace, json!({ "userId": user_id }));
        send_packet(&mut sink, connect.into_engine()).await?;

        loop {
            match next_packet(&mut source).await? {
                EnginePacket::Ping(data) => send_packet(&mut sink, EnginePacket::Pong(data)).await?,
                EnginePacket::Close => {
                    return Err(ChatError::Closed("server closed during connect".into()));
                }
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect { namespace: ns, .. } if ns == namespace => break,
                    SocketPacket::ConnectError { namespace: ns, data } if ns == namespace => {
                        return Err(ChatError::ConnectRejected(connect_error_message(
                            data.as_ref(),
                        )));
                    }
                    other => {
                        tracing::debug!(target: targets::TRANSPORT, ?other, "ignoring packet during connect");
                    }
                },
                _ => {}
            }
        }

        Ok((sink, source, handshake))
    }
}

impl Transport for SocketIoTransport {
    async fn open(
        &self,
        user_id: i64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<()> {
        self.close();

        tracing::debug!(target: targets::TRANSPORT, url = %self.config.url, user_id, "opening connection");
        let (sink, source, handshake) =
            tokio::time::timeout(self.config.connect_timeout, self.handshake(user_id))
                .await
                .map_err(|_| ChatError::Timeout)??;

        tracing::info!(
            target: targets::TRANSPORT,
            sid = %handshake.sid,
            ping_interval = handshake.ping_interval,
            ping_timeout = handshake.ping_timeout,
            "connected"
        );

        let (commands, command_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let heartbeat = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        tokio::spawn(run_session(SessionIo {
            sink,
            source,
            commands: command_rx,
            events,
            namespace: self.config.namespace.clone(),
            heartbeat,
            open: open.clone(),
        }));

        *self.session.lock() = Some(Session {
            commands,
            open,
            sid: handshake.sid,
        });
        Ok(())
    }

    fn close(&self) {
        if let Some(session) = self.session.lock().take() {
            session.open.store(false, Ordering::SeqCst);
            let _ = session.commands.send(Command::Close);
            tracing::debug!(target: targets::TRANSPORT, sid = %session.sid, "connection closed by client");
        }
    }

    fn emit(&self, event: &str, payload: Value) {
        let session = self.session.lock();
        let Some(session) = session
            .as_ref()
            .filter(|session| session.open.load(Ordering::SeqCst))
        else {
            tracing::error!(target: targets::TRANSPORT, event, "cannot emit, connection is not open");
            return;
        };

        tracing::trace!(target: targets::TRANSPORT, event, %payload, "emit");
        let frame = SocketPacket::event(self.config.namespace.as_str(), event, payload)
            .into_engine()
            .encode();
        if session.commands.send(Command::Send(frame)).is_err() {
            tracing::error!(target: targets::TRANSPORT, event, "cannot emit, connection is gone");
        }
    }

    fn is_open(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| session.open.load(Ordering::SeqCst))
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SocketIoTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoTransport")
            .field("url", &self.config.url)
            .field("namespace", &self.config.namespace)
            .field("open", &self.is_open())
            .finish()
    }
}

struct SessionIo {
    sink: WsSink,
    source: WsSource,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    namespace: String,
    heartbeat: Duration,
    open: Arc<AtomicBool>,
}

async fn run_session(io: SessionIo) {
    let SessionIo {
        mut sink,
        mut source,
        mut commands,
        events,
        namespace,
        heartbeat,
        open,
    } = io;

    let mut deadline = Instant::now() + heartbeat;
    let drop_reason = loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = sink.send(Message::Text(frame.into())).await {
                            break Some(format!("send failed: {e}"));
                        }
                    }
                    Some(Command::Close) | None => {
                        let disconnect = SocketPacket::Disconnect { namespace: namespace.clone() };
                        let _ = sink.send(Message::Text(disconnect.into_engine().encode().into())).await;
                        let _ = sink.send(Message::Close(None)).await;
                        break None;
                    }
                }
            }

            msg = source.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => break Some(close_reason(frame)),
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(target: targets::TRANSPORT, "ignoring binary frame");
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Some(format!("read failed: {e}")),
                    None => break Some("stream ended".to_string()),
                };

                let packet = match EnginePacket::decode(text.as_str()) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::warn!(target: targets::TRANSPORT, error = %e, "dropping undecodable frame");
                        continue;
                    }
                };

                match packet {
                    EnginePacket::Ping(data) => {
                        deadline = Instant::now() + heartbeat;
                        let pong = EnginePacket::Pong(data).encode();
                        if let Err(e) = sink.send(Message::Text(pong.into())).await {
                            break Some(format!("send failed: {e}"));
                        }
                    }
                    EnginePacket::Close => break Some("server closed the session".to_string()),
                    EnginePacket::Message(body) => {
                        if let Some(reason) = handle_socket_packet(&body, &namespace, &events) {
                            break Some(reason);
                        }
                    }
                    other => {
                        tracing::trace!(target: targets::TRANSPORT, ?other, "ignoring packet");
                    }
                }
            }

            _ = tokio::time::sleep_until(deadline) => {
                break Some("ping timeout".to_string());
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    if let Some(reason) = drop_reason {
        tracing::warn!(target: targets::TRANSPORT, %reason, "connection dropped");
        let _ = events.send(TransportEvent::Closed { reason });
    }
}

/// Forward one Socket.IO packet. Returns a drop reason when the server ended
/// the namespace session.
fn handle_socket_packet(
    body: &str,
    namespace: &str,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<String> {
    let packet = match SocketPacket::decode(body) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(target: targets::TRANSPORT, error = %e, "dropping undecodable packet");
            return None;
        }
    };
    if packet.namespace() != namespace {
        tracing::debug!(target: targets::TRANSPORT, namespace = packet.namespace(), "ignoring packet for other namespace");
        return None;
    }

    match packet {
        SocketPacket::Event { name, args, .. } => {
            let payload = args.into_iter().next().unwrap_or(Value::Null);
            tracing::trace!(target: targets::TRANSPORT, event = %name, %payload, "inbound event");
            let _ = events.send(TransportEvent::Event { name, payload });
            None
        }
        SocketPacket::Disconnect { .. } => Some("server disconnected the namespace".to_string()),
        SocketPacket::Binary { attachments, .. } => {
            tracing::debug!(target: targets::TRANSPORT, attachments, "ignoring binary packet");
            None
        }
        other => {
            tracing::debug!(target: targets::TRANSPORT, ?other, "ignoring packet");
            None
        }
    }
}

async fn next_packet(source: &mut WsSource) -> Result<EnginePacket> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(text.as_str()),
            Some(Ok(Message::Close(frame))) => return Err(ChatError::Closed(close_reason(frame))),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ChatError::Closed("stream ended".into())),
        }
    }
}

async fn send_packet(sink: &mut WsSink, packet: EnginePacket) -> Result<()> {
    sink.send(Message::Text(packet.encode().into())).await?;
    Ok(())
}

fn close_reason(frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame>) -> String {
    match frame {
        Some(frame) if !frame.reason.is_empty() => {
            format!("closed by server ({}): {}", frame.code, frame.reason.as_str())
        }
        Some(frame) => format!("closed by server ({})", frame.code),
        None => "closed by server".to_string(),
    }
}
