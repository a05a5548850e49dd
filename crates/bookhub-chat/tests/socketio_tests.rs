//! Wire-level tests against a local WebSocket server that plays the
//! Socket.IO backend one frame at a time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bookhub_chat::{
    CanonicalMessage, ChatClient, ChatConfig, ConnectionState, SocketIoTransport, SubscriptionKey,
    Transport, TransportEvent,
};
use common::{Recorder, init_tracing, wait_until};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

const WAIT: Duration = Duration::from_secs(3);
const CLOSED: &str = "<close>";

struct TestServer {
    url: String,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    /// Request URI and `X-Client` header of the WebSocket handshake.
    handshake: Arc<Mutex<Option<(String, Option<String>)>>>,
}

impl TestServer {
    async fn next_frame(&mut self) -> String {
        tokio::time::timeout(WAIT, self.incoming.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("server task ended")
    }

    fn send(&self, frame: &str) {
        self.outgoing.send(frame.to_string()).unwrap();
    }
}

fn open_packet(ping_interval: u64, ping_timeout: u64) -> String {
    format!(
        r#"0{{"sid":"test-sid","upgrades":[],"pingInterval":{ping_interval},"pingTimeout":{ping_timeout},"maxPayload":1000000}}"#
    )
}

/// Accept one WebSocket connection. The server sends `open` (if any) right
/// after the handshake, then relays frames between the socket and the test.
async fn start_server(open: Option<String>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (incoming_tx, incoming) = mpsc::unbounded_channel();
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
    let handshake = Arc::new(Mutex::new(None));
    let handshake_clone = handshake.clone();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let client = request
                .headers()
                .get("x-client")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            *handshake_clone.lock() = Some((request.uri().to_string(), client));
            Ok(response)
        };
        let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
            return;
        };
        let (mut sink, mut source) = ws.split();
        if let Some(open) = open {
            let _ = sink.send(Message::Text(open.into())).await;
        }

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = incoming_tx.send(text.as_str().to_string());
                    }
                    Some(Ok(Message::Close(_))) => {
                        let _ = incoming_tx.send(CLOSED.to_string());
                        break;
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
                frame = outgoing_rx.recv() => match frame {
                    Some(frame) if frame == CLOSED => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Some(frame) => {
                        let _ = sink.send(Message::Text(frame.into())).await;
                    }
                    None => break,
                },
            }
        }
    });

    TestServer {
        url: format!("http://{addr}"),
        incoming,
        outgoing,
        handshake,
    }
}

fn event_frame(frame: &str) -> (String, Value) {
    let body = frame.strip_prefix("42").expect("not an event frame");
    let mut array: Vec<Value> = serde_json::from_str(body).unwrap();
    let name = array.remove(0).as_str().unwrap().to_string();
    (name, array.into_iter().next().unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_chat_session_over_socketio() {
    init_tracing();
    let mut server = start_server(Some(open_packet(25000, 20000))).await;
    let config = ChatConfig::new(server.url.as_str())
        .header("X-Client", "bookhub-test")
        .no_reconnect();
    let client = ChatClient::new(config);
    let received = Recorder::<CanonicalMessage>::new();
    let received_clone = received.clone();
    let _inbox = client.on_message(SubscriptionKey::All, move |msg| received_clone.push(msg.clone()));

    client.connect(1);
    assert_eq!(server.next_frame().await, r#"40{"userId":1}"#);
    server.send(r#"40{"sid":"ns-sid"}"#);
    assert_eq!(server.next_frame().await, r#"42["join",{"userId":1}]"#);
    assert!(wait_until(WAIT, || client.is_connected()).await);
    assert_eq!(client.transport().session_id().as_deref(), Some("test-sid"));

    let (uri, header) = server.handshake.lock().clone().unwrap();
    assert_eq!(uri, "/socket.io/?EIO=4&transport=websocket&userId=1");
    assert_eq!(header.as_deref(), Some("bookhub-test"));

    server.send("2");
    assert_eq!(server.next_frame().await, "3");

    server.send(
        r#"42["message_received",{"senderId":2,"receiverId":1,"content":"hi","sender_name":"Bob"}]"#,
    );
    assert!(wait_until(WAIT, || received.len() == 1).await);
    let message = &received.values()[0];
    assert_eq!((message.sender_id, message.receiver_id), (2, 1));
    assert_eq!(message.content, "hi");
    assert_eq!(message.sender_name, "Bob");
    assert!(!message.is_read);

    client.send(1, 2, "hello back").unwrap();
    let (name, payload) = event_frame(&server.next_frame().await);
    assert_eq!(name, "send_message");
    assert_eq!(payload["senderId"], 1);
    assert_eq!(payload["receiverId"], 2);
    assert_eq!(payload["content"], "hello back");
    assert!(payload["timestamp"].is_string());

    client.disconnect();
    assert_eq!(server.next_frame().await, "41");
    assert_eq!(server.next_frame().await, CLOSED);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_error_fails_attempt() {
    let mut server = start_server(Some(open_packet(25000, 20000))).await;
    let client = ChatClient::new(ChatConfig::new(server.url.as_str()).no_reconnect());
    let connection = Recorder::<bool>::new();
    let connection_clone = connection.clone();
    client.on_connection_change(move |connected| connection_clone.push(connected));

    client.connect(9);
    assert_eq!(server.next_frame().await, r#"40{"userId":9}"#);
    server.send(r#"44{"message":"Not authorized"}"#);

    assert!(wait_until(WAIT, || client.state() == ConnectionState::Failed).await);
    assert_eq!(connection.values(), vec![false]);
}

#[tokio::test]
async fn test_server_disconnect_is_a_drop() {
    let mut server = start_server(Some(open_packet(25000, 20000))).await;
    let client = ChatClient::new(ChatConfig::new(server.url.as_str()).no_reconnect());
    let connection = Recorder::<bool>::new();
    let connection_clone = connection.clone();
    client.on_connection_change(move |connected| connection_clone.push(connected));

    client.connect(1);
    server.next_frame().await;
    server.send(r#"40{"sid":"ns-sid"}"#);
    server.next_frame().await;
    assert!(wait_until(WAIT, || client.is_connected()).await);

    server.send("41");
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Failed).await);
    assert_eq!(connection.values(), vec![true, false]);
}

#[tokio::test]
async fn test_missed_heartbeat_is_a_drop() {
    let mut server = start_server(Some(open_packet(100, 100))).await;
    let client = ChatClient::new(ChatConfig::new(server.url.as_str()).no_reconnect());

    client.connect(1);
    server.next_frame().await;
    server.send(r#"40{"sid":"ns-sid"}"#);
    assert!(wait_until(WAIT, || client.is_connected()).await);

    // The server never pings.
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Failed).await);
}

#[tokio::test]
async fn test_handshake_timeout() {
    let server = start_server(None).await;
    let config = ChatConfig::new(server.url.as_str())
        .connect_timeout(Duration::from_millis(200))
        .no_reconnect();
    let client = ChatClient::new(config);

    client.connect(1);
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Failed).await);
}

#[tokio::test]
async fn test_refused_connection_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ChatClient::new(ChatConfig::new(format!("http://{addr}")).no_reconnect());
    client.connect(1);
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Failed).await);
}

#[tokio::test]
async fn test_transport_forwards_events_and_closes_quietly() {
    let mut server = start_server(Some(open_packet(25000, 20000))).await;
    let transport = SocketIoTransport::new(ChatConfig::new(server.url.as_str()).namespace("/chat"));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let script = async {
        assert_eq!(server.next_frame().await, r#"40/chat,{"userId":5}"#);
        server.send(r#"40/chat,{"sid":"ns-sid"}"#);
    };
    let (opened, ()) = tokio::join!(transport.open(5, events_tx), script);
    opened.unwrap();
    assert!(transport.is_open());

    server.send(r#"42["ignored_on_default_namespace",{}]"#);
    server.send(r#"42/chat,["conversation_update",{"conversationId":8}]"#);
    let event = tokio::time::timeout(WAIT, events_rx.recv()).await.unwrap();
    assert_eq!(
        event,
        Some(TransportEvent::Event {
            name: "conversation_update".into(),
            payload: json!({ "conversationId": 8 }),
        })
    );

    transport.emit("typing", json!({ "userId": 5 }));
    assert_eq!(server.next_frame().await, r#"42/chat,["typing",{"userId":5}]"#);

    transport.close();
    assert!(!transport.is_open());
    assert_eq!(server.next_frame().await, "41/chat,");
    assert_eq!(server.next_frame().await, CLOSED);

    // A requested close is not reported as a drop.
    let event = tokio::time::timeout(WAIT, events_rx.recv()).await.unwrap();
    assert_eq!(event, None);
}
