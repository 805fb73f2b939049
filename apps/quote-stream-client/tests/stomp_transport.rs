//! STOMP Transport Integration Tests
//!
//! Runs `StompTransport` against an in-process WebSocket broker that speaks
//! just enough STOMP to drive the handshake, subscriptions and failures.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use quote_stream_client::infrastructure::stomp::{Command, ReconnectConfig};
use quote_stream_client::{
    BusCommand, BusEvent, ConnectionEvent, Inbound, StompCodec, StompFrame, StompTransport,
    StompTransportConfig,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock Broker
// =============================================================================

struct MockBroker {
    listener: TcpListener,
}

impl MockBroker {
    async fn start() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.listener.local_addr().unwrap())
    }

    async fn accept(&self) -> BrokerConnection {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        BrokerConnection {
            ws: tokio_tungstenite::accept_async(stream).await.unwrap(),
            codec: StompCodec::new(),
        }
    }
}

struct BrokerConnection {
    ws: WebSocketStream<TcpStream>,
    codec: StompCodec,
}

impl BrokerConnection {
    /// Read the next frame, skipping heart-beats.
    async fn read_frame(&mut self) -> StompFrame {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .expect("no frame from client")
                .expect("client closed the socket")
                .unwrap();
            let Message::Text(text) = message else {
                continue;
            };
            for item in self.codec.decode(text.as_str()).unwrap() {
                if let Inbound::Frame(frame) = item {
                    return frame;
                }
            }
        }
    }

    async fn send(&mut self, frame: &StompFrame) {
        self.ws
            .send(Message::Text(self.codec.encode(frame).into()))
            .await
            .unwrap();
    }

    /// Complete the handshake, answering with the given heart-beat header.
    async fn handshake(&mut self, heartbeat: &str) -> StompFrame {
        let connect = self.read_frame().await;
        assert_eq!(connect.command, Command::Connect);
        self.send(
            &StompFrame::new(Command::Connected)
                .header("version", "1.2")
                .header("server", "mock-broker/1.0")
                .header("heart-beat", heartbeat),
        )
        .await;
        connect
    }

    async fn deliver(&mut self, subscription: &str, destination: &str, body: &str) {
        self.send(
            &StompFrame::new(Command::Message)
                .header("subscription", subscription)
                .header("destination", destination)
                .header("message-id", uuid::Uuid::new_v4().to_string())
                .header("content-type", "application/json")
                .with_body(body),
        )
        .await;
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    commands: mpsc::Sender<BusCommand>,
    events: mpsc::Receiver<BusEvent>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

fn start_transport(config: StompTransportConfig) -> Harness {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let transport = StompTransport::new(config, event_tx, cancel.clone());
    let task = tokio::spawn(async move {
        transport.run(command_rx).await.unwrap();
    });

    Harness {
        commands: command_tx,
        events: event_rx,
        cancel,
        task,
    }
}

fn config(broker: &MockBroker) -> StompTransportConfig {
    StompTransportConfig {
        reconnect: ReconnectConfig::fixed(Duration::from_millis(50)),
        ..StompTransportConfig::new(broker.url(), "localhost")
    }
}

impl Harness {
    async fn next_event(&mut self) -> BusEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("no event from transport")
            .expect("transport event channel closed")
    }

    async fn expect_connection(&mut self, expected: &ConnectionEvent) {
        match self.next_event().await {
            BusEvent::Connection(event) => assert_eq!(&event, expected),
            other => panic!("expected {expected:?}, got {other:?}"),
        }
    }

    async fn subscribe(&self, id: &str, destination: &str) {
        self.commands
            .send(BusCommand::Subscribe {
                id: id.to_string(),
                destination: destination.to_string(),
            })
            .await
            .unwrap();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_handshake_offers_versions_and_heartbeats() {
    let broker = MockBroker::start().await;
    let mut harness = start_transport(config(&broker));

    harness.expect_connection(&ConnectionEvent::Connecting).await;
    let mut conn = broker.accept().await;
    let connect = conn.handshake("0,0").await;

    assert_eq!(connect.get("accept-version"), Some("1.2,1.1,1.0"));
    assert_eq!(connect.get("host"), Some("localhost"));
    assert_eq!(connect.get("heart-beat"), Some("4000,4000"));
    harness.expect_connection(&ConnectionEvent::Connected).await;

    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_and_receive_messages() {
    let broker = MockBroker::start().await;
    let mut harness = start_transport(config(&broker));

    harness.expect_connection(&ConnectionEvent::Connecting).await;
    let mut conn = broker.accept().await;
    conn.handshake("0,0").await;
    harness.expect_connection(&ConnectionEvent::Connected).await;

    harness.subscribe("order_book-1", "/topic/stock/005930").await;
    let subscribe = conn.read_frame().await;
    assert_eq!(subscribe.command, Command::Subscribe);
    assert_eq!(subscribe.get("id"), Some("order_book-1"));
    assert_eq!(subscribe.get("destination"), Some("/topic/stock/005930"));
    assert_eq!(subscribe.get("ack"), Some("auto"));

    let body = r#"{"ticker":"005930","price":71200}"#;
    conn.deliver("ghost-1", "/topic/stock/000660", "{}").await;
    conn.deliver("order_book-1", "/topic/stock/005930", body).await;

    match harness.next_event().await {
        BusEvent::Message {
            subscription,
            destination,
            body: received,
        } => {
            assert_eq!(subscription, "order_book-1");
            assert_eq!(destination, "/topic/stock/005930");
            assert_eq!(received, body);
        }
        other => panic!("expected message, got {other:?}"),
    }

    harness
        .commands
        .send(BusCommand::Unsubscribe {
            id: "order_book-1".to_string(),
        })
        .await
        .unwrap();
    let unsubscribe = conn.read_frame().await;
    assert_eq!(unsubscribe.command, Command::Unsubscribe);
    assert_eq!(unsubscribe.get("id"), Some("order_book-1"));

    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn test_cancel_unsubscribes_and_disconnects() {
    let broker = MockBroker::start().await;
    let mut harness = start_transport(config(&broker));

    harness.expect_connection(&ConnectionEvent::Connecting).await;
    let mut conn = broker.accept().await;
    conn.handshake("0,0").await;
    harness.expect_connection(&ConnectionEvent::Connected).await;

    harness.subscribe("execution-1", "/topic/stock/005930/execution").await;
    assert_eq!(conn.read_frame().await.command, Command::Subscribe);

    harness.cancel.cancel();

    let unsubscribe = conn.read_frame().await;
    assert_eq!(unsubscribe.command, Command::Unsubscribe);
    assert_eq!(unsubscribe.get("id"), Some("execution-1"));

    let disconnect = conn.read_frame().await;
    assert_eq!(disconnect.command, Command::Disconnect);
    assert!(disconnect.get("receipt").is_some());

    harness.task.await.unwrap();
}

#[tokio::test]
async fn test_error_frame_reports_protocol_error_and_reconnects() {
    let broker = MockBroker::start().await;
    let mut harness = start_transport(config(&broker));

    harness.expect_connection(&ConnectionEvent::Connecting).await;
    let mut conn = broker.accept().await;
    conn.handshake("0,0").await;
    harness.expect_connection(&ConnectionEvent::Connected).await;

    conn.send(
        &StompFrame::new(Command::Error)
            .header("message", "destination forbidden")
            .with_body("details"),
    )
    .await;

    match harness.next_event().await {
        BusEvent::Connection(ConnectionEvent::ProtocolError(reason)) => {
            assert!(reason.contains("destination forbidden"), "{reason}");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }

    harness.expect_connection(&ConnectionEvent::Connecting).await;
    let mut conn = broker.accept().await;
    conn.handshake("0,0").await;
    harness.expect_connection(&ConnectionEvent::Connected).await;

    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn test_server_close_reports_disconnect_and_reconnects() {
    let broker = MockBroker::start().await;
    let mut harness = start_transport(config(&broker));

    harness.expect_connection(&ConnectionEvent::Connecting).await;
    let mut conn = broker.accept().await;
    conn.handshake("0,0").await;
    harness.expect_connection(&ConnectionEvent::Connected).await;

    harness.subscribe("order_book-1", "/topic/stock/005930").await;
    conn.read_frame().await;
    conn.ws.close(None).await.unwrap();
    drop(conn);

    harness.expect_connection(&ConnectionEvent::Disconnected).await;
    harness.expect_connection(&ConnectionEvent::Connecting).await;

    // Subscriptions are per connection; the new one starts empty.
    let mut conn = broker.accept().await;
    conn.handshake("0,0").await;
    harness.expect_connection(&ConnectionEvent::Connected).await;

    harness
        .commands
        .send(BusCommand::Unsubscribe {
            id: "order_book-1".to_string(),
        })
        .await
        .unwrap();
    harness.cancel.cancel();
    let disconnect = conn.read_frame().await;
    assert_eq!(disconnect.command, Command::Disconnect);

    harness.task.await.unwrap();
}

#[tokio::test]
async fn test_silent_server_times_out_on_heartbeat() {
    let broker = MockBroker::start().await;
    let mut harness = start_transport(StompTransportConfig {
        heartbeat: Duration::from_millis(50),
        ..config(&broker)
    });

    harness.expect_connection(&ConnectionEvent::Connecting).await;
    let mut conn = broker.accept().await;
    conn.handshake("50,0").await;
    harness.expect_connection(&ConnectionEvent::Connected).await;

    harness.expect_connection(&ConnectionEvent::Disconnected).await;
    harness.expect_connection(&ConnectionEvent::Connecting).await;

    harness.cancel.cancel();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn test_error_during_handshake_is_protocol_error() {
    let broker = MockBroker::start().await;
    let mut harness = start_transport(config(&broker));

    harness.expect_connection(&ConnectionEvent::Connecting).await;
    let mut conn = broker.accept().await;
    assert_eq!(conn.read_frame().await.command, Command::Connect);
    conn.send(&StompFrame::new(Command::Error).header("message", "bad login"))
        .await;

    match harness.next_event().await {
        BusEvent::Connection(ConnectionEvent::ProtocolError(reason)) => {
            assert!(reason.contains("bad login"), "{reason}");
        }
        other => panic!("expected protocol error, got {other:?}"),
    }

    harness.cancel.cancel();
    harness.task.await.unwrap();
}
