//! STOMP WebSocket Transport
//!
//! Owns the WebSocket connection to the message bus. Bus commands from the
//! session become SUBSCRIBE/UNSUBSCRIBE frames; CONNECTED, MESSAGE and ERROR
//! frames become [`BusEvent`]s.
//!
//! # Connection Lifecycle
//!
//! 1. Emit `Connecting`, open the WebSocket
//! 2. Send CONNECT, wait for CONNECTED, negotiate heart-beats
//! 3. Emit `Connected`, pump frames until error or cancellation
//! 4. On error emit the mapped event, sleep the reconnect delay, repeat
//!
//! Topic subscriptions are per connection; after a reconnect nothing is
//! restored here.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codec::{CodecError, Inbound, StompCodec};
use super::frame::{Command, StompFrame};
use super::heartbeat::{
    DEFAULT_HEARTBEAT, HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatManager,
    HeartbeatState, parse_heartbeat_header,
};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::application::ports::{BusCommand, BusEvent, SubscriptionId};
use crate::domain::connection::ConnectionEvent;
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::metrics;

/// Time allowed between opening the socket and receiving CONNECTED.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a bus connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be decoded during the handshake.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// CONNECT/CONNECTED exchange failed.
    #[error("STOMP handshake failed: {0}")]
    Handshake(String),

    /// Server sent an ERROR frame.
    #[error("server error: {0}")]
    ServerError(String),

    /// Heart-beat failure.
    #[error("heartbeat error: {0}")]
    Heartbeat(#[from] HeartbeatError),

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,

    /// Reconnect attempts exhausted.
    #[error("reconnect error: {0}")]
    Reconnect(#[from] ReconnectError),

    /// Session side of the event channel is gone.
    #[error("event channel closed")]
    ChannelClosed,
}

impl TransportError {
    /// Lifecycle event reported to the session for this error.
    #[must_use]
    pub fn connection_event(&self) -> ConnectionEvent {
        match self {
            Self::WebSocket(_) => ConnectionEvent::TransportError(self.to_string()),
            Self::Codec(_) | Self::Handshake(_) | Self::ServerError(_) => {
                ConnectionEvent::ProtocolError(self.to_string())
            }
            Self::Heartbeat(_)
            | Self::ConnectionClosed
            | Self::Reconnect(_)
            | Self::ChannelClosed => ConnectionEvent::Disconnected,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the STOMP transport.
#[derive(Debug, Clone)]
pub struct StompTransportConfig {
    /// WebSocket URL of the bus endpoint.
    pub url: String,
    /// Value of the CONNECT `host` header.
    pub host: String,
    /// Heart-beat offered in both directions.
    pub heartbeat: Duration,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl StompTransportConfig {
    /// Create a configuration with default heart-beat and reconnect delay.
    #[must_use]
    pub fn new(url: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            host: host.into(),
            heartbeat: DEFAULT_HEARTBEAT,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Derive from client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot be mapped to a WebSocket URL.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            url: config.stream_url()?,
            host: config.host().to_string(),
            heartbeat: config.stream.heartbeat,
            reconnect: ReconnectConfig::from_stream_settings(&config.stream),
        })
    }
}

// =============================================================================
// Transport
// =============================================================================

/// STOMP-over-WebSocket client for the message bus.
pub struct StompTransport {
    config: StompTransportConfig,
    codec: StompCodec,
    event_tx: mpsc::Sender<BusEvent>,
    cancel: CancellationToken,
}

impl StompTransport {
    /// Create a new transport.
    #[must_use]
    pub const fn new(
        config: StompTransportConfig,
        event_tx: mpsc::Sender<BusEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: StompCodec::new(),
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled or the session goes away.
    ///
    /// # Errors
    ///
    /// Returns an error only when a bounded reconnect policy is exhausted.
    pub async fn run(self, mut commands: mpsc::Receiver<BusCommand>) -> Result<(), TransportError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Bus transport cancelled");
                return Ok(());
            }

            if self.emit(ConnectionEvent::Connecting).await.is_err() {
                return Ok(());
            }

            match self.connect_and_run(&mut commands, &mut policy).await {
                Ok(()) => {
                    let _ = self.emit(ConnectionEvent::Disconnected).await;
                    tracing::info!("Bus connection closed");
                    return Ok(());
                }
                Err(TransportError::ChannelClosed) => {
                    tracing::debug!("Session gone, stopping bus transport");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Bus connection error");
                    if self.emit(e.connection_event()).await.is_err() {
                        return Ok(());
                    }

                    let Some(delay) = policy.next_delay() else {
                        return Err(ReconnectError::MaxAttemptsExceeded(policy.attempt_count()).into());
                    };
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to message bus"
                    );

                    if !self.wait_reconnect(delay, &mut commands).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep out the reconnect delay, discarding commands meant for the dead
    /// connection. Returns `false` if the transport should stop.
    async fn wait_reconnect(&self, delay: Duration, commands: &mut mpsc::Receiver<BusCommand>) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Bus transport cancelled during reconnect delay");
                    return false;
                }
                () = &mut sleep => return true,
                command = commands.recv() => {
                    let Some(command) = command else {
                        return false;
                    };
                    tracing::debug!(?command, "Dropping bus command while disconnected");
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        commands: &mut mpsc::Receiver<BusCommand>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), TransportError> {
        tracing::info!(url = %self.config.url, "Connecting to message bus");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        let offered = self.config.heartbeat;
        self.send_frame(
            &mut write,
            &StompFrame::connect(&self.config.host, offered, offered),
        )
        .await?;

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.await_connected(&mut read)) => {
                result.map_err(|_| TransportError::Handshake("timed out waiting for CONNECTED".to_string()))??
            }
        };

        let server_heartbeat = connected
            .get("heart-beat")
            .map(parse_heartbeat_header)
            .transpose()?
            .unwrap_or((Duration::ZERO, Duration::ZERO));
        let heartbeat = HeartbeatConfig::negotiate((offered, offered), server_heartbeat);

        tracing::info!(
            version = connected.get("version").unwrap_or("1.0"),
            server = connected.get("server").unwrap_or("unknown"),
            send_ms = heartbeat.send_interval.as_millis(),
            receive_timeout_ms = heartbeat.receive_timeout.as_millis(),
            "STOMP session established"
        );
        policy.reset();
        self.emit(ConnectionEvent::Connected).await?;

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                heartbeat,
                heartbeat_state.clone(),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );

        let result = self
            .pump(
                commands,
                &mut write,
                &mut read,
                heartbeat_rx,
                &heartbeat_state,
                heartbeat,
            )
            .await;
        heartbeat_cancel.cancel();
        result
    }

    async fn await_connected(&self, read: &mut WsRead) -> Result<StompFrame, TransportError> {
        loop {
            let items = match read.next().await {
                Some(Ok(message)) => match self.decode(&message) {
                    Some(items) => items?,
                    None if message.is_close() => return Err(TransportError::ConnectionClosed),
                    None => continue,
                },
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::ConnectionClosed),
            };

            for item in items {
                let Inbound::Frame(frame) = item else {
                    continue;
                };
                return match frame.command {
                    Command::Connected => Ok(frame),
                    Command::Error => Err(TransportError::ServerError(error_message(&frame))),
                    other => Err(TransportError::Handshake(format!(
                        "expected CONNECTED, got {other}"
                    ))),
                };
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump(
        &self,
        commands: &mut mpsc::Receiver<BusCommand>,
        write: &mut WsWrite,
        read: &mut WsRead,
        mut heartbeat_rx: mpsc::Receiver<HeartbeatEvent>,
        heartbeat_state: &HeartbeatState,
        heartbeat: HeartbeatConfig,
    ) -> Result<(), TransportError> {
        let mut live: HashSet<SubscriptionId> = HashSet::new();
        let mut heartbeat_open = true;

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command, write, &mut live).await?;
                    } else {
                        tracing::debug!("Bus command channel closed");
                        self.disconnect(write, &mut live).await;
                        return Ok(());
                    }
                }
                () = self.cancel.cancelled() => {
                    self.disconnect(write, &mut live).await;
                    return Ok(());
                }
                event = heartbeat_rx.recv(), if heartbeat_open => {
                    match event {
                        Some(HeartbeatEvent::SendBeat) => {
                            write.send(Message::Text(self.codec.heartbeat().into())).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            return Err(HeartbeatError::Timeout(heartbeat.receive_timeout).into());
                        }
                        None => heartbeat_open = false,
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat_state.record_inbound();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            return Err(TransportError::ConnectionClosed);
                        }
                        Some(Ok(message)) => {
                            heartbeat_state.record_inbound();
                            self.handle_message(&message, &live).await?;
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(TransportError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn handle_command(
        &self,
        command: BusCommand,
        write: &mut WsWrite,
        live: &mut HashSet<SubscriptionId>,
    ) -> Result<(), TransportError> {
        match command {
            BusCommand::Subscribe { id, destination } => {
                tracing::debug!(id = %id, destination = %destination, "Sending SUBSCRIBE");
                self.send_frame(write, &StompFrame::subscribe(&id, &destination))
                    .await?;
                live.insert(id);
            }
            BusCommand::Unsubscribe { id } => {
                if live.remove(&id) {
                    tracing::debug!(id = %id, "Sending UNSUBSCRIBE");
                    self.send_frame(write, &StompFrame::unsubscribe(&id)).await?;
                } else {
                    tracing::debug!(id = %id, "Subscription not open on this connection");
                }
            }
        }
        Ok(())
    }

    async fn handle_message(
        &self,
        message: &Message,
        live: &HashSet<SubscriptionId>,
    ) -> Result<(), TransportError> {
        let items = match self.decode(message) {
            Some(Ok(items)) => items,
            Some(Err(e)) => {
                metrics::record_frame_error();
                tracing::warn!(error = %e, raw = %message, "Dropping malformed STOMP payload");
                return Ok(());
            }
            None => return Ok(()),
        };

        for item in items {
            let frame = match item {
                Inbound::Heartbeat => {
                    tracing::trace!("Heart-beat received");
                    continue;
                }
                Inbound::Frame(frame) => frame,
            };

            match frame.command {
                Command::Message => {
                    let Some(destination) = frame.get("destination") else {
                        tracing::warn!("MESSAGE frame without destination");
                        continue;
                    };
                    let subscription = frame.get("subscription").unwrap_or_default();
                    if !subscription.is_empty() && !live.contains(subscription) {
                        tracing::debug!(subscription, destination, "Dropping message for closed subscription");
                        continue;
                    }

                    let event = BusEvent::Message {
                        subscription: subscription.to_string(),
                        destination: destination.to_string(),
                        body: frame.body,
                    };
                    self.event_tx
                        .send(event)
                        .await
                        .map_err(|_| TransportError::ChannelClosed)?;
                }
                Command::Error => {
                    let message = error_message(&frame);
                    tracing::error!(message = %message, body = %frame.body, "STOMP ERROR frame");
                    return Err(TransportError::ServerError(message));
                }
                Command::Receipt => {
                    tracing::debug!(receipt = frame.get("receipt-id"), "Receipt received");
                }
                other => tracing::debug!(command = %other, "Ignoring unexpected frame"),
            }
        }

        Ok(())
    }

    /// Close every open subscription and say goodbye.
    async fn disconnect(&self, write: &mut WsWrite, live: &mut HashSet<SubscriptionId>) {
        for id in live.drain() {
            if let Err(e) = self.send_frame(write, &StompFrame::unsubscribe(&id)).await {
                tracing::debug!(error = %e, "Failed to send UNSUBSCRIBE during disconnect");
                return;
            }
        }

        let receipt = format!("disconnect-{}", Uuid::new_v4());
        if let Err(e) = self.send_frame(write, &StompFrame::disconnect(&receipt)).await {
            tracing::debug!(error = %e, "Failed to send DISCONNECT");
            return;
        }
        let _ = write.close().await;
        tracing::info!("Disconnected from message bus");
    }

    fn decode(&self, message: &Message) -> Option<Result<Vec<Inbound>, CodecError>> {
        match message {
            Message::Text(text) => Some(self.codec.decode(text.as_str())),
            Message::Binary(data) => Some(self.codec.decode_bytes(data)),
            _ => None,
        }
    }

    async fn send_frame(&self, write: &mut WsWrite, frame: &StompFrame) -> Result<(), TransportError> {
        write
            .send(Message::Text(self.codec.encode(frame).into()))
            .await?;
        Ok(())
    }

    async fn emit(&self, event: ConnectionEvent) -> Result<(), TransportError> {
        self.event_tx
            .send(BusEvent::Connection(event))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

fn error_message(frame: &StompFrame) -> String {
    frame
        .get("message")
        .map_or_else(|| frame.body.clone(), str::to_string)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(TransportError::ConnectionClosed, ConnectionEvent::Disconnected ; "close")]
    #[test_case(
        TransportError::Heartbeat(HeartbeatError::Timeout(Duration::from_secs(8))),
        ConnectionEvent::Disconnected ;
        "heartbeat timeout"
    )]
    fn errors_map_to_disconnected(error: TransportError, expected: ConnectionEvent) {
        assert_eq!(error.connection_event(), expected);
    }

    #[test]
    fn protocol_errors_map_to_protocol_event() {
        let event = TransportError::ServerError("bad destination".to_string()).connection_event();
        assert!(matches!(event, ConnectionEvent::ProtocolError(msg) if msg.contains("bad destination")));

        let event = TransportError::Codec(CodecError::Incomplete).connection_event();
        assert!(matches!(event, ConnectionEvent::ProtocolError(_)));
    }

    #[test]
    fn websocket_errors_map_to_transport_event() {
        let error = TransportError::WebSocket(
            tokio_tungstenite::tungstenite::Error::ConnectionClosed,
        );
        assert!(matches!(
            error.connection_event(),
            ConnectionEvent::TransportError(_)
        ));
    }

    #[test]
    fn config_from_client_config() {
        let mut client = ClientConfig::new("https://quotes.example.com");
        client.stream.heartbeat = Duration::from_millis(2500);

        let config = StompTransportConfig::from_client_config(&client).unwrap();
        assert_eq!(config.url, "wss://quotes.example.com/ws");
        assert_eq!(config.host, "quotes.example.com");
        assert_eq!(config.heartbeat, Duration::from_millis(2500));
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(5));
    }

    #[test]
    fn error_message_prefers_header() {
        let frame = StompFrame::new(Command::Error)
            .header("message", "denied")
            .with_body("details");
        assert_eq!(error_message(&frame), "denied");

        let frame = StompFrame::new(Command::Error).with_body("details");
        assert_eq!(error_message(&frame), "details");
    }
}
