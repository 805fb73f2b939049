//! Heartbeat Manager
//!
//! STOMP heart-beating. The `heart-beat` header of CONNECT/CONNECTED is
//! negotiated into an outgoing interval and an inbound timeout; the manager
//! asks the transport to send a bare EOL on the outgoing interval and reports
//! a timeout when nothing has arrived from the server for too long.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default heart-beat offered in both directions.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(4000);

/// Multiple of the negotiated inbound interval tolerated before timing out.
const GRACE_FACTOR: u32 = 2;

/// Negotiated heart-beat schedule for one connection.
///
/// A zero duration disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between outgoing heart-beats.
    pub send_interval: Duration,
    /// Silence from the server tolerated before the connection is dead.
    pub receive_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(send_interval: Duration, receive_timeout: Duration) -> Self {
        Self {
            send_interval,
            receive_timeout,
        }
    }

    /// No heart-beating in either direction.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Negotiate from the client's offer and the server's `heart-beat` header.
    ///
    /// `client` is `(cx, cy)`: what the client can send and wants to receive.
    /// The server header is `sx,sy`. Outgoing is `max(cx, sy)` unless either
    /// is zero; inbound is `max(sx, cy)` unless either is zero.
    #[must_use]
    pub fn negotiate(client: (Duration, Duration), server: (Duration, Duration)) -> Self {
        let (cx, cy) = client;
        let (sx, sy) = server;

        let send_interval = if cx.is_zero() || sy.is_zero() {
            Duration::ZERO
        } else {
            cx.max(sy)
        };
        let receive_interval = if sx.is_zero() || cy.is_zero() {
            Duration::ZERO
        } else {
            sx.max(cy)
        };

        Self {
            send_interval,
            receive_timeout: receive_interval * GRACE_FACTOR,
        }
    }

    /// Whether either direction is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.send_interval.is_zero() || !self.receive_timeout.is_zero()
    }
}

/// Parse a `heart-beat` header value (`"sx,sy"` in milliseconds).
///
/// # Errors
///
/// Returns an error if the value is not two comma-separated integers.
pub fn parse_heartbeat_header(value: &str) -> Result<(Duration, Duration), HeartbeatError> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| HeartbeatError::InvalidHeader(value.to_string()))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| HeartbeatError::InvalidHeader(value.to_string()))
    };
    Ok((parse(x)?, parse(y)?))
}

/// Format a `heart-beat` header value.
#[must_use]
pub fn format_heartbeat_header(send: Duration, receive: Duration) -> String {
    format!("{},{}", send.as_millis(), receive.as_millis())
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Time to send a heart-beat EOL.
    SendBeat,
    /// Nothing received within the timeout.
    Timeout,
}

/// Inbound activity shared between the manager and the read loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that something (frame or heart-beat) arrived.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time since the server last sent anything.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }
}

/// Drives the heart-beat schedule for one connection.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes or a timeout is detected.
    pub async fn run(self) {
        let mut send = ticker(self.config.send_interval);
        let mut check = ticker(self.config.receive_timeout / GRACE_FACTOR);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                () = tick(send.as_mut()) => {
                    if self.event_tx.send(HeartbeatEvent::SendBeat).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
                () = tick(check.as_mut()) => {
                    let elapsed = self.state.time_since_inbound();
                    if elapsed > self.config.receive_timeout {
                        tracing::warn!(
                            elapsed_ms = elapsed.as_millis(),
                            timeout_ms = self.config.receive_timeout.as_millis(),
                            "Heartbeat timeout detected"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                        break;
                    }
                }
            }
        }
    }
}

fn ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Some(interval)
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Error type for heartbeat operations.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// Nothing received from the server within the timeout.
    #[error("heartbeat timeout after {0:?}")]
    Timeout(Duration),
    /// Malformed `heart-beat` header.
    #[error("invalid heart-beat header: {0}")]
    InvalidHeader(String),
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const MS: fn(u64) -> Duration = Duration::from_millis;

    #[test_case((4000, 4000), (4000, 4000), 4000, 8000 ; "symmetric")]
    #[test_case((4000, 4000), (10000, 0), 0, 20000 ; "server does not want beats")]
    #[test_case((4000, 4000), (0, 1000), 4000, 0 ; "server sends none")]
    #[test_case((0, 0), (4000, 4000), 0, 0 ; "client disabled")]
    #[test_case((1000, 2000), (3000, 500), 1000, 6000 ; "max of each pair")]
    fn negotiation(client: (u64, u64), server: (u64, u64), send: u64, timeout: u64) {
        let config = HeartbeatConfig::negotiate(
            (MS(client.0), MS(client.1)),
            (MS(server.0), MS(server.1)),
        );
        assert_eq!(config.send_interval, MS(send));
        assert_eq!(config.receive_timeout, MS(timeout));
    }

    #[test]
    fn header_round_trip() {
        assert_eq!(format_heartbeat_header(MS(4000), MS(4000)), "4000,4000");
        assert_eq!(
            parse_heartbeat_header("0, 10000").unwrap(),
            (Duration::ZERO, MS(10000))
        );
        assert!(parse_heartbeat_header("4000").is_err());
        assert!(parse_heartbeat_header("a,b").is_err());
    }

    #[test]
    fn disabled_config() {
        assert!(!HeartbeatConfig::disabled().is_enabled());
        assert!(HeartbeatConfig::new(MS(1), Duration::ZERO).is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn manager_sends_beats() {
        let config = HeartbeatConfig::new(MS(4000), Duration::ZERO);
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(HeartbeatManager::new(config, state, event_tx, cancel.clone()).run());

        let event = event_rx.recv().await.expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::SendBeat);

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test(start_paused = true)]
    async fn manager_detects_silence() {
        let config = HeartbeatConfig::new(Duration::ZERO, MS(8000));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(HeartbeatManager::new(config, state, event_tx, cancel).run());

        let event = event_rx.recv().await.expect("channel should not close");
        assert_eq!(event, HeartbeatEvent::Timeout);
        handle.await.expect("manager exits after timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_traffic_prevents_timeout() {
        let config = HeartbeatConfig::new(Duration::ZERO, MS(8000));
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            HeartbeatManager::new(config, state.clone(), event_tx, cancel.clone()).run(),
        );

        for _ in 0..10 {
            tokio::time::sleep(MS(3000)).await;
            state.record_inbound();
        }
        assert!(event_rx.try_recv().is_err());

        cancel.cancel();
        handle.await.expect("task should complete");
    }
}
