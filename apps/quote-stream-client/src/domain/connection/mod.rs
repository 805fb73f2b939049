//! Connection State Machine
//!
//! Transport lifecycle callbacks are reduced to tagged [`ConnectionEvent`]s
//! and folded into a [`ConnectionState`] by a single transition function.
//!
//! | State        | Event                              | Next         |
//! |--------------|------------------------------------|--------------|
//! | Disconnected | `Connecting`                       | Connecting   |
//! | Connecting   | `Connected`                        | Connected    |
//! | Connecting   | `Disconnected` / error             | Disconnected |
//! | Connected    | `Disconnected` / error             | Disconnected |

/// Connection state of the message-bus transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live connection; a reconnect may be scheduled.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// STOMP session established.
    Connected,
}

/// Lifecycle events reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt started.
    Connecting,
    /// STOMP session established.
    Connected,
    /// Connection closed (network drop, server close, heartbeat timeout).
    Disconnected,
    /// WebSocket-level failure.
    TransportError(String),
    /// STOMP-level failure (`ERROR` frame, malformed handshake).
    ProtocolError(String),
}

impl ConnectionState {
    /// Apply a lifecycle event.
    #[must_use]
    pub fn apply(self, event: &ConnectionEvent) -> Self {
        match (self, event) {
            (Self::Disconnected, ConnectionEvent::Connecting) => Self::Connecting,
            (_, ConnectionEvent::Connecting) => self,
            (_, ConnectionEvent::Connected) => Self::Connected,
            (
                _,
                ConnectionEvent::Disconnected
                | ConnectionEvent::TransportError(_)
                | ConnectionEvent::ProtocolError(_),
            ) => Self::Disconnected,
        }
    }

    /// Whether the STOMP session is established.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}
