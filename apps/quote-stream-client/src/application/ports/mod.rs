//! Port Interfaces
//!
//! Contracts between the quote session and the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SubscriptionControl`: REST toggle that starts/stops upstream forwarding
//! - `BusCommand`: topic subscribe/unsubscribe requests sent to the transport
//!
//! ## Driver Ports (Inbound)
//!
//! - `BusEvent`: connection lifecycle events and topic messages from the transport

use async_trait::async_trait;

use crate::domain::connection::ConnectionEvent;

/// Transport-level subscription identifier (STOMP `id` header).
pub type SubscriptionId = String;

// =============================================================================
// Subscription Control (REST)
// =============================================================================

/// Errors from the upstream forwarding toggle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// Server answered with a non-success status.
    #[error("request rejected with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// Request could not be sent or timed out.
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Toggles upstream forwarding of market data for a ticker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionControl: Send + Sync {
    /// Ask the backend to start forwarding ticks for `ticker`.
    async fn enable(&self, ticker: &str) -> Result<(), ControlError>;

    /// Ask the backend to stop forwarding ticks for `ticker`.
    async fn disable(&self, ticker: &str) -> Result<(), ControlError>;
}

// =============================================================================
// Message Bus
// =============================================================================

/// Requests from the session to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCommand {
    /// Open a topic subscription.
    Subscribe {
        /// Subscription id to use on the wire.
        id: SubscriptionId,
        /// Topic destination.
        destination: String,
    },
    /// Close a topic subscription.
    Unsubscribe {
        /// Subscription id previously used in `Subscribe`.
        id: SubscriptionId,
    },
}

/// Notifications from the transport to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Connection lifecycle change.
    Connection(ConnectionEvent),
    /// Message delivered on a subscribed topic.
    Message {
        /// Subscription the message was delivered on.
        subscription: SubscriptionId,
        /// Topic destination.
        destination: String,
        /// Raw payload.
        body: String,
    },
}
