//! Read-only view of the quote session published to consumers.

use crate::domain::connection::ConnectionState;
use crate::domain::market::{OrderBookSnapshot, Ticker, TradeExecution};

/// Snapshot of everything a consumer can observe.
///
/// A new value is published after every state change; consumers re-read it
/// rather than holding on to references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteView {
    /// Transport connection state.
    pub connection: ConnectionState,
    /// Currently subscribed ticker.
    pub active_symbol: Option<Ticker>,
    /// Latest order book for the active ticker.
    pub stock_data: Option<OrderBookSnapshot>,
    /// Recent executions, newest first.
    pub executions: Vec<TradeExecution>,
}

impl QuoteView {
    /// Whether the message bus is connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}
