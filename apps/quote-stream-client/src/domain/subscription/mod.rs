//! Symbol Subscription and Quote Book
//!
//! Domain state for the single active ticker: which symbol is subscribed,
//! its latest order book snapshot and its execution log.
//!
//! # Design
//!
//! Subscription state is orthogonal to connection state:
//! `NoSymbol` → `SymbolActive(ticker)` → `NoSymbol`, driven only by explicit
//! subscribe/unsubscribe. Inbound payloads are checked against the active
//! ticker so messages still in flight for a previous symbol never leak into
//! the current view.

use super::execution_log::{ExecutionLog, InsertOutcome};
use super::market::{OrderBookSnapshot, Ticker, TradeExecution};

/// Destination prefix shared by all stock topics.
pub const TOPIC_PREFIX: &str = "/topic/stock/";

/// Destination suffix of execution topics.
const EXECUTION_SUFFIX: &str = "/execution";

// =============================================================================
// Topics
// =============================================================================

/// Kind of per-ticker topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// `/topic/stock/{ticker}` order book snapshots.
    OrderBook,
    /// `/topic/stock/{ticker}/execution` trade executions.
    Execution,
}

impl TopicKind {
    /// Build the destination for a ticker.
    #[must_use]
    pub fn destination(self, ticker: &str) -> String {
        match self {
            Self::OrderBook => format!("{TOPIC_PREFIX}{ticker}"),
            Self::Execution => format!("{TOPIC_PREFIX}{ticker}{EXECUTION_SUFFIX}"),
        }
    }

    /// Classify a destination, returning the topic kind and ticker.
    #[must_use]
    pub fn parse(destination: &str) -> Option<(Self, &str)> {
        let rest = destination.strip_prefix(TOPIC_PREFIX)?;
        if let Some(ticker) = rest.strip_suffix(EXECUTION_SUFFIX) {
            return (!ticker.is_empty() && !ticker.contains('/'))
                .then_some((Self::Execution, ticker));
        }
        (!rest.is_empty() && !rest.contains('/')).then_some((Self::OrderBook, rest))
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderBook => "order_book",
            Self::Execution => "execution",
        }
    }
}

// =============================================================================
// Symbol Subscription
// =============================================================================

/// Which ticker, if any, is currently subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SymbolSubscription {
    /// Nothing subscribed.
    #[default]
    NoSymbol,
    /// Subscribed to this ticker.
    SymbolActive(Ticker),
}

impl SymbolSubscription {
    /// The active ticker.
    #[must_use]
    pub fn ticker(&self) -> Option<&str> {
        match self {
            Self::NoSymbol => None,
            Self::SymbolActive(ticker) => Some(ticker),
        }
    }

    /// Whether `ticker` is the active ticker.
    #[must_use]
    pub fn is_active(&self, ticker: &str) -> bool {
        self.ticker() == Some(ticker)
    }
}

// =============================================================================
// Quote Book
// =============================================================================

/// Outcome of applying an order book snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Snapshot replaced the stored one.
    Applied,
    /// Snapshot was for a ticker other than the active one.
    StaleSymbol,
}

/// Outcome of applying a trade execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Execution was added to the log.
    Inserted,
    /// Duplicate delivery, dropped.
    Duplicate,
    /// Older than every retained execution of a full log.
    OutsideWindow,
    /// Execution was for a ticker other than the active one.
    StaleSymbol,
}

impl ExecutionOutcome {
    /// Whether the log changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// State owned by the subscription client for the active ticker.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    subscription: SymbolSubscription,
    snapshot: Option<OrderBookSnapshot>,
    executions: ExecutionLog,
}

impl QuoteBook {
    /// Create an empty book with the given execution capacity.
    #[must_use]
    pub fn new(execution_capacity: usize) -> Self {
        Self {
            subscription: SymbolSubscription::NoSymbol,
            snapshot: None,
            executions: ExecutionLog::new(execution_capacity),
        }
    }

    /// Clear the active ticker and the snapshot.
    ///
    /// The execution log is left untouched; it is cleared when the next
    /// subscription starts. Returns the ticker that was active.
    pub fn end(&mut self) -> Option<Ticker> {
        self.snapshot = None;
        match std::mem::take(&mut self.subscription) {
            SymbolSubscription::NoSymbol => None,
            SymbolSubscription::SymbolActive(ticker) => Some(ticker),
        }
    }

    /// Clear the snapshot and the execution log ahead of a new subscription.
    pub fn reset(&mut self) {
        self.snapshot = None;
        self.executions.clear();
    }

    /// Record `ticker` as the active symbol.
    pub fn activate(&mut self, ticker: Ticker) {
        self.subscription = SymbolSubscription::SymbolActive(ticker);
    }

    /// Replace the snapshot if it belongs to the active ticker.
    pub fn apply_snapshot(&mut self, snapshot: OrderBookSnapshot) -> SnapshotOutcome {
        if !self.subscription.is_active(&snapshot.ticker) {
            return SnapshotOutcome::StaleSymbol;
        }
        self.snapshot = Some(snapshot);
        SnapshotOutcome::Applied
    }

    /// Insert an execution if it belongs to the active ticker.
    pub fn apply_execution(&mut self, execution: TradeExecution) -> ExecutionOutcome {
        if !self.subscription.is_active(&execution.ticker) {
            return ExecutionOutcome::StaleSymbol;
        }
        match self.executions.insert(execution) {
            InsertOutcome::Inserted => ExecutionOutcome::Inserted,
            InsertOutcome::Duplicate => ExecutionOutcome::Duplicate,
            InsertOutcome::OutsideWindow => ExecutionOutcome::OutsideWindow,
        }
    }

    /// Current subscription.
    #[must_use]
    pub const fn subscription(&self) -> &SymbolSubscription {
        &self.subscription
    }

    /// Active ticker.
    #[must_use]
    pub fn active_symbol(&self) -> Option<&str> {
        self.subscription.ticker()
    }

    /// Latest snapshot for the active ticker.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&OrderBookSnapshot> {
        self.snapshot.as_ref()
    }

    /// Execution log.
    #[must_use]
    pub const fn executions(&self) -> &ExecutionLog {
        &self.executions
    }
}

// =============================================================================
// Tests
// =============================================================================
