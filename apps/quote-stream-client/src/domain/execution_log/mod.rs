//! Execution Log
//!
//! Bounded, deduplicated list of recent trade executions, newest first.
//!
//! # Invariants
//!
//! - No two entries share the same [`ExecutionKey`].
//! - Entries are sorted descending by timestamp after every insert.
//! - Length never exceeds the configured capacity; the oldest entry by
//!   timestamp is evicted first.
//!
//! Entries with equal timestamps keep arrival order, newest arrival first:
//! a new entry is placed at the front and the sort is stable.

use rust_decimal::Decimal;

use super::market::TradeExecution;

/// Default number of executions retained.
pub const DEFAULT_EXECUTION_CAPACITY: usize = 30;

/// Identity used to recognise duplicate deliveries of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionKey {
    /// Server timestamp in epoch milliseconds.
    pub timestamp: i64,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub volume: u64,
    /// Side indicator as sent by the server.
    pub side: String,
}

impl From<&TradeExecution> for ExecutionKey {
    fn from(execution: &TradeExecution) -> Self {
        Self {
            timestamp: execution.timestamp,
            price: execution.price,
            volume: execution.volume,
            side: execution.trade_type.clone(),
        }
    }
}

/// Result of inserting an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Entry was added to the log.
    Inserted,
    /// An entry with the same key was already present.
    Duplicate,
    /// Log was full and the entry was older than everything retained.
    OutsideWindow,
}

/// Bounded, newest-first execution history for one ticker.
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    entries: Vec<TradeExecution>,
    capacity: usize,
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::new(DEFAULT_EXECUTION_CAPACITY)
    }
}

impl ExecutionLog {
    /// Create an empty log. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Insert an execution, keeping the log deduplicated, sorted and bounded.
    pub fn insert(&mut self, execution: TradeExecution) -> InsertOutcome {
        let key = ExecutionKey::from(&execution);
        if self.contains(&key) {
            return InsertOutcome::Duplicate;
        }

        self.entries.insert(0, execution);
        self.entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if self.entries.len() > self.capacity {
            let evicted = self.entries.pop();
            if evicted.is_some_and(|e| ExecutionKey::from(&e) == key) {
                return InsertOutcome::OutsideWindow;
            }
        }

        InsertOutcome::Inserted
    }

    /// Check whether an entry with this key is retained.
    #[must_use]
    pub fn contains(&self, key: &ExecutionKey) -> bool {
        self.entries.iter().any(|e| ExecutionKey::from(e) == *key)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Retained entries, newest first.
    #[must_use]
    pub fn entries(&self) -> &[TradeExecution] {
        &self.entries
    }

    /// Newest retained entry.
    #[must_use]
    pub fn latest(&self) -> Option<&TradeExecution> {
        self.entries.first()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

// =============================================================================
// Tests
// =============================================================================
