//! Domain Layer - Core quote types and business logic.
//!
//! This layer contains the market data types, the execution log, the
//! connection state machine and the active-symbol quote book. Nothing here
//! performs I/O.

/// Connection state machine and lifecycle events.
pub mod connection;

/// Bounded, deduplicated trade execution history.
pub mod execution_log;

/// Order book snapshots and trade executions.
pub mod market;

/// Active symbol tracking, topics and the quote book.
pub mod subscription;
