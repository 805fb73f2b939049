#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Stream Client - Real-time Stock Quote Subscriptions
//!
//! Keeps one STOMP connection to the market data gateway, subscribes to the
//! order book and execution topics of a single ticker at a time, and toggles
//! upstream forwarding through the gateway's REST API.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Quote types and pure state
//!   - `market`: Order book snapshots and trade executions
//!   - `execution_log`: Bounded, deduplicated execution history
//!   - `connection`: Connection state machine
//!   - `subscription`: Topics and the active-symbol quote book
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Bus commands/events and the subscription control trait
//!   - `services`: Session actor and the caller-facing client handle
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stomp`: STOMP 1.2 codec, heart-beating and WebSocket transport
//!   - `rest`: Subscription toggle endpoints
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//!                        ┌──────────────┐  BusCommand   ┌───────────────┐
//! subscribe_to_stock ───►│              │──────────────►│     STOMP     │◄──► /ws
//! unsubscribe_from_stock │ QuoteSession │               │   Transport   │
//!                        │   (actor)    │◄──────────────│               │
//!                        │              │   BusEvent    └───────────────┘
//!                        │              │──► REST subscribe/unsubscribe
//!                        └──────┬───────┘
//!                               │ watch<QuoteView>
//!                               ▼
//!                     stock_data / executions / is_connected
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote types and state with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionEvent, ConnectionState};
pub use domain::execution_log::{DEFAULT_EXECUTION_CAPACITY, ExecutionLog};
pub use domain::market::{OrderBookSnapshot, PayloadError, Ticker, TradeExecution, TradeSide};
pub use domain::subscription::{QuoteBook, SymbolSubscription, TopicKind};

// Application
pub use application::ports::{BusCommand, BusEvent, ControlError, SubscriptionControl};
pub use application::services::{
    ClientError, QuoteSubscriptionClient, QuoteView, SessionSettings, SubscribeError,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, StreamSettings, SubscriptionSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// STOMP transport (for integration tests)
pub use infrastructure::stomp::{
    Inbound, StompCodec, StompFrame, StompTransport, StompTransportConfig, TransportError,
};

// Subscription REST API
pub use infrastructure::rest::{RestError, SubscriptionApi};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
