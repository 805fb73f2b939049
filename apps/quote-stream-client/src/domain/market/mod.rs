//! Market Data Types
//!
//! Canonical representation of the two payloads pushed by the gateway:
//! order book snapshots and trade executions. Both are decoded from JSON
//! and validated against a fixed schema before they reach the quote book.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {"ticker":"005930","price":71200,"volume":1520334,
//!  "askPrices":[...10],"bidPrices":[...10],
//!  "askVolumes":[...10],"bidVolumes":[...10],"timestamp":1718000000000}
//!
//! {"ticker":"005930","price":71200,"volume":15,"tradeType":"BUY",
//!  "time":"10:31:02","timestamp":1718000000123}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Number of price levels on each side of an order book snapshot.
pub const LADDER_DEPTH: usize = 10;

/// A ticker symbol (e.g. `005930`).
pub type Ticker = String;

// =============================================================================
// Errors
// =============================================================================

/// Schema violations found after a payload was decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Ticker field was empty.
    #[error("ticker must not be empty")]
    EmptyTicker,

    /// A price or volume ladder had the wrong number of levels.
    #[error("{ladder} must have {expected} levels, got {actual}")]
    LadderDepth {
        /// Ladder field name.
        ladder: &'static str,
        /// Expected number of levels.
        expected: usize,
        /// Number of levels received.
        actual: usize,
    },
}

/// Errors decoding a topic payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Body was not valid JSON for the topic's schema.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON decoded but violated the schema.
    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),
}

// =============================================================================
// Order Book
// =============================================================================

/// Most recent market depth for a ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookSnapshot {
    /// Ticker this snapshot belongs to.
    pub ticker: Ticker,
    /// Last trade price.
    pub price: Decimal,
    /// Cumulative traded volume.
    pub volume: u64,
    /// Ask prices, best first.
    pub ask_prices: Vec<Decimal>,
    /// Bid prices, best first.
    pub bid_prices: Vec<Decimal>,
    /// Resting volume at each ask level.
    pub ask_volumes: Vec<u64>,
    /// Resting volume at each bid level.
    pub bid_volumes: Vec<u64>,
    /// Server timestamp in epoch milliseconds.
    pub timestamp: i64,
}

impl OrderBookSnapshot {
    /// Decode and validate an order book payload.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError` if the body is not valid JSON or breaks the schema.
    pub fn from_json(body: &str) -> Result<Self, PayloadError> {
        let snapshot: Self = serde_json::from_str(body)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check ticker and ladder depths.
    ///
    /// # Errors
    ///
    /// Returns the first `SchemaError` found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.ticker.is_empty() {
            return Err(SchemaError::EmptyTicker);
        }

        let ladders = [
            ("askPrices", self.ask_prices.len()),
            ("bidPrices", self.bid_prices.len()),
            ("askVolumes", self.ask_volumes.len()),
            ("bidVolumes", self.bid_volumes.len()),
        ];
        for (ladder, actual) in ladders {
            if actual != LADDER_DEPTH {
                return Err(SchemaError::LadderDepth {
                    ladder,
                    expected: LADDER_DEPTH,
                    actual,
                });
            }
        }

        Ok(())
    }

    /// Best (lowest) ask price.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.ask_prices.first().copied()
    }

    /// Best (highest) bid price.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bid_prices.first().copied()
    }

    /// Difference between best ask and best bid.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Server timestamp as a `DateTime`.
    #[must_use]
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

// =============================================================================
// Trade Executions
// =============================================================================

/// Aggressor side of an execution, derived from `tradeType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeSide {
    /// Buyer-initiated trade.
    Buy,
    /// Seller-initiated trade.
    Sell,
    /// Indicator not recognised.
    Unknown,
}

impl TradeSide {
    /// Parse a side indicator (`BUY` / `SELL`, case-insensitive).
    #[must_use]
    pub fn from_indicator(indicator: &str) -> Self {
        match indicator.trim().to_uppercase().as_str() {
            "BUY" => Self::Buy,
            "SELL" => Self::Sell,
            _ => Self::Unknown,
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Unknown => "unknown",
        }
    }
}

/// A single executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeExecution {
    /// Ticker the trade executed on.
    pub ticker: Ticker,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub volume: u64,
    /// Side indicator as sent by the server (`BUY` / `SELL`).
    pub trade_type: String,
    /// Display-formatted execution time (`HH:MM:SS`).
    pub time: String,
    /// Server timestamp in epoch milliseconds.
    pub timestamp: i64,
    /// Cumulative volume after this trade, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_volume: Option<u64>,
    /// Change rate versus previous close, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<Decimal>,
}

impl TradeExecution {
    /// Decode and validate an execution payload.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError` if the body is not valid JSON or breaks the schema.
    pub fn from_json(body: &str) -> Result<Self, PayloadError> {
        let execution: Self = serde_json::from_str(body)?;
        if execution.ticker.is_empty() {
            return Err(SchemaError::EmptyTicker.into());
        }
        Ok(execution)
    }

    /// Parsed aggressor side.
    #[must_use]
    pub fn side(&self) -> TradeSide {
        TradeSide::from_indicator(&self.trade_type)
    }

    /// Server timestamp as a `DateTime`.
    #[must_use]
    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

// =============================================================================
// Tests
// =============================================================================
