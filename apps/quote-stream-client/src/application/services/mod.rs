//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `QuoteSession`: Event loop owning connection and subscription state
//! - `QuoteSubscriptionClient`: Caller-facing handle to a running session
//! - `QuoteView`: Published snapshot of session state

mod client;
mod session;
mod view;

pub use client::{ClientError, QuoteSubscriptionClient};
pub use session::{
    DEFAULT_SUBSCRIBE_RETRY, QuoteSession, SessionCommand, SessionSettings, SubscribeAck,
    SubscribeError,
};
pub use view::QuoteView;
