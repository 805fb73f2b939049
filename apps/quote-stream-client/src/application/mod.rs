//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the quote session and the port interfaces that
//! define how it interacts with the REST API and the message bus.

/// Port interfaces for external systems (subscription REST API, message bus).
pub mod ports;

/// Quote session, client handle and published view.
pub mod services;
