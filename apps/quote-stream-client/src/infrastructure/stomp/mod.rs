//! STOMP Message Bus Adapter
//!
//! STOMP 1.2 over WebSocket: frame codec, heart-beating, reconnection policy
//! and the transport task that implements the bus side of the session ports.

pub mod codec;
pub mod frame;
pub mod heartbeat;
pub mod reconnect;
pub mod transport;

pub use codec::{CodecError, Inbound, StompCodec};
pub use frame::{Command, StompFrame};
pub use heartbeat::{HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use transport::{StompTransport, StompTransportConfig, TransportError};
