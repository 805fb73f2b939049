//! STOMP Frames
//!
//! Frame model plus constructors for the client frames the transport sends.

use std::fmt;
use std::time::Duration;

use super::heartbeat::format_heartbeat_header;

/// Protocol versions offered in CONNECT.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// STOMP frame commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client: open a session.
    Connect,
    /// Client: open a session (1.2 alias).
    Stomp,
    /// Server: session established.
    Connected,
    /// Client: publish.
    Send,
    /// Client: subscribe to a destination.
    Subscribe,
    /// Client: cancel a subscription.
    Unsubscribe,
    /// Client: acknowledge.
    Ack,
    /// Client: negative acknowledge.
    Nack,
    /// Client: begin transaction.
    Begin,
    /// Client: commit transaction.
    Commit,
    /// Client: abort transaction.
    Abort,
    /// Client: close the session.
    Disconnect,
    /// Server: message on a subscription.
    Message,
    /// Server: receipt for a client frame.
    Receipt,
    /// Server: error; the server closes the connection afterwards.
    Error,
}

impl Command {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let command = match name {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(command)
    }

    /// Header values of CONNECT and CONNECTED frames are not escaped.
    #[must_use]
    pub const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
///
/// Headers keep wire order; when a header repeats, the first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: String,
}

impl StompFrame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT frame offering STOMP 1.0-1.2 and the given heart-beats.
    #[must_use]
    pub fn connect(host: &str, heartbeat_send: Duration, heartbeat_receive: Duration) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header(
                "heart-beat",
                format_heartbeat_header(heartbeat_send, heartbeat_receive),
            )
    }

    /// SUBSCRIBE frame with automatic acknowledgement.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// UNSUBSCRIBE frame.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// DISCONNECT frame.
    #[must_use]
    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).header("receipt", receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_parse_back() {
        for command in [
            Command::Connect,
            Command::Connected,
            Command::Subscribe,
            Command::Unsubscribe,
            Command::Disconnect,
            Command::Message,
            Command::Receipt,
            Command::Error,
        ] {
            assert_eq!(Command::parse(command.as_str()), Some(command));
        }
        assert_eq!(Command::parse("connect"), None);
        assert_eq!(Command::parse("HELLO"), None);
    }

    #[test]
    fn connect_frame_headers() {
        let frame = StompFrame::connect(
            "localhost:8080",
            Duration::from_millis(4000),
            Duration::from_millis(4000),
        );
        assert_eq!(frame.command, Command::Connect);
        assert_eq!(frame.get("accept-version"), Some("1.2,1.1,1.0"));
        assert_eq!(frame.get("host"), Some("localhost:8080"));
        assert_eq!(frame.get("heart-beat"), Some("4000,4000"));
    }

    #[test]
    fn first_header_wins() {
        let frame = StompFrame::new(Command::Message)
            .header("destination", "/topic/a")
            .header("destination", "/topic/b");
        assert_eq!(frame.get("destination"), Some("/topic/a"));
    }

    #[test]
    fn subscribe_frame_headers() {
        let frame = StompFrame::subscribe("order_book-1", "/topic/stock/005930");
        assert_eq!(frame.get("id"), Some("order_book-1"));
        assert_eq!(frame.get("destination"), Some("/topic/stock/005930"));
        assert_eq!(frame.get("ack"), Some("auto"));
    }
}
