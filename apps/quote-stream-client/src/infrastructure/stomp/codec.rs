//! STOMP Codec
//!
//! Text encoding of STOMP frames carried in WebSocket text messages.
//!
//! # Wire Format
//!
//! ```text
//! COMMAND EOL
//! *( header-name ":" header-value EOL )
//! EOL
//! body NUL *( EOL )
//! ```
//!
//! `EOL` is `\n` or `\r\n`. A message consisting only of EOLs is a
//! heart-beat. When `content-length` is present the body is exactly that
//! many bytes; otherwise it runs to the first NUL.

use super::frame::{Command, StompFrame};

const NUL: char = '\0';

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Frame ended before the header block or body was complete.
    #[error("incomplete frame")]
    Incomplete,

    /// Body is not terminated by NUL.
    #[error("frame is missing its NUL terminator")]
    MissingNullTerminator,

    /// Binary payload is not UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Header line without a colon.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    /// Unknown escape sequence in a header.
    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    /// `content-length` is not a number or points past the payload.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    /// Unrecognised command line.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// Item decoded from one WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete frame.
    Frame(StompFrame),
    /// A heart-beat EOL.
    Heartbeat,
}

/// STOMP text codec.
#[derive(Debug, Default, Clone)]
pub struct StompCodec;

impl StompCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a frame. A non-empty body gets a `content-length` header unless
    /// one is already set.
    #[must_use]
    pub fn encode(&self, frame: &StompFrame) -> String {
        let mut out = String::with_capacity(64 + frame.body.len());
        out.push_str(frame.command.as_str());
        out.push('\n');

        let escape = frame.command.escapes_headers();
        for (name, value) in &frame.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !frame.body.is_empty() && frame.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&frame.body.len().to_string());
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&frame.body);
        out.push(NUL);
        out
    }

    /// Heart-beat payload.
    #[must_use]
    pub const fn heartbeat(&self) -> &'static str {
        "\n"
    }

    /// Decode a binary WebSocket payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not UTF-8 or not valid STOMP.
    pub fn decode_bytes(&self, payload: &[u8]) -> Result<Vec<Inbound>, CodecError> {
        let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;
        self.decode(text)
    }

    /// Decode a text WebSocket payload into frames and heart-beats.
    ///
    /// # Errors
    ///
    /// Returns an error if any frame in the payload is malformed.
    pub fn decode(&self, text: &str) -> Result<Vec<Inbound>, CodecError> {
        let mut rest = skip_eols(text);
        if rest.is_empty() {
            return Ok(if text.is_empty() {
                Vec::new()
            } else {
                vec![Inbound::Heartbeat]
            });
        }

        let mut items = Vec::new();
        while !rest.is_empty() {
            let (frame, consumed) = decode_frame(rest)?;
            items.push(Inbound::Frame(frame));
            rest = skip_eols(&rest[consumed..]);
        }
        Ok(items)
    }
}

fn skip_eols(text: &str) -> &str {
    text.trim_start_matches(['\n', '\r'])
}

/// Split the next line off `input`, returning the line without its EOL and
/// the remainder.
fn next_line(input: &str) -> Option<(&str, &str)> {
    let (line, rest) = input.split_once('\n')?;
    Some((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn decode_frame(input: &str) -> Result<(StompFrame, usize), CodecError> {
    let (command_line, mut rest) = next_line(input).ok_or(CodecError::Incomplete)?;
    let command = Command::parse(command_line)
        .ok_or_else(|| CodecError::UnknownCommand(command_line.to_string()))?;

    let mut frame = StompFrame::new(command);
    loop {
        let (line, remainder) = next_line(rest).ok_or(CodecError::Incomplete)?;
        rest = remainder;
        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            frame.headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }

    let body_start = input.len() - rest.len();
    let body_len = match frame.get("content-length") {
        Some(raw) => {
            let len: usize = raw
                .trim()
                .parse()
                .map_err(|_| CodecError::InvalidContentLength(raw.to_string()))?;
            if len > rest.len() {
                return Err(CodecError::Incomplete);
            }
            if !rest.is_char_boundary(len) {
                return Err(CodecError::InvalidContentLength(raw.to_string()));
            }
            if !rest[len..].starts_with(NUL) {
                return Err(CodecError::MissingNullTerminator);
            }
            len
        }
        None => rest.find(NUL).ok_or(CodecError::MissingNullTerminator)?,
    };

    frame.body = rest[..body_len].to_string();
    Ok((frame, body_start + body_len + NUL.len_utf8()))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(CodecError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_case::test_case;

    use super::*;

    fn codec() -> StompCodec {
        StompCodec::new()
    }

    fn single_frame(text: &str) -> StompFrame {
        match codec().decode(text).unwrap().as_slice() {
            [Inbound::Frame(frame)] => frame.clone(),
            other => panic!("expected one frame, got {other:?}"),
        }
    }

    #[test]
    fn encode_subscribe() {
        let encoded = codec().encode(&StompFrame::subscribe("sub-0", "/topic/stock/005930"));
        assert_eq!(
            encoded,
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/stock/005930\nack:auto\n\n\0"
        );
    }

    #[test]
    fn encode_connect_is_not_escaped() {
        let encoded = codec().encode(&StompFrame::connect(
            "localhost:8080",
            Duration::from_millis(4000),
            Duration::from_millis(4000),
        ));
        assert!(encoded.contains("host:localhost:8080\n"));
        assert!(encoded.starts_with("CONNECT\n"));
    }

    #[test]
    fn encode_body_adds_content_length() {
        let frame = StompFrame::new(Command::Message)
            .header("destination", "/topic/stock/005930")
            .with_body("{\"a\":1}");
        let encoded = codec().encode(&frame);
        assert!(encoded.contains("content-length:7\n"));
        assert!(encoded.ends_with("\n\n{\"a\":1}\0"));
    }

    #[test]
    fn decode_connected() {
        let frame = single_frame("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0");
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
        assert_eq!(frame.get("heart-beat"), Some("0,0"));
        assert!(frame.body.is_empty());
    }

    #[test]
    fn decode_message_with_crlf() {
        let frame = single_frame(
            "MESSAGE\r\ndestination:/topic/stock/005930\r\nsubscription:s1\r\n\r\n{\"price\":1}\0\r\n",
        );
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("s1"));
        assert_eq!(frame.body, "{\"price\":1}");
    }

    #[test]
    fn decode_content_length_allows_nul_in_body() {
        let frame = single_frame("MESSAGE\ncontent-length:3\n\na\0b\0");
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn decode_multiple_frames_in_one_message() {
        let items = codec()
            .decode("RECEIPT\nreceipt-id:1\n\n\0\nRECEIPT\nreceipt-id:2\n\n\0")
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn decode_heartbeat() {
        assert_eq!(codec().decode("\n").unwrap(), vec![Inbound::Heartbeat]);
        assert_eq!(codec().decode("\r\n").unwrap(), vec![Inbound::Heartbeat]);
        assert!(codec().decode("").unwrap().is_empty());
    }

    #[test]
    fn header_escapes_round_trip() {
        let frame = StompFrame::new(Command::Message)
            .header("weird:name", "line1\nline2\\end\r");
        let decoded = single_frame(&codec().encode(&frame));
        assert_eq!(decoded.get("weird:name"), Some("line1\nline2\\end\r"));
    }

    #[test]
    fn repeated_header_first_wins() {
        let frame = single_frame("MESSAGE\nfoo:1\nfoo:2\n\n\0");
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test_case("MESSAGE\nno-colon\n\n\0", CodecError::MalformedHeader("no-colon".into()) ; "header without colon")]
    #[test_case("MESSAGE\nfoo:bar\\t\n\n\0", CodecError::InvalidEscape("bar\\t".into()) ; "bad escape")]
    #[test_case("MESSAGE\n\nbody", CodecError::MissingNullTerminator ; "no nul")]
    #[test_case("MESSAGE\ncontent-length:x\n\n\0", CodecError::InvalidContentLength("x".into()) ; "bad length")]
    #[test_case("MESSAGE\ncontent-length:10\n\nab\0", CodecError::Incomplete ; "length past end")]
    #[test_case("MESSAGE\ncontent-length:1\n\nab\0", CodecError::MissingNullTerminator ; "length short of nul")]
    #[test_case("HELLO\n\n\0", CodecError::UnknownCommand("HELLO".into()) ; "unknown command")]
    #[test_case("MESSAGE\nfoo:bar", CodecError::Incomplete ; "truncated headers")]
    fn decode_errors(input: &str, expected: CodecError) {
        assert_eq!(codec().decode(input).unwrap_err(), expected);
    }

    #[test]
    fn decode_bytes_rejects_invalid_utf8() {
        assert_eq!(
            codec().decode_bytes(&[0xff, 0xfe]).unwrap_err(),
            CodecError::InvalidUtf8
        );
    }
}
