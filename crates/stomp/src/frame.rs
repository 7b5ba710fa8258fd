//! STOMP 1.2 frames: command, ordered headers and an opaque body.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::StompError;

/// Header names used by the client.
pub mod header {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const HOST: &str = "host";
    pub const LOGIN: &str = "login";
    pub const PASSCODE: &str = "passcode";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const VERSION: &str = "version";
    pub const SESSION: &str = "session";
    pub const SERVER: &str = "server";
    pub const DESTINATION: &str = "destination";
    pub const ID: &str = "id";
    pub const ACK: &str = "ack";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const MESSAGE_ID: &str = "message-id";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const MESSAGE: &str = "message";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // client → server
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    // server → client
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim; every other frame
    /// escapes `\\`, `\n`, `\r` and `:` in header names and values.
    pub(crate) fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(StompError::Protocol(format!("unknown command {other:?}"))),
        })
    }
}

/// A single STOMP frame.
///
/// Headers keep their wire order. When a name repeats, the first
/// occurrence wins on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Human-readable description of an ERROR frame.
    pub(crate) fn error_message(&self) -> String {
        let summary = self.header(header::MESSAGE).unwrap_or("error frame");
        if self.body.is_empty() {
            summary.to_owned()
        } else {
            format!("{summary}: {}", self.body_text().trim_end())
        }
    }
}

// ── header escaping ─────────────────────────────────────────────────

pub(crate) fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn unescape(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            other => {
                return Err(StompError::Protocol(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_round_trip_through_from_str() {
        for cmd in [Command::Connected, Command::Message, Command::Error] {
            assert_eq!(cmd.as_str().parse::<Command>().unwrap(), cmd);
        }
        assert!("PUBLISH".parse::<Command>().is_err());
    }

    #[test]
    fn first_header_wins() {
        let f = Frame::new(Command::Message)
            .with_header("destination", "/topic/a")
            .with_header("destination", "/topic/b");
        assert_eq!(f.header("destination"), Some("/topic/a"));
    }

    #[test]
    fn escaping_covers_reserved_characters() {
        let raw = "a:b\\c\nd";
        let escaped = escape(raw);
        assert_eq!(escaped, "a\\cb\\\\c\\nd");
        assert_eq!(unescape(&escaped).unwrap(), raw);
        assert!(unescape("bad\\t").is_err());
    }

    #[test]
    fn error_message_includes_body() {
        let f = Frame::new(Command::Error)
            .with_header("message", "access denied")
            .with_body("not authorized for topic\n");
        assert_eq!(f.error_message(), "access denied: not authorized for topic");
    }
}
