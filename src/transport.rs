//! The seam between the engine and the line transport.
//!
//! The transport owns the socket, framing and the listener thread. It hands
//! each received line to the engine as a [`RawCommand`] and accepts literal
//! lines back through a [`RawSender`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{EngineError, Result};
use crate::message::{Ircv3Tags, ParsedLine};

/// Opaque key of one configured network connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(Arc<str>);

impl ServerId {
    /// Create a server id.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl AsRef<str> for ServerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One protocol line as delivered by the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawCommand {
    /// Command name or numeric, as sent.
    pub command: String,
    /// Source hostmask or server name.
    pub source: Option<String>,
    /// Channel/target context, when the command has one.
    pub target: Option<String>,
    /// The full line as received.
    pub raw_line: String,
    /// Ordered parameters, trailing last.
    pub params: Vec<String>,
    /// Tags already split (and unescaped) by the transport. May be empty,
    /// in which case tags are decoded from `raw_line`.
    pub tags: HashMap<String, String>,
}

/// Commands whose first parameter is the channel/target context.
const TARGETED: &[&str] = &[
    "PRIVMSG", "NOTICE", "TAGMSG", "JOIN", "PART", "KICK", "TOPIC", "MODE", "INVITE", "MARKREAD",
];

impl RawCommand {
    /// Split a raw line into a command.
    pub fn parse(line: &str) -> Result<Self> {
        let parsed = ParsedLine::parse(line).map_err(|cause| EngineError::InvalidMessage {
            string: line.to_owned(),
            cause,
        })?;
        let command = parsed.command.to_ascii_uppercase();
        let params: Vec<String> = parsed.params.iter().map(|p| (*p).to_owned()).collect();
        let target = if TARGETED.contains(&command.as_str()) {
            let idx = usize::from(command == "INVITE");
            params.get(idx).cloned()
        } else {
            None
        };
        Ok(Self {
            command,
            source: parsed.source.map(str::to_owned),
            target,
            raw_line: line.trim_end_matches(['\r', '\n']).to_owned(),
            params,
            tags: HashMap::new(),
        })
    }

    /// Parameter `idx`, if present.
    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// The last parameter.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// The numeric code, if the command is a three-digit numeric.
    pub fn numeric(&self) -> Option<u16> {
        if self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit()) {
            self.command.parse().ok()
        } else {
            None
        }
    }

    /// Normalised tags: the transport map when it has one, else the raw line.
    pub fn decoded_tags(&self) -> Ircv3Tags {
        if self.tags.is_empty() {
            Ircv3Tags::from_raw_line(&self.raw_line)
        } else {
            Ircv3Tags::from_map(&self.tags)
        }
    }
}

/// Outbound half of the transport.
pub trait RawSender: Send + Sync {
    /// Queue `line` (without CRLF) for `server_id`.
    fn send_raw(&self, server_id: &ServerId, line: &str) -> Result<()>;
}

impl<T: RawSender + ?Sized> RawSender for Arc<T> {
    fn send_raw(&self, server_id: &ServerId, line: &str) -> Result<()> {
        (**self).send_raw(server_id, line)
    }
}

/// A line queued for the transport's writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingLine {
    /// Connection the line belongs to.
    pub server_id: ServerId,
    /// The line, without CRLF.
    pub line: String,
}

/// [`RawSender`] that forwards into a tokio channel drained by the
/// transport's writer task.
#[derive(Clone, Debug)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<OutgoingLine>,
}

impl ChannelSender {
    /// Create a sender and the receiver the writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutgoingLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RawSender for ChannelSender {
    fn send_raw(&self, server_id: &ServerId, line: &str) -> Result<()> {
        self.tx
            .send(OutgoingLine {
                server_id: server_id.clone(),
                line: line.to_owned(),
            })
            .map_err(|_| EngineError::TransportClosed(server_id.to_string()))
    }
}

/// [`RawSender`] that records every line, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<OutgoingLine>>,
}

impl RecordingSender {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines sent so far.
    pub fn lines(&self) -> Vec<String> {
        self.sent.lock().iter().map(|o| o.line.clone()).collect()
    }

    /// Drain and return the lines sent so far.
    pub fn take(&self) -> Vec<String> {
        self.sent.lock().drain(..).map(|o| o.line).collect()
    }
}

impl RawSender for RecordingSender {
    fn send_raw(&self, server_id: &ServerId, line: &str) -> Result<()> {
        self.sent.lock().push(OutgoingLine {
            server_id: server_id.clone(),
            line: line.to_owned(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_privmsg() {
        let cmd = RawCommand::parse("@msgid=m1 :nick!u@h privmsg #chan :hello world\r\n").unwrap();
        assert_eq!(cmd.command, "PRIVMSG");
        assert_eq!(cmd.source.as_deref(), Some("nick!u@h"));
        assert_eq!(cmd.target.as_deref(), Some("#chan"));
        assert_eq!(cmd.trailing(), Some("hello world"));
        assert_eq!(cmd.decoded_tags().message_id(), "m1");
        assert!(!cmd.raw_line.ends_with('\n'));
    }

    #[test]
    fn test_numeric() {
        let cmd = RawCommand::parse(":srv 322 me #rust 42 :topic").unwrap();
        assert_eq!(cmd.numeric(), Some(322));
        assert_eq!(cmd.target, None);
        assert_eq!(RawCommand::parse("PING :x").unwrap().numeric(), None);
    }

    #[test]
    fn test_transport_tags_take_precedence() {
        let mut cmd = RawCommand::parse("@msgid=raw :n PRIVMSG #c :x").unwrap();
        cmd.tags.insert("msgid".into(), "mapped".into());
        assert_eq!(cmd.decoded_tags().message_id(), "mapped");
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            RawCommand::parse(""),
            Err(EngineError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn test_channel_sender_closed() {
        let (sender, rx) = ChannelSender::new();
        let id = ServerId::from("net");
        sender.send_raw(&id, "PING :x").unwrap();
        drop(rx);
        assert!(matches!(
            sender.send_raw(&id, "PING :y"),
            Err(EngineError::TransportClosed(_))
        ));
    }

    #[test]
    fn test_recording_sender() {
        let rec = RecordingSender::new();
        rec.send_raw(&ServerId::from("a"), "CAP LS 302").unwrap();
        assert_eq!(rec.lines(), vec!["CAP LS 302"]);
        assert_eq!(rec.take(), vec!["CAP LS 302"]);
        assert!(rec.lines().is_empty());
    }
}
