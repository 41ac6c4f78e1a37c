//! IRCv3 capability negotiation.
//!
//! CAP lines are decoded into [`CapMessage`] and fanned out by a
//! [`CapNegotiator`] to a set of [`CapHandler`] strategies. The negotiator
//! sends `CAP END` exactly once, after every handler reports finished.
//!
//! # Reference
//! - IRCv3 Capability Negotiation: <https://ircv3.net/specs/extensions/capability-negotiation>
//! - Individual capability specifications: <https://ircv3.net/irc/>

mod sasl;
mod wishlist;

pub use self::sasl::{MultiSaslHandler, SaslOutcome};
pub use self::wishlist::BatchedCapHandler;

use tracing::{debug, trace};

use crate::error::Result;
use crate::transport::{RawCommand, RawSender, ServerId};

/// Known IRCv3 capability types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Show all user prefix modes in NAMES
    MultiPrefix,
    /// SASL authentication
    Sasl,
    /// Notify of account login/logout
    AccountNotify,
    /// Notify of away status changes
    AwayNotify,
    /// Extended JOIN with account and realname
    ExtendedJoin,
    /// MONITOR command for presence tracking
    Monitor,
    /// Add account tag to messages
    AccountTag,
    /// Message batching
    Batch,
    /// Notify of capability changes
    CapNotify,
    /// Notify of hostname changes
    ChgHost,
    /// Echo messages back to sender
    EchoMessage,
    /// Notify of channel invites
    InviteNotify,
    /// Server-time message tags
    ServerTime,
    /// Full nick!user@host in NAMES
    UserhostInNames,
    /// SETNAME command for changing realname
    SetName,
    /// Client message tags support
    MessageTags,
    /// Label request/response correlation
    LabeledResponse,
    /// FAIL/WARN/NOTE standard replies
    StandardReplies,
    /// Strict Transport Security
    Sts,
    /// History playback
    ChatHistory,
    /// Multi-line messages
    Multiline,
    /// Read markers
    ReadMarker,
    /// Unknown/custom capability
    Custom(String),
}

impl AsRef<str> for Capability {
    fn as_ref(&self) -> &str {
        match self {
            Self::MultiPrefix => "multi-prefix",
            Self::Sasl => "sasl",
            Self::AccountNotify => "account-notify",
            Self::AwayNotify => "away-notify",
            Self::ExtendedJoin => "extended-join",
            Self::Monitor => "monitor",
            Self::AccountTag => "account-tag",
            Self::Batch => "batch",
            Self::CapNotify => "cap-notify",
            Self::ChgHost => "chghost",
            Self::EchoMessage => "echo-message",
            Self::InviteNotify => "invite-notify",
            Self::ServerTime => "server-time",
            Self::UserhostInNames => "userhost-in-names",
            Self::SetName => "setname",
            Self::MessageTags => "message-tags",
            Self::LabeledResponse => "labeled-response",
            Self::StandardReplies => "standard-replies",
            Self::Sts => "sts",
            Self::ChatHistory => "chathistory",
            Self::Multiline => "draft/multiline",
            Self::ReadMarker => "draft/read-marker",
            Self::Custom(s) => s,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        match canonical_cap_name(s).as_str() {
            "multi-prefix" => Self::MultiPrefix,
            "sasl" => Self::Sasl,
            "account-notify" => Self::AccountNotify,
            "away-notify" => Self::AwayNotify,
            "extended-join" => Self::ExtendedJoin,
            "monitor" => Self::Monitor,
            "account-tag" => Self::AccountTag,
            "batch" => Self::Batch,
            "cap-notify" => Self::CapNotify,
            "chghost" => Self::ChgHost,
            "echo-message" => Self::EchoMessage,
            "invite-notify" => Self::InviteNotify,
            "server-time" => Self::ServerTime,
            "userhost-in-names" => Self::UserhostInNames,
            "setname" => Self::SetName,
            "message-tags" => Self::MessageTags,
            "labeled-response" | "draft/labeled-response" => Self::LabeledResponse,
            "standard-replies" => Self::StandardReplies,
            "sts" => Self::Sts,
            "chathistory" | "draft/chathistory" => Self::ChatHistory,
            "draft/multiline" => Self::Multiline,
            "draft/read-marker" => Self::ReadMarker,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Canonical capability name of a CAP token.
///
/// Strips leading `-`, `:`, `~` and `=` sigils, drops any `=value` suffix
/// and lower-cases.
pub fn canonical_cap_name(token: &str) -> String {
    let name = token.trim().trim_start_matches(['-', ':', '~', '=']);
    let name = name.split_once('=').map_or(name, |(n, _)| n);
    name.to_ascii_lowercase()
}

/// The `=value` part of a CAP token, if any.
pub fn cap_value(token: &str) -> Option<&str> {
    token.split_once('=').map(|(_, v)| v)
}

/// Whether an ACK token removes the capability (`-name`).
pub fn is_removal(token: &str) -> bool {
    token.trim().trim_start_matches(':').starts_with('-')
}

/// One `CAP LS`/`CAP LIST` line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapLsLine {
    /// Raw tokens, values kept.
    pub tokens: Vec<String>,
    /// No continuation line follows.
    pub is_final: bool,
}

impl CapLsLine {
    /// Build from the tokens after `LS`: `["*", "a b"]` or `["a b"]`.
    ///
    /// The explicit `*` parameter marks a continuation. A trailing `*`
    /// token inside the list is accepted as the same marker.
    pub fn from_params<S: AsRef<str>>(rest: &[S]) -> Self {
        let (marker, list) = match rest {
            [marker, list, ..] if marker.as_ref() == "*" => (true, list.as_ref()),
            [list, ..] => (false, list.as_ref()),
            [] => (false, ""),
        };
        let mut tokens: Vec<String> = list.split_whitespace().map(str::to_owned).collect();
        let sentinel = tokens.last().is_some_and(|t| t == "*");
        if sentinel {
            tokens.pop();
        }
        Self {
            tokens,
            is_final: !(marker || sentinel),
        }
    }

    /// Canonical names of the advertised tokens.
    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        self.tokens.iter().map(|t| canonical_cap_name(t))
    }
}

/// A decoded server `CAP` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapMessage {
    /// `CAP <nick> LS [*] :caps`
    Ls(CapLsLine),
    /// `CAP <nick> LIST [*] :caps`
    List(CapLsLine),
    /// `CAP <nick> ACK :caps`
    Ack(Vec<String>),
    /// `CAP <nick> NAK :caps`
    Nak(Vec<String>),
    /// `CAP <nick> NEW :caps`
    New(Vec<String>),
    /// `CAP <nick> DEL :caps`
    Del(Vec<String>),
}

impl CapMessage {
    /// Decode a `CAP` command; `None` for other commands or unknown
    /// subcommands.
    pub fn parse(command: &RawCommand) -> Option<Self> {
        if command.command != "CAP" {
            return None;
        }
        let sub = command.param(1)?.to_ascii_uppercase();
        let rest = command.params.get(2..).unwrap_or_default();
        let list = || -> Vec<String> {
            rest.last()
                .map(|l| l.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default()
        };
        Some(match sub.as_str() {
            "LS" => Self::Ls(CapLsLine::from_params(rest)),
            "LIST" => Self::List(CapLsLine::from_params(rest)),
            "ACK" => Self::Ack(list()),
            "NAK" => Self::Nak(list()),
            "NEW" => Self::New(list()),
            "DEL" => Self::Del(list()),
            _ => return None,
        })
    }
}

/// One negotiation strategy.
///
/// Every `handle_*` returns `Ok(true)` only on the call that completes the
/// handler; later calls return `Ok(false)`.
pub trait CapHandler: Send {
    /// A `CAP LS` line arrived.
    fn handle_ls(&mut self, sender: &dyn RawSender, server_id: &ServerId, line: &CapLsLine) -> Result<bool>;

    /// A `CAP ACK` arrived.
    fn handle_ack(&mut self, sender: &dyn RawSender, server_id: &ServerId, caps: &[String]) -> Result<bool>;

    /// A `CAP NAK` arrived.
    fn handle_nak(&mut self, sender: &dyn RawSender, server_id: &ServerId, caps: &[String]) -> Result<bool>;

    /// Any non-CAP line during negotiation (AUTHENTICATE, numerics).
    fn handle_other(
        &mut self,
        _sender: &dyn RawSender,
        _server_id: &ServerId,
        _command: &RawCommand,
    ) -> Result<bool> {
        Ok(false)
    }

    /// Whether this handler has nothing left to do.
    fn is_finished(&self) -> bool;

    /// How SASL ended, for handlers that authenticate.
    fn sasl_outcome(&self) -> Option<&SaslOutcome> {
        None
    }

    /// Forget everything; called before a new `CAP LS`.
    fn reset(&mut self);
}

/// Drives a set of handlers and closes negotiation with one `CAP END`.
pub struct CapNegotiator {
    handlers: Vec<Box<dyn CapHandler>>,
    ls_complete: bool,
    end_sent: bool,
}

impl std::fmt::Debug for CapNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapNegotiator")
            .field("handlers", &self.handlers.len())
            .field("ls_complete", &self.ls_complete)
            .field("end_sent", &self.end_sent)
            .finish()
    }
}

impl CapNegotiator {
    pub fn new(handlers: Vec<Box<dyn CapHandler>>) -> Self {
        Self {
            handlers,
            ls_complete: false,
            end_sent: false,
        }
    }

    /// Reset every handler and send `CAP LS 302`.
    pub fn start(&mut self, sender: &dyn RawSender, server_id: &ServerId) -> Result<()> {
        self.reset();
        sender.send_raw(server_id, "CAP LS 302")
    }

    /// Forget negotiation progress.
    pub fn reset(&mut self) {
        self.handlers.iter_mut().for_each(|h| h.reset());
        self.ls_complete = false;
        self.end_sent = false;
    }

    /// `CAP END` has been sent, or negotiation was abandoned.
    pub fn is_complete(&self) -> bool {
        self.end_sent
    }

    /// The first SASL outcome any handler has reached this session.
    pub fn sasl_outcome(&self) -> Option<&SaslOutcome> {
        self.handlers.iter().find_map(|h| h.sasl_outcome())
    }

    /// Mark negotiation over without sending `CAP END` (server never
    /// answered CAP and registered us anyway).
    pub fn abandon(&mut self) {
        self.end_sent = true;
    }

    /// Feed a CAP line. Returns `true` if this call sent `CAP END`.
    pub fn handle_cap(
        &mut self,
        sender: &dyn RawSender,
        server_id: &ServerId,
        message: &CapMessage,
    ) -> Result<bool> {
        if self.end_sent {
            return Ok(false);
        }
        for handler in &mut self.handlers {
            let done = match message {
                CapMessage::Ls(line) => handler.handle_ls(sender, server_id, line)?,
                CapMessage::Ack(caps) => handler.handle_ack(sender, server_id, caps)?,
                CapMessage::Nak(caps) => handler.handle_nak(sender, server_id, caps)?,
                _ => false,
            };
            if done {
                trace!(server = %server_id, "cap handler finished");
            }
        }
        if let CapMessage::Ls(line) = message {
            self.ls_complete |= line.is_final;
        }
        self.maybe_end(sender, server_id)
    }

    /// Feed any other line. Returns `true` if this call sent `CAP END`.
    pub fn handle_other(
        &mut self,
        sender: &dyn RawSender,
        server_id: &ServerId,
        command: &RawCommand,
    ) -> Result<bool> {
        if self.end_sent {
            return Ok(false);
        }
        for handler in &mut self.handlers {
            handler.handle_other(sender, server_id, command)?;
        }
        self.maybe_end(sender, server_id)
    }

    fn maybe_end(&mut self, sender: &dyn RawSender, server_id: &ServerId) -> Result<bool> {
        if self.end_sent || !self.ls_complete || !self.handlers.iter().all(|h| h.is_finished()) {
            return Ok(false);
        }
        sender.send_raw(server_id, "CAP END")?;
        self.end_sent = true;
        debug!(server = %server_id, "capability negotiation complete");
        Ok(true)
    }
}
