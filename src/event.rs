//! Typed events delivered to the application.
//!
//! Every variant carries an [`EventMeta`]; consumers match on the variant
//! and use [`IrcEvent::message_id`] / [`IrcEvent::tags`] for identity.

use chrono::{DateTime, Utc};

use crate::caps::SaslOutcome;
use crate::message::{normalize_message_id, Ircv3Tags};
use crate::replies::{AwayState, BanListEntry, ListEntry, MonitorReply, UserhostEntry, WhoxEntry};
use crate::transport::ServerId;

/// Identity shared by every event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventMeta {
    pub server_id: ServerId,
    /// `time` tag if present, else receive time.
    pub timestamp: DateTime<Utc>,
    /// Trimmed msgid; empty when the line had none.
    pub message_id: String,
    pub tags: Ircv3Tags,
}

impl EventMeta {
    pub fn new(server_id: ServerId, timestamp: DateTime<Utc>, message_id: &str, tags: Ircv3Tags) -> Self {
        Self {
            server_id,
            timestamp,
            message_id: normalize_message_id(Some(message_id)),
            tags,
        }
    }

    /// Meta for a locally generated event.
    pub fn local(server_id: ServerId, timestamp: DateTime<Utc>) -> Self {
        Self::new(server_id, timestamp, "", Ircv3Tags::empty())
    }
}

/// FAIL / WARN / NOTE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StandardReplyKind {
    Fail,
    Warn,
    Note,
}

impl StandardReplyKind {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "FAIL" => Some(Self::Fail),
            "WARN" => Some(Self::Warn),
            "NOTE" => Some(Self::Note),
            _ => None,
        }
    }
}

/// A decoded standard reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StandardReply {
    pub kind: StandardReplyKind,
    /// Command the reply refers to, `*` for none.
    pub command: String,
    /// Machine-readable code.
    pub code: String,
    /// Context parameters between code and description.
    pub context: Vec<String>,
    pub description: String,
    /// `label` tag, empty if none.
    pub label: String,
}

impl StandardReply {
    /// `<command> <code> [context...] :<description>`
    pub fn parse<S: AsRef<str>>(kind: StandardReplyKind, params: &[S], tags: &Ircv3Tags) -> Option<Self> {
        let [command, code, rest @ ..] = params else {
            return None;
        };
        let (description, context) = match rest.split_last() {
            Some((last, context)) => (last.as_ref().to_owned(), context),
            None => (String::new(), rest),
        };
        Some(Self {
            kind,
            command: command.as_ref().to_owned(),
            code: code.as_ref().to_owned(),
            context: context.iter().map(|c| c.as_ref().to_owned()).collect(),
            description,
            label: tags.label().to_owned(),
        })
    }
}

/// How a capability changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapChange {
    /// ACKed (or listed by `CAP LIST`).
    Acked,
    /// `ACK -cap`.
    Removed,
    /// NAKed.
    Rejected,
    /// `CAP NEW`, with its value.
    Offered(Option<String>),
    /// `CAP DEL`.
    Withdrawn,
}

/// `+typing` states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingState {
    Active,
    Paused,
    Done,
}

impl TypingState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// Connection lifecycle, published on a watch channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Negotiating,
    Negotiated,
}

/// Everything the engine reports.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum IrcEvent {
    ChannelMessage {
        meta: EventMeta,
        channel: String,
        from: String,
        text: String,
        is_notice: bool,
        is_action: bool,
        /// Our own message echoed back.
        is_echo: bool,
    },
    PrivateMessage {
        meta: EventMeta,
        /// The other side of the conversation.
        peer: String,
        from: String,
        text: String,
        is_notice: bool,
        is_action: bool,
        is_echo: bool,
    },
    /// Any numeric without a dedicated variant.
    ServerLine {
        meta: EventMeta,
        code: u16,
        params: Vec<String>,
    },
    StandardReply {
        meta: EventMeta,
        reply: StandardReply,
    },
    CapabilityChanged {
        meta: EventMeta,
        capability: String,
        change: CapChange,
    },
    UserHostmaskObserved {
        meta: EventMeta,
        nick: String,
        hostmask: String,
    },
    UserAccountObserved {
        meta: EventMeta,
        nick: String,
        /// `None` when logged out.
        account: Option<String>,
    },
    UserRealnameObserved {
        meta: EventMeta,
        nick: String,
        realname: String,
    },
    UserAwayObserved {
        meta: EventMeta,
        nick: String,
        away: AwayState,
        message: Option<String>,
    },
    TypingObserved {
        meta: EventMeta,
        from: String,
        target: String,
        state: TypingState,
    },
    MessageReplyObserved {
        meta: EventMeta,
        from: String,
        target: String,
        reply_to: String,
    },
    MessageReactObserved {
        meta: EventMeta,
        from: String,
        target: String,
        reply_to: String,
        reaction: String,
    },
    ReadMarkerObserved {
        meta: EventMeta,
        target: String,
        /// `None` when the server has no marker (`*`).
        read_at: Option<DateTime<Utc>>,
    },
    ChannelListEntry {
        meta: EventMeta,
        entry: ListEntry,
    },
    ChannelListEnd {
        meta: EventMeta,
    },
    BanListEntry {
        meta: EventMeta,
        entry: BanListEntry,
    },
    BanListEnd {
        meta: EventMeta,
        channel: String,
    },
    MonitorStatus {
        meta: EventMeta,
        reply: MonitorReply,
    },
    WhoReply {
        meta: EventMeta,
        entry: WhoxEntry,
    },
    UserhostReply {
        meta: EventMeta,
        entries: Vec<UserhostEntry>,
    },
    BatchOpened {
        meta: EventMeta,
        id: String,
        kind: String,
        params: Vec<String>,
    },
    BatchClosed {
        meta: EventMeta,
        id: String,
    },
    SaslOutcome {
        meta: EventMeta,
        outcome: SaslOutcome,
    },
    /// A plaintext connection was told to reconnect with TLS.
    StsUpgradeAdvised {
        meta: EventMeta,
        port: u16,
    },
    NickChanged {
        meta: EventMeta,
        old: String,
        new: String,
        is_self: bool,
    },
    /// 001 received.
    Registered {
        meta: EventMeta,
        nick: String,
    },
    /// Anything else, passed through.
    Other {
        meta: EventMeta,
        command: String,
        source: Option<String>,
        params: Vec<String>,
    },
    /// Terminal event of a session.
    Disconnected {
        meta: EventMeta,
        reason: String,
    },
}

impl IrcEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::ChannelMessage { meta, .. }
            | Self::PrivateMessage { meta, .. }
            | Self::ServerLine { meta, .. }
            | Self::StandardReply { meta, .. }
            | Self::CapabilityChanged { meta, .. }
            | Self::UserHostmaskObserved { meta, .. }
            | Self::UserAccountObserved { meta, .. }
            | Self::UserRealnameObserved { meta, .. }
            | Self::UserAwayObserved { meta, .. }
            | Self::TypingObserved { meta, .. }
            | Self::MessageReplyObserved { meta, .. }
            | Self::MessageReactObserved { meta, .. }
            | Self::ReadMarkerObserved { meta, .. }
            | Self::ChannelListEntry { meta, .. }
            | Self::ChannelListEnd { meta }
            | Self::BanListEntry { meta, .. }
            | Self::BanListEnd { meta, .. }
            | Self::MonitorStatus { meta, .. }
            | Self::WhoReply { meta, .. }
            | Self::UserhostReply { meta, .. }
            | Self::BatchOpened { meta, .. }
            | Self::BatchClosed { meta, .. }
            | Self::SaslOutcome { meta, .. }
            | Self::StsUpgradeAdvised { meta, .. }
            | Self::NickChanged { meta, .. }
            | Self::Registered { meta, .. }
            | Self::Other { meta, .. }
            | Self::Disconnected { meta, .. } => meta,
        }
    }

    /// Trimmed message id, empty if none.
    pub fn message_id(&self) -> &str {
        &self.meta().message_id
    }

    pub fn tags(&self) -> &Ircv3Tags {
        &self.meta().tags
    }

    pub fn server_id(&self) -> &ServerId {
        &self.meta().server_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.meta().timestamp
    }
}
