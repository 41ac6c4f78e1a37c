//! # slirc-engine
//!
//! An IRCv3 client protocol engine. It sits between a line transport (which
//! owns the socket and framing) and the application, and turns raw server
//! lines into typed events.
//!
//! ## Features
//!
//! - CAP LS/REQ/ACK/NAK/NEW/DEL negotiation with pluggable handlers
//! - SASL PLAIN and EXTERNAL sequencing
//! - IRCv3 tag decoding with normalised message identity
//! - `draft/multiline` folding
//! - Strict Transport Security policies with durable storage
//! - CHATHISTORY command builders
//! - Batched USERHOST discovery on a tokio timer

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use slirc_engine::{
//!     ConnectionContext, ConnectionEngine, EngineConfig, IrcEvent, RawCommand, RecordingSender,
//!     StsPolicyService,
//! };
//!
//! let sender = Arc::new(RecordingSender::new());
//! let (mut engine, mut events) = ConnectionEngine::new(
//!     ConnectionContext::new("libera", "irc.libera.chat", 6697, true),
//!     EngineConfig::default(),
//!     Arc::new(StsPolicyService::in_memory()),
//!     sender.clone(),
//! );
//!
//! engine.start_negotiation()?;
//! engine.handle(&RawCommand::parse(":srv CAP * LS :multi-prefix server-time")?)?;
//! engine.handle(&RawCommand::parse(":srv CAP * ACK :multi-prefix server-time")?)?;
//! assert_eq!(
//!     sender.lines(),
//!     ["CAP LS 302", "CAP REQ :multi-prefix server-time", "CAP END"]
//! );
//!
//! engine.handle(&RawCommand::parse("@msgid=m1 :nick!u@h PRIVMSG #rust :hello")?)?;
//! while let Ok(event) = events.try_recv() {
//!     if let IrcEvent::ChannelMessage { text, .. } = &event {
//!         assert_eq!(text, "hello");
//!         assert_eq!(event.message_id(), "m1");
//!     }
//! }
//! # Ok::<(), slirc_engine::EngineError>(())
//! ```

pub mod caps;
pub mod casemap;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod ircv3;
pub mod isupport;
pub mod message;
pub mod prefix;
pub mod replies;
pub mod response;
pub mod sasl;
pub mod state;
pub mod sts;
pub mod transport;
pub mod userhost;
pub mod util;

pub use self::caps::{
    BatchedCapHandler, CapHandler, CapLsLine, CapMessage, CapNegotiator, Capability,
    MultiSaslHandler, SaslOutcome,
};
pub use self::casemap::CaseMapping;
pub use self::config::{EngineConfig, SaslConfig, UserhostConfig};
pub use self::engine::{ConnectionContext, ConnectionEngine};
pub use self::error::{EngineError, MessageParseError, Result};
pub use self::event::{
    CapChange, ConnectionPhase, EventMeta, IrcEvent, StandardReply, StandardReplyKind, TypingState,
};
pub use self::ircv3::{format_server_time, parse_server_time, ChatHistorySelector, MultilineAccumulator};
pub use self::isupport::{Isupport, IsupportEntry, MonitorSupport};
pub use self::message::{normalize_message_id, Ircv3Tags};
pub use self::prefix::{Hostmask, Source};
pub use self::replies::AwayState;
pub use self::response::Response;
pub use self::sasl::{encode_external, encode_plain, SaslMechanism};
pub use self::state::{CapFlags, ConnectionState};
pub use self::sts::{
    JsonFileStsStore, MemoryStsStore, ServerEndpoint, StsObservation, StsPolicy, StsPolicyService,
    StsStore,
};
pub use self::transport::{ChannelSender, OutgoingLine, RawCommand, RawSender, RecordingSender, ServerId};
pub use self::userhost::UserhostBatcher;
