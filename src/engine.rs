//! Per-connection protocol engine.
//!
//! The transport calls [`ConnectionEngine::handle`] once per received line,
//! in order, from the connection's listener. The engine updates
//! [`ConnectionState`], drives capability negotiation and emits
//! [`IrcEvent`]s on an unbounded channel. Message-bearing events are never
//! dropped; the connection phase is published on a `watch` channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::caps::{
    canonical_cap_name, cap_value, is_removal, BatchedCapHandler, CapLsLine, CapMessage,
    CapNegotiator, SaslOutcome,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::event::{
    CapChange, ConnectionPhase, EventMeta, IrcEvent, StandardReply, StandardReplyKind, TypingState,
};
use crate::ircv3::multiline::{FoldedMessage, MultilineAccumulator};
use crate::ircv3::server_time::timestamp_or;
use crate::isupport::Isupport;
use crate::message::tags::{Ircv3Tags, ACCOUNT, TIME};
use crate::prefix::Source;
use crate::replies::{
    build_whox_request, is_alis_help_line, is_foreign_whox_reply, parse_alis_notice,
    parse_ban_list_end, parse_ban_list_row, parse_list_row, parse_monitor_reply,
    parse_userhost_reply, parse_who_reply, parse_whox_strict, AwayState, MonitorReply,
};
use crate::response::Response;
use crate::sasl::SaslNumeric;
use crate::state::ConnectionState;
use crate::sts::{StsDirectives, StsPolicyService};
use crate::transport::{RawCommand, RawSender, ServerId};
use crate::util::truncate_utf8_safe;

/// Token our WHOX queries carry.
pub const WHOX_TOKEN: &str = "152";

const LOG_PREVIEW_BYTES: usize = 120;

/// Where this engine is connected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionContext {
    pub server_id: ServerId,
    pub host: String,
    pub port: u16,
    /// Whether the transport is TLS. STS is only learned when it is.
    pub tls: bool,
}

impl ConnectionContext {
    pub fn new(server_id: impl Into<ServerId>, host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            server_id: server_id.into(),
            host: host.into(),
            port,
            tls,
        }
    }
}

/// Decoded identity of the line being handled.
struct LineContext {
    tags: Ircv3Tags,
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    source: Option<Source>,
}

impl LineContext {
    /// Sender nick, or the server name for server-sourced lines.
    fn from_nick(&self) -> &str {
        match &self.source {
            Some(Source::User(mask)) => &mask.nick,
            Some(Source::Server(name)) => name,
            None => "",
        }
    }
}

/// One message-bearing line after multiline folding.
struct MessageLine<'a> {
    command: &'a str,
    from: &'a str,
    target: &'a str,
    text: &'a str,
    timestamp: DateTime<Utc>,
    message_id: &'a str,
    tags: &'a Ircv3Tags,
}

/// Protocol engine for one server connection.
pub struct ConnectionEngine {
    ctx: ConnectionContext,
    config: EngineConfig,
    state: Arc<ConnectionState>,
    sts: Arc<StsPolicyService>,
    sender: Arc<dyn RawSender>,
    negotiator: CapNegotiator,
    wishlist: BatchedCapHandler,
    multiline: MultilineAccumulator,
    events: mpsc::UnboundedSender<IrcEvent>,
    phase: watch::Sender<ConnectionPhase>,
    ls_seen: bool,
    /// The session's `SaslOutcome` has been emitted.
    sasl_reported: bool,
    /// A `Disconnected` is still owed for the current session.
    session_open: bool,
}

impl std::fmt::Debug for ConnectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEngine")
            .field("ctx", &self.ctx)
            .field("negotiator", &self.negotiator)
            .field("phase", &*self.phase.borrow())
            .field("session_open", &self.session_open)
            .finish_non_exhaustive()
    }
}

impl ConnectionEngine {
    /// Create an engine and the receiving end of its event stream.
    pub fn new(
        ctx: ConnectionContext,
        config: EngineConfig,
        sts: Arc<StsPolicyService>,
        sender: Arc<dyn RawSender>,
    ) -> (Self, mpsc::UnboundedReceiver<IrcEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(ConnectionPhase::Disconnected);
        let state = Arc::new(ConnectionState::new());
        if let Some(nick) = &config.nick {
            state.set_own_nick(nick);
        }
        let negotiator = CapNegotiator::new(config.cap_handlers());
        let wishlist = BatchedCapHandler::new(
            config
                .wishlist
                .iter()
                .filter(|c| !c.eq_ignore_ascii_case("sasl")),
        );
        let engine = Self {
            ctx,
            config,
            state,
            sts,
            sender,
            negotiator,
            wishlist,
            multiline: MultilineAccumulator::new(),
            events,
            phase,
            ls_seen: false,
            sasl_reported: false,
            session_open: true,
        };
        (engine, rx)
    }

    pub fn server_id(&self) -> &ServerId {
        &self.ctx.server_id
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.ctx
    }

    /// Shared state, for timers such as the userhost batcher.
    pub fn state(&self) -> Arc<ConnectionState> {
        Arc::clone(&self.state)
    }

    /// Latest-value view of the connection phase.
    pub fn subscribe_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    /// Begin a session: send `CAP LS 302`.
    pub fn start_negotiation(&mut self) -> Result<()> {
        self.multiline.reset();
        self.ls_seen = false;
        self.sasl_reported = false;
        self.session_open = true;
        self.set_phase(ConnectionPhase::Negotiating);
        info!(server = %self.ctx.server_id, host = %self.ctx.host, tls = self.ctx.tls, "starting capability negotiation");
        self.negotiator.start(self.sender.as_ref(), &self.ctx.server_id)
    }

    /// Reset all state and emit the session's `Disconnected`.
    ///
    /// A second call only repeats the reset.
    pub fn disconnect(&mut self, reason: &str) {
        self.state.reset_negotiated_caps();
        self.multiline.reset();
        self.negotiator.reset();
        self.ls_seen = false;
        self.sasl_reported = false;
        self.set_phase(ConnectionPhase::Disconnected);
        if !std::mem::take(&mut self.session_open) {
            debug!(server = %self.ctx.server_id, "already disconnected");
            return;
        }
        info!(server = %self.ctx.server_id, reason = %reason, "disconnected");
        let meta = EventMeta::local(self.ctx.server_id.clone(), Utc::now());
        self.emit(IrcEvent::Disconnected {
            meta,
            reason: reason.to_owned(),
        });
    }

    /// Send a literal line.
    pub fn send_raw(&self, line: &str) -> Result<()> {
        self.sender.send_raw(&self.ctx.server_id, line)
    }

    /// Send a PRIVMSG and remember where it went, so its echo can be
    /// attributed to the right conversation.
    pub fn send_private(&self, target: &str, text: &str) -> Result<()> {
        self.send_private_at(target, text, Utc::now())
    }

    pub fn send_private_at(&self, target: &str, text: &str, now: DateTime<Utc>) -> Result<()> {
        self.send_raw(&format!("PRIVMSG {target} :{text}"))?;
        let own = self.state.own_nick().unwrap_or_else(|| "*".to_owned());
        self.state
            .remember_private_target_hint(&own, target, "PRIVMSG", text, "", now_ms(now));
        Ok(())
    }

    /// Send a WHOX query tagged with [`WHOX_TOKEN`], or plain WHO when the
    /// server does not advertise WHOX.
    pub fn send_who(&self, mask: &str) -> Result<()> {
        if self.state.supports_whox() {
            self.send_raw(&build_whox_request(mask, WHOX_TOKEN)?)
        } else {
            self.send_raw(&format!("WHO {}", mask.trim()))
        }
    }

    /// Handle one received line.
    pub fn handle(&mut self, command: &RawCommand) -> Result<()> {
        self.handle_at(command, Utc::now())
    }

    /// Handle one received line with an explicit receive time.
    pub fn handle_at(&mut self, command: &RawCommand, now: DateTime<Utc>) -> Result<()> {
        let tags = command.decoded_tags();
        let line = LineContext {
            timestamp: timestamp_or(tags.get(TIME), now),
            tags,
            now,
            source: command.source.as_deref().map(Source::parse),
        };
        trace!(
            server = %self.ctx.server_id,
            line = %truncate_utf8_safe(&command.raw_line, LOG_PREVIEW_BYTES),
            "received"
        );

        if command.command != "CAP" && !self.negotiator.is_complete() {
            let ended = self
                .negotiator
                .handle_other(self.sender.as_ref(), &self.ctx.server_id, command)?;
            self.report_sasl_outcome(&line);
            if ended {
                self.set_phase(ConnectionPhase::Negotiated);
            }
        }

        self.observe_source(&line);

        match command.command.as_str() {
            "CAP" => self.on_cap(command, &line),
            "PRIVMSG" | "NOTICE" => {
                self.on_message(command, &line);
                Ok(())
            }
            "TAGMSG" => {
                self.on_tagmsg(command, &line);
                Ok(())
            }
            "MARKREAD" => {
                self.on_markread(command, &line);
                Ok(())
            }
            "ACCOUNT" => {
                let account = command.param(0).unwrap_or("*");
                self.observe_account(&line, line.from_nick(), Some(account));
                Ok(())
            }
            "AWAY" => {
                self.on_away(command, &line);
                Ok(())
            }
            "CHGHOST" => {
                self.on_chghost(command, &line);
                Ok(())
            }
            "SETNAME" => {
                let nick = line.from_nick().to_owned();
                if let Some(realname) = command.param(0) {
                    let meta = self.meta(&line);
                    self.emit(IrcEvent::UserRealnameObserved {
                        meta,
                        nick,
                        realname: realname.to_owned(),
                    });
                }
                Ok(())
            }
            "JOIN" => {
                self.on_join(command, &line);
                Ok(())
            }
            "NICK" => {
                self.on_nick(command, &line);
                Ok(())
            }
            "BATCH" => {
                self.on_batch(command, &line);
                Ok(())
            }
            "FAIL" | "WARN" | "NOTE" => {
                self.on_standard_reply(command, &line);
                Ok(())
            }
            "AUTHENTICATE" => Ok(()),
            _ => match command.numeric() {
                Some(code) => self.on_numeric(code, command, &line),
                None => {
                    self.emit_other(command, &line);
                    Ok(())
                }
            },
        }
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            *current = phase;
            true
        });
    }

    fn meta(&self, line: &LineContext) -> EventMeta {
        EventMeta::new(
            self.ctx.server_id.clone(),
            line.timestamp,
            line.tags.message_id(),
            line.tags.clone(),
        )
    }

    fn emit(&self, event: IrcEvent) {
        if self.events.send(event).is_err() {
            trace!(server = %self.ctx.server_id, "event receiver dropped");
        }
    }

    fn emit_other(&self, command: &RawCommand, line: &LineContext) {
        let meta = self.meta(line);
        self.emit(IrcEvent::Other {
            meta,
            command: command.command.clone(),
            source: command.source.clone(),
            params: command.params.clone(),
        });
    }

    /// Hostmask from the source and account from `account-tag`.
    fn observe_source(&self, line: &LineContext) {
        let Some(Source::User(mask)) = &line.source else {
            return;
        };
        if mask.is_complete() {
            self.observe_hostmask(line, &mask.nick, &mask.to_string());
        }
        if let Some(account) = line.tags.get(ACCOUNT) {
            self.observe_account(line, &mask.nick, Some(account));
        }
    }

    fn observe_hostmask(&self, line: &LineContext, nick: &str, hostmask: &str) {
        if nick.is_empty() || !self.state.observe_hostmask(nick, hostmask) {
            return;
        }
        let meta = self.meta(line);
        self.emit(IrcEvent::UserHostmaskObserved {
            meta,
            nick: nick.to_owned(),
            hostmask: hostmask.to_owned(),
        });
    }

    fn observe_account(&self, line: &LineContext, nick: &str, account: Option<&str>) {
        if nick.is_empty() {
            return;
        }
        if self.state.is_own_nick(nick) {
            let own = account.filter(|a| !a.is_empty() && *a != "*" && *a != "0");
            self.state.set_own_account(own);
        }
        if !self.state.observe_account(nick, account) {
            return;
        }
        let meta = self.meta(line);
        self.emit(IrcEvent::UserAccountObserved {
            meta,
            nick: nick.to_owned(),
            account: self.state.account_of(nick).flatten(),
        });
    }

    fn observe_away(&self, line: &LineContext, nick: &str, away: AwayState, message: Option<String>) {
        if self.state.is_own_nick(nick) {
            self.state.set_own_away(away);
        }
        let meta = self.meta(line);
        self.emit(IrcEvent::UserAwayObserved {
            meta,
            nick: nick.to_owned(),
            away,
            message,
        });
    }

    fn cap_event(&self, line: &LineContext, capability: String, change: CapChange) {
        debug!(server = %self.ctx.server_id, cap = %capability, change = ?change, "capability changed");
        let meta = self.meta(line);
        self.emit(IrcEvent::CapabilityChanged {
            meta,
            capability,
            change,
        });
    }

    /// Emit the SASL handler's outcome once it has one.
    fn report_sasl_outcome(&mut self, line: &LineContext) {
        if self.sasl_reported {
            return;
        }
        if let Some(outcome) = self.negotiator.sasl_outcome().cloned() {
            self.sasl_event(line, outcome);
        }
    }

    fn sasl_event(&mut self, line: &LineContext, outcome: SaslOutcome) {
        if self.config.sasl.is_none() || std::mem::replace(&mut self.sasl_reported, true) {
            return;
        }
        info!(server = %self.ctx.server_id, outcome = ?outcome, "sasl finished");
        let meta = self.meta(line);
        self.emit(IrcEvent::SaslOutcome { meta, outcome });
    }

    fn on_cap(&mut self, command: &RawCommand, line: &LineContext) -> Result<()> {
        let Some(message) = CapMessage::parse(command) else {
            debug!(server = %self.ctx.server_id, params = ?command.params, "unrecognised CAP line");
            return Ok(());
        };
        match &message {
            CapMessage::Ls(ls) => self.on_cap_ls(ls, line),
            CapMessage::List(list) => {
                for token in &list.tokens {
                    self.state.record_cap_ack(token);
                }
            }
            CapMessage::Ack(caps) => {
                for token in caps {
                    if self.state.record_cap_ack(token) {
                        let change = if is_removal(token) {
                            CapChange::Removed
                        } else {
                            CapChange::Acked
                        };
                        self.cap_event(line, canonical_cap_name(token), change);
                    }
                }
            }
            CapMessage::Nak(caps) => {
                for token in caps {
                    let name = canonical_cap_name(token);
                    if self.state.record_cap_nak(token) {
                        self.cap_event(line, name.clone(), CapChange::Rejected);
                    }
                }
            }
            CapMessage::New(caps) => self.on_cap_new(caps, line)?,
            CapMessage::Del(caps) => {
                for token in caps {
                    if self.state.record_cap_del(token) {
                        self.cap_event(line, canonical_cap_name(token), CapChange::Withdrawn);
                    }
                }
            }
        }
        let ended = self
            .negotiator
            .handle_cap(self.sender.as_ref(), &self.ctx.server_id, &message)?;
        self.report_sasl_outcome(line);
        if ended {
            self.set_phase(ConnectionPhase::Negotiated);
        }
        Ok(())
    }

    fn on_cap_ls(&mut self, ls: &CapLsLine, line: &LineContext) {
        if !self.ls_seen {
            self.ls_seen = true;
            self.set_phase(ConnectionPhase::Negotiating);
        }
        for token in &ls.tokens {
            self.state.record_cap_available(token);
            if canonical_cap_name(token) == "sts" {
                self.on_sts_token(token, line);
            }
        }
    }

    fn on_sts_token(&self, token: &str, line: &LineContext) {
        if self.ctx.tls {
            if let Err(err) = self.sts.observe_from_cap_list_at(
                &self.ctx.server_id,
                &self.ctx.host,
                true,
                token,
                line.now,
            ) {
                warn!(server = %self.ctx.server_id, error = %err, "failed to persist sts policy");
            }
            return;
        }
        let directives = StsDirectives::parse(token);
        if let Some(port) = directives.port {
            info!(server = %self.ctx.server_id, port, "server advises a TLS upgrade");
            let meta = self.meta(line);
            self.emit(IrcEvent::StsUpgradeAdvised { meta, port });
        }
    }

    fn on_cap_new(&mut self, caps: &[String], line: &LineContext) -> Result<()> {
        for token in caps {
            self.state.record_cap_available(token);
            let name = canonical_cap_name(token);
            if name == "sts" {
                self.on_sts_token(token, line);
            }
            self.cap_event(line, name, CapChange::Offered(cap_value(token).map(str::to_owned)));
        }
        let wanted: Vec<String> = self
            .wishlist
            .select(caps)
            .into_iter()
            .filter(|c| !self.state.is_cap_acked(c))
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }
        debug!(server = %self.ctx.server_id, caps = ?wanted, "requesting newly offered capabilities");
        self.send_raw(&format!("CAP REQ :{}", wanted.join(" ")))
    }

    fn on_message(&mut self, command: &RawCommand, line: &LineContext) {
        let (Some(target), Some(text)) = (command.param(0), command.param(1)) else {
            self.emit_other(command, line);
            return;
        };
        let from = line.from_nick();
        let folded = self.multiline.fold(
            &command.command,
            from,
            target,
            line.timestamp,
            text,
            line.tags.message_id(),
            &line.tags,
        );
        if folded.suppressed {
            trace!(server = %self.ctx.server_id, batch = %line.tags.batch(), "multiline line buffered");
            return;
        }
        self.emit_message(
            MessageLine {
                command: &command.command,
                from,
                target,
                text: &folded.text,
                timestamp: folded.timestamp,
                message_id: &folded.message_id,
                tags: &folded.tags,
            },
            line.now,
        );
    }

    fn emit_folded(&self, folded: &FoldedMessage, now: DateTime<Utc>) {
        self.emit_message(
            MessageLine {
                command: &folded.command,
                from: &folded.from,
                target: &folded.target,
                text: &folded.text,
                timestamp: folded.timestamp,
                message_id: &folded.message_id,
                tags: &folded.tags,
            },
            now,
        );
    }

    fn emit_message(&self, msg: MessageLine<'_>, now: DateTime<Utc>) {
        let is_notice = msg.command == "NOTICE";
        let (text, is_action) = match strip_action(msg.text) {
            Some(body) => (body.to_owned(), true),
            None => (msg.text.to_owned(), false),
        };
        let is_echo = self.state.is_own_nick(msg.from);
        let meta = EventMeta::new(
            self.ctx.server_id.clone(),
            msg.timestamp,
            msg.message_id,
            msg.tags.clone(),
        );

        if self.state.is_channel(msg.target) {
            self.emit(IrcEvent::ChannelMessage {
                meta,
                channel: msg.target.to_owned(),
                from: msg.from.to_owned(),
                text,
                is_notice,
                is_action,
                is_echo,
            });
            return;
        }

        if is_notice && !is_echo && msg.from.eq_ignore_ascii_case("ALIS") && !is_alis_help_line(&text) {
            if let Some(entry) = parse_alis_notice(&text) {
                self.emit(IrcEvent::ChannelListEntry { meta, entry });
                return;
            }
        }

        let peer = if !is_echo {
            msg.from.to_owned()
        } else if self.state.is_own_nick(msg.target) {
            self.resolve_echo_peer(&msg, now)
                .unwrap_or_else(|| msg.target.to_owned())
        } else {
            msg.target.to_owned()
        };
        self.emit(IrcEvent::PrivateMessage {
            meta,
            peer,
            from: msg.from.to_owned(),
            text,
            is_notice,
            is_action,
            is_echo,
        });
    }

    /// An echo addressed to ourselves: find which conversation sent it.
    fn resolve_echo_peer(&self, msg: &MessageLine<'_>, now: DateTime<Utc>) -> Option<String> {
        let now_ms = now_ms(now);
        let by_id = (!msg.message_id.is_empty())
            .then(|| {
                self.state
                    .find_private_target_hint(msg.from, msg.command, msg.text, msg.message_id, now_ms)
            })
            .flatten();
        by_id.or_else(|| {
            self.state
                .find_private_target_hint(msg.from, msg.command, msg.text, "", now_ms)
        })
    }

    fn on_tagmsg(&self, command: &RawCommand, line: &LineContext) {
        let Some(target) = command.param(0) else {
            return;
        };
        let from = line.from_nick().to_owned();
        let mut handled = false;
        if let Some(state) = line.tags.get("+typing").and_then(TypingState::parse) {
            handled = true;
            let meta = self.meta(line);
            self.emit(IrcEvent::TypingObserved {
                meta,
                from: from.clone(),
                target: target.to_owned(),
                state,
            });
        }
        if let Some(reply_to) = line.tags.get("+draft/reply").map(str::trim).filter(|r| !r.is_empty()) {
            handled = true;
            let meta = self.meta(line);
            let event = match line.tags.get("+draft/react").filter(|r| !r.is_empty()) {
                Some(reaction) => IrcEvent::MessageReactObserved {
                    meta,
                    from,
                    target: target.to_owned(),
                    reply_to: reply_to.to_owned(),
                    reaction: reaction.to_owned(),
                },
                None => IrcEvent::MessageReplyObserved {
                    meta,
                    from,
                    target: target.to_owned(),
                    reply_to: reply_to.to_owned(),
                },
            };
            self.emit(event);
        }
        if !handled {
            self.emit_other(command, line);
        }
    }

    /// `MARKREAD <target> timestamp=<ts>|*`
    fn on_markread(&self, command: &RawCommand, line: &LineContext) {
        let Some(target) = command.param(0) else {
            return;
        };
        let read_at = command
            .param(1)
            .and_then(|s| s.strip_prefix("timestamp="))
            .and_then(crate::ircv3::parse_server_time);
        let meta = self.meta(line);
        self.emit(IrcEvent::ReadMarkerObserved {
            meta,
            target: target.to_owned(),
            read_at,
        });
    }

    fn on_away(&self, command: &RawCommand, line: &LineContext) {
        let nick = line.from_nick().to_owned();
        if nick.is_empty() {
            return;
        }
        match command.param(0).filter(|m| !m.is_empty()) {
            Some(message) => self.observe_away(line, &nick, AwayState::Away, Some(message.to_owned())),
            None => self.observe_away(line, &nick, AwayState::Here, None),
        }
    }

    /// `CHGHOST <user> <host>`
    fn on_chghost(&self, command: &RawCommand, line: &LineContext) {
        let (Some(user), Some(host)) = (command.param(0), command.param(1)) else {
            return;
        };
        let nick = line.from_nick().to_owned();
        self.observe_hostmask(line, &nick, &format!("{nick}!{user}@{host}"));
    }

    /// Plain or extended JOIN (`<channel> <account> :<realname>`).
    fn on_join(&self, command: &RawCommand, line: &LineContext) {
        if let [_, account, realname, ..] = command.params.as_slice() {
            let nick = line.from_nick().to_owned();
            self.observe_account(line, &nick, Some(account));
            let meta = self.meta(line);
            self.emit(IrcEvent::UserRealnameObserved {
                meta,
                nick,
                realname: realname.clone(),
            });
        }
        self.emit_other(command, line);
    }

    fn on_nick(&self, command: &RawCommand, line: &LineContext) {
        let old = line.from_nick().to_owned();
        let Some(new) = command.param(0).filter(|n| !n.is_empty()) else {
            return;
        };
        let is_self = self.state.is_own_nick(&old);
        self.state.rename_nick(&old, new);
        let meta = self.meta(line);
        self.emit(IrcEvent::NickChanged {
            meta,
            old,
            new: new.to_owned(),
            is_self,
        });
    }

    /// `BATCH +id type [params]` / `BATCH -id`
    fn on_batch(&mut self, command: &RawCommand, line: &LineContext) {
        let Some(reference) = command.param(0) else {
            return;
        };
        if let Some(id) = reference.strip_prefix('+') {
            let meta = self.meta(line);
            self.emit(IrcEvent::BatchOpened {
                meta,
                id: id.to_owned(),
                kind: command.param(1).unwrap_or_default().to_owned(),
                params: command.params.iter().skip(2).cloned().collect(),
            });
        } else if let Some(id) = reference.strip_prefix('-') {
            if let Some(folded) = self.multiline.close_batch(id) {
                self.emit_folded(&folded, line.now);
            }
            let meta = self.meta(line);
            self.emit(IrcEvent::BatchClosed {
                meta,
                id: id.to_owned(),
            });
        }
    }

    fn on_standard_reply(&self, command: &RawCommand, line: &LineContext) {
        let reply = StandardReplyKind::from_command(&command.command)
            .and_then(|kind| StandardReply::parse(kind, &command.params, &line.tags));
        match reply {
            Some(reply) => {
                debug!(server = %self.ctx.server_id, command = %reply.command, code = %reply.code, "standard reply");
                let meta = self.meta(line);
                self.emit(IrcEvent::StandardReply { meta, reply });
            }
            None => self.emit_other(command, line),
        }
    }

    fn on_numeric(&mut self, code: u16, command: &RawCommand, line: &LineContext) -> Result<()> {
        let params = &command.params;
        let meta = self.meta(line);
        let event = match Response::from_code(code) {
            Some(Response::RPL_WELCOME) => {
                let nick = command.param(0).unwrap_or_default().to_owned();
                if !nick.is_empty() && nick != "*" {
                    self.state.set_own_nick(&nick);
                }
                if !self.negotiator.is_complete() {
                    self.negotiator.abandon();
                }
                self.set_phase(ConnectionPhase::Negotiated);
                info!(server = %self.ctx.server_id, nick = %nick, "registered");
                IrcEvent::Registered { meta, nick }
            }
            Some(Response::RPL_ISUPPORT) => {
                if let Some(isupport) = Isupport::from_reply(params) {
                    self.state.apply_isupport(&isupport);
                }
                server_line(meta, code, params)
            }
            Some(Response::RPL_UNAWAY) => {
                self.state.set_own_away(AwayState::Here);
                server_line(meta, code, params)
            }
            Some(Response::RPL_NOWAWAY) => {
                self.state.set_own_away(AwayState::Away);
                server_line(meta, code, params)
            }
            Some(Response::RPL_AWAY) => match (command.param(1), command.param(2)) {
                (Some(nick), message) => {
                    self.observe_away(line, nick, AwayState::Away, message.map(str::to_owned));
                    return Ok(());
                }
                _ => server_line(meta, code, params),
            },
            Some(Response::RPL_USERHOST) => match parse_userhost_reply(params) {
                Some(entries) => {
                    for entry in &entries {
                        self.observe_hostmask(line, &entry.nick, &entry.hostmask());
                    }
                    IrcEvent::UserhostReply { meta, entries }
                }
                None => server_line(meta, code, params),
            },
            Some(Response::RPL_LIST) => match parse_list_row(params) {
                Some(entry) => IrcEvent::ChannelListEntry { meta, entry },
                None => server_line(meta, code, params),
            },
            Some(Response::RPL_LISTEND) => IrcEvent::ChannelListEnd { meta },
            Some(Response::RPL_BANLIST) => match parse_ban_list_row(params) {
                Some(entry) => IrcEvent::BanListEntry { meta, entry },
                None => server_line(meta, code, params),
            },
            Some(Response::RPL_ENDOFBANLIST) => match parse_ban_list_end(params) {
                Some(channel) => IrcEvent::BanListEnd { meta, channel },
                None => server_line(meta, code, params),
            },
            Some(Response::RPL_WHOREPLY) => match parse_who_reply(params) {
                Some(entry) => {
                    self.observe_hostmask(line, &entry.nick, &entry.hostmask());
                    IrcEvent::WhoReply { meta, entry }
                }
                None => server_line(meta, code, params),
            },
            Some(Response::RPL_WHOSPCRPL) => match parse_whox_strict(params, WHOX_TOKEN) {
                Some(entry) => {
                    self.observe_hostmask(line, &entry.nick, &entry.hostmask());
                    self.observe_account(line, &entry.nick, Some(entry.account.as_deref().unwrap_or("0")));
                    IrcEvent::WhoReply { meta, entry }
                }
                None => {
                    if is_foreign_whox_reply(params, WHOX_TOKEN) {
                        debug!(server = %self.ctx.server_id, token = ?command.param(1), "WHOX reply for another query");
                    }
                    server_line(meta, code, params)
                }
            },
            Some(resp) if resp.is_monitor() => match parse_monitor_reply(code, params) {
                Some(reply) => {
                    if let MonitorReply::Online(entries) = &reply {
                        for entry in entries {
                            if let Some(mask) = &entry.hostmask {
                                self.observe_hostmask(line, &entry.nick, mask);
                            }
                        }
                    }
                    IrcEvent::MonitorStatus { meta, reply }
                }
                None => server_line(meta, code, params),
            },
            Some(resp) if resp.is_sasl() => {
                match (resp, SaslNumeric::from_code(code)) {
                    // <me> <mask> <account> :text
                    (Response::RPL_LOGGEDIN, _) => {
                        let account = command.param(2).unwrap_or_default();
                        self.state.set_own_account(Some(account).filter(|a| !a.is_empty()));
                    }
                    (Response::RPL_LOGGEDOUT, _) => self.state.set_own_account(None),
                    // Handlers stop seeing lines once negotiation is over.
                    (_, Some(SaslNumeric::Success)) if self.negotiator.is_complete() => {
                        self.sasl_event(line, SaslOutcome::Success)
                    }
                    (_, Some(SaslNumeric::Failure)) if self.negotiator.is_complete() => {
                        self.sasl_event(line, SaslOutcome::Failed(code))
                    }
                    _ => {}
                }
                server_line(meta, code, params)
            }
            _ => server_line(meta, code, params),
        };
        self.emit(event);
        Ok(())
    }
}

fn server_line(meta: EventMeta, code: u16, params: &[String]) -> IrcEvent {
    IrcEvent::ServerLine {
        meta,
        code,
        params: params.to_vec(),
    }
}

/// `\x01ACTION text\x01` → `text`.
fn strip_action(text: &str) -> Option<&str> {
    let body = text.strip_prefix("\u{1}ACTION")?;
    let body = body.strip_suffix('\u{1}').unwrap_or(body);
    if body.is_empty() {
        return Some(body);
    }
    body.strip_prefix(' ')
}

fn now_ms(now: DateTime<Utc>) -> u64 {
    u64::try_from(now.timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingSender;
    use chrono::TimeZone;

    fn engine(config: EngineConfig) -> (ConnectionEngine, mpsc::UnboundedReceiver<IrcEvent>, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::new());
        let (engine, rx) = ConnectionEngine::new(
            ConnectionContext::new("net", "irc.example.net", 6667, false),
            config,
            Arc::new(StsPolicyService::in_memory()),
            sender.clone(),
        );
        (engine, rx, sender)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<IrcEvent>) -> Vec<IrcEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn feed(engine: &mut ConnectionEngine, line: &str) {
        engine.handle(&RawCommand::parse(line).unwrap()).unwrap();
    }

    #[test]
    fn test_strip_action() {
        assert_eq!(strip_action("\u{1}ACTION waves\u{1}"), Some("waves"));
        assert_eq!(strip_action("\u{1}ACTION\u{1}"), Some(""));
        assert_eq!(strip_action("\u{1}ACTIONS\u{1}"), None);
        assert_eq!(strip_action("plain"), None);
    }

    #[test]
    fn test_disconnect_before_connect_emits_once() {
        let (mut engine, mut rx, _) = engine(EngineConfig::default());
        engine.disconnect("closed");
        engine.disconnect("closed again");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], IrcEvent::Disconnected { reason, .. } if reason == "closed"));
        assert_eq!(engine.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn test_new_session_owes_another_disconnect() {
        let (mut engine, mut rx, sender) = engine(EngineConfig::default());
        engine.start_negotiation().unwrap();
        assert_eq!(sender.take(), vec!["CAP LS 302"]);
        assert_eq!(engine.phase(), ConnectionPhase::Negotiating);
        engine.disconnect("first");
        engine.start_negotiation().unwrap();
        engine.disconnect("second");
        let reasons: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                IrcEvent::Disconnected { reason, .. } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(reasons, vec!["first", "second"]);
    }

    #[test]
    fn test_echo_to_self_resolves_peer_from_hint() {
        let config = EngineConfig {
            nick: Some("me".into()),
            ..EngineConfig::default()
        };
        let (mut engine, mut rx, sender) = engine(config);
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        engine.send_private_at("Bob", "hello there", now).unwrap();
        assert_eq!(sender.take(), vec!["PRIVMSG Bob :hello there"]);

        let line = RawCommand::parse("@msgid=e1 :me!u@h PRIVMSG me :hello there").unwrap();
        engine.handle_at(&line, now + chrono::Duration::seconds(1)).unwrap();
        let peer = drain(&mut rx).into_iter().find_map(|e| match e {
            IrcEvent::PrivateMessage { peer, is_echo, .. } => Some((peer, is_echo)),
            _ => None,
        });
        assert_eq!(peer, Some(("Bob".to_owned(), true)));
    }

    #[test]
    fn test_cap_new_requests_wishlisted() {
        let (mut engine, mut rx, sender) = engine(EngineConfig::default());
        feed(&mut engine, ":srv CAP me NEW :away-notify foo=bar");
        assert_eq!(sender.take(), vec!["CAP REQ :away-notify"]);
        let offered: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                IrcEvent::CapabilityChanged { capability, change: CapChange::Offered(v), .. } => {
                    Some((capability, v))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            offered,
            vec![("away-notify".to_owned(), None), ("foo".to_owned(), Some("bar".to_owned()))]
        );
    }

    #[test]
    fn test_insecure_sts_advises_upgrade_only() {
        let (mut engine, mut rx, _) = engine(EngineConfig::default());
        feed(&mut engine, ":srv CAP * LS :sts=port=6697,duration=300 multi-prefix");
        let advised = drain(&mut rx).into_iter().find_map(|e| match e {
            IrcEvent::StsUpgradeAdvised { port, .. } => Some(port),
            _ => None,
        });
        assert_eq!(advised, Some(6697));
        assert!(engine.sts.active_policy_for_host("irc.example.net").is_none());
    }

    #[test]
    fn test_account_and_away_notifications() {
        let (mut engine, mut rx, _) = engine(EngineConfig::default());
        feed(&mut engine, ":alice!a@host ACCOUNT alice_acct");
        feed(&mut engine, ":alice!a@host AWAY :lunch");
        feed(&mut engine, ":alice!a@host ACCOUNT *");
        let events = drain(&mut rx);
        assert!(matches!(&events[0], IrcEvent::UserHostmaskObserved { hostmask, .. } if hostmask == "alice!a@host"));
        assert!(matches!(&events[1], IrcEvent::UserAccountObserved { account: Some(a), .. } if a == "alice_acct"));
        assert!(matches!(&events[2], IrcEvent::UserAwayObserved { away: AwayState::Away, message: Some(m), .. } if m == "lunch"));
        assert!(matches!(&events[3], IrcEvent::UserAccountObserved { account: None, .. }));
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_welcome_sets_nick_and_phase() {
        let (mut engine, mut rx, _) = engine(EngineConfig::default());
        feed(&mut engine, ":srv 001 nick_ :Welcome");
        assert_eq!(engine.phase(), ConnectionPhase::Negotiated);
        assert!(engine.state().is_own_nick("NICK_"));
        assert!(matches!(drain(&mut rx).as_slice(), [IrcEvent::Registered { nick, .. }] if nick == "nick_"));
    }
}
