//! End-to-end scenarios: raw lines in, typed events and outgoing lines out.

use std::sync::Arc;

use slirc_engine::{
    ConnectionContext, ConnectionEngine, ConnectionPhase, EngineConfig, IrcEvent, JsonFileStsStore,
    RawCommand, RecordingSender, SaslOutcome, ServerEndpoint, StandardReplyKind, StsPolicyService,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    engine: ConnectionEngine,
    events: UnboundedReceiver<IrcEvent>,
    sender: Arc<RecordingSender>,
}

impl Harness {
    fn new(config: EngineConfig, tls: bool, sts: Arc<StsPolicyService>) -> Self {
        init_tracing();
        let sender = Arc::new(RecordingSender::new());
        let (engine, events) = ConnectionEngine::new(
            ConnectionContext::new("testnet", "irc.example.net", if tls { 6697 } else { 6667 }, tls),
            config,
            sts,
            sender.clone(),
        );
        Self {
            engine,
            events,
            sender,
        }
    }

    fn plain(config: EngineConfig) -> Self {
        Self::new(config, false, Arc::new(StsPolicyService::in_memory()))
    }

    fn feed(&mut self, line: &str) {
        let command = RawCommand::parse(line).unwrap();
        self.engine.handle(&command).unwrap();
    }

    fn events(&mut self) -> Vec<IrcEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

fn wishlist(caps: &[&str]) -> EngineConfig {
    EngineConfig {
        wishlist: caps.iter().map(|c| (*c).to_owned()).collect(),
        ..EngineConfig::default()
    }
}

#[test]
fn negotiates_then_delivers_message_id() {
    let mut h = Harness::plain(wishlist(&["multi-prefix", "away-notify"]));
    h.engine.start_negotiation().unwrap();
    h.feed(":irc.example.net CAP * LS :sasl multi-prefix");
    assert_eq!(h.sender.take(), vec!["CAP LS 302", "CAP REQ :multi-prefix"]);

    h.feed(":irc.example.net CAP * ACK :multi-prefix");
    assert_eq!(h.sender.take(), vec!["CAP END"]);
    assert!(h.engine.state().is_cap_acked("multi-prefix"));
    assert_eq!(h.engine.phase(), ConnectionPhase::Negotiated);

    h.feed("@msgid=m1 :alice!a@host.example PRIVMSG #rust :hi there");
    let message = h
        .events()
        .into_iter()
        .find(|e| matches!(e, IrcEvent::ChannelMessage { .. }))
        .expect("channel message");
    assert_eq!(message.message_id(), "m1");
    assert_eq!(message.tags().get("msgid"), Some("m1"));
}

#[test]
fn cap_ack_and_nak_emit_capability_changes() {
    let mut h = Harness::plain(wishlist(&["echo-message", "labeled-response", "standard-replies"]));
    h.engine.start_negotiation().unwrap();
    h.feed(":srv CAP * LS * :echo-message labeled-response");
    assert_eq!(h.sender.take(), vec!["CAP LS 302"]);
    h.feed(":srv CAP * LS :standard-replies");
    assert_eq!(
        h.sender.take(),
        vec!["CAP REQ :echo-message labeled-response standard-replies"]
    );

    h.feed(":srv CAP * ACK :echo-message standard-replies");
    assert!(h.sender.take().is_empty());
    h.feed(":srv CAP * NAK :labeled-response");
    assert_eq!(h.sender.take(), vec!["CAP END"]);

    let flags = h.engine.state().flags();
    assert!(flags.echo_message);
    assert!(flags.standard_replies);
    assert!(!flags.labeled_response);
    assert!(h.engine.state().is_cap_rejected("labeled-response"));

    let changes: Vec<String> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            IrcEvent::CapabilityChanged {
                capability, change, ..
            } => Some(format!("{capability}:{change:?}")),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        vec!["echo-message:Acked", "standard-replies:Acked", "labeled-response:Rejected"]
    );
}

#[test]
fn sasl_plain_sequence_completes_negotiation() {
    let config = EngineConfig::from_toml_str(
        r#"
        wishlist = ["multi-prefix", "sasl"]
        nick = "me"

        [sasl]
        username = "me"
        password = "hunter2"
        "#,
    )
    .unwrap();
    let mut h = Harness::plain(config);
    h.engine.start_negotiation().unwrap();
    h.feed(":srv CAP * LS :sasl=PLAIN,EXTERNAL multi-prefix");
    assert_eq!(
        h.sender.take(),
        vec!["CAP LS 302", "CAP REQ :multi-prefix", "CAP REQ :sasl"]
    );

    h.feed(":srv CAP me ACK :multi-prefix");
    h.feed(":srv CAP me ACK :sasl");
    assert_eq!(h.sender.take(), vec!["AUTHENTICATE PLAIN"]);

    h.feed("AUTHENTICATE +");
    let payload = h.sender.take();
    assert_eq!(payload.len(), 1);
    assert!(payload[0].starts_with("AUTHENTICATE "));
    assert_ne!(payload[0], "AUTHENTICATE +");
    assert_eq!(h.engine.phase(), ConnectionPhase::Negotiating);

    h.feed(":srv 900 me me!me@host me :You are now logged in as me");
    h.feed(":srv 903 me :SASL authentication successful");
    assert_eq!(h.sender.take(), vec!["CAP END"]);
    assert_eq!(h.engine.phase(), ConnectionPhase::Negotiated);
    assert_eq!(h.engine.state().own_account().as_deref(), Some("me"));

    let outcomes: Vec<SaslOutcome> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            IrcEvent::SaslOutcome { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(outcomes, vec![SaslOutcome::Success]);
}

#[test]
fn unsupported_sasl_mechanism_is_reported() {
    let mut config = wishlist(&["multi-prefix"]);
    config.sasl = EngineConfig::from_toml_str(
        "[sasl]\nusername = \"u\"\npassword = \"p\"\nmechanism = \"SCRAM-SHA-256\"",
    )
    .unwrap()
    .sasl;
    let mut h = Harness::plain(config);
    h.engine.start_negotiation().unwrap();
    h.feed(":srv CAP * LS :sasl away-notify");
    assert_eq!(h.sender.take(), vec!["CAP LS 302", "CAP END"]);
    assert_eq!(h.engine.phase(), ConnectionPhase::Negotiated);

    let outcomes: Vec<SaslOutcome> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            IrcEvent::SaslOutcome { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(outcomes, vec![SaslOutcome::MechanismUnavailable]);
}

#[test]
fn sasl_not_offered_still_ends_negotiation() {
    let mut config = wishlist(&["multi-prefix"]);
    config.sasl = EngineConfig::from_toml_str("[sasl]\nusername = \"u\"\npassword = \"p\"")
        .unwrap()
        .sasl;
    let mut h = Harness::plain(config);
    h.engine.start_negotiation().unwrap();
    h.feed(":srv CAP * LS :away-notify");
    assert_eq!(h.sender.take(), vec!["CAP LS 302", "CAP END"]);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, IrcEvent::SaslOutcome { outcome: SaslOutcome::NotOffered, .. })));
}

#[test]
fn sts_policy_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sts.json");

    let sts = Arc::new(StsPolicyService::new(Arc::new(JsonFileStsStore::new(&path))).unwrap());
    let mut h = Harness::new(EngineConfig::default(), true, sts);
    h.engine.start_negotiation().unwrap();
    h.feed(":srv CAP * LS :sts=duration=86400,port=6697 multi-prefix");

    let restarted = StsPolicyService::new(Arc::new(JsonFileStsStore::new(&path))).unwrap();
    let upgraded = restarted.apply_policy(&ServerEndpoint::new("IRC.example.net.", 6667, false));
    assert_eq!(upgraded, ServerEndpoint::new("IRC.example.net.", 6697, true));

    h.feed(":srv CAP * NEW :sts=duration=0");
    let reloaded = StsPolicyService::new(Arc::new(JsonFileStsStore::new(&path))).unwrap();
    assert!(reloaded.active_policy_for_host("irc.example.net").is_none());
}

#[test]
fn insecure_sts_is_never_learned() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sts.json");
    let sts = Arc::new(StsPolicyService::new(Arc::new(JsonFileStsStore::new(&path))).unwrap());
    let mut h = Harness::new(EngineConfig::default(), false, Arc::clone(&sts));
    h.feed(":srv CAP * LS :sts=duration=86400,port=6697");

    assert!(sts.active_policy_for_host("irc.example.net").is_none());
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, IrcEvent::StsUpgradeAdvised { port: 6697, .. })));
}

#[test]
fn multiline_batch_is_delivered_once() {
    let mut h = Harness::plain(EngineConfig::default());
    h.feed(":srv BATCH +ml1 draft/multiline #c");
    h.feed("@batch=ml1;draft/multiline-concat;msgid=m1 :alice!a@h PRIVMSG #c :hello");
    h.feed("@batch=ml1;msgid=m2 :alice!a@h PRIVMSG #c :world");
    h.feed(":srv BATCH -ml1");

    h.feed(":srv BATCH +ml2 draft/multiline #c");
    h.feed("@batch=ml2;draft/multiline-concat;msgid=m9 :alice!a@h PRIVMSG #c :dangling");
    h.feed(":srv BATCH -ml2");

    let messages: Vec<(String, String)> = h
        .events()
        .into_iter()
        .filter_map(|e| match &e {
            IrcEvent::ChannelMessage { text, .. } => Some((e.message_id().to_owned(), text.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        messages,
        vec![
            ("m1".to_owned(), "hello\nworld".to_owned()),
            ("m9".to_owned(), "dangling".to_owned()),
        ]
    );
}

#[test]
fn multiline_timestamp_is_first_line_time() {
    let mut h = Harness::plain(EngineConfig::default());
    h.feed(":srv BATCH +t1 draft/multiline #c");
    h.feed("@batch=t1;draft/multiline-concat;msgid=m1;time=2024-01-01T00:00:00.000Z :alice!a@h PRIVMSG #c :line1");
    h.feed("@batch=t1;msgid=m2;time=2024-01-01T00:00:05.000Z :alice!a@h PRIVMSG #c :line2");
    h.feed(":srv BATCH -t1");

    h.feed(":srv BATCH +t2 draft/multiline #c");
    h.feed("@batch=t2;draft/multiline-concat;msgid=m3;time=2024-01-01T00:01:00.000Z :alice!a@h PRIVMSG #c :only");
    h.feed(":srv BATCH -t2");

    let stamps: Vec<_> = h
        .events()
        .into_iter()
        .filter(|e| matches!(e, IrcEvent::ChannelMessage { .. }))
        .map(|e| {
            let meta = e.meta();
            (
                meta.message_id.clone(),
                slirc_engine::ircv3::format_server_time(meta.timestamp),
                meta.tags.get("time").map(str::to_owned),
            )
        })
        .collect();
    assert_eq!(
        stamps,
        vec![
            (
                "m1".to_owned(),
                "2024-01-01T00:00:00.000Z".to_owned(),
                Some("2024-01-01T00:00:00.000Z".to_owned()),
            ),
            (
                "m3".to_owned(),
                "2024-01-01T00:01:00.000Z".to_owned(),
                Some("2024-01-01T00:01:00.000Z".to_owned()),
            ),
        ]
    );
}

#[test]
fn standard_reply_keeps_label_and_msgid() {
    let mut h = Harness::plain(EngineConfig::default());
    h.feed("@label=L1;msgid=s1 :srv FAIL CHATHISTORY MESSAGE_ERROR #c :Messages could not be retrieved");
    let events = h.events();
    let [IrcEvent::StandardReply { meta, reply }] = events.as_slice() else {
        panic!("unexpected events: {events:?}");
    };
    assert_eq!(reply.kind, StandardReplyKind::Fail);
    assert_eq!(reply.label, "L1");
    assert_eq!(reply.context, vec!["#c"]);
    assert_eq!(meta.message_id, "s1");
    assert_eq!(meta.tags.label(), "L1");
}

#[test]
fn disconnect_is_terminal_and_idempotent() {
    let mut h = Harness::plain(EngineConfig::default());
    let phase = h.engine.subscribe_phase();
    h.engine.start_negotiation().unwrap();
    assert_eq!(*phase.borrow(), ConnectionPhase::Negotiating);
    h.feed(":srv CAP * LS :multi-prefix");
    h.feed(":srv CAP * ACK :multi-prefix");
    assert_eq!(*phase.borrow(), ConnectionPhase::Negotiated);

    h.engine.disconnect("ping timeout");
    h.engine.disconnect("ping timeout");
    assert_eq!(*phase.borrow(), ConnectionPhase::Disconnected);
    assert!(!h.engine.state().is_cap_acked("multi-prefix"));
    assert_eq!(h.engine.state().hint_count(), 0);

    let disconnects = h
        .events()
        .into_iter()
        .filter(|e| matches!(e, IrcEvent::Disconnected { .. }))
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn numerics_become_typed_rows() {
    let mut h = Harness::plain(EngineConfig::default());
    h.feed(":srv 322 me #rust 42 :[+nt] Rust talk");
    h.feed(":srv 323 me :End of /LIST");
    h.feed(":srv 367 me #rust *!*@spam.example op!o@h 1700000000");
    h.feed(":srv 368 me #rust :End of channel ban list");
    h.feed(":srv 302 me :bob*=+bob@b.example carol=-c@c.example");
    h.feed(":srv 999 me :something else");

    let events = h.events();
    assert!(matches!(&events[0], IrcEvent::ChannelListEntry { entry, .. } if entry.channel == "#rust" && entry.visible_users == 42));
    assert!(matches!(&events[1], IrcEvent::ChannelListEnd { .. }));
    assert!(matches!(&events[2], IrcEvent::BanListEntry { entry, .. } if entry.set_at == Some(1_700_000_000)));
    assert!(matches!(&events[3], IrcEvent::BanListEnd { channel, .. } if channel == "#rust"));
    let userhost = events
        .iter()
        .find_map(|e| match e {
            IrcEvent::UserhostReply { entries, .. } => Some(entries.len()),
            _ => None,
        });
    assert_eq!(userhost, Some(2));
    assert!(matches!(events.last(), Some(IrcEvent::ServerLine { code: 999, .. })));
}
