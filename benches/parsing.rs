//! Benchmarks for line splitting, tag decoding and event dispatch.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use slirc_engine::{
    ConnectionContext, ConnectionEngine, EngineConfig, Ircv3Tags, MultilineAccumulator, RawCommand,
    RecordingSender, StsPolicyService,
};

/// Simple PING message
const SIMPLE_MESSAGE: &str = "PING :irc.example.com";

/// Message with prefix
const PREFIX_MESSAGE: &str = ":nick!user@host PRIVMSG #channel :Hello, world!";

/// Message with IRCv3 tags
const TAGGED_MESSAGE: &str = "@time=2023-01-01T00:00:00.000Z;msgid=abc123;+example/tag=value :nick!user@host PRIVMSG #channel :Hello with tags!";

/// Escaped tag values and a reply reference
const COMPLEX_TAGS: &str = "@time=2023-01-01T12:00:00Z;msgid=msg-12345;+draft/reply=parent-id;batch=batch001;account=username;+note=a\\sb\\:c :nick!user@host.example.com PRIVMSG #long-channel-name :This is a longer message with more content to parse";

/// Multi-line capability listing
const CAP_LS: &str = ":irc.server.net CAP * LS * :multi-prefix sasl=PLAIN,EXTERNAL server-time message-tags batch echo-message draft/multiline=max-bytes=4096 sts=port=6697,duration=300";

fn benchmark_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Line Parsing");

    for (name, line) in [
        ("simple_ping", SIMPLE_MESSAGE),
        ("with_prefix", PREFIX_MESSAGE),
        ("with_tags", TAGGED_MESSAGE),
        ("complex_tags", COMPLEX_TAGS),
        ("cap_ls", CAP_LS),
    ] {
        group.bench_with_input(BenchmarkId::new("raw_command", name), line, |b, line| {
            b.iter(|| black_box(RawCommand::parse(black_box(line)).unwrap()))
        });
    }

    group.finish();
}

fn benchmark_tags(c: &mut Criterion) {
    let mut group = c.benchmark_group("Tag Decoding");

    group.bench_function("from_raw_line", |b| {
        b.iter(|| black_box(Ircv3Tags::from_raw_line(black_box(COMPLEX_TAGS))))
    });

    let tags = Ircv3Tags::from_raw_line(COMPLEX_TAGS);
    group.bench_function("lookup_prefixed", |b| {
        b.iter(|| black_box(tags.get(black_box("+draft/reply"))))
    });

    group.finish();
}

fn benchmark_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Event Dispatch");

    let command = RawCommand::parse(TAGGED_MESSAGE).unwrap();
    group.bench_function("channel_privmsg", |b| {
        let (mut engine, mut events) = ConnectionEngine::new(
            ConnectionContext::new("bench", "irc.example.net", 6697, true),
            EngineConfig::default(),
            Arc::new(StsPolicyService::in_memory()),
            Arc::new(RecordingSender::new()),
        );
        b.iter(|| {
            engine.handle(black_box(&command)).unwrap();
            while events.try_recv().is_ok() {}
        })
    });

    let first = Ircv3Tags::from_tag_section("batch=b1;draft/multiline-concat;msgid=m1");
    let last = Ircv3Tags::from_tag_section("batch=b1");
    group.bench_function("multiline_fold", |b| {
        let mut acc = MultilineAccumulator::new();
        let now = chrono::Utc::now();
        b.iter(|| {
            acc.fold("PRIVMSG", "nick", "#c", now, "line one", "m1", &first);
            black_box(acc.fold("PRIVMSG", "nick", "#c", now, "line two", "", &last))
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_parsing, benchmark_tags, benchmark_dispatch);
criterion_main!(benches);
