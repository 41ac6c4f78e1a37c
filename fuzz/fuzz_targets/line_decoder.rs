//! Fuzz target for inbound line handling
//!
//! Feeds arbitrary lines through the splitter, the tag decoder and a live
//! engine. None of them may panic.

#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use parking_lot::Mutex;
use slirc_engine::{
    ConnectionContext, ConnectionEngine, EngineConfig, Ircv3Tags, RawCommand, RecordingSender,
    StsPolicyService,
};

fn engine() -> &'static Mutex<ConnectionEngine> {
    static ENGINE: OnceLock<Mutex<ConnectionEngine>> = OnceLock::new();
    ENGINE.get_or_init(|| {
        let (engine, _events) = ConnectionEngine::new(
            ConnectionContext::new("fuzz", "irc.example.net", 6697, true),
            EngineConfig::default(),
            Arc::new(StsPolicyService::in_memory()),
            Arc::new(RecordingSender::new()),
        );
        Mutex::new(engine)
    })
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if input.is_empty() || input.len() > 8191 {
        return;
    }

    let _ = Ircv3Tags::from_raw_line(input);
    if let Ok(command) = RawCommand::parse(input) {
        let _ = command.decoded_tags();
        let _ = engine().lock().handle(&command);
    }
});
