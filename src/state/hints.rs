//! Private-message target hints.
//!
//! When a server echoes our own private message back without saying which
//! query it belongs to, the engine looks up the peer we sent it to by
//! fingerprint: (sender, command, msgid or payload hash). Entries expire
//! after [`HINT_TTL_MS`] relative to the caller's clock.

use std::collections::{HashMap, VecDeque};

use crate::util::payload_fingerprint;

/// How long a hint stays valid.
pub const HINT_TTL_MS: u64 = 120_000;
/// Maximum number of live hints.
pub const HINT_CAPACITY: usize = 512;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Identity {
    MessageId(String),
    Payload(u64),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct HintKey {
    source: String,
    command: String,
    identity: Identity,
}

impl HintKey {
    fn new(source: &str, command: &str, payload: &str, message_id: &str) -> Self {
        let message_id = message_id.trim();
        Self {
            source: source.trim().to_lowercase(),
            command: command.trim().to_ascii_uppercase(),
            identity: if message_id.is_empty() {
                Identity::Payload(payload_fingerprint(payload))
            } else {
                Identity::MessageId(message_id.to_owned())
            },
        }
    }
}

#[derive(Clone, Debug)]
struct HintEntry {
    target: String,
    stored_at: u64,
    seq: u64,
}

/// Bounded TTL cache. Insertion order is kept in a queue so the sweep
/// only ever looks at the oldest entries.
#[derive(Debug, Default)]
pub(crate) struct PrivateTargetHints {
    entries: HashMap<HintKey, HintEntry>,
    order: VecDeque<(u64, HintKey)>,
    next_seq: u64,
}

impl PrivateTargetHints {
    pub(crate) fn remember(
        &mut self,
        source: &str,
        target: &str,
        command: &str,
        payload: &str,
        message_id: &str,
        now_ms: u64,
    ) {
        self.sweep(now_ms);
        let key = HintKey::new(source, command, payload, message_id);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.clone(),
            HintEntry {
                target: target.to_owned(),
                stored_at: now_ms,
                seq,
            },
        );
        self.order.push_back((seq, key));
        while self.entries.len() > HINT_CAPACITY {
            self.pop_oldest();
        }
    }

    pub(crate) fn find(
        &mut self,
        source: &str,
        command: &str,
        payload: &str,
        message_id: &str,
        now_ms: u64,
    ) -> Option<String> {
        self.sweep(now_ms);
        let key = HintKey::new(source, command, payload, message_id);
        self.entries
            .get(&key)
            .filter(|e| !expired(e.stored_at, now_ms))
            .map(|e| e.target.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn sweep(&mut self, now_ms: u64) {
        while let Some((seq, key)) = self.order.front() {
            match self.entries.get(key) {
                Some(entry) if entry.seq == *seq => {
                    if !expired(entry.stored_at, now_ms) {
                        break;
                    }
                }
                // Superseded by a later insert of the same key.
                _ => {
                    self.order.pop_front();
                    continue;
                }
            }
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) {
        while let Some((seq, key)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|e| e.seq == seq) {
                self.entries.remove(&key);
                return;
            }
        }
    }
}

fn expired(stored_at: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(stored_at) >= HINT_TTL_MS
}
