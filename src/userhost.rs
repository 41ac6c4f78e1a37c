//! Batched USERHOST discovery.
//!
//! Callers queue nicks whose hostmask they want; a periodic tick sends at
//! most one `USERHOST` per server, skipping nicks looked up within the
//! cooldown. Replies come back through the engine as
//! `IrcEvent::UserhostReply`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::UserhostConfig;
use crate::error::Result;
use crate::transport::{RawSender, ServerId};

#[derive(Debug, Default)]
struct Queue {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl Queue {
    fn push(&mut self, nick: &str) -> bool {
        if !self.seen.insert(nick.to_ascii_lowercase()) {
            return false;
        }
        self.order.push(nick.to_owned());
        true
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    pending: BTreeMap<ServerId, Queue>,
    last_lookup: HashMap<(ServerId, String), Instant>,
}

/// Deduplicating USERHOST scheduler shared by every connection.
pub struct UserhostBatcher {
    config: UserhostConfig,
    sender: Arc<dyn RawSender>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for UserhostBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserhostBatcher")
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

fn is_valid_nick(nick: &str) -> bool {
    !nick.is_empty() && !nick.contains([' ', ',', '*', '?', '!', '@'])
}

impl UserhostBatcher {
    pub fn new(config: UserhostConfig, sender: Arc<dyn RawSender>) -> Self {
        Self {
            config,
            sender,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Queue `nick` on `server_id`. Returns whether it was newly queued.
    pub fn request(&self, server_id: &ServerId, nick: &str) -> bool {
        let nick = nick.trim();
        if !self.config.enabled || !is_valid_nick(nick) {
            return false;
        }
        self.inner
            .lock()
            .pending
            .entry(server_id.clone())
            .or_default()
            .push(nick)
    }

    /// Nicks queued for `server_id`.
    pub fn pending(&self, server_id: &ServerId) -> Vec<String> {
        self.inner
            .lock()
            .pending
            .get(server_id)
            .map(|q| q.order.clone())
            .unwrap_or_default()
    }

    /// Drop everything queued for a server that went away.
    pub fn forget_server(&self, server_id: &ServerId) {
        let mut inner = self.inner.lock();
        inner.pending.remove(server_id);
        inner.last_lookup.retain(|(id, _), _| id != server_id);
    }

    /// Send one batch per server. Returns the number of lines sent.
    pub fn tick(&self, now: Instant) -> Result<usize> {
        if !self.config.enabled {
            return Ok(0);
        }
        let batches = self.take_batches(now);
        let mut sent = 0;
        for (server_id, nicks) in batches {
            let line = format!("USERHOST {}", nicks.join(" "));
            debug!(server = %server_id, count = nicks.len(), "sending batched USERHOST");
            self.sender.send_raw(&server_id, &line)?;
            sent += 1;
        }
        Ok(sent)
    }

    fn take_batches(&self, now: Instant) -> Vec<(ServerId, Vec<String>)> {
        let max = self.config.max_nicks_per_command.max(1);
        let cooldown = self.config.cooldown();
        let mut inner = self.inner.lock();
        let Inner {
            pending,
            last_lookup,
        } = &mut *inner;

        let mut batches = Vec::new();
        for (server_id, queue) in pending.iter_mut() {
            let mut batch = Vec::new();
            let mut consumed = 0;
            for nick in &queue.order {
                if batch.len() == max {
                    break;
                }
                consumed += 1;
                let key = (server_id.clone(), nick.to_ascii_lowercase());
                let cooling = last_lookup
                    .get(&key)
                    .is_some_and(|at| now.saturating_duration_since(*at) < cooldown);
                if cooling {
                    trace!(server = %server_id, nick = %nick, "userhost lookup still cooling down");
                    continue;
                }
                last_lookup.insert(key, now);
                batch.push(nick.clone());
            }
            for nick in queue.order.drain(..consumed) {
                queue.seen.remove(&nick.to_ascii_lowercase());
            }
            if !batch.is_empty() {
                batches.push((server_id.clone(), batch));
            }
        }
        pending.retain(|_, q| !q.is_empty());
        last_lookup.retain(|_, at| now.saturating_duration_since(*at) < cooldown);
        batches
    }

    /// Drive [`tick`](Self::tick) from a tokio interval until the task is
    /// aborted. A disabled batcher returns immediately.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                debug!("userhost discovery disabled");
                return;
            }
            let mut interval = tokio::time::interval(self.config.interval());
            interval.tick().await;
            loop {
                let now = interval.tick().await.into_std();
                if let Err(err) = self.tick(now) {
                    warn!(error = %err, "userhost batch failed");
                }
            }
        })
    }
}
