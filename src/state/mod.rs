//! Per-connection protocol state.
//!
//! One [`ConnectionState`] exists per [`ServerId`](crate::transport::ServerId).
//! It is shared between the line handler and timer tasks, so every
//! operation takes `&self` and locks a single mutex for its duration.
//!
//! Lifecycle: *negotiating* (nothing acked) → *negotiated* → reset by
//! [`ConnectionState::reset_negotiated_caps`] on disconnect.

mod hints;

pub use self::hints::{HINT_CAPACITY, HINT_TTL_MS};

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use self::hints::PrivateTargetHints;
use crate::caps::{canonical_cap_name, cap_value, is_removal, Capability};
use crate::casemap::CaseMapping;
use crate::isupport::{Isupport, MonitorSupport};
use crate::replies::{AwayState, DEFAULT_CHANTYPES};

/// Booleans derived from the acked capability set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapFlags {
    /// `echo-message`
    pub echo_message: bool,
    /// Typing notifications are possible (`message-tags`).
    pub typing: bool,
    /// `standard-replies`
    pub standard_replies: bool,
    /// `chathistory` or `draft/chathistory`
    pub chathistory: bool,
    /// `labeled-response` or `draft/labeled-response`
    pub labeled_response: bool,
    /// `draft/multiline`
    pub multiline: bool,
    /// `server-time`
    pub server_time: bool,
}

impl CapFlags {
    fn from_acked(acked: &HashSet<String>) -> Self {
        let mut flags = Self::default();
        for name in acked {
            match Capability::from(name.as_str()) {
                Capability::EchoMessage => flags.echo_message = true,
                Capability::MessageTags => flags.typing = true,
                Capability::StandardReplies => flags.standard_replies = true,
                Capability::ChatHistory => flags.chathistory = true,
                Capability::LabeledResponse => flags.labeled_response = true,
                Capability::Multiline => flags.multiline = true,
                Capability::ServerTime => flags.server_time = true,
                _ => {}
            }
        }
        flags
    }
}

#[derive(Debug)]
struct Inner {
    acked: HashSet<String>,
    rejected: HashSet<String>,
    available: HashMap<String, Option<String>>,
    flags: CapFlags,
    own_nick: Option<String>,
    own_account: Option<String>,
    own_away: AwayState,
    hostmasks: HashMap<String, String>,
    accounts: HashMap<String, Option<String>>,
    casemapping: CaseMapping,
    chantypes: String,
    monitor: Option<Option<u32>>,
    whox: bool,
    hints: PrivateTargetHints,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            acked: HashSet::new(),
            rejected: HashSet::new(),
            available: HashMap::new(),
            flags: CapFlags::default(),
            own_nick: None,
            own_account: None,
            own_away: AwayState::Unknown,
            hostmasks: HashMap::new(),
            accounts: HashMap::new(),
            casemapping: CaseMapping::default(),
            chantypes: DEFAULT_CHANTYPES.to_owned(),
            monitor: None,
            whox: false,
            hints: PrivateTargetHints::default(),
        }
    }
}

impl Inner {
    fn fold(&self, nick: &str) -> String {
        self.casemapping.to_lower(nick)
    }

    fn refresh_flags(&mut self) {
        self.flags = CapFlags::from_acked(&self.acked);
    }
}

/// Mutable protocol state of one connection.
#[derive(Debug, Default)]
pub struct ConnectionState {
    inner: Mutex<Inner>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one ACK token. `-name` removes the capability. Returns
    /// whether the acked set changed.
    pub fn record_cap_ack(&self, token: &str) -> bool {
        let name = canonical_cap_name(token);
        if name.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock();
        let changed = if is_removal(token) {
            inner.acked.remove(&name)
        } else {
            inner.rejected.remove(&name);
            inner.acked.insert(name)
        };
        if changed {
            inner.refresh_flags();
        }
        changed
    }

    /// Record one NAK token. The acked set is left alone; returns whether
    /// the name was newly marked rejected.
    pub fn record_cap_nak(&self, token: &str) -> bool {
        let name = canonical_cap_name(token);
        !name.is_empty() && self.inner.lock().rejected.insert(name)
    }

    /// `CAP DEL`: drop from both the acked and the available set.
    pub fn record_cap_del(&self, token: &str) -> bool {
        let name = canonical_cap_name(token);
        let mut inner = self.inner.lock();
        let was_available = inner.available.remove(&name).is_some();
        let was_acked = inner.acked.remove(&name);
        if was_acked {
            inner.refresh_flags();
        }
        was_available || was_acked
    }

    /// `CAP LS`/`CAP NEW` token, value kept.
    pub fn record_cap_available(&self, token: &str) {
        let name = canonical_cap_name(token);
        if name.is_empty() {
            return;
        }
        let value = cap_value(token).map(str::to_owned);
        self.inner.lock().available.insert(name, value);
    }

    pub fn is_cap_acked(&self, name: &str) -> bool {
        self.inner.lock().acked.contains(&canonical_cap_name(name))
    }

    pub fn is_cap_rejected(&self, name: &str) -> bool {
        self.inner.lock().rejected.contains(&canonical_cap_name(name))
    }

    pub fn is_cap_available(&self, name: &str) -> bool {
        self.inner.lock().available.contains_key(&canonical_cap_name(name))
    }

    /// The advertised value of an available capability.
    pub fn cap_value(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .available
            .get(&canonical_cap_name(name))
            .cloned()
            .flatten()
    }

    /// Sorted acked names.
    pub fn acked_caps(&self) -> Vec<String> {
        let mut caps: Vec<String> = self.inner.lock().acked.iter().cloned().collect();
        caps.sort();
        caps
    }

    pub fn flags(&self) -> CapFlags {
        self.inner.lock().flags
    }

    /// Whether anything has been acked yet.
    pub fn is_negotiated(&self) -> bool {
        !self.inner.lock().acked.is_empty()
    }

    /// Forget every capability, flag, hint and observation.
    pub fn reset_negotiated_caps(&self) {
        let mut inner = self.inner.lock();
        let own_nick = inner.own_nick.take();
        *inner = Inner::default();
        // The configured nick survives reconnects.
        inner.own_nick = own_nick;
    }

    /// Remember which peer an outgoing private message went to.
    pub fn remember_private_target_hint(
        &self,
        source: &str,
        target: &str,
        command: &str,
        payload: &str,
        message_id: &str,
        now_ms: u64,
    ) {
        self.inner
            .lock()
            .hints
            .remember(source, target, command, payload, message_id, now_ms);
    }

    /// Look up the peer for an echoed private message.
    pub fn find_private_target_hint(
        &self,
        source: &str,
        command: &str,
        payload: &str,
        message_id: &str,
        now_ms: u64,
    ) -> Option<String> {
        self.inner
            .lock()
            .hints
            .find(source, command, payload, message_id, now_ms)
    }

    pub fn hint_count(&self) -> usize {
        self.inner.lock().hints.len()
    }

    pub fn clear_hints(&self) {
        self.inner.lock().hints.clear();
    }

    pub fn own_nick(&self) -> Option<String> {
        self.inner.lock().own_nick.clone()
    }

    pub fn set_own_nick(&self, nick: &str) {
        self.inner.lock().own_nick = Some(nick.to_owned());
    }

    /// Case-mapped comparison against our own nick.
    pub fn is_own_nick(&self, nick: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .own_nick
            .as_deref()
            .is_some_and(|own| inner.casemapping.eq(own, nick))
    }

    pub fn own_account(&self) -> Option<String> {
        self.inner.lock().own_account.clone()
    }

    pub fn set_own_account(&self, account: Option<&str>) {
        self.inner.lock().own_account = account.map(str::to_owned);
    }

    pub fn own_away(&self) -> AwayState {
        self.inner.lock().own_away
    }

    pub fn set_own_away(&self, away: AwayState) {
        self.inner.lock().own_away = away;
    }

    /// Cache `nick`'s hostmask. Returns whether it differed.
    pub fn observe_hostmask(&self, nick: &str, hostmask: &str) -> bool {
        let mut inner = self.inner.lock();
        let key = inner.fold(nick);
        if inner.hostmasks.get(&key).is_some_and(|known| known == hostmask) {
            return false;
        }
        inner.hostmasks.insert(key, hostmask.to_owned());
        true
    }

    pub fn hostmask_of(&self, nick: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner.hostmasks.get(&inner.fold(nick)).cloned()
    }

    /// Cache `nick`'s account (`None` = logged out). Returns whether it
    /// differed from what was known.
    pub fn observe_account(&self, nick: &str, account: Option<&str>) -> bool {
        let account = account.filter(|a| !a.is_empty() && *a != "*" && *a != "0");
        let mut inner = self.inner.lock();
        let key = inner.fold(nick);
        if inner.accounts.get(&key).is_some_and(|known| known.as_deref() == account) {
            return false;
        }
        inner.accounts.insert(key, account.map(str::to_owned));
        true
    }

    /// `None` if never observed, `Some(None)` if known logged out.
    pub fn account_of(&self, nick: &str) -> Option<Option<String>> {
        let inner = self.inner.lock();
        inner.accounts.get(&inner.fold(nick)).cloned()
    }

    /// Move cached observations to a new nick; follows our own nick too.
    pub fn rename_nick(&self, old: &str, new: &str) {
        let mut inner = self.inner.lock();
        let (old_key, new_key) = (inner.fold(old), inner.fold(new));
        if let Some(mask) = inner.hostmasks.remove(&old_key) {
            let mask = match mask.split_once('!') {
                Some((_, rest)) => format!("{new}!{rest}"),
                None => new.to_owned(),
            };
            inner.hostmasks.insert(new_key.clone(), mask);
        }
        if let Some(account) = inner.accounts.remove(&old_key) {
            inner.accounts.insert(new_key, account);
        }
        let is_own = inner
            .own_nick
            .as_deref()
            .is_some_and(|own| inner.casemapping.eq(own, old));
        if is_own {
            inner.own_nick = Some(new.to_owned());
        }
    }

    /// Take in an ISUPPORT line.
    pub fn apply_isupport(&self, isupport: &Isupport<'_>) {
        let mut inner = self.inner.lock();
        if let Some(mapping) = isupport.casemapping() {
            inner.casemapping = mapping;
        }
        if let Some(chantypes) = isupport.chantypes() {
            inner.chantypes = chantypes.to_owned();
        }
        if isupport.has_whox() {
            inner.whox = true;
        } else if isupport.entry("WHOX").is_some_and(|e| e.negated) {
            inner.whox = false;
        }
        match isupport.monitor() {
            MonitorSupport::Unchanged => {}
            MonitorSupport::Supported { limit } => inner.monitor = Some(limit),
            MonitorSupport::Withdrawn => inner.monitor = None,
        }
    }

    pub fn casemapping(&self) -> CaseMapping {
        self.inner.lock().casemapping
    }

    pub fn chantypes(&self) -> String {
        self.inner.lock().chantypes.clone()
    }

    /// Whether `name` is a channel under the announced CHANTYPES.
    pub fn is_channel(&self, name: &str) -> bool {
        crate::replies::is_channel_name_with(name, &self.inner.lock().chantypes)
    }

    /// `Some(limit)` when MONITOR is supported.
    pub fn monitor_support(&self) -> Option<Option<u32>> {
        self.inner.lock().monitor
    }

    pub fn supports_whox(&self) -> bool {
        self.inner.lock().whox
    }
}
