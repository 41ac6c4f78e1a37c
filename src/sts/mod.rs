//! Strict Transport Security policies.
//!
//! A server advertises `sts=duration=<secs>,port=<port>[,preload]`. Policies
//! are only learned over TLS; once learned, connections to that host are
//! forced onto TLS until the policy expires. `duration=0` removes it.
//!
//! # Reference
//! - IRCv3 STS: <https://ircv3.net/specs/extensions/sts>

mod store;

pub use self::store::{JsonFileStsStore, MemoryStsStore, StsStore};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::transport::ServerId;

/// A learned policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StsPolicy {
    /// Always true for a stored policy.
    pub tls: bool,
    /// Port to upgrade to; `None` keeps the configured port.
    pub port: Option<u16>,
    /// When the policy was (re)observed.
    pub discovered_at: DateTime<Utc>,
    /// Lifetime from `discovered_at`.
    pub duration_secs: u64,
    /// Server asked to be preloaded.
    #[serde(default)]
    pub preload: bool,
}

impl StsPolicy {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.duration_secs).unwrap_or(i64::MAX);
        self.discovered_at
            .checked_add_signed(Duration::seconds(secs.min(i64::MAX / 1000)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.duration_secs > 0 && now < self.expires_at()
    }
}

/// Directives of one `sts` value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StsDirectives {
    pub duration: Option<u64>,
    pub port: Option<u16>,
    pub preload: bool,
}

impl StsDirectives {
    /// Parse `sts=<value>` or a bare value. Unknown keys are ignored;
    /// malformed numbers read as absent.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        let value = match token.split_once('=') {
            Some((key, rest)) if key.eq_ignore_ascii_case("sts") => rest,
            _ => token,
        };
        let mut out = Self::default();
        for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, val) = item.split_once('=').unwrap_or((item, ""));
            match key.to_ascii_lowercase().as_str() {
                "duration" => out.duration = val.trim().parse().ok(),
                "port" => out.port = val.trim().parse().ok().filter(|p| *p != 0),
                "preload" => out.preload = true,
                _ => {}
            }
        }
        out
    }
}

/// What an observation did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StsObservation {
    /// Not learned (insecure connection or unusable value).
    Ignored,
    /// Stored or replaced.
    Stored(StsPolicy),
    /// `duration=0`: any policy was deleted.
    Removed,
}

/// Where to connect.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Learns, applies and persists STS policies. Shared across connections.
pub struct StsPolicyService {
    store: Arc<dyn StsStore>,
    policies: Mutex<HashMap<String, StsPolicy>>,
}

impl std::fmt::Debug for StsPolicyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StsPolicyService")
            .field("policies", &*self.policies.lock())
            .finish_non_exhaustive()
    }
}

impl StsPolicyService {
    /// Load policies from `store`, dropping expired ones.
    pub fn new(store: Arc<dyn StsStore>) -> Result<Self> {
        Self::load_at(store, Utc::now())
    }

    /// A service backed by a fresh [`MemoryStsStore`].
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStsStore::new()),
            policies: Mutex::new(HashMap::new()),
        }
    }

    pub fn load_at(store: Arc<dyn StsStore>, now: DateTime<Utc>) -> Result<Self> {
        let mut policies = HashMap::new();
        for (host, policy) in store.load()? {
            if policy.is_active_at(now) {
                policies.insert(normalize_host(&host), policy);
            } else {
                debug!(host = %host, "dropping expired sts policy");
                store.remove(&host)?;
            }
        }
        Ok(Self {
            store,
            policies: Mutex::new(policies),
        })
    }

    /// Learn from a capability token seen on `host`.
    pub fn observe_from_cap_list(
        &self,
        server_id: &ServerId,
        host: &str,
        was_secure: bool,
        cap_token: &str,
    ) -> Result<StsObservation> {
        self.observe_from_cap_list_at(server_id, host, was_secure, cap_token, Utc::now())
    }

    pub fn observe_from_cap_list_at(
        &self,
        server_id: &ServerId,
        host: &str,
        was_secure: bool,
        cap_token: &str,
        now: DateTime<Utc>,
    ) -> Result<StsObservation> {
        if !was_secure {
            debug!(server = %server_id, host = %host, "ignoring sts over insecure connection");
            return Ok(StsObservation::Ignored);
        }
        let host = normalize_host(host);
        let directives = StsDirectives::parse(cap_token);
        let Some(duration) = directives.duration else {
            warn!(server = %server_id, host = %host, token = %cap_token, "sts token without valid duration");
            return Ok(StsObservation::Ignored);
        };
        if duration == 0 {
            self.store.remove(&host)?;
            let removed = self.policies.lock().remove(&host).is_some();
            info!(server = %server_id, host = %host, removed, "sts policy cleared");
            return Ok(StsObservation::Removed);
        }
        let policy = StsPolicy {
            tls: true,
            port: directives.port,
            discovered_at: now,
            duration_secs: duration,
            preload: directives.preload,
        };
        self.store.save(&host, &policy)?;
        self.policies.lock().insert(host.clone(), policy.clone());
        info!(server = %server_id, host = %host, duration, port = ?policy.port, "sts policy stored");
        Ok(StsObservation::Stored(policy))
    }

    /// Upgrade `endpoint` if its host has an active policy.
    pub fn apply_policy(&self, endpoint: &ServerEndpoint) -> ServerEndpoint {
        self.apply_policy_at(endpoint, Utc::now())
    }

    pub fn apply_policy_at(&self, endpoint: &ServerEndpoint, now: DateTime<Utc>) -> ServerEndpoint {
        match self.active_policy_for_host_at(&endpoint.host, now) {
            Some(policy) => ServerEndpoint {
                host: endpoint.host.clone(),
                port: policy.port.unwrap_or(endpoint.port),
                tls: true,
            },
            None => endpoint.clone(),
        }
    }

    pub fn active_policy_for_host(&self, host: &str) -> Option<StsPolicy> {
        self.active_policy_for_host_at(host, Utc::now())
    }

    pub fn active_policy_for_host_at(&self, host: &str, now: DateTime<Utc>) -> Option<StsPolicy> {
        self.policies
            .lock()
            .get(&normalize_host(host))
            .filter(|p| p.is_active_at(now))
            .cloned()
    }
}
