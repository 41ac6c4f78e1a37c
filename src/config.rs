//! Engine configuration.
//!
//! Loading is left to the application; these types deserialize from the
//! `[engine]`-style TOML table it hands over.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::caps::{BatchedCapHandler, CapHandler, MultiSaslHandler};
use crate::error::Result;

/// Capabilities requested when the configuration names none.
pub const DEFAULT_WISHLIST: &[&str] = &[
    "multi-prefix",
    "away-notify",
    "account-notify",
    "extended-join",
    "account-tag",
    "chghost",
    "setname",
    "cap-notify",
    "server-time",
    "message-tags",
    "echo-message",
    "batch",
    "labeled-response",
    "standard-replies",
    "draft/chathistory",
    "draft/multiline",
    "draft/read-marker",
    "userhost-in-names",
    "invite-notify",
];

fn default_wishlist() -> Vec<String> {
    DEFAULT_WISHLIST.iter().map(|c| (*c).to_owned()).collect()
}

fn default_true() -> bool {
    true
}

fn default_mechanism() -> String {
    "PLAIN".to_owned()
}

fn default_interval_ms() -> u64 {
    2_000
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_max_nicks() -> usize {
    5
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Capabilities to request, in order.
    #[serde(default = "default_wishlist")]
    pub wishlist: Vec<String>,
    /// Nick we register with; the 001 reply overrides it.
    #[serde(default)]
    pub nick: Option<String>,
    /// SASL credentials.
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
    /// USERHOST discovery.
    #[serde(default)]
    pub userhost: UserhostConfig,
    /// Where learned STS policies are persisted.
    #[serde(default)]
    pub sts_store: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wishlist: default_wishlist(),
            nick: None,
            sasl: None,
            userhost: UserhostConfig::default(),
            sts_store: None,
        }
    }
}

impl EngineConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The negotiation handlers this configuration asks for.
    pub fn cap_handlers(&self) -> Vec<Box<dyn CapHandler>> {
        let mut handlers: Vec<Box<dyn CapHandler>> = vec![Box::new(BatchedCapHandler::new(
            self.wishlist
                .iter()
                .filter(|c| !c.eq_ignore_ascii_case("sasl")),
        ))];
        if let Some(sasl) = &self.sasl {
            handlers.push(Box::new(MultiSaslHandler::new(
                sasl.username.clone(),
                sasl.password.clone(),
                &sasl.mechanism,
                sasl.external,
            )));
        }
        handlers
    }
}

/// SASL credentials and mechanism.
#[derive(Clone, Deserialize)]
pub struct SaslConfig {
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// `PLAIN` or `EXTERNAL`.
    #[serde(default = "default_mechanism")]
    pub mechanism: String,
    /// Authenticate with the TLS client certificate.
    #[serde(default)]
    pub external: bool,
}

impl std::fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mechanism", &self.mechanism)
            .field("external", &self.external)
            .finish()
    }
}

/// USERHOST batching.
#[derive(Debug, Clone, Deserialize)]
pub struct UserhostConfig {
    /// Master switch; when off no USERHOST is ever sent.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tick period.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Minimum time between lookups of the same nick.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Nicks per USERHOST command.
    #[serde(default = "default_max_nicks")]
    pub max_nicks_per_command: usize,
}

impl Default for UserhostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            cooldown_secs: default_cooldown_secs(),
            max_nicks_per_command: default_max_nicks(),
        }
    }
}

impl UserhostConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
