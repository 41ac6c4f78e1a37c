//! RPL_ISUPPORT (005) token scanning.
//!
//! `:<server> 005 <me> CHANTYPES=# MONITOR=100 -WHOX :are supported by this server`
//!
//! Entries borrow from the reply parameters. A `-KEY` token withdraws a
//! previously advertised key; it is kept as an entry with `negated` set so
//! callers can tell "withdrawn" from "not mentioned".

use crate::casemap::CaseMapping;

/// One ISUPPORT token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IsupportEntry<'a> {
    /// Token name without any leading `-`.
    pub key: &'a str,
    /// Value after `=`, if any.
    pub value: Option<&'a str>,
    /// The token was `-KEY`.
    pub negated: bool,
}

impl<'a> IsupportEntry<'a> {
    fn parse(token: &'a str) -> Option<Self> {
        let (negated, token) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (token, None),
        };
        if key.is_empty() {
            return None;
        }
        Some(Self {
            key,
            value: if negated { None } else { value },
            negated,
        })
    }
}

/// The tokens of one 005 line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Isupport<'a> {
    entries: Vec<IsupportEntry<'a>>,
}

impl<'a> Isupport<'a> {
    /// Scan bare tokens.
    pub fn parse_params<S: AsRef<str>>(params: &'a [S]) -> Self {
        Self {
            entries: params
                .iter()
                .map(AsRef::as_ref)
                .filter_map(IsupportEntry::parse)
                .collect(),
        }
    }

    /// Scan a full 005 parameter list: drops `<me>` and the trailing
    /// human-readable text.
    pub fn from_reply<S: AsRef<str>>(params: &'a [S]) -> Option<Self> {
        if params.len() < 2 {
            return None;
        }
        let mut tokens = &params[1..];
        if let Some(last) = tokens.last() {
            if last.as_ref().contains(' ') {
                tokens = &tokens[..tokens.len() - 1];
            }
        }
        Some(Self::parse_params(tokens))
    }

    /// Iterate over tokens in order.
    pub fn iter(&self) -> impl Iterator<Item = &IsupportEntry<'a>> {
        self.entries.iter()
    }

    /// The last entry for `key` (case-insensitive), negated or not.
    pub fn entry(&self, key: &str) -> Option<&IsupportEntry<'a>> {
        self.entries.iter().rfind(|e| e.key.eq_ignore_ascii_case(key))
    }

    /// `Some(value)` if `key` is advertised (value may be absent), `None`
    /// if it is missing or withdrawn.
    pub fn get(&self, key: &str) -> Option<Option<&'a str>> {
        self.entry(key).filter(|e| !e.negated).map(|e| e.value)
    }

    pub fn casemapping(&self) -> Option<CaseMapping> {
        self.get("CASEMAPPING").flatten().map(CaseMapping::from_token)
    }

    pub fn chantypes(&self) -> Option<&'a str> {
        self.get("CHANTYPES").flatten()
    }

    pub fn network(&self) -> Option<&'a str> {
        self.get("NETWORK").flatten()
    }

    /// Whether `WHOX` is advertised.
    pub fn has_whox(&self) -> bool {
        self.get("WHOX").is_some()
    }

    /// MONITOR support announced by this line.
    pub fn monitor(&self) -> MonitorSupport {
        match self.entry("MONITOR") {
            None => MonitorSupport::Unchanged,
            Some(e) if e.negated => MonitorSupport::Withdrawn,
            Some(e) => MonitorSupport::Supported {
                limit: e.value.and_then(|v| v.trim().parse().ok()),
            },
        }
    }
}

/// What an ISUPPORT line says about MONITOR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorSupport {
    /// Not mentioned; keep what was known before.
    Unchanged,
    /// Advertised, with the target limit if one was given.
    Supported {
        /// Maximum monitored targets.
        limit: Option<u32>,
    },
    /// `-MONITOR`.
    Withdrawn,
}

/// Scan a 005 parameter list for MONITOR only.
pub fn scan_monitor_support<S: AsRef<str>>(params: &[S]) -> MonitorSupport {
    Isupport::from_reply(params)
        .map(|i| i.monitor())
        .unwrap_or(MonitorSupport::Unchanged)
}
