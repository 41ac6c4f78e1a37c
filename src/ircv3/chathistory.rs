//! CHATHISTORY command construction.
//!
//! Builders return the wire line (without CRLF) or an
//! [`EngineError::InvalidArgument`] before anything reaches the network.
//!
//! # Reference
//! - IRCv3 chathistory: <https://ircv3.net/specs/extensions/chathistory>

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};
use crate::ircv3::server_time::format_server_time;

/// A message reference for CHATHISTORY.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatHistorySelector {
    /// `timestamp=YYYY-MM-DDThh:mm:ss.sssZ`
    Timestamp(String),
    /// `msgid=<id>`
    MsgId(String),
    /// `*`
    Wildcard,
}

impl ChatHistorySelector {
    /// Selector for a point in time, formatted with millisecond precision.
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(format_server_time(ts))
    }

    /// Selector for a message id.
    pub fn msgid(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() || id.contains(' ') {
            return Err(EngineError::invalid(format!("invalid msgid selector value: {id:?}")));
        }
        Ok(Self::MsgId(id.to_owned()))
    }

    /// Parse a raw selector. The key is case-normalised; the value is kept.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self::Wildcard);
        }
        let Some((key, value)) = raw.split_once('=') else {
            return Err(EngineError::invalid(format!("invalid chathistory selector: {raw:?}")));
        };
        if value.is_empty() || value.contains(' ') {
            return Err(EngineError::invalid(format!("invalid chathistory selector: {raw:?}")));
        }
        match key.to_ascii_lowercase().as_str() {
            "timestamp" => Ok(Self::Timestamp(value.to_owned())),
            "msgid" => Ok(Self::MsgId(value.to_owned())),
            _ => Err(EngineError::invalid(format!("invalid chathistory selector key: {key:?}"))),
        }
    }
}

impl fmt::Display for ChatHistorySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(ts) => write!(f, "timestamp={ts}"),
            Self::MsgId(id) => write!(f, "msgid={id}"),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

fn check_target(target: &str) -> Result<&str> {
    let target = target.trim();
    if target.is_empty() || target.contains(' ') {
        return Err(EngineError::invalid(format!("invalid chathistory target: {target:?}")));
    }
    Ok(target)
}

fn check_limit(limit: u32) -> Result<u32> {
    if limit == 0 {
        return Err(EngineError::invalid("chathistory limit must be positive"));
    }
    Ok(limit)
}

fn one(sub: &str, target: &str, selector: &ChatHistorySelector, limit: u32) -> Result<String> {
    let target = check_target(target)?;
    let limit = check_limit(limit)?;
    Ok(format!("CHATHISTORY {sub} {target} {selector} {limit}"))
}

/// `CHATHISTORY BEFORE <target> <selector> <limit>` from a raw selector.
pub fn build_before(target: &str, selector: &str, limit: u32) -> Result<String> {
    one("BEFORE", target, &ChatHistorySelector::parse(selector)?, limit)
}

/// `CHATHISTORY BEFORE <target> timestamp=<ts> <limit>`.
pub fn build_before_by_timestamp(target: &str, ts: DateTime<Utc>, limit: u32) -> Result<String> {
    one("BEFORE", target, &ChatHistorySelector::at(ts), limit)
}

/// `CHATHISTORY BEFORE <target> msgid=<id> <limit>`.
pub fn build_before_by_message_id(target: &str, msgid: &str, limit: u32) -> Result<String> {
    one("BEFORE", target, &ChatHistorySelector::msgid(msgid)?, limit)
}

/// `CHATHISTORY AFTER <target> <selector> <limit>`.
pub fn build_after(target: &str, selector: &str, limit: u32) -> Result<String> {
    one("AFTER", target, &ChatHistorySelector::parse(selector)?, limit)
}

/// `CHATHISTORY LATEST <target> <selector|*> <limit>`.
pub fn build_latest(target: &str, selector: &str, limit: u32) -> Result<String> {
    one("LATEST", target, &ChatHistorySelector::parse(selector)?, limit)
}

/// `CHATHISTORY AROUND <target> <selector> <limit>`.
pub fn build_around(target: &str, selector: &str, limit: u32) -> Result<String> {
    one("AROUND", target, &ChatHistorySelector::parse(selector)?, limit)
}

/// `CHATHISTORY BETWEEN <target> <selector> <selector> <limit>`.
pub fn build_between(target: &str, from: &str, to: &str, limit: u32) -> Result<String> {
    let target = check_target(target)?;
    let from = ChatHistorySelector::parse(from)?;
    let to = ChatHistorySelector::parse(to)?;
    let limit = check_limit(limit)?;
    Ok(format!("CHATHISTORY BETWEEN {target} {from} {to} {limit}"))
}

/// `CHATHISTORY TARGETS timestamp=<a> timestamp=<b> <limit>`.
pub fn build_targets(from: DateTime<Utc>, to: DateTime<Utc>, limit: u32) -> Result<String> {
    let limit = check_limit(limit)?;
    Ok(format!(
        "CHATHISTORY TARGETS {} {} {limit}",
        ChatHistorySelector::at(from),
        ChatHistorySelector::at(to)
    ))
}
