//! WHO (352) and WHOX (354) replies.
//!
//! WHOX replies are requested with [`WHOX_FIELDS`] and a numeric token so
//! replies to our own queries can be told apart from anyone else's.

use super::{param, AwayState};
use crate::error::{EngineError, Result};

/// Fields requested in WHOX queries: token, channel, user, host, nick,
/// flags, account, realname.
pub const WHOX_FIELDS: &str = "tcuhnfar";

/// Parameter count of a 354 reply to a [`WHOX_FIELDS`] query (with `<me>`).
const WHOX_PARAMS: usize = 9;

/// One user row from WHO or WHOX.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhoxEntry {
    /// Channel context, `None` when the server sent `*`.
    pub channel: Option<String>,
    /// Ident.
    pub user: String,
    /// Hostname.
    pub host: String,
    /// Nickname.
    pub nick: String,
    /// Here/away from the flags.
    pub away: AwayState,
    /// Whether the flags carry the IRC operator marker.
    pub is_operator: bool,
    /// Account name; `None` when logged out (`0`) or not reported.
    pub account: Option<String>,
    /// Realname / GECOS.
    pub realname: String,
}

impl WhoxEntry {
    /// `nick!user@host`.
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }
}

fn channel_field(raw: &str) -> Option<String> {
    (raw != "*" && !raw.is_empty()).then(|| raw.to_owned())
}

fn is_valid_token(token: &str) -> bool {
    (1..=3).contains(&token.len()) && token.bytes().all(|b| b.is_ascii_digit())
}

/// Build `WHO <mask> %tcuhnfar,<token>`.
pub fn build_whox_request(mask: &str, token: &str) -> Result<String> {
    let mask = mask.trim();
    if mask.is_empty() || mask.contains(' ') {
        return Err(EngineError::invalid(format!("invalid WHO mask: {mask:?}")));
    }
    if !is_valid_token(token) {
        return Err(EngineError::invalid(format!("WHOX token must be 1-3 digits: {token:?}")));
    }
    Ok(format!("WHO {mask} %{WHOX_FIELDS},{token}"))
}

fn whox_fields<S: AsRef<str>>(params: &[S]) -> Option<WhoxEntry> {
    if params.len() != WHOX_PARAMS {
        return None;
    }
    let nick = param(params, 5)?;
    let user = param(params, 3)?;
    let host = param(params, 4)?;
    if nick.is_empty() || user.is_empty() || host.is_empty() {
        return None;
    }
    let flags = param(params, 6)?;
    let account = param(params, 7)?;
    Some(WhoxEntry {
        channel: channel_field(param(params, 2)?),
        user: user.to_owned(),
        host: host.to_owned(),
        nick: nick.to_owned(),
        away: AwayState::from_who_flags(flags),
        is_operator: flags.contains('*'),
        account: (account != "0" && !account.is_empty()).then(|| account.to_owned()),
        realname: param(params, 8)?.to_owned(),
    })
}

/// Parse a 354 reply to one of our queries. The token must equal
/// `expected_token` exactly.
pub fn parse_whox_strict<S: AsRef<str>>(params: &[S], expected_token: &str) -> Option<WhoxEntry> {
    if param(params, 1)? != expected_token {
        return None;
    }
    whox_fields(params)
}

/// Whether `params` has the shape of a reply to a [`WHOX_FIELDS`] query.
/// Ignores the token.
pub fn looks_like_whox_reply<S: AsRef<str>>(params: &[S]) -> bool {
    param(params, 1).is_some_and(is_valid_token) && whox_fields(params).is_some()
}

/// Whether `params` is shaped like our WHOX reply but carries another
/// token. Diagnostic only.
pub fn is_foreign_whox_reply<S: AsRef<str>>(params: &[S], expected_token: &str) -> bool {
    looks_like_whox_reply(params) && param(params, 1) != Some(expected_token)
}

/// Parse a 352 reply: `<me> <channel> <user> <host> <server> <nick> <flags> :<hops> <realname>`.
pub fn parse_who_reply<S: AsRef<str>>(params: &[S]) -> Option<WhoxEntry> {
    if params.len() < 8 {
        return None;
    }
    let user = param(params, 2)?;
    let host = param(params, 3)?;
    let nick = param(params, 5)?;
    if nick.is_empty() || user.is_empty() || host.is_empty() {
        return None;
    }
    let flags = param(params, 6)?;
    let trailing = param(params, 7)?;
    let realname = match trailing.split_once(' ') {
        Some((hops, name)) if hops.bytes().all(|b| b.is_ascii_digit()) => name,
        _ if trailing.bytes().all(|b| b.is_ascii_digit()) => "",
        _ => trailing,
    };
    Some(WhoxEntry {
        channel: channel_field(param(params, 1)?),
        user: user.to_owned(),
        host: host.to_owned(),
        nick: nick.to_owned(),
        away: AwayState::from_who_flags(flags),
        is_operator: flags.contains('*'),
        account: None,
        realname: realname.to_owned(),
    })
}
