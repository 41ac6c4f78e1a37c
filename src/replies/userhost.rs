//! RPL_USERHOST (302).
//!
//! `:<server> 302 <me> :alice*=+ident@host bob=-u@h`

use super::{param, AwayState};

/// One `nick[*]=[+|-]ident@host` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserhostEntry {
    /// Nickname.
    pub nick: String,
    /// `*` marker present.
    pub is_operator: bool,
    /// From the `+`/`-` marker; `Unknown` when the server sent none.
    pub away: AwayState,
    /// Ident.
    pub ident: String,
    /// Hostname.
    pub host: String,
}

impl UserhostEntry {
    /// `nick!ident@host`.
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.ident, self.host)
    }

    fn parse(token: &str) -> Option<Self> {
        let (name, rest) = token.split_once('=')?;
        let (nick, is_operator) = match name.strip_suffix('*') {
            Some(nick) => (nick, true),
            None => (name, false),
        };
        let (away, userhost) = match rest.strip_prefix(['+', '-']) {
            Some(after) => (AwayState::from_userhost_marker(rest.chars().next()?), after),
            None => (AwayState::Unknown, rest),
        };
        let (ident, host) = userhost.split_once('@')?;
        if nick.is_empty() || ident.is_empty() || host.is_empty() {
            return None;
        }
        Some(Self {
            nick: nick.to_owned(),
            is_operator,
            away,
            ident: ident.to_owned(),
            host: host.to_owned(),
        })
    }
}

/// Parse every well-formed entry of a 302 reply; malformed tokens are skipped.
///
/// Returns `None` when the reply has no trailing list at all.
pub fn parse_userhost_reply<S: AsRef<str>>(params: &[S]) -> Option<Vec<UserhostEntry>> {
    if params.len() < 2 {
        return None;
    }
    let list = param(params, params.len() - 1)?;
    Some(
        list.split_whitespace()
            .filter_map(UserhostEntry::parse)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entries() {
        let entries =
            parse_userhost_reply(&["me", "alice*=+ident@host.example bob=-u@h"]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].nick, "alice");
        assert!(entries[0].is_operator);
        assert_eq!(entries[0].away, AwayState::Here);
        assert_eq!(entries[0].hostmask(), "alice!ident@host.example");
        assert_eq!(entries[1].nick, "bob");
        assert!(!entries[1].is_operator);
        assert_eq!(entries[1].away, AwayState::Away);
    }

    #[test]
    fn test_skip_malformed() {
        let entries = parse_userhost_reply(&["me", "broken =+x@y carol=+ab dave=+d@h =+e@f"]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].nick, "dave");
    }

    #[test]
    fn test_entry_without_away_marker() {
        let entries = parse_userhost_reply(&["me", "alice=ident@host bob*=+b@h"]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].nick, "alice");
        assert_eq!(entries[0].away, AwayState::Unknown);
        assert_eq!(entries[0].ident, "ident");
        assert_eq!(entries[0].host, "host");
        assert_eq!(entries[1].nick, "bob");
        assert!(entries[1].is_operator);
        assert_eq!(entries[1].away, AwayState::Here);
    }

    #[test]
    fn test_empty_and_missing() {
        assert_eq!(parse_userhost_reply(&["me", ""]), Some(vec![]));
        assert_eq!(parse_userhost_reply(&["me"]), None);
        assert_eq!(parse_userhost_reply::<&str>(&[]), None);
    }
}
