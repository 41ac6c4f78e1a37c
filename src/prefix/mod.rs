//! Message source (prefix) handling.
//!
//! The transport hands us the source as a raw string: either a server name
//! or a `nick!user@host` mask, sometimes with parts missing.

use std::fmt;

/// The origin of a line.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum Source {
    /// Server name (e.g., `irc.example.com`).
    Server(String),
    /// A user: nick plus whatever of `user`/`host` the server disclosed.
    User(Hostmask),
}

impl Source {
    /// Parse a source string. A dot before any `!`/`@` marks a server.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix(':').unwrap_or(raw);
        let name_end = raw.find(['!', '@']).unwrap_or(raw.len());
        if raw[..name_end].contains('.') && name_end == raw.len() {
            return Source::Server(raw.to_owned());
        }
        Source::User(Hostmask::parse(raw))
    }

    /// The nickname, if the source is a user.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Source::User(mask) if !mask.nick.is_empty() => Some(&mask.nick),
            _ => None,
        }
    }

    /// The full hostmask, if the source is a user with user and host parts.
    pub fn hostmask(&self) -> Option<&Hostmask> {
        match self {
            Source::User(mask) if mask.is_complete() => Some(mask),
            _ => None,
        }
    }
}

/// A `nick!user@host` mask.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Default)]
pub struct Hostmask {
    /// Nickname.
    pub nick: String,
    /// Ident / username, empty if not disclosed.
    pub user: String,
    /// Hostname, empty if not disclosed.
    pub host: String,
}

impl Hostmask {
    /// Create a mask from its parts.
    pub fn new(nick: impl Into<String>, user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            user: user.into(),
            host: host.into(),
        }
    }

    /// Lenient parse; missing parts stay empty.
    pub fn parse(raw: &str) -> Self {
        let (rest, host) = match raw.split_once('@') {
            Some((rest, host)) => (rest, host),
            None => (raw, ""),
        };
        let (nick, user) = match rest.split_once('!') {
            Some((nick, user)) => (nick, user),
            None => (rest, ""),
        };
        Self::new(nick, user, host)
    }

    /// Whether both the user and host parts are known.
    pub fn is_complete(&self) -> bool {
        !self.nick.is_empty() && !self.user.is_empty() && !self.host.is_empty()
    }
}

impl fmt::Display for Hostmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nick)?;
        if !self.user.is_empty() {
            write!(f, "!{}", self.user)?;
        }
        if !self.host.is_empty() {
            write!(f, "@{}", self.host)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user() {
        let src = Source::parse("nick!ident@host.example.com");
        assert_eq!(src.nick(), Some("nick"));
        let mask = src.hostmask().unwrap();
        assert_eq!(mask.user, "ident");
        assert_eq!(mask.host, "host.example.com");
        assert_eq!(mask.to_string(), "nick!ident@host.example.com");
    }

    #[test]
    fn test_parse_server() {
        assert_eq!(
            Source::parse("irc.example.net"),
            Source::Server("irc.example.net".into())
        );
        assert_eq!(Source::parse("irc.example.net").nick(), None);
    }

    #[test]
    fn test_partial_mask() {
        let src = Source::parse("nick");
        assert_eq!(src.nick(), Some("nick"));
        assert!(src.hostmask().is_none());

        let mask = Hostmask::parse("nick@host");
        assert_eq!(mask.user, "");
        assert_eq!(mask.host, "host");
        assert_eq!(mask.to_string(), "nick@host");
    }
}
