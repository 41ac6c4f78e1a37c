//! IRC case-mapping functions.
//!
//! Nicknames and channel names compare case-insensitively, and under the
//! `rfc1459` mapping some punctuation folds too (`[` and `{`). The server
//! announces its mapping through the `CASEMAPPING` ISUPPORT token.

/// A server case-mapping as announced by `CASEMAPPING`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CaseMapping {
    /// Only `A-Z` fold.
    Ascii,
    /// `A-Z` plus `[]\~` fold to `{}|^`.
    #[default]
    Rfc1459,
    /// `A-Z` plus `[]\` fold to `{}|` (no `~`).
    StrictRfc1459,
}

impl CaseMapping {
    /// Parse a `CASEMAPPING` value. Unknown mappings fall back to `rfc1459`.
    pub fn from_token(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ascii" => Self::Ascii,
            "strict-rfc1459" => Self::StrictRfc1459,
            _ => Self::Rfc1459,
        }
    }

    #[inline]
    fn fold(self, c: char) -> char {
        match (self, c) {
            (_, 'A'..='Z') => c.to_ascii_lowercase(),
            (Self::Ascii, _) => c,
            (_, '[') => '{',
            (_, ']') => '}',
            (_, '\\') => '|',
            (Self::Rfc1459, '~') => '^',
            _ => c,
        }
    }

    /// Lower-case `s` under this mapping.
    pub fn to_lower(self, s: &str) -> String {
        s.chars().map(|c| self.fold(c)).collect()
    }

    /// Compare two names under this mapping.
    pub fn eq(self, a: &str, b: &str) -> bool {
        a.len() == b.len() && a.chars().zip(b.chars()).all(|(x, y)| self.fold(x) == self.fold(y))
    }
}

/// Convert a string to IRC lowercase using RFC 1459 case mapping.
pub fn irc_to_lower(s: &str) -> String {
    CaseMapping::Rfc1459.to_lower(s)
}

/// Compare two strings using RFC 1459 case-insensitive comparison.
pub fn irc_eq(a: &str, b: &str) -> bool {
    CaseMapping::Rfc1459.eq(a, b)
}
