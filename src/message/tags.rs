//! IRCv3 message tag decoding and normalisation.
//!
//! Tags reach us either as the raw `@a=b;c=d` section of a line or as a map
//! the transport already split. Both are folded into [`Ircv3Tags`]: an
//! immutable map with canonical keys.
//!
//! # Reference
//! - IRCv3 Message Tags: <https://ircv3.net/specs/extensions/message-tags>

use std::collections::BTreeMap;
use std::fmt::{Result as FmtResult, Write};
use std::sync::Arc;

/// Tag carrying a server-assigned message id.
pub const MSGID: &str = "msgid";
/// Tag correlating a reply with a labeled request.
pub const LABEL: &str = "label";
/// Tag linking a line to an open batch.
pub const BATCH: &str = "batch";
/// Tag carrying the server-time timestamp.
pub const TIME: &str = "time";
/// Tag carrying the sender's account name.
pub const ACCOUNT: &str = "account";
/// Continuation marker for multiline batches.
pub const MULTILINE_CONCAT: &str = "draft/multiline-concat";

/// Escape a tag value for serialization.
pub fn escape_tag_value(f: &mut dyn Write, value: &str) -> FmtResult {
    for c in value.chars() {
        match c {
            ';' => f.write_str("\\:")?,
            ' ' => f.write_str("\\s")?,
            '\\' => f.write_str("\\\\")?,
            '\r' => f.write_str("\\r")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

/// Unescape a tag value from wire format.
///
/// Unknown escapes keep the escaped character; a lone trailing backslash
/// is dropped.
pub fn unescape_tag_value(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_owned();
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

/// Canonical form of a tag key.
///
/// Lower-cases, strips any leading `@`/`+` and collapses a doubled
/// `draft/` namespace. Returns the key and whether it carried the
/// client-only `+` marker.
pub fn normalize_tag_key(key: &str) -> (String, bool) {
    let trimmed = key.trim();
    let stripped = trimmed.trim_start_matches(['@', '+']);
    let client_only = trimmed[..trimmed.len() - stripped.len()].contains('+');
    let mut canon = stripped.to_ascii_lowercase();
    while canon.starts_with("draft/draft/") {
        canon.replace_range(..6, "");
    }
    (canon, client_only)
}

/// Immutable, normalised tag map.
///
/// Cloning is cheap; there is no way to mutate a map after construction,
/// only to derive a new one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ircv3Tags {
    inner: Arc<BTreeMap<String, String>>,
}

impl Ircv3Tags {
    /// An empty tag map.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Decode the tag section of a raw line (`@` optional).
    ///
    /// Lines without a tag section yield an empty map.
    pub fn from_raw_line(line: &str) -> Self {
        let line = line.trim_start();
        let Some(section) = line.strip_prefix('@') else {
            return Self::empty();
        };
        let section = section.split(' ').next().unwrap_or_default();
        Self::from_tag_section(section)
    }

    /// Decode a bare `a=b;c=d` tag section.
    pub fn from_tag_section(section: &str) -> Self {
        Self::collect(section.split(';').filter(|t| !t.is_empty()).map(|item| {
            match item.split_once('=') {
                Some((k, v)) => (k, unescape_tag_value(v)),
                None => (item, String::new()),
            }
        }))
    }

    /// Normalise a map the transport already split and unescaped.
    pub fn from_map<'a, I, K, V>(map: I) -> Self
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        K: AsRef<str> + ?Sized + 'a,
        V: AsRef<str> + ?Sized + 'a,
    {
        Self::collect(
            map.into_iter()
                .map(|(k, v)| (k.as_ref(), v.as_ref().to_owned())),
        )
    }

    fn collect<'a>(pairs: impl Iterator<Item = (&'a str, String)>) -> Self {
        // Track which keys came from un-prefixed names; those win.
        let mut out: BTreeMap<String, (String, bool)> = BTreeMap::new();
        for (raw_key, value) in pairs {
            let (key, client_only) = normalize_tag_key(raw_key);
            if key.is_empty() {
                continue;
            }
            match out.get(&key) {
                Some((_, true)) if !client_only => {
                    out.insert(key, (value, false));
                }
                Some(_) => {}
                None => {
                    out.insert(key, (value, client_only));
                }
            }
        }
        Self {
            inner: Arc::new(out.into_iter().map(|(k, (v, _))| (k, v)).collect()),
        }
    }

    /// Look up a tag; the query key is normalised the same way.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.inner.get(key) {
            Some(v) => Some(v.as_str()),
            None => self.inner.get(&normalize_tag_key(key).0).map(String::as_str),
        }
    }

    /// Whether the tag is present (with or without a value).
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether there are no tags.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over `(key, value)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// A copy of this map without `key`.
    pub fn without(&self, key: &str) -> Self {
        let key = normalize_tag_key(key).0;
        if !self.inner.contains_key(&key) {
            return self.clone();
        }
        let mut map = (*self.inner).clone();
        map.remove(&key);
        Self {
            inner: Arc::new(map),
        }
    }

    /// The trimmed `msgid` (or `draft/msgid`), empty if absent.
    pub fn message_id(&self) -> &str {
        self.first_non_empty(&[MSGID, "draft/msgid"])
    }

    /// The trimmed `label` (or `draft/label`), empty if absent.
    pub fn label(&self) -> &str {
        self.first_non_empty(&[LABEL, "draft/label"])
    }

    /// The batch reference this line belongs to, empty if none.
    pub fn batch(&self) -> &str {
        self.first_non_empty(&[BATCH])
    }

    fn first_non_empty(&self, keys: &[&str]) -> &str {
        keys.iter()
            .filter_map(|k| self.inner.get(*k))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .unwrap_or("")
    }
}

/// Trim a message id; `None` and blank ids become empty.
pub fn normalize_message_id(id: Option<&str>) -> String {
    id.map(str::trim).unwrap_or_default().to_owned()
}
