//! Stateless decoders for numeric replies and service notices.
//!
//! Every parser takes the reply's parameter list (trailing last) and returns
//! `None` when the line does not have the expected shape. A `None` means
//! "not this kind of line"; callers move on.

pub mod banlist;
pub mod list;
pub mod monitor;
pub mod userhost;
pub mod who;

pub use self::banlist::{parse_ban_list_end, parse_ban_list_row, BanListEntry};
pub use self::list::{is_alis_help_line, parse_alis_notice, parse_list_row, ListEntry};
pub use self::monitor::{parse_monitor_reply, MonitorReply, MonitorStatusEntry};
pub use self::userhost::{parse_userhost_reply, UserhostEntry};
pub use self::who::{
    build_whox_request, is_foreign_whox_reply, looks_like_whox_reply, parse_who_reply,
    parse_whox_strict, WhoxEntry, WHOX_FIELDS,
};

/// Channel prefixes assumed when the server has not announced `CHANTYPES`.
pub const DEFAULT_CHANTYPES: &str = "#&!+";

/// Whether `name` starts with one of the default channel prefixes.
pub fn is_channel_name(name: &str) -> bool {
    is_channel_name_with(name, DEFAULT_CHANTYPES)
}

/// Whether `name` starts with one of `chantypes` and has a body.
pub fn is_channel_name_with(name: &str, chantypes: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if chantypes.contains(c)) && chars.next().is_some()
}

/// Presence as reported by USERHOST, WHO and away-notify.
///
/// Kept as three states so "no information" is never read as "here".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AwayState {
    /// Present.
    Here,
    /// Marked away.
    Away,
    /// Not reported.
    #[default]
    Unknown,
}

impl AwayState {
    /// From a USERHOST `+`/`-` marker.
    pub fn from_userhost_marker(c: char) -> Self {
        match c {
            '+' => Self::Here,
            '-' => Self::Away,
            _ => Self::Unknown,
        }
    }

    /// From WHO flags (`H` here, `G` gone).
    pub fn from_who_flags(flags: &str) -> Self {
        match flags.chars().next() {
            Some('H') => Self::Here,
            Some('G') => Self::Away,
            _ => Self::Unknown,
        }
    }
}

fn param<S: AsRef<str>>(params: &[S], idx: usize) -> Option<&str> {
    params.get(idx).map(AsRef::as_ref)
}
