//! Ban list rows: RPL_BANLIST (367) and RPL_ENDOFBANLIST (368).

use chrono::{DateTime, Utc};

use super::{is_channel_name, param};
use crate::prefix::Hostmask;

/// One entry of a channel's ban list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BanListEntry {
    /// Channel the ban applies to.
    pub channel: String,
    /// Ban mask.
    pub mask: String,
    /// Nick of whoever set the ban, if reported.
    pub set_by: Option<String>,
    /// When the ban was set, in epoch seconds, if reported.
    pub set_at: Option<i64>,
}

impl BanListEntry {
    /// `set_at` as a timestamp.
    pub fn set_at_time(&self) -> Option<DateTime<Utc>> {
        self.set_at.and_then(|s| DateTime::from_timestamp(s, 0))
    }
}

/// Parse `<me> <channel> <mask> [<setter> <set-at>]`.
///
/// A setter given as a full hostmask is reduced to its nick.
pub fn parse_ban_list_row<S: AsRef<str>>(params: &[S]) -> Option<BanListEntry> {
    let channel = param(params, 1)?;
    let mask = param(params, 2)?.trim();
    if !is_channel_name(channel) || mask.is_empty() {
        return None;
    }
    let set_by = param(params, 3)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Hostmask::parse(s).nick)
        .filter(|s| !s.is_empty());
    let set_at = param(params, 4).and_then(|s| s.trim().parse::<i64>().ok());
    Some(BanListEntry {
        channel: channel.to_owned(),
        mask: mask.to_owned(),
        set_by,
        set_at,
    })
}

/// Parse RPL_ENDOFBANLIST, returning the channel.
pub fn parse_ban_list_end<S: AsRef<str>>(params: &[S]) -> Option<String> {
    param(params, 1)
        .filter(|c| is_channel_name(c))
        .map(str::to_owned)
}
