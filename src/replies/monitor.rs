//! MONITOR numerics (730-734).
//!
//! # Reference
//! - IRCv3 MONITOR: <https://ircv3.net/specs/extensions/monitor>

use super::param;
use crate::prefix::Hostmask;

/// 730 RPL_MONONLINE
pub const RPL_MONONLINE: u16 = 730;
/// 731 RPL_MONOFFLINE
pub const RPL_MONOFFLINE: u16 = 731;
/// 732 RPL_MONLIST
pub const RPL_MONLIST: u16 = 732;
/// 733 RPL_ENDOFMONLIST
pub const RPL_ENDOFMONLIST: u16 = 733;
/// 734 ERR_MONLISTFULL
pub const ERR_MONLISTFULL: u16 = 734;

/// One monitored target's reported status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorStatusEntry {
    /// Nickname.
    pub nick: String,
    /// Full hostmask, only on online entries that carried one.
    pub hostmask: Option<String>,
}

/// A decoded MONITOR numeric.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorReply {
    /// Targets that are online.
    Online(Vec<MonitorStatusEntry>),
    /// Targets that are offline.
    Offline(Vec<MonitorStatusEntry>),
    /// Part of the current monitor list.
    List(Vec<MonitorStatusEntry>),
    /// End of the monitor list.
    EndOfList,
    /// The list is full; `targets` were not added.
    ListFull {
        /// Server-side list limit.
        limit: Option<u32>,
        /// Rejected targets.
        targets: Vec<String>,
    },
}

fn targets(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|t| !t.is_empty())
}

fn nick_only(target: &str) -> MonitorStatusEntry {
    MonitorStatusEntry {
        nick: Hostmask::parse(target).nick,
        hostmask: None,
    }
}

/// Decode a MONITOR numeric from its code and parameters.
pub fn parse_monitor_reply<S: AsRef<str>>(code: u16, params: &[S]) -> Option<MonitorReply> {
    match code {
        RPL_MONONLINE => {
            let entries: Vec<_> = targets(param(params, 1)?)
                .map(|t| {
                    let mask = Hostmask::parse(t);
                    MonitorStatusEntry {
                        hostmask: mask.is_complete().then(|| mask.to_string()),
                        nick: mask.nick,
                    }
                })
                .filter(|e| !e.nick.is_empty())
                .collect();
            (!entries.is_empty()).then_some(MonitorReply::Online(entries))
        }
        RPL_MONOFFLINE | RPL_MONLIST => {
            let entries: Vec<_> = targets(param(params, 1)?)
                .map(nick_only)
                .filter(|e| !e.nick.is_empty())
                .collect();
            if entries.is_empty() {
                return None;
            }
            Some(if code == RPL_MONOFFLINE {
                MonitorReply::Offline(entries)
            } else {
                MonitorReply::List(entries)
            })
        }
        RPL_ENDOFMONLIST => Some(MonitorReply::EndOfList),
        ERR_MONLISTFULL => Some(MonitorReply::ListFull {
            limit: param(params, 1).and_then(|l| l.trim().parse().ok()),
            targets: targets(param(params, 2).unwrap_or_default())
                .map(str::to_owned)
                .collect(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_with_hostmasks() {
        let reply = parse_monitor_reply(730, &["me", "alice!a@host.one,bob"]).unwrap();
        let MonitorReply::Online(entries) = reply else {
            panic!("expected online reply");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].nick, "alice");
        assert_eq!(entries[0].hostmask.as_deref(), Some("alice!a@host.one"));
        assert_eq!(entries[1].nick, "bob");
        assert_eq!(entries[1].hostmask, None);
    }

    #[test]
    fn test_offline_nick_only() {
        let reply = parse_monitor_reply(731, &["me", "carol!c@h,dave"]).unwrap();
        assert_eq!(
            reply,
            MonitorReply::Offline(vec![
                MonitorStatusEntry { nick: "carol".into(), hostmask: None },
                MonitorStatusEntry { nick: "dave".into(), hostmask: None },
            ])
        );
    }

    #[test]
    fn test_list_and_end() {
        assert!(matches!(
            parse_monitor_reply(732, &["me", "x,y"]),
            Some(MonitorReply::List(v)) if v.len() == 2
        ));
        assert_eq!(
            parse_monitor_reply(733, &["me", "End of MONITOR list"]),
            Some(MonitorReply::EndOfList)
        );
    }

    #[test]
    fn test_list_full() {
        assert_eq!(
            parse_monitor_reply(734, &["me", "100", "a,b", "Monitor list is full."]),
            Some(MonitorReply::ListFull {
                limit: Some(100),
                targets: vec!["a".into(), "b".into()],
            })
        );
    }

    #[test]
    fn test_malformed() {
        assert!(parse_monitor_reply(730, &["me"]).is_none());
        assert!(parse_monitor_reply(731, &["me", ",,"]).is_none());
        assert!(parse_monitor_reply(322, &["me", "x"]).is_none());
    }
}
