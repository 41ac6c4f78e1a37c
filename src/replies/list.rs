//! Channel directory rows: RPL_LIST (322) and ALIS notices.

use super::{is_channel_name, param};

/// One channel directory row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    /// Channel name.
    pub channel: String,
    /// Visible user count.
    pub visible_users: u32,
    /// Channel modes some servers prepend to the topic (`[+nt]`).
    pub modes: Option<String>,
    /// Topic, possibly empty.
    pub topic: String,
}

/// Parse an RPL_LIST row: `<me> <channel> <count> [:topic]`.
pub fn parse_list_row<S: AsRef<str>>(params: &[S]) -> Option<ListEntry> {
    let channel = param(params, 1)?;
    if !is_channel_name(channel) {
        return None;
    }
    let visible_users = param(params, 2)?.trim().parse().ok()?;
    let (modes, topic) = split_mode_prefix(param(params, 3).unwrap_or_default());
    Some(ListEntry {
        channel: channel.to_owned(),
        visible_users,
        modes,
        topic,
    })
}

fn split_mode_prefix(topic: &str) -> (Option<String>, String) {
    let topic = topic.trim();
    if let Some(rest) = topic.strip_prefix("[+") {
        if let Some((modes, after)) = rest.split_once(']') {
            if !modes.contains(' ') {
                return (Some(format!("+{modes}")), after.trim_start().to_owned());
            }
        }
    }
    (None, topic.to_owned())
}

/// Markers of ALIS help and status lines, matched case-insensitively.
const ALIS_NON_ROWS: &[&str] = &[
    "syntax:",
    "help",
    "alis",
    "end of output",
    "returning maximum",
    "maximum channel output",
    "no channels found",
    "invalid",
    "*",
];

/// Whether an ALIS notice is a help, syntax or summary line.
///
/// Bodies shaped like a `#channel <count>` row are never help lines,
/// whatever their topic says.
pub fn is_alis_help_line(body: &str) -> bool {
    if split_alis_row(body).is_some() {
        return false;
    }
    let lowered = body.trim().to_ascii_lowercase();
    ALIS_NON_ROWS.iter().any(|marker| lowered.starts_with(marker)) || lowered.contains("syntax:")
}

/// `#channel <count> rest` split into its three parts.
fn split_alis_row(body: &str) -> Option<(&str, u32, &str)> {
    let body = body.trim();
    let (channel, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    if !is_channel_name(channel) {
        return None;
    }
    let rest = rest.trim_start();
    let (count, topic) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let visible_users = count.parse().ok()?;
    Some((channel, visible_users, topic.trim_start()))
}

/// Parse an ALIS notice body: `#channel <count> [:]<topic...>`.
///
/// Help, syntax and summary lines are rejected.
pub fn parse_alis_notice(body: &str) -> Option<ListEntry> {
    let (channel, visible_users, topic) = split_alis_row(body)?;
    let (modes, topic) = split_mode_prefix(topic.strip_prefix(':').unwrap_or(topic));
    Some(ListEntry {
        channel: channel.to_owned(),
        visible_users,
        modes,
        topic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_row() {
        let row = parse_list_row(&["me", "#rust", "1234", "[+nt] The Rust language"]).unwrap();
        assert_eq!(row.channel, "#rust");
        assert_eq!(row.visible_users, 1234);
        assert_eq!(row.modes.as_deref(), Some("+nt"));
        assert_eq!(row.topic, "The Rust language");
    }

    #[test]
    fn test_list_row_without_topic() {
        let row = parse_list_row(&["*", "#quiet", "3"]).unwrap();
        assert_eq!(row.topic, "");
        assert_eq!(row.modes, None);
    }

    #[test]
    fn test_list_row_malformed() {
        assert!(parse_list_row(&["me", "#rust", "many", "topic"]).is_none());
        assert!(parse_list_row(&["me", "rust", "12", "topic"]).is_none());
        assert!(parse_list_row(&["me", "#rust"]).is_none());
        assert!(parse_list_row::<&str>(&[]).is_none());
    }

    #[test]
    fn test_alis_row() {
        let row = parse_alis_notice("#libera          512 :Libera.Chat support").unwrap();
        assert_eq!(row.channel, "#libera");
        assert_eq!(row.visible_users, 512);
        assert_eq!(row.topic, "Libera.Chat support");

        let row = parse_alis_notice("#tiny 2").unwrap();
        assert_eq!(row.topic, "");
    }

    #[test]
    fn test_alis_help_rejected() {
        assert!(parse_alis_notice("***** ALIS Help *****").is_none());
        assert!(parse_alis_notice("Syntax: LIST <pattern> [options]").is_none());
        assert!(parse_alis_notice("Returning maximum of 64 channel names matching '#r*'").is_none());
        assert!(parse_alis_notice("End of output").is_none());
        assert!(parse_alis_notice("#chan many :topic").is_none());
        assert!(parse_alis_notice("#channel <count> <topic>").is_none());
        assert!(is_alis_help_line("  HELP LIST"));
    }

    #[test]
    fn test_alis_row_topic_mentioning_syntax() {
        let body = "#rust 812 :Rust help, syntax: see the book";
        assert!(!is_alis_help_line(body));
        let row = parse_alis_notice(body).unwrap();
        assert_eq!(row.channel, "#rust");
        assert_eq!(row.visible_users, 812);
        assert_eq!(row.topic, "Rust help, syntax: see the book");
    }
}
