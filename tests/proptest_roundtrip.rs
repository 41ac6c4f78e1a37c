//! Property-based tests for negotiation, tag decoding and hint expiry.
//!
//! Uses proptest to generate wishlists, advertised capability sets, tag
//! values and clock offsets, and checks that:
//! 1. A wishlist handler sends zero or one REQ, for exactly the overlap
//! 2. Negotiation reports finished exactly once
//! 3. Escaped tag values decode to the original text
//! 4. Target hints expire strictly by the supplied clock

use std::collections::BTreeSet;

use proptest::prelude::*;
use slirc_engine::message::tags::escape_tag_value;
use slirc_engine::state::HINT_TTL_MS;
use slirc_engine::{
    BatchedCapHandler, CapHandler, CapLsLine, ConnectionState, Ircv3Tags, RawCommand,
    RecordingSender, ServerId,
};

// =============================================================================
// STRATEGIES
// =============================================================================

const CAPS: &[&str] = &[
    "multi-prefix",
    "away-notify",
    "account-notify",
    "extended-join",
    "server-time",
    "message-tags",
    "echo-message",
    "batch",
    "labeled-response",
    "chghost",
];

/// A subset of [`CAPS`], possibly with duplicates and odd casing.
fn cap_list_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec((0..CAPS.len(), any::<bool>()), 0..12).prop_map(|picks| {
        picks
            .into_iter()
            .map(|(i, upper)| {
                if upper {
                    CAPS[i].to_ascii_uppercase()
                } else {
                    CAPS[i].to_owned()
                }
            })
            .collect()
    })
}

/// Advertised tokens, some carrying a value.
fn advertised_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set((0..CAPS.len(), any::<bool>()), 0..CAPS.len()).prop_map(|picks| {
        picks
            .into_iter()
            .map(|(i, valued)| {
                if valued {
                    format!("{}=v1", CAPS[i])
                } else {
                    CAPS[i].to_owned()
                }
            })
            .collect()
    })
}

fn names(list: &[String]) -> BTreeSet<String> {
    list.iter()
        .map(|c| c.split('=').next().unwrap_or_default().to_ascii_lowercase())
        .collect()
}

fn requested(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("CAP REQ :"))
        .flat_map(|l| l.split(' ').map(str::to_owned))
        .collect()
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    /// Zero overlap finishes immediately; otherwise one REQ with the overlap.
    #[test]
    fn wishlist_requests_exactly_the_overlap(
        wishlist in cap_list_strategy(),
        advertised in advertised_strategy()
    ) {
        let sender = RecordingSender::new();
        let server = ServerId::new("net");
        let mut handler = BatchedCapHandler::new(&wishlist);
        let line = CapLsLine::from_params(&[advertised.join(" ")]);

        let finished = handler.handle_ls(&sender, &server, &line).unwrap();
        let overlap: BTreeSet<String> = names(&wishlist).intersection(&names(&advertised)).cloned().collect();
        let lines = sender.lines();

        if overlap.is_empty() {
            prop_assert!(finished);
            prop_assert!(lines.is_empty());
        } else {
            prop_assert!(!finished);
            prop_assert_eq!(lines.len(), 1);
            let req = requested(&lines);
            let unique: BTreeSet<String> = req.iter().cloned().collect();
            prop_assert_eq!(unique.len(), req.len(), "duplicate in {:?}", req);
            prop_assert_eq!(unique, overlap);
        }

        // A repeated LS in the same cycle never sends another REQ.
        handler.handle_ls(&sender, &server, &line).unwrap();
        prop_assert!(sender.lines().len() <= 1);
    }

    /// However ACK/NAK batches split the request, finished is reported once,
    /// on the batch that settles the last name.
    #[test]
    fn finished_is_reported_exactly_once(
        split in prop::collection::vec((any::<bool>(), 1usize..4), 1..10)
    ) {
        let sender = RecordingSender::new();
        let server = ServerId::new("net");
        let mut handler = BatchedCapHandler::new(CAPS);
        let line = CapLsLine::from_params(&[CAPS.join(" ")]);
        handler.handle_ls(&sender, &server, &line).unwrap();

        let mut remaining: Vec<String> = CAPS.iter().map(|c| (*c).to_owned()).collect();
        let mut finished_count = 0;
        for (ack, size) in split.into_iter().chain(std::iter::repeat((true, CAPS.len())).take(1)) {
            if remaining.is_empty() {
                break;
            }
            let take = size.min(remaining.len());
            let mut batch: Vec<String> = remaining.drain(..take).collect();
            // Duplicates within a batch must not double count.
            batch.push(batch[0].clone());
            let done = if ack {
                handler.handle_ack(&sender, &server, &batch).unwrap()
            } else {
                handler.handle_nak(&sender, &server, &batch).unwrap()
            };
            if done {
                finished_count += 1;
                prop_assert!(remaining.is_empty());
            }
        }
        while !remaining.is_empty() {
            let batch: Vec<String> = remaining.drain(..).collect();
            if handler.handle_ack(&sender, &server, &batch).unwrap() {
                finished_count += 1;
            }
        }
        // Late duplicates after completion.
        prop_assert!(!handler.handle_ack(&sender, &server, &["batch".to_owned()]).unwrap());
        prop_assert_eq!(finished_count, 1);
        prop_assert!(handler.is_finished());
    }

    /// Escaping then decoding a tag value yields the original.
    #[test]
    fn escaped_tag_values_decode(value in "[^\r\n\0]{0,64}") {
        let mut escaped = String::new();
        escape_tag_value(&mut escaped, &value).unwrap();
        prop_assert!(!escaped.contains(' ') && !escaped.contains(';'));
        let tags = Ircv3Tags::from_raw_line(&format!("@+example={escaped} :n PRIVMSG #c :x"));
        prop_assert_eq!(tags.get("example"), Some(value.as_str()));
    }

    /// Hints hit within the TTL and miss from the TTL on.
    #[test]
    fn hints_expire_by_supplied_clock(
        start in 0u64..1_000_000_000,
        offset in 0u64..(HINT_TTL_MS * 2),
        payload in "[a-z ]{1,40}"
    ) {
        let state = ConnectionState::new();
        state.remember_private_target_hint("Me", "bob", "privmsg", &payload, "", start);
        let found = state.find_private_target_hint("ME", "PRIVMSG", &payload, "", start + offset);
        if offset < HINT_TTL_MS {
            prop_assert_eq!(found.as_deref(), Some("bob"));
        } else {
            prop_assert_eq!(found, None);
        }
    }

    /// Splitting arbitrary text never panics.
    #[test]
    fn raw_command_parse_never_panics(line in "\\PC{0,200}") {
        let _ = RawCommand::parse(&line).map(|c| c.decoded_tags());
    }
}
