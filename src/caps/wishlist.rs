//! "Request everything we want that the server offers."

use std::collections::HashSet;

use tracing::{debug, trace};

use super::{canonical_cap_name, CapHandler, CapLsLine};
use crate::error::Result;
use crate::transport::{RawSender, ServerId};

/// Requests the intersection of a fixed wishlist and the advertised set in
/// one `CAP REQ`, then waits for every requested name to be ACKed or NAKed.
#[derive(Clone, Debug)]
pub struct BatchedCapHandler {
    wishlist: Vec<String>,
    advertised: HashSet<String>,
    pending: HashSet<String>,
    requested: bool,
    finished: bool,
}

impl BatchedCapHandler {
    /// Build from a wishlist; names are canonicalised and deduplicated,
    /// first occurrence wins the position.
    pub fn new<I, S>(wishlist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let wishlist = wishlist
            .into_iter()
            .map(|c| canonical_cap_name(c.as_ref()))
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
        Self {
            wishlist,
            advertised: HashSet::new(),
            pending: HashSet::new(),
            requested: false,
            finished: false,
        }
    }

    /// The normalised wishlist, in order.
    pub fn wishlist(&self) -> &[String] {
        &self.wishlist
    }

    /// Wishlisted names among `offered`, in wishlist order.
    pub fn select<S: AsRef<str>>(&self, offered: &[S]) -> Vec<String> {
        let offered: HashSet<String> = offered.iter().map(|t| canonical_cap_name(t.as_ref())).collect();
        self.wishlist
            .iter()
            .filter(|c| offered.contains(*c))
            .cloned()
            .collect()
    }

    /// Names still awaiting ACK/NAK.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    fn settle(&mut self, caps: &[String]) -> bool {
        if self.finished || !self.requested {
            return false;
        }
        for cap in caps {
            self.pending.remove(&canonical_cap_name(cap));
        }
        if self.pending.is_empty() {
            self.finished = true;
            return true;
        }
        false
    }
}

impl CapHandler for BatchedCapHandler {
    fn handle_ls(&mut self, sender: &dyn RawSender, server_id: &ServerId, line: &CapLsLine) -> Result<bool> {
        if self.finished || self.requested {
            return Ok(false);
        }
        self.advertised.extend(line.names());
        if !line.is_final {
            trace!(server = %server_id, "waiting for final CAP LS line");
            return Ok(false);
        }
        let wanted: Vec<String> = self
            .wishlist
            .iter()
            .filter(|c| self.advertised.contains(*c))
            .cloned()
            .collect();
        if wanted.is_empty() {
            debug!(server = %server_id, "no wishlisted capabilities offered");
            self.finished = true;
            return Ok(true);
        }
        sender.send_raw(server_id, &format!("CAP REQ :{}", wanted.join(" ")))?;
        debug!(server = %server_id, caps = %wanted.join(" "), "requested capabilities");
        self.pending = wanted.into_iter().collect();
        self.requested = true;
        Ok(false)
    }

    fn handle_ack(&mut self, _sender: &dyn RawSender, _server_id: &ServerId, caps: &[String]) -> Result<bool> {
        Ok(self.settle(caps))
    }

    fn handle_nak(&mut self, _sender: &dyn RawSender, server_id: &ServerId, caps: &[String]) -> Result<bool> {
        if self.requested && !self.finished {
            debug!(server = %server_id, caps = %caps.join(" "), "capabilities rejected");
        }
        Ok(self.settle(caps))
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn reset(&mut self) {
        self.advertised.clear();
        self.pending.clear();
        self.requested = false;
        self.finished = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingSender;

    fn ls(list: &str) -> CapLsLine {
        CapLsLine::from_params(&[list])
    }

    fn caps(list: &str) -> Vec<String> {
        list.split_whitespace().map(str::to_owned).collect()
    }

    #[test]
    fn test_wishlist_normalised() {
        let handler = BatchedCapHandler::new(["Multi-Prefix", "away-notify", "multi-prefix", ""]);
        assert_eq!(handler.wishlist(), ["multi-prefix", "away-notify"]);
    }

    #[test]
    fn test_empty_intersection_finishes_immediately() {
        let sender = RecordingSender::new();
        let id = ServerId::new("net");
        let mut handler = BatchedCapHandler::new(["away-notify"]);
        assert!(handler.handle_ls(&sender, &id, &ls("sasl multi-prefix")).unwrap());
        assert!(handler.is_finished());
        assert!(sender.lines().is_empty());
    }

    #[test]
    fn test_single_request_in_wishlist_order() {
        let sender = RecordingSender::new();
        let id = ServerId::new("net");
        let mut handler = BatchedCapHandler::new(["server-time", "multi-prefix", "batch"]);
        let first = CapLsLine::from_params(&["*", "multi-prefix sasl=PLAIN"]);
        assert!(!handler.handle_ls(&sender, &id, &first).unwrap());
        assert!(sender.lines().is_empty());
        assert!(!handler.handle_ls(&sender, &id, &ls("server-time=1 echo-message")).unwrap());
        assert_eq!(sender.lines(), vec!["CAP REQ :server-time multi-prefix"]);
        // A repeated LS in the same cycle does not request again.
        assert!(!handler.handle_ls(&sender, &id, &ls("batch")).unwrap());
        assert_eq!(sender.lines().len(), 1);
    }

    #[test]
    fn test_ack_nak_finish_once() {
        let sender = RecordingSender::new();
        let id = ServerId::new("net");
        let mut handler = BatchedCapHandler::new(["a", "b", "c"]);
        handler.handle_ls(&sender, &id, &ls("a b c")).unwrap();
        assert!(!handler.handle_ack(&sender, &id, &caps("a")).unwrap());
        assert!(!handler.handle_nak(&sender, &id, &caps("b")).unwrap());
        assert!(!handler.handle_ack(&sender, &id, &caps("a")).unwrap());
        assert!(!handler.is_finished());
        assert!(handler.handle_ack(&sender, &id, &caps(":C=x")).unwrap());
        assert!(!handler.handle_ack(&sender, &id, &caps("c")).unwrap());
        assert!(handler.is_finished());
    }

    #[test]
    fn test_select_for_cap_new() {
        let handler = BatchedCapHandler::new(["batch", "away-notify"]);
        assert_eq!(handler.select(&["away-notify", "foo", "batch=1"]), vec!["batch", "away-notify"]);
    }

    #[test]
    fn test_reset_allows_new_cycle() {
        let sender = RecordingSender::new();
        let id = ServerId::new("net");
        let mut handler = BatchedCapHandler::new(["a"]);
        handler.handle_ls(&sender, &id, &ls("a")).unwrap();
        handler.reset();
        handler.handle_ls(&sender, &id, &ls("a")).unwrap();
        assert_eq!(sender.lines(), vec!["CAP REQ :a", "CAP REQ :a"]);
    }
}
