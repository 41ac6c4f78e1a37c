//! Folding of `draft/multiline-concat` continuation lines.
//!
//! A line tagged with both `batch=<id>` and `draft/multiline-concat` is
//! buffered. The next line of the same batch without the concat marker (or
//! the end of the batch) closes the buffer and yields one logical message
//! whose text is every buffered line joined with `\n`.
//!
//! # Reference
//! - IRCv3 multiline: <https://ircv3.net/specs/extensions/multiline>

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::message::tags::{Ircv3Tags, MULTILINE_CONCAT};

/// Result of feeding one line to the accumulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FoldResult {
    /// Nothing should be emitted for this line yet.
    pub suppressed: bool,
    /// Text to emit (the folded text when a batch closed).
    pub text: String,
    /// Timestamp to emit (the first line's when a batch closed).
    pub timestamp: DateTime<Utc>,
    /// Message id to emit.
    pub message_id: String,
    /// Tags to emit.
    pub tags: Ircv3Tags,
}

impl FoldResult {
    fn pass_through(
        text: &str,
        timestamp: DateTime<Utc>,
        message_id: &str,
        tags: &Ircv3Tags,
    ) -> Self {
        Self {
            suppressed: false,
            text: text.to_owned(),
            timestamp,
            message_id: message_id.trim().to_owned(),
            tags: tags.clone(),
        }
    }

    fn suppressed(timestamp: DateTime<Utc>) -> Self {
        Self {
            suppressed: true,
            text: String::new(),
            timestamp,
            message_id: String::new(),
            tags: Ircv3Tags::empty(),
        }
    }
}

/// A buffer flushed by the end of its batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FoldedMessage {
    /// Command of the first line (`PRIVMSG` or `NOTICE`).
    pub command: String,
    /// Sender of the batch.
    pub from: String,
    /// Target of the batch.
    pub target: String,
    /// Timestamp of the first line.
    pub timestamp: DateTime<Utc>,
    /// Buffered lines joined with `\n`.
    pub text: String,
    /// Identity captured from the first line.
    pub message_id: String,
    /// Tags captured from the first line, concat marker removed.
    pub tags: Ircv3Tags,
}

#[derive(Debug)]
struct BatchState {
    command: String,
    from: String,
    target: String,
    timestamp: DateTime<Utc>,
    lines: Vec<String>,
    message_id: String,
    tags: Ircv3Tags,
}

impl BatchState {
    fn belongs_to(&self, from: &str, target: &str) -> bool {
        self.from.eq_ignore_ascii_case(from) && self.target.eq_ignore_ascii_case(target)
    }

    fn finish(self, last: Option<&str>) -> FoldedMessage {
        let mut lines = self.lines;
        if let Some(last) = last {
            lines.push(last.to_owned());
        }
        FoldedMessage {
            command: self.command,
            from: self.from,
            target: self.target,
            timestamp: self.timestamp,
            text: lines.join("\n"),
            message_id: self.message_id,
            tags: self.tags.without(MULTILINE_CONCAT),
        }
    }
}

/// Per-connection multiline buffers, keyed by batch id.
#[derive(Debug, Default)]
pub struct MultilineAccumulator {
    open: HashMap<String, BatchState>,
}

impl MultilineAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one message-bearing line.
    #[allow(clippy::too_many_arguments)]
    pub fn fold(
        &mut self,
        command: &str,
        from: &str,
        target: &str,
        timestamp: DateTime<Utc>,
        text: &str,
        message_id: &str,
        tags: &Ircv3Tags,
    ) -> FoldResult {
        let batch = tags.batch();
        if batch.is_empty() {
            return FoldResult::pass_through(text, timestamp, message_id, tags);
        }
        let concat = tags.contains(MULTILINE_CONCAT);

        if let Some(state) = self.open.get_mut(batch) {
            if !state.belongs_to(from, target) {
                warn!(batch = %batch, from = %from, target = %target, "multiline line from another origin, passing through");
                return FoldResult::pass_through(text, timestamp, message_id, tags);
            }
            if concat {
                state.lines.push(text.to_owned());
                return FoldResult::suppressed(timestamp);
            }
            let Some(state) = self.open.remove(batch) else {
                return FoldResult::pass_through(text, timestamp, message_id, tags);
            };
            let folded = state.finish(Some(text));
            debug!(batch = %batch, lines = folded.text.lines().count(), "multiline batch folded");
            return FoldResult {
                suppressed: false,
                text: folded.text,
                timestamp: folded.timestamp,
                message_id: folded.message_id,
                tags: folded.tags,
            };
        }

        if !concat {
            return FoldResult::pass_through(text, timestamp, message_id, tags);
        }

        self.open.insert(
            batch.to_owned(),
            BatchState {
                command: command.to_owned(),
                from: from.to_owned(),
                target: target.to_owned(),
                timestamp,
                lines: vec![text.to_owned()],
                message_id: message_id.trim().to_owned(),
                tags: tags.clone(),
            },
        );
        FoldResult::suppressed(timestamp)
    }

    /// Close `batch_id` on `BATCH -id`, returning any buffered text.
    pub fn close_batch(&mut self, batch_id: &str) -> Option<FoldedMessage> {
        self.open.remove(batch_id).map(|state| state.finish(None))
    }

    /// Whether a buffer is open for `batch_id`.
    pub fn is_open(&self, batch_id: &str) -> bool {
        self.open.contains_key(batch_id)
    }

    /// Drop every open buffer (connection reset).
    pub fn reset(&mut self) {
        if !self.open.is_empty() {
            debug!(open = self.open.len(), "discarding open multiline batches");
        }
        self.open.clear();
    }
}
