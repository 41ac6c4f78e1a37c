//! Raw line splitting and IRCv3 tag decoding.

mod nom_parser;
pub mod tags;

pub use self::nom_parser::ParsedLine;
pub use self::tags::{normalize_message_id, Ircv3Tags};
