//! IRCv3 extensions the engine implements on the client side.

pub mod chathistory;
pub mod multiline;
pub mod server_time;

pub use self::chathistory::ChatHistorySelector;
pub use self::multiline::{FoldResult, MultilineAccumulator};
pub use self::server_time::{format_server_time, parse_server_time};
