//! Error types for the protocol engine.
//!
//! Malformed inbound lines never surface here: line parsers return `None`
//! and the engine keeps going. These errors cover outgoing command
//! construction, persistence and configuration.

use thiserror::Error;

/// Convenience type alias for Results using [`EngineError`].
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Top-level engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A builder was called with an argument it cannot encode.
    ///
    /// These are programmer errors and must not be retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error while reading or writing persisted state.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// The outbound transport is gone.
    #[error("transport closed for {0}")]
    TransportClosed(String),

    /// Failed to parse a raw IRC line.
    #[error("invalid message: {string}")]
    InvalidMessage {
        /// The raw line.
        string: String,
        /// The underlying parse error.
        #[source]
        cause: MessageParseError,
    },
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Errors encountered when splitting a raw line into its parts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageParseError {
    /// Line was empty.
    #[error("empty message")]
    EmptyMessage,

    /// Command was invalid or missing.
    #[error("invalid command")]
    InvalidCommand,

    /// Parsing failed with position information.
    #[error("parsing failed at position {position}: {context}")]
    ParseContext {
        /// Byte position where parsing failed.
        position: usize,
        /// What was being parsed.
        context: String,
    },
}
