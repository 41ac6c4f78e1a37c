//! SASL payload helpers.
//!
//! The engine only sequences the exchange; these helpers produce the
//! `AUTHENTICATE` payloads for PLAIN and EXTERNAL.
//!
//! # Reference
//! - IRCv3 SASL: <https://ircv3.net/specs/extensions/sasl-3.2>
//! - RFC 4616 (PLAIN): <https://tools.ietf.org/html/rfc4616>

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Maximum length of a single `AUTHENTICATE` payload chunk.
pub const SASL_CHUNK_SIZE: usize = 400;

/// SASL mechanisms the engine knows how to drive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SaslMechanism {
    /// PLAIN mechanism (RFC 4616) - username/password.
    Plain,
    /// EXTERNAL mechanism - TLS client certificate.
    External,
    /// Anything else the server lists.
    Unknown(String),
}

impl SaslMechanism {
    /// Parse a mechanism name (case-insensitive).
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Self::Plain,
            "EXTERNAL" => Self::External,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain => "PLAIN",
            Self::External => "EXTERNAL",
            Self::Unknown(s) => s,
        }
    }

    /// Whether we can build a payload for this mechanism.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Plain | Self::External)
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a comma-separated mechanism list (`sasl=` cap value or 908).
pub fn parse_mechanisms(list: &str) -> Vec<SaslMechanism> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SaslMechanism::parse)
        .collect()
}

/// Encode credentials for PLAIN: `authzid NUL authcid NUL password`,
/// with an empty authzid.
pub fn encode_plain(username: &str, password: &str) -> String {
    BASE64.encode(format!("\0{}\0{}", username, password).as_bytes())
}

/// Encode an EXTERNAL response; `+` when no authzid is given.
pub fn encode_external(authzid: Option<&str>) -> String {
    match authzid {
        Some(id) if !id.is_empty() => BASE64.encode(id.as_bytes()),
        _ => "+".to_owned(),
    }
}

/// Split an encoded payload into `AUTHENTICATE` lines.
///
/// A payload whose length is an exact multiple of the chunk size is
/// terminated with an extra `AUTHENTICATE +`.
pub fn authenticate_lines(encoded: &str) -> Vec<String> {
    if encoded == "+" || encoded.is_empty() {
        return vec!["AUTHENTICATE +".to_owned()];
    }
    // base64 output is ASCII, so byte chunks are char boundaries.
    let mut lines: Vec<String> = encoded
        .as_bytes()
        .chunks(SASL_CHUNK_SIZE)
        .map(|chunk| format!("AUTHENTICATE {}", String::from_utf8_lossy(chunk)))
        .collect();
    if encoded.len() % SASL_CHUNK_SIZE == 0 {
        lines.push("AUTHENTICATE +".to_owned());
    }
    lines
}

/// Outcome carried by the SASL numerics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslNumeric {
    /// 903 RPL_SASLSUCCESS
    Success,
    /// 902/904/905/906/907
    Failure,
    /// 908 RPL_SASLMECHS
    Mechanisms,
}

impl SaslNumeric {
    /// Classify a numeric code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            903 => Some(Self::Success),
            902 | 904 | 905 | 906 | 907 => Some(Self::Failure),
            908 => Some(Self::Mechanisms),
            _ => None,
        }
    }
}
