//! Small string helpers shared across the engine.

/// Truncates a string to at most `max_bytes` bytes without breaking
/// a multi-byte UTF-8 codepoint at the end.
///
/// Used to keep message previews in log fields short.
///
/// # Examples
///
/// ```
/// use slirc_engine::util::truncate_utf8_safe;
///
/// assert_eq!(truncate_utf8_safe("hello world", 5), "hello");
/// assert_eq!(truncate_utf8_safe("Hello 👋 World", 8), "Hello ");
/// assert_eq!(truncate_utf8_safe("hi", 10), "hi");
/// ```
#[inline]
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// Stable 64-bit FNV-1a hash of a message payload.
///
/// Stable across processes, unlike `std`'s randomly keyed hasher.
pub fn payload_fingerprint(payload: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    payload
        .bytes()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}
