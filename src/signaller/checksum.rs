//! Short digest used to tag room tokens.
//!
//! This is a 32-bit rolling hash, not a MAC. It catches truncated pastes,
//! typos and casual edits. Anyone who has the shared secret (it ships inside
//! every client) can mint a token that verifies.

/// Hashes `text` into lowercase hex.
///
/// The hash walks UTF-16 code units as `h = h * 31 + unit` with 32-bit
/// wrapping, then renders the magnitude. Empty input hashes to `"0"`.
pub fn digest(text: &str) -> String {
    if text.is_empty() {
        return "0".to_string();
    }
    let hash = text
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32));
    format!("{:x}", hash.unsigned_abs())
}
