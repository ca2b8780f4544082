//! Hex helpers for handler `pack`/`unpack` implementations.
//!
//! Hashes and addresses cross the persistence boundary as 0x-prefixed
//! lowercase strings; these helpers give handlers one canonical form.

use serde_json::Value;

/// Normalize a hex identifier to lowercase with a `0x` prefix.
///
/// Returns `None` when the input is not an even-length hex string.
pub fn normalize_hex(value: &str) -> Option<String> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped).ok()?;
    Some(format!("0x{}", hex::encode(bytes)))
}

/// Strip the `0x` prefix from a hex identifier.
pub fn denormalize_hex(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

/// Pack raw bytes into the JSON string representation used in payloads.
pub fn encode_field(bytes: &[u8]) -> Value {
    Value::String(format!("0x{}", hex::encode(bytes)))
}

/// Unpack a payload field produced by [`encode_field`].
pub fn decode_field(value: &Value) -> Option<Vec<u8>> {
    let s = value.as_str()?;
    hex::decode(denormalize_hex(s)).ok()
}
