//! Pure decoding: hex string → bytes.

use crate::domain::{CommError, CommResult};

/// Decode a hex string into bytes.
///
/// Surrounding whitespace is ignored and an odd-length string is read as if
/// it had a leading `0` ("ABC" → `[0x0A, 0xBC]`). Upper and lower case digits
/// are both accepted; anything else is an error.
pub fn hex_to_bytes(hex_str: &str) -> CommResult<Vec<u8>> {
    let trimmed = hex_str.trim();
    let result = if trimmed.len() % 2 == 1 {
        hex::decode(format!("0{trimmed}"))
    } else {
        hex::decode(trimmed)
    };
    result.map_err(|e| CommError::Hex(format!("'{trimmed}': {e}")))
}
