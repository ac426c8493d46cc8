//! Pure encoding: bytes → hex string.

/// Encode bytes as uppercase hex, two characters per byte, no separators.
pub fn to_hex_string(data: &[u8]) -> String {
    hex::encode_upper(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_empty() {
        assert_eq!(to_hex_string(&[]), "");
    }

    #[test]
    fn encode_is_uppercase_and_zero_padded() {
        assert_eq!(to_hex_string(&[0x00, 0x0a, 0xff, 0x7e]), "000AFF7E");
    }

    #[test]
    fn encode_two_chars_per_byte() {
        let data: Vec<u8> = (0..=255).collect();
        let hex = to_hex_string(&data);
        assert_eq!(hex.len(), 512);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
