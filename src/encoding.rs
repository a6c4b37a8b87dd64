//! Percent-encoding of raw 20-byte identifiers (info hashes, peer ids) for
//! tracker query strings. Every byte is escaped, matching the compact
//! convention trackers expect rather than leaving printable-ASCII bytes
//! bare.

/// Percent-encodes every byte of `bytes`, e.g. `[0x1a, 0xe1]` -> `"%1a%e1"`.
pub fn percent_encode_bytes(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        encoded.push('%');
        encoded.push_str(&hex::encode([*byte]));
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_every_byte() {
        let encoded = percent_encode_bytes(&[0u8; 20]);
        assert_eq!(encoded.matches('%').count(), 20);
        assert_eq!(encoded, "%00".repeat(20));
    }
}
