//! Checksum utilities for cache fingerprints and content-derived ids

use sha2::{Digest, Sha256};
use std::io::Read;

use crate::error::Result;

/// Number of hex characters kept by [`short_digest`]. Wide enough that
/// collisions across one site's image set are not a practical concern.
const SHORT_DIGEST_LEN: usize = 32;

/// Compute the SHA-256 digest of a byte slice as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the SHA-256 digest of any readable source as lowercase hex.
pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Fixed-width digest of a string key, used where a full 64-character hash
/// would be unwieldy (asset ids, derived object keys).
pub fn short_digest(input: &str) -> String {
    let mut digest = sha256_hex(input.as_bytes());
    digest.truncate(SHORT_DIGEST_LEN);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sha256_hex() {
        let checksum = sha256_hex(b"hello world");
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_reader_matches_slice() {
        let data = b"hello world";
        let mut cursor = Cursor::new(data);
        assert_eq!(sha256_reader(&mut cursor).unwrap(), sha256_hex(data));
    }

    #[test]
    fn test_short_digest_is_fixed_width_and_stable() {
        let a = short_digest("photo.jpg");
        let b = short_digest("photo.jpg");
        assert_eq!(a, b);
        assert_eq!(a.len(), SHORT_DIGEST_LEN);
        assert_ne!(a, short_digest("other.jpg"));
    }
}
