//! Advisory content digest
//!
//! A cheap fingerprint of a bounded prefix of each message, used to screen
//! for duplicates. Identical prefixes always produce identical digests; two
//! different messages sharing their first [`DIGEST_PREFIX_LEN`] bytes collide
//! by construction, so a digest match is a candidate, never a proof.
//!
//! The function is part of the on-disk format: changing it requires bumping
//! the index format version.

use sha2::{Digest, Sha256};

/// Bytes of message content covered by the digest
pub const DIGEST_PREFIX_LEN: usize = 512;

/// Name recorded alongside persisted indexes
pub const DIGEST_ALGORITHM: &str = "sha256-prefix512-be64";

/// Digest of the envelope-stripped message content
pub fn content_digest(content: &[u8]) -> u64 {
    let sample = &content[..content.len().min(DIGEST_PREFIX_LEN)];
    let hash = Sha256::digest(sample);

    let mut head = [0u8; 8];
    head.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let content = b"Subject: hello\n\nbody";
        assert_eq!(content_digest(content), content_digest(content));
        assert_ne!(content_digest(content), content_digest(b"Subject: other\n\nbody"));
    }

    #[test]
    fn test_digest_ignores_bytes_past_prefix() {
        let mut a = vec![b'x'; DIGEST_PREFIX_LEN];
        let mut b = a.clone();
        a.extend_from_slice(b"tail one");
        b.extend_from_slice(b"completely different tail");
        assert_eq!(content_digest(&a), content_digest(&b));
    }

    #[test]
    fn test_digest_of_empty_content() {
        // SHA-256 of the empty string starts with e3b0c44298fc1c14
        assert_eq!(content_digest(b""), 0xe3b0_c442_98fc_1c14);
    }
}
