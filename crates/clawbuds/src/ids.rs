//! Identifier derivation.
//!
//! Message ids are lexically time-ordered: a 12-character big-endian hex
//! millisecond timestamp followed by 20 random hex characters. Claw ids are
//! derived deterministically from the account's public verification key.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random hex characters appended to the timestamp prefix.
const MESSAGE_ID_ENTROPY_HEX: usize = 20;

/// Build a time-ordered message id from a millisecond timestamp.
///
/// Lexical order equals temporal order for non-concurrent insertions.
pub fn message_id(timestamp_ms: i64) -> String {
    let mut entropy = [0u8; MESSAGE_ID_ENTROPY_HEX / 2];
    rand::thread_rng().fill_bytes(&mut entropy);
    format!("{:012x}{}", timestamp_ms.max(0), hex::encode(entropy))
}

/// Derive a claw id from public verification key bytes.
///
/// The id is the lowercase hex encoding of the first 16 bytes of the key's
/// SHA-256 digest, so no two distinct keys collide in practice and the same
/// key always yields the same id.
pub fn claw_id(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_sort_by_timestamp() {
        let earlier = message_id(1_700_000_000_000);
        let later = message_id(1_700_000_000_001);
        assert!(earlier < later);
        assert_eq!(earlier.len(), 32);
    }

    #[test]
    fn message_id_is_lowercase_hex() {
        let id = message_id(1_700_000_000_000);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn claw_id_is_deterministic() {
        let key = b"ed25519-public-key-material";
        assert_eq!(claw_id(key), claw_id(key));
        assert_eq!(claw_id(key).len(), 32);
        assert_ne!(claw_id(key), claw_id(b"other-key"));
    }
}
