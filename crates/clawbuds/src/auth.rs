//! Authentication envelope.
//!
//! Every mutating call carries `X-Claw-Id`, `X-Claw-Timestamp` and
//! `X-Claw-Signature`. The signature covers
//! `METHOD|PATH|TIMESTAMP|sha256(body)` with the claw's Ed25519 key. The
//! HTTP surface itself lives outside the core; this module pins the
//! envelope shape, the canonical signing string, the skew rule and the
//! verifier seam.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::clock::SharedClock;
use crate::error::{CoreError, Result};

/// Maximum accepted clock skew in milliseconds, in either direction.
const MAX_SKEW_MS: i64 = 5 * 60 * 1000;

/// Parsed authentication headers of one request.
#[derive(Debug, Clone)]
pub struct AuthEnvelope {
    pub claw_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Hex-encoded Ed25519 signature.
    pub signature: String,
}

impl AuthEnvelope {
    /// Canonical string the signature covers.
    pub fn signing_string(method: &str, path: &str, timestamp_ms: i64, body: &[u8]) -> String {
        let digest = hex::encode(Sha256::digest(body));
        format!("{}|{}|{}|{}", method.to_uppercase(), path, timestamp_ms, digest)
    }

    /// Reject timestamps skewed beyond the window.
    pub fn check_skew(&self, clock: &SharedClock) -> Result<()> {
        let skew = (clock.now_millis() - self.timestamp_ms).abs();
        if skew > MAX_SKEW_MS {
            return Err(CoreError::Forbidden(format!(
                "timestamp skewed by {skew} ms"
            )));
        }
        Ok(())
    }
}

/// Signature verification seam; the boundary maps failures to HTTP 401.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature_hex` over `message` with the hex-encoded public
    /// key stored on the claw.
    fn verify(&self, public_key_hex: &str, message: &str, signature_hex: &str) -> Result<()>;
}

/// Ed25519 verifier over the claw's stored public key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key_hex: &str, message: &str, signature_hex: &str) -> Result<()> {
        let key_bytes: [u8; 32] = hex::decode(public_key_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| CoreError::Validation("malformed public key".into()))?;
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CoreError::Validation(format!("invalid public key: {e}")))?;
        let sig_bytes: [u8; 64] = hex::decode(signature_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| CoreError::Validation("malformed signature".into()))?;
        let signature = Signature::from_bytes(&sig_bytes);
        key.verify(message.as_bytes(), &signature)
            .map_err(|_| CoreError::Forbidden("signature verification failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn signing_string_is_canonical() {
        let s = AuthEnvelope::signing_string("post", "/v1/messages", 1_700_000_000_000, b"{}");
        assert!(s.starts_with("POST|/v1/messages|1700000000000|"));
        // Same inputs, same string.
        assert_eq!(
            s,
            AuthEnvelope::signing_string("POST", "/v1/messages", 1_700_000_000_000, b"{}")
        );
    }

    #[test]
    fn ed25519_round_trip_verifies() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let public_key_hex = hex::encode(signing_key.verifying_key().to_bytes());
        let message = AuthEnvelope::signing_string("POST", "/v1/pearls", 1_700_000_000_000, b"{}");
        let signature_hex = hex::encode(signing_key.sign(message.as_bytes()).to_bytes());

        let verifier = Ed25519Verifier;
        assert!(verifier.verify(&public_key_hex, &message, &signature_hex).is_ok());
        assert!(verifier.verify(&public_key_hex, "tampered", &signature_hex).is_err());
    }
}
