//! Correlation tokens and shared-secret helpers.
//!
//! An rtoken is 16 random bytes rendered as 32 lowercase hex characters.

use rand::RngCore;
use subtle::ConstantTimeEq;

/// Generate a fresh correlation token.
pub fn generate_rtoken() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a random shared secret (32 bytes, hex-encoded).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compare a claimed secret against the configured one in constant time.
pub fn secrets_match(expected: &str, claimed: &str) -> bool {
    expected.as_bytes().ct_eq(claimed.as_bytes()).into()
}
