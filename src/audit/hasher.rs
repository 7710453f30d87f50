//! Hash functions for the audit chain.

use sha2::{Digest, Sha256};

/// Computes `H(previous_hash ‖ payload)` for one chain link.
pub trait ChainHasher: Send + Sync {
    /// Short algorithm name, recorded in logs.
    fn algorithm(&self) -> &'static str;

    /// Lowercase hex digest of the previous hash followed by the payload.
    fn chain_hash(&self, previous_hash: &str, payload: &[u8]) -> String;
}

/// SHA-256, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ChainHasher for Sha256Hasher {
    fn algorithm(&self) -> &'static str {
        "sha256"
    }

    fn chain_hash(&self, previous_hash: &str, payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous_hash.as_bytes());
        hasher.update(payload);
        hex::encode(hasher.finalize())
    }
}
