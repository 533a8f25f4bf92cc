// Shared helpers for the DID registry contracts on CosmWasm

use cosmwasm_schema::cw_serde;
use cosmwasm_std::Env;
use sha2::{Digest, Sha256};

/// Deterministic "now" and provenance for the message being applied.
///
/// Everything here is derived from the block header the VM hands the
/// contract, so every replica computes the same values.
#[cw_serde]
pub struct BlockContext {
    /// Block time in seconds
    pub now: u64,
    pub height: u64,
    pub chain_id: String,
    /// Hex SHA-256 of `{chain_id}/{height}/{tx_index}`
    pub tx_hash: String,
}

impl BlockContext {
    pub fn from_env(env: &Env) -> Self {
        let tx_index = env.transaction.as_ref().map(|tx| tx.index).unwrap_or(0);
        BlockContext {
            now: env.block.time.seconds(),
            height: env.block.height,
            chain_id: env.block.chain_id.clone(),
            tx_hash: tx_hash(&env.block.chain_id, env.block.height, tx_index),
        }
    }
}

/// Synthetic transaction hash. The VM does not expose the real one.
pub fn tx_hash(chain_id: &str, height: u64, tx_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}/{}/{}", chain_id, height, tx_index).as_bytes());
    hex::encode(hasher.finalize())
}

// Common helper functions

/// Strict majority of `active` members: floor(n/2) + 1
pub fn majority_threshold(active: u64) -> u64 {
    active / 2 + 1
}

/// A deadline has passed once the current time is strictly after it
pub fn is_expired(current_time: u64, expires_at: u64) -> bool {
    current_time > expires_at
}

/// `did:<method>:<identifier>` with a lowercase alphanumeric method
pub fn is_valid_did_format(did: &str) -> bool {
    let mut parts = did.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("did"), Some(method), Some(identifier)) => {
            !method.is_empty()
                && method
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                && !identifier.is_empty()
                && !identifier.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmwasm_std::testing::mock_env;

    #[test]
    fn test_majority_threshold() {
        assert_eq!(majority_threshold(1), 1);
        assert_eq!(majority_threshold(2), 2);
        assert_eq!(majority_threshold(3), 2);
        assert_eq!(majority_threshold(4), 3);
        assert_eq!(majority_threshold(5), 3);
    }

    #[test]
    fn test_is_expired() {
        assert!(is_expired(101, 100));
        assert!(!is_expired(100, 100)); // deadline itself is still open
        assert!(!is_expired(50, 100));
    }

    #[test]
    fn test_did_format() {
        assert!(is_valid_did_format("did:persona:abc"));
        assert!(is_valid_did_format("did:web:example.com:user:alice"));
        assert!(!is_valid_did_format("did:persona:"));
        assert!(!is_valid_did_format("did::abc"));
        assert!(!is_valid_did_format("did:Persona:abc"));
        assert!(!is_valid_did_format("persona:abc"));
        assert!(!is_valid_did_format(""));
    }

    #[test]
    fn block_context_is_deterministic() {
        let env = mock_env();
        let a = BlockContext::from_env(&env);
        let b = BlockContext::from_env(&env);
        assert_eq!(a, b);
        assert_eq!(a.now, env.block.time.seconds());
        assert_eq!(a.tx_hash.len(), 64);

        let mut next = mock_env();
        next.block.height += 1;
        assert_ne!(a.tx_hash, BlockContext::from_env(&next).tx_hash);
    }
}
