use crate::Hash32;
use sha2::{Digest, Sha256};

/// Compute a deterministic SHA-256 hash of a byte slice.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash32(bytes)
}

/// Compute a domain-separated SHA-256 hash: `H(domain || data)`.
pub fn sha256_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash32(bytes)
}

// =============================================================================
// Domain separation (v1)
// =============================================================================

/// Domain separation tag for hashing canonical ledger state preimages.
pub const STATE_HASH_DOMAIN_V1: &[u8] = b"BOOSTLEDGER_STATE_HASH_V1";

/// Domain separation tag for deriving account ids from human labels.
pub const ACCOUNT_LABEL_DOMAIN_V1: &[u8] = b"BOOSTLEDGER_ACCOUNT_LABEL_V1";

/// Hash canonical v1 state preimage bytes into a commitment.
pub fn hash_state_preimage_v1(state_preimage: &[u8]) -> Hash32 {
    sha256_domain(STATE_HASH_DOMAIN_V1, state_preimage)
}
