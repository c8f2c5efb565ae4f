//! Keccak256, the digest primitive behind addresses and seals.
//!
//! Everything this crate signs or recovers is a 32-byte Keccak256 digest:
//! address derivation hashes the public key, and the signing APIs take
//! prehashed input produced by this function.

use sha3::{Digest, Keccak256};

/// Hashes `data` with Keccak256 into a 32-byte array.
///
/// ```rust
/// use meridian_crypto::keccak256;
///
/// let digest = keccak256(b"seal input");
/// assert_eq!(digest.len(), 32);
/// ```
#[inline]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}
