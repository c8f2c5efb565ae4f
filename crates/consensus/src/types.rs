//! Shared building blocks of the finality protocol.
//!
//! This module provides:
//! - [`Step`] - position of a node inside one voting round
//! - [`quorum`] - the vote count that finalizes a phase
//! - [`SignatureCache`] - bounded cache of recovered block producers
//! - [`make_prepare`]/[`make_commit`] and [`prepare_voter`]/[`commit_voter`] -
//!   signing and verification of the two vote kinds

use lru::LruCache;
use meridian_crypto::{CryptoError, PrivateKey, Signature};
use meridian_types::{Address, BlockHeader, CommitMsg, PrepareMsg, H256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Number of recovered producer addresses kept in memory.
pub const IN_MEMORY_SIGNATURES: usize = 4096;

/// Position of a node inside one voting round.
///
/// A round only ever moves forward:
///
/// ```text
/// NewRound -> Preprepared -> Preparing -> Prepared -> Committing -> Committed -> Done
/// ```
///
/// Every advance goes through a compare-and-swap, so two racing handlers
/// cannot both claim the same transition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u32)]
pub enum Step {
    /// Waiting for the round's proposal
    #[default]
    NewRound = 0,
    /// Proposal accepted, about to vote
    Preprepared = 1,
    /// Own prepare vote sent, collecting prepares
    Preparing = 2,
    /// Prepare quorum reached
    Prepared = 3,
    /// Own commit vote sent, collecting commits
    Committing = 4,
    /// Commit quorum reached, block being written
    Committed = 5,
    /// Block written, round finished
    Done = 6,
}

impl Step {
    /// Returns the raw value stored in the step atomic.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parses a raw step value.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::NewRound),
            1 => Some(Self::Preprepared),
            2 => Some(Self::Preparing),
            3 => Some(Self::Prepared),
            4 => Some(Self::Committing),
            5 => Some(Self::Committed),
            6 => Some(Self::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::NewRound => "NewRound",
            Step::Preprepared => "Preprepared",
            Step::Preparing => "Preparing",
            Step::Prepared => "Prepared",
            Step::Committing => "Committing",
            Step::Committed => "Committed",
            Step::Done => "Done",
        };
        write!(f, "{}", name)
    }
}

/// Number of matching votes that finalizes a phase for `n` witnesses.
///
/// `n - (n - 1) / 3`: 3 of 4, 5 of 7, 7 of 10. Any two quorums intersect in
/// at least one honest witness as long as fewer than a third are faulty.
pub fn quorum(n: usize) -> usize {
    n - n.saturating_sub(1) / 3
}

/// Errors from signing or verifying consensus payloads.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// Signature bytes are not a 65-byte recoverable signature
    #[error("signature must be 65 bytes, got {0}")]
    MalformedSignature(usize),

    /// The signature recovers to a different address than the message claims
    #[error("recovered signer {recovered} does not match claimed voter {claimed}")]
    SignerMismatch {
        /// Address recovered from the signature
        recovered: Address,
        /// Address the message names as its voter
        claimed: Address,
    },

    /// Underlying curve operation failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Bounded cache of producer addresses recovered from header seals.
///
/// Recovery walks the secp256k1 curve and is by far the hottest operation in
/// header verification, so results are kept under an LRU keyed by the full
/// header hash. The key covers the seal itself, so a header re-sealed by a
/// different key never aliases a cached entry.
pub struct SignatureCache {
    inner: RwLock<LruCache<H256, Address>>,
}

impl SignatureCache {
    /// Creates a cache holding up to [`IN_MEMORY_SIGNATURES`] entries.
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(IN_MEMORY_SIGNATURES).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Recovers the address that sealed `header`, consulting the cache first.
    pub fn recover(&self, header: &BlockHeader) -> Result<Address, SigningError> {
        let key = header.hash();
        if let Some(signer) = self.inner.write().get(&key) {
            return Ok(*signer);
        }

        let signer = recover_signer(&header.signature, &header.seal_hash())?;
        self.inner.write().put(key, signer);
        Ok(signer)
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Checks whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds and signs a prepare vote for the given block.
pub fn make_prepare(
    key: &PrivateKey,
    voter: Address,
    round: u32,
    block_number: u64,
    block_hash: H256,
) -> Result<PrepareMsg, SigningError> {
    let mut msg = PrepareMsg::new(round, voter, block_number, block_hash);
    let signature = key.sign_prehash(msg.hash().as_fixed_bytes())?;
    msg.prepare_sig = signature.to_bytes().to_vec();
    Ok(msg)
}

/// Builds and signs a commit vote for the given block.
pub fn make_commit(
    key: &PrivateKey,
    voter: Address,
    round: u32,
    block_number: u64,
    block_hash: H256,
) -> Result<CommitMsg, SigningError> {
    let mut msg = CommitMsg::new(round, voter, block_number, block_hash);
    let signature = key.sign_prehash(msg.hash().as_fixed_bytes())?;
    msg.commit_sig = signature.to_bytes().to_vec();
    Ok(msg)
}

/// Recovers and checks the voter behind a prepare vote.
///
/// The recovered address must equal the address the vote claims; roster
/// membership is the caller's concern.
pub fn prepare_voter(msg: &PrepareMsg) -> Result<Address, SigningError> {
    let recovered = recover_signer(&msg.prepare_sig, &msg.hash())?;
    if recovered != msg.prepare_addr {
        return Err(SigningError::SignerMismatch {
            recovered,
            claimed: msg.prepare_addr,
        });
    }
    Ok(recovered)
}

/// Recovers and checks the voter behind a commit vote.
pub fn commit_voter(msg: &CommitMsg) -> Result<Address, SigningError> {
    let recovered = recover_signer(&msg.commit_sig, &msg.hash())?;
    if recovered != msg.committer {
        return Err(SigningError::SignerMismatch {
            recovered,
            claimed: msg.committer,
        });
    }
    Ok(recovered)
}

fn recover_signer(sig: &[u8], digest: &H256) -> Result<Address, SigningError> {
    let bytes: &[u8; 65] = sig
        .try_into()
        .map_err(|_| SigningError::MalformedSignature(sig.len()))?;
    let signature = Signature::from_bytes(bytes);
    let public = signature.recover_prehash(digest.as_fixed_bytes())?;
    Ok(Address::new(public.to_address()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> (PrivateKey, Address) {
        let key = PrivateKey::random();
        let address = Address::new(key.public_key().to_address());
        (key, address)
    }

    #[test]
    fn quorum_bounds() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(2), 2);
        assert_eq!(quorum(3), 3);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(7), 5);
        assert_eq!(quorum(10), 7);
    }

    #[test]
    fn step_ordering_follows_protocol() {
        assert!(Step::NewRound < Step::Preprepared);
        assert!(Step::Preparing < Step::Prepared);
        assert!(Step::Committed < Step::Done);
        assert_eq!(Step::default(), Step::NewRound);
    }

    #[test]
    fn step_raw_roundtrip() {
        for raw in 0..7 {
            let step = Step::from_u32(raw).unwrap();
            assert_eq!(step.as_u32(), raw);
        }
        assert!(Step::from_u32(7).is_none());
    }

    #[test]
    fn prepare_vote_roundtrip() {
        let (key, voter) = signer();
        let block_hash = H256::keccak256(b"candidate");

        let vote = make_prepare(&key, voter, 0, 5, block_hash).unwrap();
        assert_eq!(prepare_voter(&vote).unwrap(), voter);
    }

    #[test]
    fn commit_vote_rejects_stolen_identity() {
        let (key, _) = signer();
        let (_, other) = signer();
        let block_hash = H256::keccak256(b"candidate");

        // Signed by `key` but claiming to come from `other`.
        let mut vote = CommitMsg::new(0, other, 5, block_hash);
        let signature = key.sign_prehash(vote.hash().as_fixed_bytes()).unwrap();
        vote.commit_sig = signature.to_bytes().to_vec();

        assert!(matches!(
            commit_voter(&vote),
            Err(SigningError::SignerMismatch { .. })
        ));
    }

    #[test]
    fn vote_rejects_tampered_payload() {
        let (key, voter) = signer();
        let mut vote = make_prepare(&key, voter, 0, 5, H256::keccak256(b"a")).unwrap();
        vote.block_hash = H256::keccak256(b"b");

        // Digest changed, so recovery yields some unrelated address.
        assert!(prepare_voter(&vote).is_err());
    }

    #[test]
    fn signature_cache_recovers_and_caches() {
        let (key, address) = signer();
        let mut header = BlockHeader::new(3, 1_700_000_000, H256::keccak256(b"parent"), address);
        let seal = key.sign_prehash(header.seal_hash().as_fixed_bytes()).unwrap();
        header.signature = seal.to_bytes().to_vec();

        let cache = SignatureCache::new();
        assert_eq!(cache.recover(&header).unwrap(), address);
        assert_eq!(cache.len(), 1);
        // Second lookup is served from the cache.
        assert_eq!(cache.recover(&header).unwrap(), address);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn signature_cache_rejects_unsealed_header() {
        let header = BlockHeader::new(3, 1_700_000_000, H256::NIL, Address::ZERO);
        let cache = SignatureCache::new();
        assert!(matches!(
            cache.recover(&header),
            Err(SigningError::MalformedSignature(0))
        ));
    }
}
