//! Cryptography for Meridian consensus.
//!
//! Two primitives cover everything the node signs or checks: Keccak256
//! digests ([`keccak256`]) and recoverable secp256k1 signatures over those
//! digests ([`ecdsa`]). Producers seal headers with them, voters sign their
//! prepare and commit messages with them, and verifiers recover the signer
//! address instead of carrying public keys around.
//!
//! ```rust
//! use meridian_crypto::{keccak256, PrivateKey};
//!
//! let key = PrivateKey::random();
//! let digest = keccak256(b"hello world");
//!
//! let signature = key.sign_prehash(&digest).unwrap();
//! let signer = signature.recover_prehash(&digest).unwrap();
//! assert_eq!(signer.to_address(), key.public_key().to_address());
//! ```

pub mod ecdsa;
pub mod hash;

pub use ecdsa::{Address, PrivateKey, PublicKey, Signature};
pub use hash::keccak256;

/// Failures across key handling, signing and recovery.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Private key bytes outside the curve order
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Public key bytes that are not a curve point
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Signature bytes that do not form valid scalars
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Signer recovery did not produce a key
    #[error("signer recovery failed: {0}")]
    RecoveryFailed(String),

    /// Input of the wrong size for a fixed-width value
    #[error("wrong input length: want {expected} bytes, got {actual}")]
    InvalidLength {
        /// Width the value requires
        expected: usize,
        /// Width the input had
        actual: usize,
    },

    /// Hex input did not decode
    #[error("hex decode failed: {0}")]
    HexError(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::HexError(e.to_string())
    }
}

/// Shorthand for results carrying a [`CryptoError`].
pub type Result<T> = std::result::Result<T, CryptoError>;
