//! Recoverable secp256k1 signatures.
//!
//! Block seals and consensus votes are ECDSA signatures over 32-byte
//! Keccak256 digests. Signatures carry a recovery id, so verification
//! usually runs backwards: recover the signer from `(digest, signature)`
//! and compare addresses instead of keeping public keys around.
//!
//! ```rust
//! use meridian_crypto::{keccak256, PrivateKey};
//!
//! let key = PrivateKey::random();
//! let digest = keccak256(b"seal input");
//!
//! let sig = key.sign_prehash(&digest).unwrap();
//! let recovered = sig.recover_prehash(&digest).unwrap();
//! assert_eq!(recovered.to_address(), key.public_key().to_address());
//! ```

use crate::{keccak256, CryptoError, Result};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

/// Raw 20-byte account address.
pub type Address = [u8; 20];

/// A secp256k1 signing key.
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generates a fresh key from the OS entropy source.
    pub fn random() -> Self {
        Self {
            inner: SigningKey::random(&mut OsRng),
        }
    }

    /// Builds a key from its 32 raw bytes.
    ///
    /// Fails when the bytes fall outside the curve order.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Builds a key from a 64-character hex string, `0x` prefix optional.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex.strip_prefix("0x").unwrap_or(hex))?;
        let scalar: [u8; 32] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    expected: 32,
                    actual: bytes.len(),
                })?;
        Self::from_bytes(&scalar)
    }

    /// The raw secret bytes. Handle with care.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes().into()
    }

    /// The secret bytes as lowercase hex, no prefix. Handle with care.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// The matching verifying key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Hashes `data` with Keccak256 and signs the digest.
    pub fn sign(&self, data: &[u8]) -> Result<Signature> {
        self.sign_prehash(&keccak256(data))
    }

    /// Signs a 32-byte digest, producing a signature with recovery id.
    pub fn sign_prehash(&self, hash: &[u8; 32]) -> Result<Signature> {
        let (sig, recovery) = self
            .inner
            .sign_prehash_recoverable(hash)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Ok(Signature::from_scalars(&sig, recovery.to_byte()))
    }
}

// Debug must never leak the secret; show the public half instead.
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey(pubkey {})", self.public_key().to_hex())
    }
}

/// A secp256k1 verifying key.
///
/// Accepted and produced in both SEC1 encodings: 33-byte compressed and
/// 64-byte uncompressed (the `0x04` prefix stripped).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    fn from_sec1(bytes: &[u8]) -> Result<Self> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Parses the 64-byte uncompressed form (x then y, no prefix byte).
    pub fn from_uncompressed(bytes: &[u8; 64]) -> Result<Self> {
        let mut sec1 = [0u8; 65];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(bytes);
        Self::from_sec1(&sec1)
    }

    /// Parses the 33-byte compressed form.
    pub fn from_compressed(bytes: &[u8; 33]) -> Result<Self> {
        Self::from_sec1(bytes)
    }

    /// Parses a hex-encoded SEC1 key in either form, `0x` prefix optional.
    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::from_sec1(&hex::decode(hex.strip_prefix("0x").unwrap_or(hex))?)
    }

    /// The 64-byte uncompressed encoding, prefix stripped.
    pub fn to_uncompressed(&self) -> [u8; 64] {
        let point = self.inner.to_encoded_point(false);
        let mut xy = [0u8; 64];
        xy.copy_from_slice(&point.as_bytes()[1..]);
        xy
    }

    /// The 33-byte compressed encoding.
    pub fn to_compressed(&self) -> [u8; 33] {
        let point = self.inner.to_encoded_point(true);
        let mut sec1 = [0u8; 33];
        sec1.copy_from_slice(point.as_bytes());
        sec1
    }

    /// The compressed encoding as lowercase hex, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_compressed())
    }

    /// Derives the account address: the trailing 20 bytes of
    /// `keccak256(uncompressed_key)`.
    pub fn to_address(&self) -> Address {
        address_from_pubkey(&self.to_uncompressed())
    }

    /// The address as `0x`-prefixed hex.
    pub fn to_address_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_address()))
    }

    /// Checks a signature over a 32-byte digest.
    ///
    /// Malformed signature bytes are an error; a well-formed signature by
    /// someone else is `Ok(false)`.
    pub fn verify_prehash(&self, hash: &[u8; 32], signature: &Signature) -> Result<bool> {
        use k256::ecdsa::signature::hazmat::PrehashVerifier;

        let sig = signature.rs()?;
        Ok(self.inner.verify_prehash(hash, &sig).is_ok())
    }

    /// Hashes `data` with Keccak256 and checks the signature over it.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> Result<bool> {
        self.verify_prehash(&keccak256(data), signature)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({} at {})", self.to_hex(), self.to_address_hex())
    }
}

// Compressed SEC1 bytes on the wire, hex in human-readable formats.

impl serde::Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let sec1 = self.to_compressed();
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(sec1))
        } else {
            serializer.serialize_bytes(&sec1)
        }
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        if deserializer.is_human_readable() {
            let hex_str: String = serde::Deserialize::deserialize(deserializer)?;
            Self::from_hex(&hex_str).map_err(D::Error::custom)
        } else {
            let sec1: Vec<u8> = serde::Deserialize::deserialize(deserializer)?;
            Self::from_sec1(&sec1).map_err(D::Error::custom)
        }
    }
}

/// An ECDSA signature in `(r, s, v)` form.
///
/// `v` is the recovery id. It is stored normalized (0 or 1) when produced
/// by this crate; the legacy 27/28 convention is accepted on input.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// The r scalar.
    pub r: [u8; 32],
    /// The s scalar.
    pub s: [u8; 32],
    /// Recovery id.
    pub v: u8,
}

impl Signature {
    /// Assembles a signature from its components.
    pub fn new(r: [u8; 32], s: [u8; 32], v: u8) -> Self {
        Self { r, s, v }
    }

    fn from_scalars(sig: &K256Signature, v: u8) -> Self {
        Self {
            r: sig.r().to_bytes().into(),
            s: sig.s().to_bytes().into(),
            v,
        }
    }

    /// Splits the 65-byte wire form `r || s || v`.
    pub fn from_bytes(bytes: &[u8; 65]) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Self { r, s, v: bytes[64] }
    }

    /// Parses the 130-character hex wire form, `0x` prefix optional.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex.strip_prefix("0x").unwrap_or(hex))?;
        let wire: [u8; 65] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    expected: 65,
                    actual: bytes.len(),
                })?;
        Ok(Self::from_bytes(&wire))
    }

    /// The 65-byte wire form `r || s || v`.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut wire = [0u8; 65];
        wire[..32].copy_from_slice(&self.r);
        wire[32..64].copy_from_slice(&self.s);
        wire[64] = self.v;
        wire
    }

    /// The wire form as lowercase hex, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// The recovery id in the legacy 27/28 convention.
    pub fn v_legacy(&self) -> u8 {
        if self.v >= 27 {
            self.v
        } else {
            self.v + 27
        }
    }

    /// The recovery id normalized to 0 or 1.
    pub fn v_normalized(&self) -> u8 {
        if self.v >= 27 {
            self.v - 27
        } else {
            self.v
        }
    }

    fn rs(&self) -> Result<K256Signature> {
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        K256Signature::from_slice(&compact)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }

    /// Recovers the signer of a 32-byte digest.
    pub fn recover_prehash(&self, hash: &[u8; 32]) -> Result<PublicKey> {
        let recovery = RecoveryId::from_byte(self.v_normalized())
            .ok_or_else(|| CryptoError::RecoveryFailed("recovery id out of range".to_string()))?;
        let inner = VerifyingKey::recover_from_prehash(hash, &self.rs()?, recovery)
            .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))?;
        Ok(PublicKey { inner })
    }

    /// Checks this signature over a 32-byte digest.
    pub fn verify_prehash(&self, hash: &[u8; 32], public_key: &PublicKey) -> Result<bool> {
        public_key.verify_prehash(hash, self)
    }

    /// Hashes `data` with Keccak256 and checks this signature over it.
    pub fn verify(&self, data: &[u8], public_key: &PublicKey) -> Result<bool> {
        public_key.verify(data, self)
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(0x{}, v={})", self.to_hex(), self.v)
    }
}

/// Derives the account address for a 64-byte uncompressed public key.
///
/// The address is the trailing 20 bytes of the key's Keccak256 digest.
pub fn address_from_pubkey(uncompressed: &[u8; 64]) -> Address {
    let digest = keccak256(uncompressed);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}
