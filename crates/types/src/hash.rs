//! The 32-byte Keccak256 digest type.
//!
//! [`H256`] is the identity currency of the chain: block hashes, signing
//! digests, vote digests, and the header roots are all values of this type.
//! A block's parent pointer uses [`H256::NIL`] at genesis, and unset roots
//! stay NIL until they are filled in.

use crate::{Error, Result};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Width of a digest in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte Keccak256 digest.
///
/// ```rust
/// use meridian_types::H256;
///
/// let digest = H256::keccak256(b"header bytes");
/// assert!(!digest.is_nil());
///
/// let parsed: H256 = "0x8f0a63c9d1a2be44b8d0cd7e56155a3ef7f7e1c00d3c2a9a4b61f0d9ce2f7a15"
///     .parse()
///     .unwrap();
/// assert_eq!(parsed.to_hex().len(), 66);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct H256([u8; HASH_SIZE]);

impl H256 {
    /// The all-zero digest. Marks the genesis parent pointer and unset roots.
    pub const NIL: Self = Self([0u8; HASH_SIZE]);

    /// Wraps a 32-byte array.
    #[inline]
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copies a digest out of a slice, rejecting any length but 32.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; HASH_SIZE] = slice.try_into().map_err(|_| Error::InvalidLength {
            expected: HASH_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Parses a 64-character hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if digits.len() != 2 * HASH_SIZE {
            return Err(Error::InvalidHash(format!(
                "expected {} hex characters, got {}",
                2 * HASH_SIZE,
                digits.len()
            )));
        }

        Self::from_slice(&hex::decode(digits)?)
    }

    /// Hashes `data` with Keccak256.
    pub fn keccak256(data: &[u8]) -> Self {
        Self(Keccak256::digest(data).into())
    }

    /// Hashes several slices as if they were one contiguous buffer.
    ///
    /// `keccak256_concat(&[a, b])` equals `keccak256` of `a` followed by `b`
    /// without the intermediate allocation.
    pub fn keccak256_concat(data: &[&[u8]]) -> Self {
        let mut hasher = Keccak256::new();
        for slice in data {
            hasher.update(slice);
        }
        Self(hasher.finalize().into())
    }

    /// The digest as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The digest as a fixed-size array reference.
    #[inline]
    pub const fn as_fixed_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Lowercase hex with a `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// True for the all-zero digest.
    #[inline]
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl From<[u8; HASH_SIZE]> for H256 {
    fn from(raw: [u8; HASH_SIZE]) -> Self {
        Self(raw)
    }
}

impl From<H256> for [u8; HASH_SIZE] {
    fn from(h: H256) -> Self {
        h.0
    }
}

impl AsRef<[u8]> for H256 {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({})", self.to_hex())
    }
}

impl fmt::LowerHex for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        if f.alternate() {
            write!(f, "0x{}", hex)
        } else {
            f.write_str(&hex)
        }
    }
}

// Digests travel as hex strings in JSON and as raw values in RLP.

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Encodable for H256 {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder().encode_value(&self.0);
    }
}

impl Decodable for H256 {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        rlp.decoder().decode_value(|bytes| {
            let arr: [u8; HASH_SIZE] = bytes
                .try_into()
                .map_err(|_| DecoderError::RlpInvalidLength)?;
            Ok(Self(arr))
        })
    }
}
