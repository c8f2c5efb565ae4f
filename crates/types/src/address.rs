//! The 20-byte account address type.
//!
//! Witnesses, block producers, and reward recipients are all identified by
//! an [`Address`]. The wire form is the raw 20 bytes; the human form is
//! 40 hex characters behind a `0x` prefix, mixed-cased per EIP-55 when
//! displayed.

use crate::{Error, Result};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Width of an address in bytes.
pub const ADDRESS_SIZE: usize = 20;

/// A 20-byte account address.
///
/// ```rust
/// use meridian_types::Address;
///
/// let addr: Address = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23".parse().unwrap();
/// assert_ne!(addr, Address::ZERO);
///
/// let raw: [u8; 20] = addr.into();
/// assert_eq!(Address::new(raw), addr);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Self = Self([0u8; ADDRESS_SIZE]);

    /// Wraps a 20-byte array.
    #[inline]
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copies an address out of a slice, rejecting any length but 20.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; ADDRESS_SIZE] = slice.try_into().map_err(|_| Error::InvalidLength {
            expected: ADDRESS_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Parses a 40-character hex string, with or without a `0x` prefix.
    ///
    /// Checksum casing is accepted but not enforced.
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if digits.len() != 2 * ADDRESS_SIZE {
            return Err(Error::InvalidAddress(format!(
                "expected {} hex characters, got {}",
                2 * ADDRESS_SIZE,
                digits.len()
            )));
        }

        Self::from_slice(&hex::decode(digits)?)
    }

    /// The address as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The address as a fixed-size array reference.
    #[inline]
    pub const fn as_fixed_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// The EIP-55 mixed-case hex encoding with a `0x` prefix.
    ///
    /// A hex letter is uppercased when the matching nibble of
    /// `keccak256(lowercase_hex)` is 8 or above. Digits pass through.
    pub fn to_checksum_string(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(2 + 2 * ADDRESS_SIZE);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
            if nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl From<[u8; ADDRESS_SIZE]> for Address {
    fn from(raw: [u8; ADDRESS_SIZE]) -> Self {
        Self(raw)
    }
}

impl From<Address> for [u8; ADDRESS_SIZE] {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum_string())
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        if f.alternate() {
            write!(f, "0x{}", hex)
        } else {
            f.write_str(&hex)
        }
    }
}

// Addresses travel as checksummed hex in JSON and as raw values in RLP.

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Encodable for Address {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder().encode_value(&self.0);
    }
}

impl Decodable for Address {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        rlp.decoder().decode_value(|bytes| {
            let arr: [u8; ADDRESS_SIZE] = bytes
                .try_into()
                .map_err(|_| DecoderError::RlpInvalidLength)?;
            Ok(Self(arr))
        })
    }
}
