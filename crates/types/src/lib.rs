//! # Meridian Types
//!
//! Shared primitive types for the Meridian blockchain.
//!
//! Everything the consensus layer passes around lives here:
//!
//! - [`H256`] and [`Address`], the digest and account identifier newtypes
//! - [`Block`] and [`BlockHeader`], carrying the witness roster, the producer
//!   seal and the embedded finality proof
//! - [`ConsensusMessage`] and the vote types exchanged while a block is
//!   finalized
//!
//! Wire types RLP-encode for transport and serde-encode as hex strings for
//! human-facing output.
//!
//! ```rust
//! use meridian_types::{Address, BlockHeader, H256};
//!
//! let coinbase: Address = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23".parse().unwrap();
//! let parent = H256::keccak256(b"parent header");
//!
//! // The digest a producer signs excludes the signature itself
//! let header = BlockHeader::new(1, 1_700_000_000, parent, coinbase);
//! assert_ne!(header.hash(), header.seal_hash());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod address;
pub mod block;
pub mod hash;
pub mod message;

pub use address::Address;
pub use block::{Block, BlockHeader};
pub use hash::H256;
pub use message::{CommitMsg, ConsensusMessage, MessageKind, PrepareMsg, PreprepareMsg};

/// Shorthand for results carrying a types [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failures when parsing, validating or decoding the primitive types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Hex input did not parse
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// A fixed-size input had the wrong length
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Length the type requires
        expected: usize,
        /// Length the input had
        actual: usize,
    },

    /// Address input was malformed
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Digest input was malformed
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    /// A block or header broke a structural rule
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// RLP input did not decode
    #[error("rlp decode: {0}")]
    RlpDecode(#[from] rlp::DecoderError),
}
