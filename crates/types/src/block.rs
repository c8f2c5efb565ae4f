//! Blocks and their headers.
//!
//! [`BlockHeader`] carries the chain position, the witness roster and the
//! producer seal; [`Block`] pairs a header with its opaque transaction
//! payloads.
//!
//! A header has two distinct digests. [`BlockHeader::seal_hash`] covers every
//! field except the producer signature and the commit votes; it is what the
//! producer signs. [`BlockHeader::hash`] additionally covers the signature and
//! identifies the sealed block on the wire and in storage. Commit votes are
//! attached after finalization and never enter either digest.

use crate::message::CommitMsg;
use crate::{Address, Error, Result, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Gas limit a freshly constructed header starts with.
pub const DEFAULT_GAS_LIMIT: u64 = 30_000_000;

/// Metadata of a single block.
///
/// Besides the usual position and state commitments, the header carries the
/// witness roster in force for this block, the refresh stamp in `extra`, the
/// producer signature, and once finalized the commit votes that prove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Parent block digest, NIL at genesis
    pub parent_hash: H256,
    /// Address of the witness that produced this block
    pub coinbase: Address,
    /// Root of the world state after this block executed
    pub state_root: H256,
    /// Root over this block's transaction payloads
    pub tx_root: H256,
    /// Root over the transaction receipts
    pub receipt_root: H256,
    /// Block difficulty; always 1 under witness rotation
    pub difficulty: u64,
    /// Block number (0-indexed, genesis is number 0)
    pub number: u64,
    /// Gas ceiling for this block
    pub gas_limit: u64,
    /// Gas spent by this block's transactions
    pub gas_used: u64,
    /// Unix timestamp in seconds; always a period-aligned slot boundary
    pub time: u64,
    /// When the roster was refreshed at this block: the refresh timestamp as
    /// 8 big-endian bytes. Otherwise a copy of the parent's value.
    #[serde(with = "hex_bytes")]
    pub extra: Vec<u8>,
    /// The witness roster active for this block, in election order
    pub witnesses: Vec<Address>,
    /// Producer signature over [`Self::seal_hash`] (empty until sealed)
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    /// Commit votes proving finalization (attached after quorum)
    pub commit_votes: Vec<CommitMsg>,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            parent_hash: H256::NIL,
            coinbase: Address::ZERO,
            state_root: H256::NIL,
            tx_root: H256::NIL,
            receipt_root: H256::NIL,
            difficulty: 1,
            number: 0,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_used: 0,
            time: 0,
            extra: Vec::new(),
            witnesses: Vec::new(),
            signature: Vec::new(),
            commit_votes: Vec::new(),
        }
    }
}

impl BlockHeader {
    /// Starts a header at a chain position, leaving everything else default.
    pub fn new(number: u64, time: u64, parent_hash: H256, coinbase: Address) -> Self {
        Self {
            number,
            time,
            parent_hash,
            coinbase,
            ..Default::default()
        }
    }

    /// Appends the fields covered by the producer signature, in canonical order.
    fn append_seal_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.parent_hash);
        stream.append(&self.coinbase);
        stream.append(&self.state_root);
        stream.append(&self.tx_root);
        stream.append(&self.receipt_root);
        stream.append(&self.difficulty);
        stream.append(&self.number);
        stream.append(&self.gas_limit);
        stream.append(&self.gas_used);
        stream.append(&self.time);
        stream.append(&self.extra);
        stream.append_list(&self.witnesses);
    }

    /// Computes the hash identifying this header.
    ///
    /// Covers the signature but not the commit votes, so the identity of a
    /// sealed block is stable whether or not its finality proof is attached.
    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(13);
        self.append_seal_fields(&mut stream);
        stream.append(&self.signature);
        H256::keccak256(&stream.out())
    }

    /// Computes the digest the producer signs.
    ///
    /// Excludes both the signature and the commit votes.
    pub fn seal_hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(12);
        self.append_seal_fields(&mut stream);
        H256::keccak256(&stream.out())
    }

    /// RLP encodes the full header, including signature and commit votes.
    pub fn rlp_encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Decodes a header produced by [`Self::rlp_encode`].
    pub fn rlp_decode(data: &[u8]) -> Result<Self> {
        Self::decode(&Rlp::new(data)).map_err(Error::RlpDecode)
    }

    /// Checks the structural rules every header must satisfy regardless of
    /// chain context.
    pub fn validate_basic(&self) -> Result<()> {
        if self.number > 0 && self.parent_hash.is_nil() {
            return Err(Error::InvalidBlock(format!(
                "block {} has a nil parent hash",
                self.number
            )));
        }

        if self.gas_used > self.gas_limit {
            return Err(Error::InvalidBlock(format!(
                "gas used {} above gas limit {}",
                self.gas_used, self.gas_limit
            )));
        }

        if self.number > 0 && self.time == 0 {
            return Err(Error::InvalidBlock(format!(
                "block {} has a zero timestamp",
                self.number
            )));
        }

        Ok(())
    }

    /// The number 0 header, carrying the bootstrap witness roster.
    pub fn genesis(time: u64, witnesses: Vec<Address>) -> Self {
        Self {
            time,
            witnesses,
            ..Default::default()
        }
    }

    /// Fills in the three state commitment roots.
    pub fn with_roots(mut self, tx_root: H256, state_root: H256, receipt_root: H256) -> Self {
        self.tx_root = tx_root;
        self.state_root = state_root;
        self.receipt_root = receipt_root;
        self
    }

    /// Fills in the gas accounting fields.
    pub fn with_gas(mut self, gas_limit: u64, gas_used: u64) -> Self {
        self.gas_limit = gas_limit;
        self.gas_used = gas_used;
        self
    }

    /// Replaces the witness roster.
    pub fn with_witnesses(mut self, witnesses: Vec<Address>) -> Self {
        self.witnesses = witnesses;
        self
    }

    /// Replaces the extra payload.
    pub fn with_extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = extra;
        self
    }

    /// Attaches a producer signature.
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    /// True once a producer signature is attached.
    pub fn is_sealed(&self) -> bool {
        !self.signature.is_empty()
    }
}

impl Encodable for BlockHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(14);
        self.append_seal_fields(s);
        s.append(&self.signature);
        s.append_list(&self.commit_votes);
    }
}

impl Decodable for BlockHeader {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 14 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        Ok(Self {
            parent_hash: rlp.val_at(0)?,
            coinbase: rlp.val_at(1)?,
            state_root: rlp.val_at(2)?,
            tx_root: rlp.val_at(3)?,
            receipt_root: rlp.val_at(4)?,
            difficulty: rlp.val_at(5)?,
            number: rlp.val_at(6)?,
            gas_limit: rlp.val_at(7)?,
            gas_used: rlp.val_at(8)?,
            time: rlp.val_at(9)?,
            extra: rlp.val_at(10)?,
            witnesses: rlp.list_at(11)?,
            signature: rlp.val_at(12)?,
            commit_votes: rlp.list_at(13)?,
        })
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "header #{} {} (parent {}, coinbase {})",
            self.number,
            self.hash(),
            self.parent_hash,
            self.coinbase
        )
    }
}

/// A header together with its transaction payloads.
///
/// Transactions are opaque to the consensus layer; each entry is the RLP
/// encoding of one transaction as produced by the execution layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    /// Header of this block
    pub header: BlockHeader,
    /// RLP-encoded transactions, one entry per transaction
    #[serde(with = "hex_bytes_vec")]
    pub transactions: Vec<Vec<u8>>,
}

impl Block {
    /// Builds a block from a header and its payloads.
    pub fn new(header: BlockHeader, transactions: Vec<Vec<u8>>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Builds a block carrying no transactions.
    pub fn empty(header: BlockHeader) -> Self {
        Self::new(header, Vec::new())
    }

    /// The header hash, which identifies the block.
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Shortcut for `header.number`.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Shortcut for `header.parent_hash`.
    pub fn parent_hash(&self) -> H256 {
        self.header.parent_hash
    }

    /// How many transactions the block carries.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// True when the block carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Computes the transactions root over the payload hashes.
    ///
    /// Hashes the concatenation of the per-payload Keccak256 digests rather
    /// than building a real Merkle tree. Order sensitive by construction.
    pub fn compute_transactions_root(&self) -> H256 {
        if self.transactions.is_empty() {
            return H256::NIL;
        }

        let mut hasher = Keccak256::new();
        for tx in &self.transactions {
            hasher.update(H256::keccak256(tx).as_bytes());
        }
        H256::new(hasher.finalize().into())
    }

    /// Checks the header's tx_root against [`Self::compute_transactions_root`].
    pub fn validate_transactions_root(&self) -> bool {
        self.header.tx_root == self.compute_transactions_root()
    }

    /// Replaces the header, keeping the transactions.
    ///
    /// Used to attach a sealed header to an assembled block.
    pub fn with_seal(self, header: BlockHeader) -> Self {
        Self {
            header,
            transactions: self.transactions,
        }
    }

    /// Attaches commit votes to the header.
    pub fn with_commit_votes(mut self, votes: Vec<CommitMsg>) -> Self {
        self.header.commit_votes = votes;
        self
    }

    /// Encodes the block as a 2-item RLP list of header and payloads.
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(2);
        stream.append(&self.header);
        stream.begin_list(self.transactions.len());
        for tx in &self.transactions {
            stream.append(tx);
        }
        stream.out().to_vec()
    }

    /// Decodes a block produced by [`Self::rlp_encode`].
    pub fn rlp_decode(data: &[u8]) -> Result<Self> {
        let rlp = Rlp::new(data);
        if rlp.item_count().map_err(Error::RlpDecode)? != 2 {
            return Err(Error::InvalidBlock("block RLP is not a 2-item list".into()));
        }

        Ok(Self {
            header: rlp.val_at(0).map_err(Error::RlpDecode)?,
            transactions: rlp.list_at(1).map_err(Error::RlpDecode)?,
        })
    }

    /// The number 0 block, wrapping [`BlockHeader::genesis`].
    pub fn genesis(time: u64, witnesses: Vec<Address>) -> Self {
        Self {
            header: BlockHeader::genesis(time, witnesses),
            transactions: Vec::new(),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block #{} {} ({} txs)",
            self.header.number,
            self.hash(),
            self.transactions.len()
        )
    }
}

/// Renders a byte field as a `0x`-prefixed hex string in serde output.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// Same as [`hex_bytes`] but for a list of byte payloads.
pub(crate) mod hex_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.iter().map(|bytes| format!("0x{}", hex::encode(bytes))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom))
            .collect()
    }
}
