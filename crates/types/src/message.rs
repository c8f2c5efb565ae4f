//! Consensus message types for the three-phase voting protocol.
//!
//! Three message kinds circulate between witnesses while a block is being
//! finalized:
//! - [`PreprepareMsg`] - the sealed candidate block, sent by the producer
//! - [`PrepareMsg`] - a first-phase vote on the candidate's hash
//! - [`CommitMsg`] - a second-phase vote; a quorum of these is embedded in
//!   the stored header as the finality proof
//!
//! [`ConsensusMessage`] is the closed set of everything a node will accept
//! from the network.
//!
//! Every message has a deterministic [`hash`](ConsensusMessage::hash) over an
//! RLP encoding that excludes the vote signature. The digest serves two
//! purposes: it is the payload the voter signs, and it is the key used for
//! duplicate suppression in the message pools.

use crate::block::hex_bytes;
use crate::{Address, Block, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminates the three consensus message kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Candidate block proposal from the in-turn producer
    Preprepare = 0,
    /// First-phase vote
    Prepare = 1,
    /// Second-phase vote
    Commit = 2,
}

impl MessageKind {
    /// Returns the wire tag for this kind.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Preprepare),
            1 => Some(Self::Prepare),
            2 => Some(Self::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preprepare => "preprepare",
            Self::Prepare => "prepare",
            Self::Commit => "commit",
        };
        write!(f, "{}", name)
    }
}

/// The candidate block proposal opening a voting round.
///
/// Carries the full sealed block; voters vote on its header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprepareMsg {
    /// Voting round within the block's height
    pub round: u32,
    /// The sealed candidate block
    pub block: Block,
}

impl PreprepareMsg {
    /// Creates a proposal for the given round.
    pub fn new(round: u32, block: Block) -> Self {
        Self { round, block }
    }

    /// Returns the number of the proposed block.
    pub fn block_number(&self) -> u64 {
        self.block.number()
    }

    /// Computes the dedup digest: keccak256 of `rlp([round, block_hash])`.
    ///
    /// The proposal itself carries no separate signature; the block's seal
    /// already authenticates the producer, so no kind tag is needed here.
    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(2);
        stream.append(&self.round);
        stream.append(&self.block.hash());
        H256::keccak256(&stream.out())
    }
}

impl Encodable for PreprepareMsg {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.round);
        s.append_raw(&self.block.rlp_encode(), 1);
    }
}

impl Decodable for PreprepareMsg {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let block = Block::rlp_decode(rlp.at(1)?.as_raw())
            .map_err(|_| DecoderError::Custom("invalid block in preprepare"))?;
        Ok(Self {
            round: rlp.val_at(0)?,
            block,
        })
    }
}

/// A first-phase vote endorsing a candidate block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareMsg {
    /// Voting round within the height
    pub round: u32,
    /// Address of the voting witness
    pub prepare_addr: Address,
    /// Number of the block being voted on
    pub block_number: u64,
    /// Hash of the block being voted on
    pub block_hash: H256,
    /// Recoverable signature over [`Self::hash`]
    #[serde(with = "hex_bytes")]
    pub prepare_sig: Vec<u8>,
}

impl PrepareMsg {
    /// Creates an unsigned prepare vote.
    pub fn new(round: u32, prepare_addr: Address, block_number: u64, block_hash: H256) -> Self {
        Self {
            round,
            prepare_addr,
            block_number,
            block_hash,
            prepare_sig: Vec::new(),
        }
    }

    /// Computes the signing/dedup digest.
    ///
    /// keccak256 of `rlp([kind, round, prepare_addr, block_number,
    /// block_hash])`; the signature is excluded so the digest is stable
    /// before and after signing.
    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(5);
        stream.append(&MessageKind::Prepare.as_u8());
        stream.append(&self.round);
        stream.append(&self.prepare_addr);
        stream.append(&self.block_number);
        stream.append(&self.block_hash);
        H256::keccak256(&stream.out())
    }
}

impl Encodable for PrepareMsg {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.round);
        s.append(&self.prepare_addr);
        s.append(&self.block_number);
        s.append(&self.block_hash);
        s.append(&self.prepare_sig);
    }
}

impl Decodable for PrepareMsg {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            round: rlp.val_at(0)?,
            prepare_addr: rlp.val_at(1)?,
            block_number: rlp.val_at(2)?,
            block_hash: rlp.val_at(3)?,
            prepare_sig: rlp.val_at(4)?,
        })
    }
}

/// A second-phase vote; a quorum of these finalizes the block.
///
/// Commit votes are the only messages that outlive their round: the winning
/// quorum is embedded in the stored header so finality can be re-verified
/// offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMsg {
    /// Voting round within the height
    pub round: u32,
    /// Address of the voting witness
    pub committer: Address,
    /// Number of the block being voted on
    pub block_number: u64,
    /// Hash of the block being voted on
    pub block_hash: H256,
    /// Recoverable signature over [`Self::hash`]
    #[serde(with = "hex_bytes")]
    pub commit_sig: Vec<u8>,
}

impl CommitMsg {
    /// Creates an unsigned commit vote.
    pub fn new(round: u32, committer: Address, block_number: u64, block_hash: H256) -> Self {
        Self {
            round,
            committer,
            block_number,
            block_hash,
            commit_sig: Vec::new(),
        }
    }

    /// Computes the signing/dedup digest.
    ///
    /// keccak256 of `rlp([kind, round, committer, block_number, block_hash])`.
    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(5);
        stream.append(&MessageKind::Commit.as_u8());
        stream.append(&self.round);
        stream.append(&self.committer);
        stream.append(&self.block_number);
        stream.append(&self.block_hash);
        H256::keccak256(&stream.out())
    }
}

impl Encodable for CommitMsg {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.round);
        s.append(&self.committer);
        s.append(&self.block_number);
        s.append(&self.block_hash);
        s.append(&self.commit_sig);
    }
}

impl Decodable for CommitMsg {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 5 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            round: rlp.val_at(0)?,
            committer: rlp.val_at(1)?,
            block_number: rlp.val_at(2)?,
            block_hash: rlp.val_at(3)?,
            commit_sig: rlp.val_at(4)?,
        })
    }
}

/// The closed set of messages the consensus layer accepts from peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// Candidate block proposal
    Preprepare(PreprepareMsg),
    /// First-phase vote
    Prepare(PrepareMsg),
    /// Second-phase vote
    Commit(CommitMsg),
}

impl ConsensusMessage {
    /// Returns the message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Preprepare(_) => MessageKind::Preprepare,
            Self::Prepare(_) => MessageKind::Prepare,
            Self::Commit(_) => MessageKind::Commit,
        }
    }

    /// Returns the voting round the message belongs to.
    pub fn round(&self) -> u32 {
        match self {
            Self::Preprepare(msg) => msg.round,
            Self::Prepare(msg) => msg.round,
            Self::Commit(msg) => msg.round,
        }
    }

    /// Returns the block number the message is about.
    pub fn block_number(&self) -> u64 {
        match self {
            Self::Preprepare(msg) => msg.block_number(),
            Self::Prepare(msg) => msg.block_number,
            Self::Commit(msg) => msg.block_number,
        }
    }

    /// Returns the message's dedup/signing digest.
    pub fn hash(&self) -> H256 {
        match self {
            Self::Preprepare(msg) => msg.hash(),
            Self::Prepare(msg) => msg.hash(),
            Self::Commit(msg) => msg.hash(),
        }
    }
}

impl fmt::Display for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(number={}, round={})",
            self.kind(),
            self.block_number(),
            self.round()
        )
    }
}

impl From<PreprepareMsg> for ConsensusMessage {
    fn from(msg: PreprepareMsg) -> Self {
        Self::Preprepare(msg)
    }
}

impl From<PrepareMsg> for ConsensusMessage {
    fn from(msg: PrepareMsg) -> Self {
        Self::Prepare(msg)
    }
}

impl From<CommitMsg> for ConsensusMessage {
    fn from(msg: CommitMsg) -> Self {
        Self::Commit(msg)
    }
}

impl Encodable for ConsensusMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.kind().as_u8());
        match self {
            Self::Preprepare(msg) => s.append(msg),
            Self::Prepare(msg) => s.append(msg),
            Self::Commit(msg) => s.append(msg),
        };
    }
}

impl Decodable for ConsensusMessage {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let tag: u8 = rlp.val_at(0)?;
        let payload = rlp.at(1)?;
        match MessageKind::from_u8(tag) {
            Some(MessageKind::Preprepare) => Ok(Self::Preprepare(PreprepareMsg::decode(&payload)?)),
            Some(MessageKind::Prepare) => Ok(Self::Prepare(PrepareMsg::decode(&payload)?)),
            Some(MessageKind::Commit) => Ok(Self::Commit(CommitMsg::decode(&payload)?)),
            None => Err(DecoderError::Custom("unknown consensus message kind")),
        }
    }
}
