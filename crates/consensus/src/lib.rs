//! # Meridian Consensus
//!
//! DPoS witness rotation with embedded three-phase finality for the
//! Meridian blockchain.
//!
//! Elected witnesses take fixed-length production slots in roster order.
//! The slot owner seals a block and proposes it to the other witnesses,
//! who drive it through a prepare and a commit vote; a block only reaches
//! the chain once a commit quorum stands behind it, so every stored block
//! is final.
//!
//! ## Consensus Flow
//!
//! ```text
//! Height h, round r (one round per production slot):
//!
//! ┌──────────────┐
//! │  PREPREPARE  │  slot owner = roster[(prev + slots_elapsed) % n]
//! │              │  broadcast Preprepare{r, sealed_block}
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   PREPARE    │  IF seal and payload verify:
//! │              │      broadcast Prepare{r, h, hash(block)}
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │    COMMIT    │  ON quorum of PREPARES for hash(block):
//! │              │      broadcast Commit{r, h, hash(block)}
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │    WRITE     │  ON quorum of COMMITS for hash(block):
//! │              │      store block with the commit votes embedded
//! └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use meridian_consensus::DposEngine;
//! use meridian_config::DposConfig;
//! use meridian_crypto::PrivateKey;
//!
//! let config = DposConfig { period: 2, witnesses_num: 4 };
//! let engine = DposEngine::new(
//!     config,
//!     PrivateKey::random(),
//!     chain,     // Arc<impl ChainReader>
//!     election,  // Arc<impl ElectionStore>
//!     None,      // Option<Arc<impl WitnessListNotifier>>
//!     network,   // Arc<impl ConsensusNetwork>
//!     verifier,  // Arc<impl BlockVerifier>
//!     writer,    // Arc<impl BlockWriter>
//! );
//!
//! // Producer side, once per slot:
//! let mut header = next_header();
//! engine.prepare(&mut header).await?;
//! let block = engine.finalize(&mut header, transactions)?;
//! engine.seal(block).await?;
//! ```
//!
//! ## Safety Guarantees
//!
//! **Agreement**: a round writes at most one block, and only with a commit
//! quorum behind its exact hash.
//!
//! **Finality**: stored blocks carry their commit quorum and are never
//! reverted.
//!
//! **Fault tolerance**: a roster of `n` witnesses needs `n - (n-1)/3`
//! matching votes, so up to a third of the roster can fail or lie without
//! forging finality.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod api;
pub mod bft;
pub mod engine;
pub mod msg_pool;
pub mod scheduler;
pub mod types;

// Flat re-exports so callers rarely need the module paths
pub use bft::{BftError, BftManager, BlockVerifier, BlockWriter, ConsensusNetwork};
pub use engine::{
    calc_vote_bounty, decode_update_time, encode_update_time, height_bonus, is_roster_refresh,
    needs_refresh_stamp, Candidate, ChainReader, DposEngine, ElectionStore, EngineError,
    WitnessListNotifier, BLOCK_REWARD, CANDIDATES_BONUS, GAS_LIMIT_BOUND_DIVISOR, MAX_GAS_LIMIT,
    MIN_GAS_LIMIT, STAGE_THREE_HEIGHT, STAGE_TWO_HEIGHT, UPDATE_TIME_LEN,
};
pub use msg_pool::{MessagePool, PoolError};
pub use scheduler::{next_produce_slot, RotationManager};
pub use types::{
    commit_voter, make_commit, make_prepare, prepare_voter, quorum, SignatureCache, SigningError,
    Step, IN_MEMORY_SIGNATURES,
};
