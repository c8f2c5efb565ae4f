//! Message pools backing the voting rounds.
//!
//! Each node keeps two pools: the round pool holds the working set of the
//! round in progress and is wiped at every round switch, the stash pool
//! parks messages that arrived too early and feeds them back on replay.
//! Both share this implementation.
//!
//! A pool indexes messages by height and round, with a flat digest set on
//! the side for duplicate suppression. At most one proposal is accepted per
//! slot; votes accumulate until a quorum of them cites the same block hash.

use meridian_types::{CommitMsg, ConsensusMessage, PrepareMsg, PreprepareMsg, H256};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Errors from pool insertion and quorum queries.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The exact message is already pooled
    #[error("message {hash} is already pooled")]
    DuplicateMessage {
        /// Digest of the rejected message
        hash: H256,
    },

    /// A second proposal arrived for a slot that already has one
    #[error("a proposal is already pooled for height {height} round {round}")]
    DuplicatePreprepare {
        /// Height of the slot
        height: u64,
        /// Round of the slot
        round: u32,
    },

    /// No proposal is pooled for the slot
    #[error("no proposal pooled for height {height} round {round}")]
    MissingPreprepare {
        /// Height of the slot
        height: u64,
        /// Round of the slot
        round: u32,
    },

    /// Fewer votes pooled than a quorum needs
    #[error("{got} of {need} votes pooled")]
    InsufficientVotes {
        /// Votes currently pooled for the slot
        got: usize,
        /// Votes a quorum needs
        need: usize,
    },

    /// Enough votes pooled, but no block hash gathers a quorum of them
    #[error("no block hash reaches the {need} vote quorum")]
    NoMajority {
        /// Votes a quorum needs
        need: usize,
    },
}

#[derive(Debug, Default)]
struct RoundMessages {
    preprepare: Option<PreprepareMsg>,
    prepares: Vec<PrepareMsg>,
    commits: Vec<CommitMsg>,
}

#[derive(Debug, Default)]
struct PoolInner {
    rounds: HashMap<u64, HashMap<u32, RoundMessages>>,
    known: HashMap<H256, u64>,
}

/// Height and round indexed message store with duplicate suppression.
pub struct MessagePool {
    name: &'static str,
    quorum: usize,
    inner: RwLock<PoolInner>,
}

impl MessagePool {
    /// Creates an empty pool requiring `quorum` matching votes.
    ///
    /// The name only labels log lines.
    pub fn new(quorum: usize, name: &'static str) -> Self {
        Self {
            name,
            quorum,
            inner: RwLock::new(PoolInner::default()),
        }
    }

    /// Inserts a message, rejecting duplicates.
    ///
    /// A message is a duplicate if its digest was seen before, or if it is a
    /// proposal for a slot that already holds one. Votes are deduplicated by
    /// digest only; the same witness voting twice for different blocks yields
    /// two pooled votes, which the quorum grouping then keeps apart.
    pub fn add_message(&self, msg: &ConsensusMessage) -> Result<(), PoolError> {
        let hash = msg.hash();
        let height = msg.block_number();
        let round = msg.round();

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        if inner.known.contains_key(&hash) {
            return Err(PoolError::DuplicateMessage { hash });
        }

        let slot = inner
            .rounds
            .entry(height)
            .or_default()
            .entry(round)
            .or_default();
        match msg {
            ConsensusMessage::Preprepare(m) => {
                if slot.preprepare.is_some() {
                    return Err(PoolError::DuplicatePreprepare { height, round });
                }
                slot.preprepare = Some(m.clone());
            }
            ConsensusMessage::Prepare(m) => slot.prepares.push(m.clone()),
            ConsensusMessage::Commit(m) => slot.commits.push(m.clone()),
        }
        inner.known.insert(hash, height);
        trace!(pool = self.name, %msg, "message pooled");
        Ok(())
    }

    /// Returns the proposal pooled for the slot.
    pub fn preprepare(&self, height: u64, round: u32) -> Result<PreprepareMsg, PoolError> {
        self.inner
            .read()
            .rounds
            .get(&height)
            .and_then(|rounds| rounds.get(&round))
            .and_then(|slot| slot.preprepare.clone())
            .ok_or(PoolError::MissingPreprepare { height, round })
    }

    /// Returns everything pooled for the slot: the proposal first, then
    /// prepares, then commits, each in arrival order.
    pub fn all_messages(&self, height: u64, round: u32) -> Vec<ConsensusMessage> {
        let inner = self.inner.read();
        let slot = match inner.rounds.get(&height).and_then(|rounds| rounds.get(&round)) {
            Some(slot) => slot,
            None => return Vec::new(),
        };

        let mut out = Vec::with_capacity(1 + slot.prepares.len() + slot.commits.len());
        if let Some(preprepare) = &slot.preprepare {
            out.push(ConsensusMessage::Preprepare(preprepare.clone()));
        }
        out.extend(slot.prepares.iter().cloned().map(ConsensusMessage::Prepare));
        out.extend(slot.commits.iter().cloned().map(ConsensusMessage::Commit));
        out
    }

    /// Returns the prepares pooled for the slot, in arrival order.
    pub fn prepares(&self, height: u64, round: u32) -> Vec<PrepareMsg> {
        self.inner
            .read()
            .rounds
            .get(&height)
            .and_then(|rounds| rounds.get(&round))
            .map(|slot| slot.prepares.clone())
            .unwrap_or_default()
    }

    /// Returns the commits pooled for the slot, in arrival order.
    pub fn commits(&self, height: u64, round: u32) -> Vec<CommitMsg> {
        self.inner
            .read()
            .rounds
            .get(&height)
            .and_then(|rounds| rounds.get(&round))
            .map(|slot| slot.commits.clone())
            .unwrap_or_default()
    }

    /// Returns the quorum of prepares agreeing on one block hash.
    pub fn quorum_prepares(&self, height: u64, round: u32) -> Result<Vec<PrepareMsg>, PoolError> {
        let inner = self.inner.read();
        match inner.rounds.get(&height).and_then(|rounds| rounds.get(&round)) {
            Some(slot) => majority_subset(&slot.prepares, |v| v.block_hash, self.quorum),
            None => Err(PoolError::InsufficientVotes {
                got: 0,
                need: self.quorum,
            }),
        }
    }

    /// Returns the quorum of commits agreeing on one block hash.
    pub fn quorum_commits(&self, height: u64, round: u32) -> Result<Vec<CommitMsg>, PoolError> {
        let inner = self.inner.read();
        match inner.rounds.get(&height).and_then(|rounds| rounds.get(&round)) {
            Some(slot) => majority_subset(&slot.commits, |v| v.block_hash, self.quorum),
            None => Err(PoolError::InsufficientVotes {
                got: 0,
                need: self.quorum,
            }),
        }
    }

    /// Drops everything pooled for one height.
    pub fn clean_height(&self, height: u64) {
        let mut guard = self.inner.write();
        guard.rounds.remove(&height);
        guard.known.retain(|_, h| *h != height);
    }

    /// Drops everything.
    pub fn clean_all(&self) {
        let mut guard = self.inner.write();
        guard.rounds.clear();
        guard.known.clear();
        trace!(pool = self.name, "pool reset");
    }

    /// Drops everything below `height`, keeping `height` itself.
    pub fn clean_below(&self, height: u64) {
        let mut guard = self.inner.write();
        guard.rounds.retain(|h, _| *h >= height);
        guard.known.retain(|_, h| *h >= height);
        debug!(pool = self.name, below = height, "stale messages dropped");
    }

    /// Returns the total number of pooled messages.
    pub fn message_count(&self) -> usize {
        self.inner.read().known.len()
    }
}

/// Groups votes by the block hash they cite and returns the subset behind
/// the winning hash, in arrival order.
///
/// The winning hash is the first to reach the highest count, so a tie goes
/// to whichever hash got there earlier. Votes are counted per message, not
/// per distinct voter; the signature checks upstream keep one witness from
/// voting twice with the same digest.
fn majority_subset<M, F>(votes: &[M], block_hash: F, need: usize) -> Result<Vec<M>, PoolError>
where
    M: Clone,
    F: Fn(&M) -> H256,
{
    if votes.len() < need {
        return Err(PoolError::InsufficientVotes {
            got: votes.len(),
            need,
        });
    }

    let mut counts: HashMap<H256, usize> = HashMap::new();
    let mut best: Option<(H256, usize)> = None;
    for vote in votes {
        let hash = block_hash(vote);
        let count = counts.entry(hash).or_insert(0);
        *count += 1;
        match best {
            Some((_, top)) if *count <= top => {}
            _ => best = Some((hash, *count)),
        }
    }

    match best {
        Some((hash, top)) if top >= need => Ok(votes
            .iter()
            .filter(|v| block_hash(v) == hash)
            .cloned()
            .collect()),
        _ => Err(PoolError::NoMajority { need }),
    }
}
