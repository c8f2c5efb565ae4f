//! Three-phase finality over the elected witness roster.
//!
//! Once the producer seals a block, the roster votes it to finality inside a
//! single round:
//!
//! ```text
//! producer                 every witness
//! --------                 -------------
//! Preprepare(block)  --->  verify seal + block, vote Prepare
//!                          on quorum of matching Prepares, vote Commit
//!                          on quorum of matching Commits, write block
//! ```
//!
//! The [`BftManager`] drives one round at a time. Within the round the step
//! only moves forward, and every transition is claimed through a
//! compare-and-swap so concurrent handlers cannot double-send a vote or
//! double-write the block. The round switch rebuilds the working state under
//! a write lock while message handlers hold the read side, so a handler
//! never observes the height of one round and the pool of another.
//!
//! Messages that arrive early, for a later height or a later round, are
//! parked in the stash pool and replayed after the matching round opens.

use crate::msg_pool::{MessagePool, PoolError};
use crate::types::{
    commit_voter, make_commit, make_prepare, prepare_voter, SignatureCache, SigningError, Step,
};
use async_trait::async_trait;
use meridian_crypto::PrivateKey;
use meridian_types::{
    Address, Block, CommitMsg, ConsensusMessage, PrepareMsg, PreprepareMsg, H256,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace, warn};

/// The stash pool is swept once per this many heights.
pub const MSG_CLEAN_INTERVAL: u64 = 100;

/// Outbound consensus traffic.
#[async_trait]
pub trait ConsensusNetwork: Send + Sync {
    /// Broadcasts a consensus message to the other witnesses.
    async fn broadcast_message(&self, msg: ConsensusMessage);

    /// Asks peers for blocks up to `height`; called when a proposal from a
    /// future height shows this node has fallen behind.
    async fn request_sync(&self, height: u64);
}

/// Full validation of a proposed block against the chain.
#[async_trait]
pub trait BlockVerifier: Send + Sync {
    /// Verifies a candidate block before it is voted on.
    async fn verify_block(&self, block: &Block) -> Result<(), String>;
}

/// Persistence of finalized blocks.
#[async_trait]
pub trait BlockWriter: Send + Sync {
    /// Writes a finalized block, commit votes attached, to the chain.
    async fn write_block(&self, block: &Block) -> Result<(), String>;
}

/// Errors from the voting round.
#[derive(Debug, thiserror::Error)]
pub enum BftError {
    /// The message is for an already finalized height
    #[error("message height {msg} is behind the working height {current}")]
    StaleHeight {
        /// Height the message cites
        msg: u64,
        /// Height being voted on
        current: u64,
    },

    /// The message is for an already abandoned round
    #[error("message round {msg} is behind the working round {current}")]
    StaleRound {
        /// Round the message cites
        msg: u32,
        /// Round in progress
        current: u32,
    },

    /// Pool rejected the message
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Signing or signature recovery failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The proposal's seal recovers to someone other than its coinbase
    #[error("proposal sealed by {signer}, claimed producer is {producer}")]
    InvalidProducer {
        /// Address recovered from the seal
        signer: Address,
        /// Coinbase the header claims
        producer: Address,
    },

    /// A vote or proposal came from outside the roster
    #[error("{0} is not in the working roster")]
    NotWitness(Address),

    /// A vote quorum cites a different block than the pooled proposal
    #[error("vote quorum cites {cited}, pooled proposal is {proposal}")]
    QuorumMismatch {
        /// Block hash the quorum agrees on
        cited: H256,
        /// Hash of the pooled proposal
        proposal: H256,
    },

    /// The chain refused the finalized block
    #[error("block write failed: {0}")]
    WriteBlock(String),
}

#[derive(Debug, Default)]
struct RoundState {
    height: u64,
    round: u32,
    members: HashSet<Address>,
}

/// Drives the voting rounds for one node.
pub struct BftManager<N, V, W> {
    coinbase: Address,
    key: PrivateKey,
    quorum: usize,
    /// Off while the node is syncing; handlers then only stash.
    producing: AtomicBool,
    /// Current [`Step`], advanced by compare-and-swap only.
    step: AtomicU32,
    /// Round the sealed proposal will carry. Written at block preparation,
    /// which can run before the round switch lands, so it cannot be read
    /// from the round state.
    block_round: AtomicU32,
    round: RwLock<RoundState>,
    round_pool: MessagePool,
    stash_pool: MessagePool,
    sig_cache: Arc<SignatureCache>,
    network: Arc<N>,
    verifier: Arc<V>,
    writer: Arc<W>,
}

impl<N, V, W> BftManager<N, V, W>
where
    N: ConsensusNetwork + 'static,
    V: BlockVerifier + 'static,
    W: BlockWriter + 'static,
{
    /// Creates a manager voting as `coinbase` with the given quorum.
    pub fn new(
        coinbase: Address,
        key: PrivateKey,
        quorum: usize,
        network: Arc<N>,
        verifier: Arc<V>,
        writer: Arc<W>,
        sig_cache: Arc<SignatureCache>,
    ) -> Self {
        Self {
            coinbase,
            key,
            quorum,
            producing: AtomicBool::new(true),
            step: AtomicU32::new(Step::NewRound.as_u32()),
            block_round: AtomicU32::new(0),
            round: RwLock::new(RoundState::default()),
            round_pool: MessagePool::new(quorum, "round"),
            stash_pool: MessagePool::new(quorum, "stash"),
            sig_cache,
            network,
            verifier,
            writer,
        }
    }

    /// Opens the round for `height`/`round` with the given roster.
    ///
    /// Resets the step, wipes the round pool and replays any messages
    /// stashed for the new slot. The roster is rebuilt only when the height
    /// moves; a round change within a height keeps it.
    pub async fn new_round(self: Arc<Self>, height: u64, round: u32, witnesses: Vec<Address>) {
        {
            let mut state = self.round.write().await;
            if state.height != height {
                state.members = witnesses.into_iter().collect();
            }
            state.height = height;
            state.round = round;
            self.step.store(Step::NewRound.as_u32(), Ordering::SeqCst);
            self.round_pool.clean_all();
            debug!(height, round, "voting round reset");
        }
        tokio::spawn(async move { self.replay_stashed().await });
    }

    /// Broadcasts the sealed block as this round's proposal and feeds it to
    /// the local handler.
    pub async fn start_preprepare(self: Arc<Self>, block: Block) {
        let round = self.block_round.load(Ordering::SeqCst);
        let msg = ConsensusMessage::Preprepare(PreprepareMsg::new(round, block));
        info!(number = msg.block_number(), round, "broadcasting sealed proposal");
        self.network.broadcast_message(msg.clone()).await;

        tokio::spawn(async move {
            if let Err(e) = self.handle_message(msg).await {
                debug!(error = %e, "own proposal not accepted locally");
            }
        });
    }

    /// Routes one inbound message through the round.
    ///
    /// Messages ahead of the working height or round are stashed for replay;
    /// messages behind it are rejected. Matching messages go to their
    /// per-kind handler, which holds the round's read lock for its whole
    /// run so a round switch cannot slip in between checks.
    pub async fn handle_message(&self, msg: ConsensusMessage) -> Result<(), BftError> {
        let state = self.round.read().await;

        if !self.producing.load(Ordering::SeqCst) {
            if let Err(e) = self.stash_pool.add_message(&msg) {
                trace!(error = %e, "message not stashed while paused");
            }
            return Ok(());
        }

        let number = msg.block_number();
        if number > state.height {
            if let Err(e) = self.stash_pool.add_message(&msg) {
                debug!(%msg, error = %e, "future message not stashed");
                return Err(e.into());
            }
            if matches!(msg, ConsensusMessage::Preprepare(_)) {
                // A proposal from a future height means this node fell behind.
                let network = Arc::clone(&self.network);
                tokio::spawn(async move { network.request_sync(number).await });
            }
            return Ok(());
        }
        if number < state.height {
            return Err(BftError::StaleHeight {
                msg: number,
                current: state.height,
            });
        }

        let round = msg.round();
        if round < state.round {
            return Err(BftError::StaleRound {
                msg: round,
                current: state.round,
            });
        }
        if round > state.round {
            if let Err(e) = self.stash_pool.add_message(&msg) {
                debug!(%msg, error = %e, "future message not stashed");
                return Err(e.into());
            }
            return Ok(());
        }

        match msg {
            ConsensusMessage::Preprepare(m) => self.handle_preprepare(&state, m).await,
            ConsensusMessage::Prepare(m) => self.handle_prepare(&state, m).await,
            ConsensusMessage::Commit(m) => self.handle_commit(&state, m).await,
        }
    }

    async fn handle_preprepare(
        &self,
        state: &RoundState,
        msg: PreprepareMsg,
    ) -> Result<(), BftError> {
        if self.step() != Step::NewRound {
            debug!(step = %self.step(), "proposal ignored outside NewRound");
            return Ok(());
        }

        if let Err(e) = self.verify_preprepare(state, &msg) {
            debug!(error = %e, "proposal failed verification");
            return Err(e);
        }
        if let Err(reason) = self.verifier.verify_block(&msg.block).await {
            // Dropped without an error: the step stays at NewRound so a
            // valid reproposal can still open the round.
            debug!(reason = %reason, number = msg.block_number(), "candidate block rejected");
            return Ok(());
        }
        if let Err(e) = self
            .round_pool
            .add_message(&ConsensusMessage::Preprepare(msg))
        {
            warn!(error = %e, "proposal not pooled");
            return Err(e.into());
        }

        if self.cas_step(Step::NewRound, Step::Preprepared) {
            self.start_prepare(state).await
        } else {
            Ok(())
        }
    }

    async fn handle_prepare(&self, state: &RoundState, msg: PrepareMsg) -> Result<(), BftError> {
        // Prepares may legitimately arrive before the proposal, so anything
        // up to and including Preparing accepts them.
        if self.step() > Step::Preparing {
            return Ok(());
        }

        if let Err(e) = self.verify_prepare(state, &msg) {
            error!(error = %e, "prepare vote rejected");
            return Err(e);
        }
        if let Err(e) = self.round_pool.add_message(&ConsensusMessage::Prepare(msg)) {
            error!(error = %e, "prepare vote not pooled");
            return Err(e.into());
        }
        self.try_commit_step(state).await
    }

    async fn handle_commit(&self, state: &RoundState, msg: CommitMsg) -> Result<(), BftError> {
        if self.step() > Step::Committing {
            return Ok(());
        }

        if let Err(e) = self.verify_commit(state, &msg) {
            error!(error = %e, "commit vote rejected");
            return Err(e);
        }
        if let Err(e) = self.round_pool.add_message(&ConsensusMessage::Commit(msg)) {
            error!(error = %e, "commit vote not pooled");
            return Err(e.into());
        }
        self.try_write_block_step(state).await
    }

    /// Sends this node's prepare vote once the proposal is in the pool.
    async fn start_prepare(&self, state: &RoundState) -> Result<(), BftError> {
        if self.step() != Step::Preprepared {
            return Ok(());
        }

        let preprepare = match self.round_pool.preprepare(state.height, state.round) {
            Ok(msg) => msg,
            Err(e) => {
                error!(
                    height = state.height,
                    round = state.round,
                    "no proposal to vote on"
                );
                return Err(e.into());
            }
        };

        let vote = make_prepare(
            &self.key,
            self.coinbase,
            state.round,
            preprepare.block_number(),
            preprepare.block.hash(),
        )?;
        self.round_pool
            .add_message(&ConsensusMessage::Prepare(vote.clone()))?;

        if self.cas_step(Step::Preprepared, Step::Preparing) {
            self.send_vote(state, ConsensusMessage::Prepare(vote)).await;
        }
        self.try_commit_step(state).await
    }

    /// Advances to the commit phase once a prepare quorum agrees with the
    /// pooled proposal. Safe to call from any handler; it backs off when the
    /// step or the vote count is not there yet.
    async fn try_commit_step(&self, state: &RoundState) -> Result<(), BftError> {
        let step = self.step();
        if step < Step::Preparing || step > Step::Prepared {
            return Ok(());
        }

        let prepares = match self.round_pool.quorum_prepares(state.height, state.round) {
            Ok(votes) => votes,
            // Quorum not reached yet.
            Err(_) => return Ok(()),
        };
        let preprepare = match self.round_pool.preprepare(state.height, state.round) {
            Ok(msg) => msg,
            Err(e) => {
                error!(
                    height = state.height,
                    round = state.round,
                    "prepare quorum without a pooled proposal"
                );
                return Err(e.into());
            }
        };

        let proposal = preprepare.block.hash();
        let cited = match prepares.first() {
            Some(vote) => vote.block_hash,
            None => return Ok(()),
        };
        if cited != proposal {
            error!(cited = %cited, proposal = %proposal, "prepare quorum cites a different block");
            return Err(BftError::QuorumMismatch { cited, proposal });
        }

        let _ = self.cas_step(Step::Preparing, Step::Prepared);
        self.start_commit(state, &preprepare).await
    }

    /// Sends this node's commit vote for the prepared proposal.
    async fn start_commit(
        &self,
        state: &RoundState,
        preprepare: &PreprepareMsg,
    ) -> Result<(), BftError> {
        if self.step() != Step::Prepared {
            return Ok(());
        }

        let vote = make_commit(
            &self.key,
            self.coinbase,
            state.round,
            preprepare.block_number(),
            preprepare.block.hash(),
        )?;
        self.round_pool
            .add_message(&ConsensusMessage::Commit(vote.clone()))?;

        if self.cas_step(Step::Prepared, Step::Committing) {
            self.send_vote(state, ConsensusMessage::Commit(vote)).await;
        }
        self.try_write_block_step(state).await
    }

    /// Writes the block once a commit quorum is pooled.
    ///
    /// The Committing to Committed swap is won exactly once per round, so
    /// the block is written at most once no matter how many handlers race
    /// through here.
    async fn try_write_block_step(&self, state: &RoundState) -> Result<(), BftError> {
        if self.step() != Step::Committing {
            return Ok(());
        }

        let commits = match self.round_pool.quorum_commits(state.height, state.round) {
            Ok(votes) => votes,
            Err(_) => return Ok(()),
        };

        if self.cas_step(Step::Committing, Step::Committed) {
            let preprepare = match self.round_pool.preprepare(state.height, state.round) {
                Ok(msg) => msg,
                Err(e) => {
                    error!(
                        height = state.height,
                        round = state.round,
                        "commit quorum without a pooled proposal"
                    );
                    return Err(e.into());
                }
            };
            if let Err(e) = self.write_block_with_votes(&preprepare, commits).await {
                error!(error = %e, "finalized block not written");
                return Err(e);
            }
            let _ = self.cas_step(Step::Committed, Step::Done);
        }
        Ok(())
    }

    async fn write_block_with_votes(
        &self,
        preprepare: &PreprepareMsg,
        commits: Vec<CommitMsg>,
    ) -> Result<(), BftError> {
        let proposal = preprepare.block.hash();
        let cited = match commits.first() {
            Some(vote) => vote.block_hash,
            None => return Ok(()),
        };
        if cited != proposal {
            return Err(BftError::QuorumMismatch { cited, proposal });
        }

        let block = preprepare.block.clone().with_commit_votes(commits);
        info!(number = block.number(), hash = %proposal, "writing finalized block");
        self.writer
            .write_block(&block)
            .await
            .map_err(BftError::WriteBlock)
    }

    /// Replays messages stashed for the working slot through the handler.
    async fn replay_stashed(&self) {
        let stashed = {
            let state = self.round.read().await;
            self.stash_pool.all_messages(state.height, state.round)
        };
        if stashed.is_empty() {
            return;
        }

        debug!(count = stashed.len(), "replaying stashed messages");
        for msg in stashed {
            if let Err(e) = self.handle_message(msg).await {
                trace!(error = %e, "stashed message rejected on replay");
            }
        }
    }

    fn verify_preprepare(&self, state: &RoundState, msg: &PreprepareMsg) -> Result<(), BftError> {
        let producer = msg.block.header.coinbase;
        let signer = self.sig_cache.recover(&msg.block.header)?;
        if signer != producer {
            return Err(BftError::InvalidProducer { signer, producer });
        }
        if !state.members.contains(&signer) {
            return Err(BftError::NotWitness(signer));
        }
        Ok(())
    }

    fn verify_prepare(&self, state: &RoundState, msg: &PrepareMsg) -> Result<(), BftError> {
        let voter = prepare_voter(msg)?;
        if !state.members.contains(&voter) {
            return Err(BftError::NotWitness(voter));
        }
        Ok(())
    }

    fn verify_commit(&self, state: &RoundState, msg: &CommitMsg) -> Result<(), BftError> {
        let voter = commit_voter(msg)?;
        if !state.members.contains(&voter) {
            return Err(BftError::NotWitness(voter));
        }
        Ok(())
    }

    /// Broadcasts a vote. Only roster members speak; observers stay silent.
    async fn send_vote(&self, state: &RoundState, msg: ConsensusMessage) {
        if state.members.contains(&self.coinbase) {
            self.network.broadcast_message(msg).await;
        }
    }

    fn cas_step(&self, from: Step, to: Step) -> bool {
        self.step
            .compare_exchange(
                from.as_u32(),
                to.as_u32(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Records the round the next sealed proposal will carry.
    pub fn set_block_round(&self, round: u32) {
        self.block_round.store(round, Ordering::SeqCst);
    }

    /// Resumes message handling after a sync pause.
    pub fn start_producing(&self) {
        self.producing.store(true, Ordering::SeqCst);
    }

    /// Pauses message handling; inbound messages are stashed instead.
    pub fn stop_producing(&self) {
        self.producing.store(false, Ordering::SeqCst);
    }

    /// Checks whether message handling is active.
    pub fn is_producing(&self) -> bool {
        self.producing.load(Ordering::SeqCst)
    }

    /// Sweeps stashed messages below `height`, once per clean interval.
    pub fn clean_old_messages(&self, height: u64) {
        if height % MSG_CLEAN_INTERVAL == 0 {
            self.stash_pool.clean_below(height);
        }
    }

    /// Returns the current step.
    pub fn step(&self) -> Step {
        Step::from_u32(self.step.load(Ordering::SeqCst)).unwrap_or(Step::Done)
    }

    /// Returns the height being voted on.
    pub async fn height(&self) -> u64 {
        self.round.read().await.height
    }

    /// Returns the round in progress.
    pub async fn round(&self) -> u32 {
        self.round.read().await.round
    }

    /// Returns the proposal pooled for the working slot, if any.
    pub async fn current_preprepare(&self) -> Option<PreprepareMsg> {
        let state = self.round.read().await;
        self.round_pool.preprepare(state.height, state.round).ok()
    }

    /// Returns everything pooled for the working slot.
    pub async fn current_messages(&self) -> Vec<ConsensusMessage> {
        let state = self.round.read().await;
        self.round_pool.all_messages(state.height, state.round)
    }

    /// Returns the prepares pooled for the working slot.
    pub async fn current_prepares(&self) -> Vec<PrepareMsg> {
        let state = self.round.read().await;
        self.round_pool.prepares(state.height, state.round)
    }

    /// Returns the commits pooled for the working slot.
    pub async fn current_commits(&self) -> Vec<CommitMsg> {
        let state = self.round.read().await;
        self.round_pool.commits(state.height, state.round)
    }

    /// Returns the vote count that finalizes a phase.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Returns the address this manager votes as.
    pub fn coinbase(&self) -> Address {
        self.coinbase
    }

    /// Returns the number of messages parked in the stash pool.
    pub fn stashed_count(&self) -> usize {
        self.stash_pool.message_count()
    }
}
