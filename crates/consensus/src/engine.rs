//! # DPoS production engine
//!
//! [`DposEngine`] owns the producer side of the protocol: it schedules and
//! assembles blocks, verifies headers produced by others and hands sealed
//! blocks to the embedded finality rounds.
//!
//! ## Production flow
//!
//! 1. [`prepare`](DposEngine::prepare) stamps the header with this node's
//!    coinbase, the next production slot and the witness roster, refreshing
//!    the roster from the election contract once per update interval. It
//!    also opens the voting round the sealed block will be proposed in.
//! 2. [`finalize`](DposEngine::finalize) settles the block reward and the
//!    vote bounty, roots the header and assembles the block.
//! 3. [`seal`](DposEngine::seal) signs the header and hands the sealed block
//!    to the voting round as its proposal.
//!
//! ## Verification
//!
//! [`verify_header`](DposEngine::verify_header) checks structure, timestamp
//! alignment, gas bounds and roster size, recovers the producer from the
//! seal and confirms it owns the production slot.
//! [`verify_witnesses`](DposEngine::verify_witnesses) re-derives the roster
//! a header should carry, and
//! [`verify_commits`](DposEngine::verify_commits) re-checks the finality
//! proof embedded in a stored header.

use crate::bft::{BftError, BftManager, BlockVerifier, BlockWriter, ConsensusNetwork};
use crate::scheduler::{next_produce_slot, RotationManager};
use crate::types::{commit_voter, quorum, SignatureCache, SigningError};
use async_trait::async_trait;
use meridian_config::DposConfig;
use meridian_crypto::PrivateKey;
use meridian_types::{Address, Block, BlockHeader, ConsensusMessage, H256};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Length in bytes of the roster refresh stamp carried in header extra data.
pub const UPDATE_TIME_LEN: usize = 8;

/// Base block reward, in the smallest token unit.
pub const BLOCK_REWARD: u128 = 6_000_000_000_000_000_000;

/// Base vote bounty accrued per block, in the smallest token unit.
pub const CANDIDATES_BONUS: u128 = 6_000_000_000_000_000_000;

/// First height of the second reward stage, where rewards halve.
pub const STAGE_TWO_HEIGHT: u64 = 47_304_000;

/// First height of the third reward stage, where rewards quarter.
pub const STAGE_THREE_HEIGHT: u64 = 94_608_000;

/// Ceiling on a header's gas limit.
pub const MAX_GAS_LIMIT: u64 = 0x7fff_ffff_ffff_ffff;

/// Floor on a header's gas limit.
pub const MIN_GAS_LIMIT: u64 = 5_000;

/// Divisor bounding how far a gas limit may drift from its parent's.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1_024;

/// Read access to the imported chain.
pub trait ChainReader: Send + Sync {
    /// Returns the head of the canonical chain.
    fn current_header(&self) -> Option<BlockHeader>;

    /// Returns the header with the given hash and number.
    fn header(&self, hash: &H256, number: u64) -> Option<BlockHeader>;

    /// Returns the canonical header at `number`.
    fn header_by_number(&self, number: u64) -> Option<BlockHeader>;

    /// Returns the header with the given hash.
    fn header_by_hash(&self, hash: &H256) -> Option<BlockHeader>;
}

/// One entry of the candidate list kept by the election contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Account that registered the candidacy
    pub owner: Address,
    /// Votes currently bound to the candidate
    pub votes: u128,
    /// Whether the candidate is standing
    pub active: bool,
}

/// State of the election contract and the reward accounts.
pub trait ElectionStore: Send + Sync {
    /// Returns the `count` best-voted candidates with their node endpoints,
    /// or `None` when the electorate cannot be read.
    fn top_candidates(&self, count: usize) -> Option<(Vec<Address>, Vec<String>)>;

    /// Returns every registered candidate.
    fn candidates(&self) -> Vec<Candidate>;

    /// Returns the bounty left in the reward pool.
    fn remaining_bounty(&self) -> u128;

    /// Takes `amount` out of the reward pool and returns the new remainder.
    fn grant_bounty(&self, amount: u128) -> Result<u128, String>;

    /// Credits a plain balance, used for the producer's block reward.
    fn add_balance(&self, address: &Address, amount: u128);

    /// Credits each candidate's bounty account and takes the total out of
    /// the reward pool.
    fn add_candidates_bounty(&self, shares: &HashMap<Address, u128>) -> Result<(), String>;

    /// Returns the state root after the pending reward mutations.
    fn state_root(&self) -> H256;
}

/// Observer notified when the elected roster changes.
#[async_trait]
pub trait WitnessListNotifier: Send + Sync {
    /// Called with the node endpoints of the incoming roster.
    async fn witness_list_changed(&self, urls: Vec<String>);
}

/// Errors from block production and header verification.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The referenced block does not exist, or the operation targets genesis
    #[error("unknown block")]
    UnknownBlock,

    /// Extra data is not exactly the refresh stamp
    #[error("extra data must hold an 8 byte refresh stamp, got {0} bytes")]
    InvalidExtra(usize),

    /// Non-genesis difficulty differs from one
    #[error("difficulty must be one, got {0}")]
    InvalidDifficulty(u64),

    /// The parent header is unknown or does not line up
    #[error("unknown ancestor {hash} at height {number}")]
    UnknownAncestor {
        /// Hash the header points at
        hash: H256,
        /// Expected parent height
        number: u64,
    },

    /// The parent is not imported yet; production should retry shortly
    #[error("parent {hash} at height {number} is not imported yet")]
    PendingParent {
        /// Hash of the missing parent
        hash: H256,
        /// Height of the missing parent
        number: u64,
    },

    /// Timestamp does not land on a production slot after the parent
    #[error("timestamp {time} is not a production slot after parent time {parent_time}")]
    InvalidTimestamp {
        /// Header timestamp
        time: u64,
        /// Parent timestamp
        parent_time: u64,
    },

    /// Gas limit exceeds the protocol ceiling
    #[error("gas limit {0} exceeds the protocol ceiling")]
    GasLimitTooHigh(u64),

    /// Gas used exceeds the gas limit
    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsedExceedsLimit {
        /// Gas used by the block
        used: u64,
        /// Gas limit of the block
        limit: u64,
    },

    /// Gas limit drifts too far from the parent's
    #[error("gas limit {limit} strays too far from parent limit {parent_limit}")]
    GasLimitOutOfBounds {
        /// Gas limit of the block
        limit: u64,
        /// Gas limit of the parent
        parent_limit: u64,
    },

    /// Header roster size differs from the configured witness count
    #[error("header carries {got} witnesses, expected {expected}")]
    WitnessCount {
        /// Witnesses in the header
        got: usize,
        /// Configured roster size
        expected: usize,
    },

    /// The seal recovers to someone other than the coinbase
    #[error("header sealed by {signer}, coinbase is {coinbase}")]
    InvalidCoinbase {
        /// Address recovered from the seal
        signer: Address,
        /// Coinbase the header claims
        coinbase: Address,
    },

    /// The producer does not own the production slot
    #[error("witness {0} is out of turn")]
    OutOfTurn(Address),

    /// Header roster does not match the one derived from the electorate
    #[error("witness roster does not match the electorate")]
    WitnessMismatch,

    /// A parent's extra data carries no decodable refresh stamp
    #[error("no refresh stamp in the extra data of header {number}")]
    MissingRefreshStamp {
        /// Height of the offending header
        number: u64,
    },

    /// A refreshing header does not stamp its own time
    #[error("header {number} does not stamp its refresh time")]
    RefreshStampMismatch {
        /// Height of the offending header
        number: u64,
    },

    /// A non-refreshing header does not carry over the parent stamp
    #[error("header {number} does not carry over the parent refresh stamp")]
    ExtraMismatch {
        /// Height of the offending header
        number: u64,
    },

    /// An embedded commit vote cites a different block
    #[error("commit vote does not cite block {number}")]
    ForeignCommitVote {
        /// Height of the block under check
        number: u64,
    },

    /// An embedded commit vote comes from outside the roster
    #[error("commit voter {0} is outside the roster")]
    CommitVoterUnknown(Address),

    /// Too few distinct voters behind the embedded finality proof
    #[error("{got} distinct commit voters, quorum is {need}")]
    InsufficientCommits {
        /// Distinct valid voters found
        got: usize,
        /// Quorum for the roster
        need: usize,
    },

    /// Signing or signature recovery failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The election store refused a reward mutation
    #[error("bounty accounting failed: {0}")]
    Bounty(String),
}

#[derive(Debug, Default, Clone, Copy)]
struct BountyMark {
    bounty_height: u64,
    update_height: u64,
}

#[derive(Debug, thiserror::Error)]
enum PreviousWitnessError {
    #[error("no earlier block was produced by a roster member")]
    NoneInRoster,
    #[error("header {hash} at height {number} is not available")]
    MissingHeader { hash: H256, number: u64 },
}

/// The witness rotation engine.
///
/// Generic over the chain it reads (`C`), the election state it settles
/// rewards against (`E`), the roster change observer (`L`) and the three
/// seams of the voting rounds (`N`, `V`, `W`).
pub struct DposEngine<C, E, L, N, V, W> {
    config: DposConfig,
    coinbase: Address,
    key: PrivateKey,
    pub(crate) chain: Arc<C>,
    election: Arc<E>,
    notifier: Option<Arc<L>>,
    pub(crate) bft: Arc<BftManager<N, V, W>>,
    sig_cache: Arc<SignatureCache>,
    /// Seconds between roster refreshes; adjustable at runtime.
    update_interval: AtomicU64,
    /// Last known roster refresh height, so reward settlement does not walk
    /// the chain on every block.
    bounty_mark: RwLock<BountyMark>,
}

impl<C, E, L, N, V, W> DposEngine<C, E, L, N, V, W>
where
    C: ChainReader,
    E: ElectionStore,
    L: WitnessListNotifier,
    N: ConsensusNetwork + 'static,
    V: BlockVerifier + 'static,
    W: BlockWriter + 'static,
{
    /// Creates an engine producing as the address behind `key`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DposConfig,
        key: PrivateKey,
        chain: Arc<C>,
        election: Arc<E>,
        notifier: Option<Arc<L>>,
        network: Arc<N>,
        verifier: Arc<V>,
        writer: Arc<W>,
    ) -> Self {
        let coinbase = Address::new(key.public_key().to_address());
        let sig_cache = Arc::new(SignatureCache::new());
        let bft = Arc::new(BftManager::new(
            coinbase,
            key.clone(),
            quorum(config.witnesses_num as usize),
            network,
            verifier,
            writer,
            Arc::clone(&sig_cache),
        ));
        let update_interval = AtomicU64::new(config.update_interval());

        Self {
            config,
            coinbase,
            key,
            chain,
            election,
            notifier,
            bft,
            sig_cache,
            update_interval,
            bounty_mark: RwLock::new(BountyMark::default()),
        }
    }

    /// Returns the address this engine produces and votes as.
    pub fn coinbase(&self) -> Address {
        self.coinbase
    }

    /// Verifies a single header against the imported chain.
    pub fn verify_header(&self, header: &BlockHeader) -> Result<(), EngineError> {
        self.verify_header_against(header, &[])
    }

    /// Verifies a batch of headers in order.
    ///
    /// Each header may use the ones before it in the batch as ancestors, so
    /// a straight segment verifies even before any of it is imported.
    pub fn verify_headers(&self, headers: &[BlockHeader]) -> Vec<Result<(), EngineError>> {
        headers
            .iter()
            .enumerate()
            .map(|(i, header)| self.verify_header_against(header, &headers[..i]))
            .collect()
    }

    fn verify_header_against(
        &self,
        header: &BlockHeader,
        parents: &[BlockHeader],
    ) -> Result<(), EngineError> {
        if header.extra.len() != UPDATE_TIME_LEN {
            return Err(EngineError::InvalidExtra(header.extra.len()));
        }
        if header.number > 0 && header.difficulty != 1 {
            return Err(EngineError::InvalidDifficulty(header.difficulty));
        }
        self.verify_cascading_fields(header, parents)
    }

    fn verify_cascading_fields(
        &self,
        header: &BlockHeader,
        parents: &[BlockHeader],
    ) -> Result<(), EngineError> {
        if header.number == 0 {
            return Ok(());
        }

        let parent = match parents.last() {
            Some(parent) => Some(parent.clone()),
            None => self.chain.header(&header.parent_hash, header.number - 1),
        };
        let parent = match parent {
            Some(p) if p.number + 1 == header.number && p.hash() == header.parent_hash => p,
            _ => {
                return Err(EngineError::UnknownAncestor {
                    hash: header.parent_hash,
                    number: header.number - 1,
                })
            }
        };

        if header.time <= parent.time || (header.time - parent.time) % self.config.period != 0 {
            warn!(
                number = header.number,
                time = header.time,
                parent_time = parent.time,
                "header timestamp off the production grid"
            );
            return Err(EngineError::InvalidTimestamp {
                time: header.time,
                parent_time: parent.time,
            });
        }

        if header.gas_limit > MAX_GAS_LIMIT {
            return Err(EngineError::GasLimitTooHigh(header.gas_limit));
        }
        if header.gas_used > header.gas_limit {
            return Err(EngineError::GasUsedExceedsLimit {
                used: header.gas_used,
                limit: header.gas_limit,
            });
        }
        let drift = parent.gas_limit.abs_diff(header.gas_limit);
        let bound = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
        if drift >= bound || header.gas_limit < MIN_GAS_LIMIT {
            return Err(EngineError::GasLimitOutOfBounds {
                limit: header.gas_limit,
                parent_limit: parent.gas_limit,
            });
        }

        if header.witnesses.len() != self.config.witnesses_num as usize {
            return Err(EngineError::WitnessCount {
                got: header.witnesses.len(),
                expected: self.config.witnesses_num as usize,
            });
        }

        self.verify_seal_against(header, parents)
    }

    /// Recovers the producer from the seal and checks it owns the slot.
    pub fn verify_seal(&self, header: &BlockHeader) -> Result<(), EngineError> {
        self.verify_seal_against(header, &[])
    }

    fn verify_seal_against(
        &self,
        header: &BlockHeader,
        parents: &[BlockHeader],
    ) -> Result<(), EngineError> {
        if header.number == 0 {
            return Err(EngineError::UnknownBlock);
        }

        let signer = self.sig_cache.recover(header)?;
        if signer != header.coinbase {
            return Err(EngineError::InvalidCoinbase {
                signer,
                coinbase: header.coinbase,
            });
        }
        if !self.in_turn(header, &signer, parents) {
            return Err(EngineError::OutOfTurn(signer));
        }
        Ok(())
    }

    /// Decides whether `witness` owns the production slot of `header`.
    ///
    /// Walks back to the most recent ancestor produced by a roster member
    /// and lets the rotation schedule judge the distance. Headers whose
    /// ancestry holds no roster member at all fall back to the roster head,
    /// as does block one.
    fn in_turn(&self, header: &BlockHeader, witness: &Address, parents: &[BlockHeader]) -> bool {
        let roster = &header.witnesses;
        if roster.is_empty() {
            warn!(number = header.number, "header carries no witness roster");
            return false;
        }
        if header.number == 1 {
            return roster.first() == Some(witness);
        }

        let lookup = |hash: &H256, number: u64| {
            parents
                .iter()
                .rev()
                .find(|p| p.number == number && p.hash() == *hash)
                .cloned()
                .or_else(|| self.chain.header(hash, number))
        };
        match previous_witness(roster, header.parent_hash, header.number - 1, &lookup) {
            Ok((prev_witness, prev_time)) => {
                let schedule = RotationManager::new(roster.clone(), self.config.period);
                schedule.in_turn(*witness, prev_witness, header.time, prev_time)
            }
            Err(PreviousWitnessError::NoneInRoster) => roster.first() == Some(witness),
            Err(e) => {
                warn!(number = header.number, error = %e, "previous producer not resolved");
                false
            }
        }
    }

    /// Prepares `header` for production by this node.
    ///
    /// Fills coinbase, difficulty, timestamp, roster and refresh stamp, and
    /// opens the voting round the sealed block will be proposed in. Fails
    /// with [`EngineError::OutOfTurn`] when another witness owns the slot
    /// and with [`EngineError::PendingParent`] when the parent has not been
    /// imported; both mean try again at a later slot.
    pub async fn prepare(&self, header: &mut BlockHeader) -> Result<(), EngineError> {
        if header.number == 0 {
            return Err(EngineError::UnknownBlock);
        }
        header.coinbase = self.coinbase;
        header.difficulty = 1;

        let parent = self
            .chain
            .header(&header.parent_hash, header.number - 1)
            .ok_or(EngineError::PendingParent {
                hash: header.parent_hash,
                number: header.number - 1,
            })?;

        let (slot_time, n_period) = next_produce_slot(parent.time, unix_now(), self.config.period);
        header.time = slot_time;

        let (updated, witnesses) = self.witnesses_for_produce(header, &parent).await?;
        header.witnesses = witnesses.clone();

        // Rounds count the production slots since the parent, so a sealing
        // attempt at a later slot lands in a fresh round.
        let round = (n_period - 1) as u32;
        self.bft.set_block_round(round);
        let bft = Arc::clone(&self.bft);
        tokio::spawn(bft.new_round(header.number, round, witnesses));

        if !self.in_turn(header, &self.coinbase, &[]) {
            return Err(EngineError::OutOfTurn(self.coinbase));
        }

        header.extra = if needs_refresh_stamp(updated, header.number) {
            encode_update_time(header.time).to_vec()
        } else {
            parent.extra.clone()
        };
        Ok(())
    }

    /// Settles rewards, roots the header and assembles the final block.
    pub fn finalize(
        &self,
        header: &mut BlockHeader,
        transactions: Vec<Vec<u8>>,
    ) -> Result<Block, EngineError> {
        self.accumulate_rewards(header)?;
        header.state_root = self.election.state_root();

        let mut block = Block::new(header.clone(), transactions);
        let tx_root = block.compute_transactions_root();
        block.header.tx_root = tx_root;
        header.tx_root = tx_root;
        Ok(block)
    }

    /// Signs the block and proposes it to the voting round.
    ///
    /// Returns no block: the sealed block only reaches the chain through
    /// the round's write path, once a commit quorum stands behind it.
    pub async fn seal(&self, block: Block) -> Result<(), EngineError> {
        if block.number() == 0 {
            return Err(EngineError::UnknownBlock);
        }

        let header = block.header.clone();
        let signature = self
            .key
            .sign_prehash(header.seal_hash().as_fixed_bytes())
            .map_err(SigningError::from)?;
        let sealed = header.with_signature(signature.to_bytes().to_vec());

        info!(number = sealed.number, hash = %sealed.hash(), "sealing block");
        let bft = Arc::clone(&self.bft);
        bft.start_preprepare(block.with_seal(sealed)).await;
        Ok(())
    }

    /// Routes an inbound consensus message into the voting round.
    pub async fn handle_consensus_message(&self, msg: ConsensusMessage) -> Result<(), BftError> {
        self.bft.handle_message(msg).await
    }

    /// Re-derives the roster `header` should carry and compares.
    ///
    /// A refreshing header must stamp its own time into extra data; any
    /// other header must carry its parent's stamp over unchanged.
    pub fn verify_witnesses(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
    ) -> Result<(), EngineError> {
        let (updated, witnesses, _) = self.witness_roster(header, parent)?;
        if witnesses.len() != header.witnesses.len() {
            return Err(EngineError::WitnessMismatch);
        }

        if needs_refresh_stamp(updated, header.number) {
            if !is_roster_refresh(header) {
                return Err(EngineError::RefreshStampMismatch {
                    number: header.number,
                });
            }
        } else if header.extra != parent.extra {
            return Err(EngineError::ExtraMismatch {
                number: header.number,
            });
        }

        if witnesses != header.witnesses {
            return Err(EngineError::WitnessMismatch);
        }
        Ok(())
    }

    /// Checks the finality proof embedded in a stored block.
    ///
    /// Every embedded vote must cite this block, recover to its claimed
    /// voter and come from the header roster; the distinct voters must
    /// reach the roster quorum.
    pub fn verify_commits(&self, block: &Block) -> Result<(), EngineError> {
        let header = &block.header;
        let roster: HashSet<Address> = header.witnesses.iter().copied().collect();
        let need = quorum(header.witnesses.len());
        let block_hash = header.hash();

        let mut voters = HashSet::new();
        for vote in &header.commit_votes {
            if vote.block_hash != block_hash || vote.block_number != header.number {
                return Err(EngineError::ForeignCommitVote {
                    number: header.number,
                });
            }
            let voter = commit_voter(vote)?;
            if !roster.contains(&voter) {
                return Err(EngineError::CommitVoterUnknown(voter));
            }
            voters.insert(voter);
        }

        if voters.len() < need {
            return Err(EngineError::InsufficientCommits {
                got: voters.len(),
                need,
            });
        }
        Ok(())
    }

    /// Resumes block production and message handling.
    pub fn start_producing(&self) {
        self.bft.start_producing();
    }

    /// Pauses block production; inbound messages are stashed meanwhile.
    pub fn stop_producing(&self) {
        self.bft.stop_producing();
    }

    /// Sweeps stashed consensus messages below the imported height.
    pub fn clean_old_messages(&self, height: u64) {
        self.bft.clean_old_messages(height);
    }

    /// Overrides the roster refresh interval. The production value comes
    /// from the chain configuration.
    pub fn set_update_interval(&self, secs: u64) {
        self.update_interval.store(secs, Ordering::Relaxed);
    }

    /// Derives the roster for `header` from its parent and the electorate.
    ///
    /// The roster refreshes when a full update interval has passed since
    /// the stamp in the parent's extra data; otherwise the parent roster is
    /// carried over. An unreadable or empty electorate also carries the
    /// parent roster over, unrefreshed.
    fn witness_roster(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
    ) -> Result<(bool, Vec<Address>, Vec<String>), EngineError> {
        let last_refresh = if parent.number == 0 {
            parent.time
        } else {
            decode_update_time(&parent.extra).ok_or(EngineError::MissingRefreshStamp {
                number: parent.number,
            })?
        };

        let interval = self.update_interval.load(Ordering::Relaxed);
        let due = header
            .time
            .checked_sub(last_refresh)
            .map_or(false, |elapsed| elapsed >= interval);
        if !due {
            return Ok((false, parent.witnesses.clone(), Vec::new()));
        }

        match self
            .election
            .top_candidates(self.config.witnesses_num as usize)
        {
            Some((addresses, urls)) if !addresses.is_empty() => Ok((true, addresses, urls)),
            _ => {
                debug!(
                    number = header.number,
                    "electorate empty, carrying the parent roster over"
                );
                Ok((false, parent.witnesses.clone(), Vec::new()))
            }
        }
    }

    async fn witnesses_for_produce(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
    ) -> Result<(bool, Vec<Address>), EngineError> {
        let (updated, witnesses, urls) = self.witness_roster(header, parent)?;
        if updated {
            if let Some(notifier) = &self.notifier {
                notifier.witness_list_changed(urls).await;
            }
        }
        Ok((updated, witnesses))
    }

    /// Settles the producer reward and, at roster refreshes, the vote
    /// bounty accrued since the previous refresh.
    fn accumulate_rewards(&self, header: &BlockHeader) -> Result<(), EngineError> {
        let rest = self.election.remaining_bounty();
        if rest == 0 {
            return Ok(());
        }

        let reward = height_bonus(header.number, BLOCK_REWARD).min(rest);
        let rest = self
            .election
            .grant_bounty(reward)
            .map_err(EngineError::Bounty)?;
        self.election.add_balance(&header.coinbase, reward);

        if is_roster_refresh(header) && rest > 0 {
            let (candidates, pool) = self.vote_bounty_inputs(header);
            let bonus = pool.min(rest);
            debug!(
                number = header.number,
                bonus, "settling vote bounty at roster refresh"
            );
            if let Some(shares) =
                calc_vote_bounty(&candidates, bonus, self.config.witnesses_num as usize)
            {
                self.election
                    .add_candidates_bounty(&shares)
                    .map_err(EngineError::Bounty)?;
            }
        }
        Ok(())
    }

    /// Returns the candidate list and the bounty pool accrued since the
    /// last roster refresh.
    fn vote_bounty_inputs(&self, header: &BlockHeader) -> (Vec<Candidate>, u128) {
        if header.number <= 1 {
            return (Vec::new(), 0);
        }
        let last_refresh = self.last_refresh_height(header);
        if last_refresh >= header.number {
            return (Vec::new(), 0);
        }

        let span = (header.number - last_refresh) as u128;
        let pool = span * height_bonus(header.number, CANDIDATES_BONUS);
        (self.election.candidates(), pool)
    }

    /// Returns the height of the most recent roster refresh, walking
    /// parents from the chain head until a header stamps its own time. The
    /// result is cached per settlement height.
    fn last_refresh_height(&self, header: &BlockHeader) -> u64 {
        {
            let mark = self.bounty_mark.read();
            if mark.update_height >= header.number {
                return mark.bounty_height;
            }
        }

        let mut cursor = self.chain.current_header();
        let mut found = None;
        while let Some(walked) = cursor {
            if is_roster_refresh(&walked) {
                found = Some(walked.number);
                break;
            }
            if walked.number == 0 {
                break;
            }
            cursor = self.chain.header(&walked.parent_hash, walked.number - 1);
        }

        let bounty_height = found.unwrap_or(header.number);
        let mut mark = self.bounty_mark.write();
        mark.bounty_height = bounty_height;
        mark.update_height = header.number;
        bounty_height
    }
}

/// Walks back from `(hash, number)` to the first header produced by a
/// roster member and returns its producer and timestamp.
fn previous_witness<F>(
    roster: &[Address],
    mut hash: H256,
    mut number: u64,
    lookup: &F,
) -> Result<(Address, u64), PreviousWitnessError>
where
    F: Fn(&H256, u64) -> Option<BlockHeader>,
{
    loop {
        if number == 0 {
            return Err(PreviousWitnessError::NoneInRoster);
        }
        let header =
            lookup(&hash, number).ok_or(PreviousWitnessError::MissingHeader { hash, number })?;
        if roster.contains(&header.coinbase) {
            return Ok((header.coinbase, header.time));
        }
        hash = header.parent_hash;
        number -= 1;
    }
}

/// Encodes a roster refresh timestamp as header extra data.
pub fn encode_update_time(time: u64) -> [u8; UPDATE_TIME_LEN] {
    time.to_be_bytes()
}

/// Decodes the roster refresh timestamp from header extra data.
pub fn decode_update_time(extra: &[u8]) -> Option<u64> {
    let bytes: [u8; UPDATE_TIME_LEN] = extra.get(..UPDATE_TIME_LEN)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Checks whether `header` refreshed the roster, which it marks by
/// stamping its own timestamp into extra data.
pub fn is_roster_refresh(header: &BlockHeader) -> bool {
    decode_update_time(&header.extra) == Some(header.time)
}

/// Decides whether a header must stamp its own time: any header that
/// refreshed the roster, and block one, which seeds the first stamp.
pub fn needs_refresh_stamp(updated: bool, number: u64) -> bool {
    updated || number == 1
}

/// Returns the reward base adjusted for the height's reward stage.
pub fn height_bonus(number: u64, base: u128) -> u128 {
    if number < STAGE_TWO_HEIGHT {
        base
    } else if number < STAGE_THREE_HEIGHT {
        base / 2
    } else {
        base / 4
    }
}

/// Splits `bonus` across the active candidates pro rata by votes.
///
/// Returns `None` when fewer than `witnesses_num` candidates are active or
/// when no active candidate holds any votes; the bounty then stays in the
/// pool. Zero shares are omitted from the result.
pub fn calc_vote_bounty(
    candidates: &[Candidate],
    bonus: u128,
    witnesses_num: usize,
) -> Option<HashMap<Address, u128>> {
    let mut total_votes: u128 = 0;
    let mut active = 0usize;
    for candidate in candidates {
        if candidate.active {
            total_votes = total_votes.saturating_add(candidate.votes);
            active += 1;
        }
    }
    if active < witnesses_num || total_votes == 0 {
        return None;
    }

    let mut shares = HashMap::new();
    for candidate in candidates.iter().filter(|c| c.active) {
        // The product can overflow 128 bits at token scale; fall back to
        // dividing first.
        let share = match bonus.checked_mul(candidate.votes) {
            Some(product) => product / total_votes,
            None => (bonus / total_votes).saturating_mul(candidate.votes),
        };
        if share > 0 {
            shares.insert(candidate.owner, share);
        }
    }
    Some(shares)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
