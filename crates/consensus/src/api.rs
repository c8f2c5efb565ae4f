//! Inspection endpoints backing the node's RPC surface.
//!
//! Everything here is read only: rosters of stored headers, plus a live
//! snapshot of the voting round for operators and debugging tools.

use crate::bft::{BlockVerifier, BlockWriter, ConsensusNetwork};
use crate::engine::{ChainReader, DposEngine, ElectionStore, EngineError, WitnessListNotifier};
use crate::types::Step;
use meridian_types::{Address, CommitMsg, ConsensusMessage, PrepareMsg, PreprepareMsg, H256};

impl<C, E, L, N, V, W> DposEngine<C, E, L, N, V, W>
where
    C: ChainReader,
    E: ElectionStore,
    L: WitnessListNotifier,
    N: ConsensusNetwork + 'static,
    V: BlockVerifier + 'static,
    W: BlockWriter + 'static,
{
    /// Returns the witness roster of the header at `number`, or of the
    /// chain head when `number` is `None`.
    pub fn signers_at(&self, number: Option<u64>) -> Result<Vec<Address>, EngineError> {
        let header = match number {
            Some(number) => self.chain.header_by_number(number),
            None => self.chain.current_header(),
        };
        header.map(|h| h.witnesses).ok_or(EngineError::UnknownBlock)
    }

    /// Returns the witness roster of the header with the given hash.
    pub fn signers_at_hash(&self, hash: &H256) -> Result<Vec<Address>, EngineError> {
        self.chain
            .header_by_hash(hash)
            .map(|h| h.witnesses)
            .ok_or(EngineError::UnknownBlock)
    }

    /// Returns the step the live voting round is in.
    pub fn current_step(&self) -> Step {
        self.bft.step()
    }

    /// Returns the height the live voting round votes on.
    pub async fn current_height(&self) -> u64 {
        self.bft.height().await
    }

    /// Returns the round number within the current height.
    pub async fn current_round(&self) -> u32 {
        self.bft.round().await
    }

    /// Returns the proposal of the live round, if one has arrived.
    pub async fn round_preprepare(&self) -> Option<PreprepareMsg> {
        self.bft.current_preprepare().await
    }

    /// Returns the prepare votes gathered by the live round.
    pub async fn round_prepares(&self) -> Vec<PrepareMsg> {
        self.bft.current_prepares().await
    }

    /// Returns the commit votes gathered by the live round.
    pub async fn round_commits(&self) -> Vec<CommitMsg> {
        self.bft.current_commits().await
    }

    /// Returns every message of the live round in protocol order.
    pub async fn round_messages(&self) -> Vec<ConsensusMessage> {
        self.bft.current_messages().await
    }
}
