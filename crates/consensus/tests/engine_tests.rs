//! Tests for the production engine against an in-memory chain.
//!
//! Covers:
//! - Header verification, single and batched, with every structural check
//! - Slot ownership through the rotation walk over imported ancestors
//! - Block preparation, reward settlement and sealing
//! - Roster refresh stamping and the carry-over rules
//! - The finality proof check on stored blocks
//! - The read-only inspection endpoints

use async_trait::async_trait;
use meridian_config::DposConfig;
use meridian_consensus::{
    encode_update_time, make_commit, BlockVerifier, BlockWriter, Candidate, ChainReader,
    ConsensusNetwork, DposEngine, ElectionStore, EngineError, SignatureCache, Step,
    WitnessListNotifier, BLOCK_REWARD, CANDIDATES_BONUS,
};
use meridian_crypto::PrivateKey;
use meridian_types::{Address, Block, BlockHeader, ConsensusMessage, H256};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Matches `DposConfig::default()`.
const PERIOD: u64 = 2;

#[derive(Default)]
struct StaticChain {
    headers: RwLock<HashMap<H256, BlockHeader>>,
    head: RwLock<Option<BlockHeader>>,
}

impl StaticChain {
    fn insert(&self, header: BlockHeader) {
        *self.head.write() = Some(header.clone());
        self.headers.write().insert(header.hash(), header);
    }
}

impl ChainReader for StaticChain {
    fn current_header(&self) -> Option<BlockHeader> {
        self.head.read().clone()
    }

    fn header(&self, hash: &H256, number: u64) -> Option<BlockHeader> {
        self.headers
            .read()
            .get(hash)
            .filter(|h| h.number == number)
            .cloned()
    }

    fn header_by_number(&self, number: u64) -> Option<BlockHeader> {
        self.headers
            .read()
            .values()
            .find(|h| h.number == number)
            .cloned()
    }

    fn header_by_hash(&self, hash: &H256) -> Option<BlockHeader> {
        self.headers.read().get(hash).cloned()
    }
}

#[derive(Default)]
struct TestElection {
    top: Mutex<Option<(Vec<Address>, Vec<String>)>>,
    candidates: Mutex<Vec<Candidate>>,
    bounty: Mutex<u128>,
    balances: Mutex<HashMap<Address, u128>>,
    candidate_bounty: Mutex<HashMap<Address, u128>>,
}

impl TestElection {
    fn with_bounty(bounty: u128) -> Self {
        let election = Self::default();
        *election.bounty.lock() = bounty;
        election
    }
}

impl ElectionStore for TestElection {
    fn top_candidates(&self, count: usize) -> Option<(Vec<Address>, Vec<String>)> {
        self.top.lock().clone().map(|(addresses, urls)| {
            (
                addresses.into_iter().take(count).collect(),
                urls.into_iter().take(count).collect(),
            )
        })
    }

    fn candidates(&self) -> Vec<Candidate> {
        self.candidates.lock().clone()
    }

    fn remaining_bounty(&self) -> u128 {
        *self.bounty.lock()
    }

    fn grant_bounty(&self, amount: u128) -> Result<u128, String> {
        let mut bounty = self.bounty.lock();
        *bounty = bounty
            .checked_sub(amount)
            .ok_or_else(|| "bounty pool exhausted".to_string())?;
        Ok(*bounty)
    }

    fn add_balance(&self, address: &Address, amount: u128) {
        *self.balances.lock().entry(*address).or_default() += amount;
    }

    fn add_candidates_bounty(&self, shares: &HashMap<Address, u128>) -> Result<(), String> {
        let total: u128 = shares.values().sum();
        {
            let mut bounty = self.bounty.lock();
            *bounty = bounty
                .checked_sub(total)
                .ok_or_else(|| "bounty pool exhausted".to_string())?;
        }
        let mut credit = self.candidate_bounty.lock();
        for (owner, share) in shares {
            *credit.entry(*owner).or_default() += *share;
        }
        Ok(())
    }

    fn state_root(&self) -> H256 {
        H256::keccak256(b"state")
    }
}

#[derive(Default)]
struct RecordingNotifier {
    updates: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl WitnessListNotifier for RecordingNotifier {
    async fn witness_list_changed(&self, urls: Vec<String>) {
        self.updates.lock().push(urls);
    }
}

#[derive(Default)]
struct RecordingNetwork {
    sent: Mutex<Vec<ConsensusMessage>>,
}

#[async_trait]
impl ConsensusNetwork for RecordingNetwork {
    async fn broadcast_message(&self, msg: ConsensusMessage) {
        self.sent.lock().push(msg);
    }

    async fn request_sync(&self, _height: u64) {}
}

struct AcceptingVerifier;

#[async_trait]
impl BlockVerifier for AcceptingVerifier {
    async fn verify_block(&self, _block: &Block) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingWriter {
    written: Mutex<Vec<Block>>,
}

#[async_trait]
impl BlockWriter for RecordingWriter {
    async fn write_block(&self, block: &Block) -> Result<(), String> {
        self.written.lock().push(block.clone());
        Ok(())
    }
}

type TestEngine = DposEngine<
    StaticChain,
    TestElection,
    RecordingNotifier,
    RecordingNetwork,
    AcceptingVerifier,
    RecordingWriter,
>;

fn engine_with(
    key: &PrivateKey,
    chain: Arc<StaticChain>,
    election: Arc<TestElection>,
) -> (
    TestEngine,
    Arc<RecordingNotifier>,
    Arc<RecordingNetwork>,
    Arc<RecordingWriter>,
) {
    let notifier = Arc::new(RecordingNotifier::default());
    let network = Arc::new(RecordingNetwork::default());
    let writer = Arc::new(RecordingWriter::default());
    let engine = DposEngine::new(
        DposConfig::default(),
        key.clone(),
        chain,
        election,
        Some(Arc::clone(&notifier)),
        Arc::clone(&network),
        Arc::new(AcceptingVerifier),
        Arc::clone(&writer),
    );
    (engine, notifier, network, writer)
}

fn witness_set(n: usize) -> (Vec<PrivateKey>, Vec<Address>) {
    let keys: Vec<PrivateKey> = (0..n).map(|_| PrivateKey::random()).collect();
    let roster = keys
        .iter()
        .map(|k| Address::new(k.public_key().to_address()))
        .collect();
    (keys, roster)
}

fn addr_of(key: &PrivateKey) -> Address {
    Address::new(key.public_key().to_address())
}

fn genesis(time: u64, roster: &[Address]) -> BlockHeader {
    BlockHeader::genesis(time, roster.to_vec()).with_extra(encode_update_time(time).to_vec())
}

/// An unsealed header `slots` production slots after `parent`, stamping its
/// own time at block one and carrying the parent stamp otherwise.
fn child_header(
    parent: &BlockHeader,
    producer: &PrivateKey,
    slots: u64,
    roster: &[Address],
) -> BlockHeader {
    let time = parent.time + slots * PERIOD;
    let mut header = BlockHeader::new(parent.number + 1, time, parent.hash(), addr_of(producer));
    header.witnesses = roster.to_vec();
    header.extra = if header.number == 1 {
        encode_update_time(time).to_vec()
    } else {
        parent.extra.clone()
    };
    header
}

fn sealed(header: BlockHeader, key: &PrivateKey) -> BlockHeader {
    let signature = key
        .sign_prehash(header.seal_hash().as_fixed_bytes())
        .unwrap();
    header.with_signature(signature.to_bytes().to_vec())
}

fn sealed_child(
    parent: &BlockHeader,
    producer: &PrivateKey,
    slots: u64,
    roster: &[Address],
) -> BlockHeader {
    sealed(child_header(parent, producer, slots, roster), producer)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[test]
fn test_verify_header_accepts_a_straight_chain() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    let g = genesis(1_700_000_000, &roster);
    chain.insert(g.clone());

    // Each header one slot after its parent, rotating through the roster.
    let h1 = sealed_child(&g, &keys[0], 1, &roster);
    engine.verify_header(&h1).unwrap();
    chain.insert(h1.clone());

    let h2 = sealed_child(&h1, &keys[1], 1, &roster);
    engine.verify_header(&h2).unwrap();
    chain.insert(h2.clone());

    let h3 = sealed_child(&h2, &keys[2], 1, &roster);
    engine.verify_header(&h3).unwrap();
}

#[test]
fn test_verify_headers_uses_the_batch_as_ancestry() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    let g = genesis(1_700_000_000, &roster);
    chain.insert(g.clone());

    // Only the genesis is imported; the segment must carry itself.
    let h1 = sealed_child(&g, &keys[0], 1, &roster);
    let h2 = sealed_child(&h1, &keys[1], 1, &roster);
    let h3 = sealed_child(&h2, &keys[2], 1, &roster);

    let results = engine.verify_headers(&[h1, h2, h3]);
    assert_eq!(results.len(), 3);
    for result in results {
        result.unwrap();
    }
}

#[test]
fn test_verify_header_checks_structure() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    let g = genesis(1_700_000_000, &roster);
    chain.insert(g.clone());

    let mut header = child_header(&g, &keys[0], 1, &roster);
    header.extra = vec![0; 4];
    assert!(matches!(
        engine.verify_header(&sealed(header, &keys[0])),
        Err(EngineError::InvalidExtra(4))
    ));

    let mut header = child_header(&g, &keys[0], 1, &roster);
    header.difficulty = 2;
    assert!(matches!(
        engine.verify_header(&sealed(header, &keys[0])),
        Err(EngineError::InvalidDifficulty(2))
    ));

    // The parent was never imported.
    let orphan_parent = child_header(&g, &keys[0], 1, &roster);
    let orphan = sealed_child(&orphan_parent, &keys[1], 1, &roster);
    assert!(matches!(
        engine.verify_header(&orphan),
        Err(EngineError::UnknownAncestor { number: 1, .. })
    ));

    // Timestamps must move forward and land on the production grid.
    let mut header = child_header(&g, &keys[0], 1, &roster);
    header.time = g.time;
    assert!(matches!(
        engine.verify_header(&sealed(header, &keys[0])),
        Err(EngineError::InvalidTimestamp { .. })
    ));
    let mut header = child_header(&g, &keys[0], 1, &roster);
    header.time = g.time + PERIOD + 1;
    assert!(matches!(
        engine.verify_header(&sealed(header, &keys[0])),
        Err(EngineError::InvalidTimestamp { .. })
    ));

    let short_roster = &roster[..3];
    let header = sealed_child(&g, &keys[0], 1, short_roster);
    assert!(matches!(
        engine.verify_header(&header),
        Err(EngineError::WitnessCount {
            got: 3,
            expected: 4
        })
    ));
}

#[test]
fn test_verify_header_checks_gas_bounds() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    let g = genesis(1_700_000_000, &roster);
    chain.insert(g.clone());

    let mut header = child_header(&g, &keys[0], 1, &roster);
    header.gas_limit = u64::MAX;
    assert!(matches!(
        engine.verify_header(&sealed(header, &keys[0])),
        Err(EngineError::GasLimitTooHigh(_))
    ));

    let mut header = child_header(&g, &keys[0], 1, &roster);
    header.gas_used = header.gas_limit + 1;
    assert!(matches!(
        engine.verify_header(&sealed(header, &keys[0])),
        Err(EngineError::GasUsedExceedsLimit { .. })
    ));

    // One part in 1024 is the widest allowed drift from the parent limit.
    let mut header = child_header(&g, &keys[0], 1, &roster);
    header.gas_limit = g.gas_limit + g.gas_limit / 512;
    assert!(matches!(
        engine.verify_header(&sealed(header, &keys[0])),
        Err(EngineError::GasLimitOutOfBounds { .. })
    ));
}

#[test]
fn test_verify_seal_recovers_the_producer() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    let g = genesis(1_700_000_000, &roster);
    chain.insert(g.clone());

    // Sealed by one witness while the header claims another.
    let header = sealed(child_header(&g, &keys[0], 1, &roster), &keys[1]);
    assert!(matches!(
        engine.verify_header(&header),
        Err(EngineError::InvalidCoinbase { .. })
    ));

    // Block one belongs to the roster head.
    let header = sealed_child(&g, &keys[1], 1, &roster);
    assert!(matches!(
        engine.verify_header(&header),
        Err(EngineError::OutOfTurn(_))
    ));

    assert!(matches!(
        engine.verify_seal(&g),
        Err(EngineError::UnknownBlock)
    ));
}

#[test]
fn test_rotation_skips_an_absent_witness() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    let g = genesis(1_700_000_000, &roster);
    chain.insert(g.clone());
    let h1 = sealed_child(&g, &keys[0], 1, &roster);
    chain.insert(h1.clone());

    // One slot later the next witness owns the slot, nobody else.
    engine
        .verify_header(&sealed_child(&h1, &keys[1], 1, &roster))
        .unwrap();
    assert!(matches!(
        engine.verify_header(&sealed_child(&h1, &keys[2], 1, &roster)),
        Err(EngineError::OutOfTurn(_))
    ));

    // When that witness misses its slot, the one after inherits the next.
    engine
        .verify_header(&sealed_child(&h1, &keys[2], 2, &roster))
        .unwrap();
}

#[tokio::test]
async fn test_prepare_fills_the_header() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    // A future-dated genesis pins the next slot to one period after it,
    // regardless of when the test runs.
    let g = genesis(unix_now() + 1_000, &roster);
    chain.insert(g.clone());

    let mut header = BlockHeader::new(1, 0, g.hash(), Address::ZERO);
    engine.prepare(&mut header).await.unwrap();

    assert_eq!(header.coinbase, addr_of(&keys[0]));
    assert_eq!(header.difficulty, 1);
    assert_eq!(header.time, g.time + PERIOD);
    assert_eq!(header.witnesses, roster);
    // Block one seeds the refresh stamp with its own time.
    assert_eq!(header.extra, encode_update_time(header.time).to_vec());

    // Preparation opened the voting round for this height.
    settle().await;
    assert_eq!(engine.current_height().await, 1);
    assert_eq!(engine.current_round().await, 0);
    assert!(engine.round_preprepare().await.is_none());
}

#[tokio::test]
async fn test_prepare_rejects_the_wrong_slot() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());

    let g = genesis(unix_now() + 1_000, &roster);
    chain.insert(g.clone());

    // Block one belongs to the roster head, which this node is not.
    let (engine, _, _, _) = engine_with(&keys[1], Arc::clone(&chain), Arc::default());
    let mut header = BlockHeader::new(1, 0, g.hash(), Address::ZERO);
    assert!(matches!(
        engine.prepare(&mut header).await,
        Err(EngineError::OutOfTurn(_))
    ));

    // A parent that has not been imported yet is retried, not fatal.
    let mut header = BlockHeader::new(2, 0, H256::keccak256(b"missing"), Address::ZERO);
    assert!(matches!(
        engine.prepare(&mut header).await,
        Err(EngineError::PendingParent { number: 1, .. })
    ));
}

#[tokio::test]
async fn test_prepare_refreshes_an_overdue_roster() {
    let (keys, roster) = witness_set(4);
    let (_, fresh) = witness_set(3);
    let chain = Arc::new(StaticChain::default());
    let election = Arc::new(TestElection::default());
    let (engine, notifier, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::clone(&election));

    let g = genesis(unix_now() + 1_000, &roster);
    chain.insert(g.clone());

    // The electorate moved: this node stays in front, the rest are new.
    let incoming = vec![addr_of(&keys[0]), fresh[0], fresh[1], fresh[2]];
    let urls: Vec<String> = (0..4).map(|i| format!("enode://witness-{i}")).collect();
    *election.top.lock() = Some((incoming.clone(), urls.clone()));
    // One slot is enough to make the refresh due.
    engine.set_update_interval(1);

    let mut header = BlockHeader::new(1, 0, g.hash(), Address::ZERO);
    engine.prepare(&mut header).await.unwrap();

    assert_eq!(header.witnesses, incoming);
    assert_eq!(header.extra, encode_update_time(header.time).to_vec());
    assert_eq!(notifier.updates.lock().as_slice(), &[urls]);
}

#[test]
fn test_verify_witnesses_checks_the_handoff() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let election = Arc::new(TestElection::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::clone(&election));

    let g = genesis(1_700_000_000, &roster);
    let h1 = sealed_child(&g, &keys[0], 1, &roster);

    // Between refreshes the roster and the stamp carry over unchanged.
    let h2 = child_header(&h1, &keys[1], 1, &roster);
    engine.verify_witnesses(&h2, &h1).unwrap();

    // A header stamping its own time without a due refresh does not verify.
    let mut stamped = h2.clone();
    stamped.extra = encode_update_time(stamped.time).to_vec();
    assert!(matches!(
        engine.verify_witnesses(&stamped, &h1),
        Err(EngineError::ExtraMismatch { number: 2 })
    ));

    // A reordered roster fails even at matching size.
    let mut shuffled = h2.clone();
    shuffled.witnesses.reverse();
    assert!(matches!(
        engine.verify_witnesses(&shuffled, &h1),
        Err(EngineError::WitnessMismatch)
    ));

    // Once the refresh is due the header must stamp its own time.
    *election.top.lock() = Some((roster.clone(), vec![String::new(); 4]));
    engine.set_update_interval(1);
    assert!(matches!(
        engine.verify_witnesses(&h2, &h1),
        Err(EngineError::RefreshStampMismatch { number: 2 })
    ));

    // A parent without a decodable stamp cannot anchor the schedule.
    let mut bare = h1.clone();
    bare.extra = Vec::new();
    assert!(matches!(
        engine.verify_witnesses(&h2, &bare),
        Err(EngineError::MissingRefreshStamp { number: 1 })
    ));
}

#[test]
fn test_finalize_settles_the_producer_reward() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let election = Arc::new(TestElection::with_bounty(9 * BLOCK_REWARD));
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::clone(&election));

    let g = genesis(1_700_000_000, &roster);
    let h1 = sealed_child(&g, &keys[0], 1, &roster);
    // Carries the parent stamp, so no vote bounty settles here.
    let mut h2 = child_header(&h1, &keys[1], 1, &roster);

    let transactions = vec![vec![0xde, 0xad], vec![0xbe, 0xef]];
    let block = engine.finalize(&mut h2, transactions).unwrap();

    assert_eq!(
        election.balances.lock().get(&addr_of(&keys[1])),
        Some(&BLOCK_REWARD)
    );
    assert_eq!(election.remaining_bounty(), 8 * BLOCK_REWARD);
    assert!(election.candidate_bounty.lock().is_empty());

    // The header is rooted and the assembled block agrees with it.
    assert_eq!(h2.state_root, H256::keccak256(b"state"));
    assert_eq!(h2.tx_root, block.header.tx_root);
    assert!(block.validate_transactions_root());
}

#[test]
fn test_finalize_drains_the_last_of_the_pool() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let election = Arc::new(TestElection::with_bounty(BLOCK_REWARD / 2));
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::clone(&election));

    let g = genesis(1_700_000_000, &roster);
    let h1 = sealed_child(&g, &keys[0], 1, &roster);
    let mut h2 = child_header(&h1, &keys[1], 1, &roster);

    engine.finalize(&mut h2, Vec::new()).unwrap();
    assert_eq!(
        election.balances.lock().get(&addr_of(&keys[1])),
        Some(&(BLOCK_REWARD / 2))
    );
    assert_eq!(election.remaining_bounty(), 0);

    // With the pool empty nothing more settles.
    let mut h3 = child_header(&h2, &keys[2], 1, &roster);
    engine.finalize(&mut h3, Vec::new()).unwrap();
    assert_eq!(election.balances.lock().len(), 1);
}

#[test]
fn test_finalize_settles_the_vote_bounty_at_a_refresh() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let election = Arc::new(TestElection::with_bounty(9 * BLOCK_REWARD));
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::clone(&election));

    let voters: Vec<Address> = (1..=5)
        .map(|tag| {
            let mut bytes = [0u8; 20];
            bytes[19] = tag;
            Address::new(bytes)
        })
        .collect();
    *election.candidates.lock() = vec![
        Candidate {
            owner: voters[0],
            votes: 100,
            active: true,
        },
        Candidate {
            owner: voters[1],
            votes: 400,
            active: true,
        },
        Candidate {
            owner: voters[2],
            votes: 200,
            active: true,
        },
        Candidate {
            owner: voters[3],
            votes: 300,
            active: true,
        },
        Candidate {
            owner: voters[4],
            votes: 150,
            active: false,
        },
    ];

    // The last refresh sits at block one; blocks two to four carried over.
    let g = genesis(1_700_000_000, &roster);
    chain.insert(g.clone());
    let h1 = sealed_child(&g, &keys[0], 1, &roster);
    chain.insert(h1.clone());
    let h2 = sealed_child(&h1, &keys[1], 1, &roster);
    chain.insert(h2.clone());
    let h3 = sealed_child(&h2, &keys[2], 1, &roster);
    chain.insert(h3.clone());
    let h4 = sealed_child(&h3, &keys[3], 1, &roster);
    chain.insert(h4.clone());

    // Block five refreshes, stamping its own time.
    let mut h5 = child_header(&h4, &keys[0], 1, &roster);
    h5.extra = encode_update_time(h5.time).to_vec();
    engine.finalize(&mut h5, Vec::new()).unwrap();

    // Four blocks accrued since the refresh at height one.
    let bonus = 4 * CANDIDATES_BONUS;
    let credit = election.candidate_bounty.lock();
    assert_eq!(credit.len(), 4);
    assert_eq!(credit[&voters[0]], bonus * 100 / 1000);
    assert_eq!(credit[&voters[1]], bonus * 400 / 1000);
    assert_eq!(credit[&voters[2]], bonus * 200 / 1000);
    assert_eq!(credit[&voters[3]], bonus * 300 / 1000);
    assert!(!credit.contains_key(&voters[4]));

    // Pool: nine rewards, minus the block reward, minus the full bounty.
    assert_eq!(
        election.remaining_bounty(),
        9 * BLOCK_REWARD - BLOCK_REWARD - bonus
    );
    assert_eq!(
        election.balances.lock().get(&addr_of(&keys[0])),
        Some(&BLOCK_REWARD)
    );
}

#[test]
fn test_commit_proof_must_reach_quorum() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    let g = genesis(1_700_000_000, &roster);
    let h1 = sealed_child(&g, &keys[0], 1, &roster);
    let block = Block::new(h1, Vec::new());
    let block_hash = block.hash();

    let vote = |key: &PrivateKey| make_commit(key, addr_of(key), 0, 1, block_hash).unwrap();

    // Three distinct roster voters satisfy the quorum of a four-seat roster.
    let proven = block
        .clone()
        .with_commit_votes(vec![vote(&keys[0]), vote(&keys[1]), vote(&keys[2])]);
    engine.verify_commits(&proven).unwrap();

    let thin = block
        .clone()
        .with_commit_votes(vec![vote(&keys[0]), vote(&keys[1])]);
    assert!(matches!(
        engine.verify_commits(&thin),
        Err(EngineError::InsufficientCommits { got: 2, need: 3 })
    ));

    // The same voter twice still counts once.
    let padded = block
        .clone()
        .with_commit_votes(vec![vote(&keys[0]), vote(&keys[0]), vote(&keys[1])]);
    assert!(matches!(
        engine.verify_commits(&padded),
        Err(EngineError::InsufficientCommits { got: 2, need: 3 })
    ));

    let foreign = make_commit(
        &keys[0],
        addr_of(&keys[0]),
        0,
        1,
        H256::keccak256(b"other block"),
    )
    .unwrap();
    let strayed = block
        .clone()
        .with_commit_votes(vec![foreign, vote(&keys[1]), vote(&keys[2])]);
    assert!(matches!(
        engine.verify_commits(&strayed),
        Err(EngineError::ForeignCommitVote { number: 1 })
    ));

    let outsider = PrivateKey::random();
    let infiltrated = block
        .clone()
        .with_commit_votes(vec![vote(&outsider), vote(&keys[1]), vote(&keys[2])]);
    assert!(matches!(
        engine.verify_commits(&infiltrated),
        Err(EngineError::CommitVoterUnknown(_))
    ));
}

#[tokio::test]
async fn test_seal_proposes_to_the_voting_round() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, network, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    let g = genesis(1_700_000_000, &roster);
    assert!(matches!(
        engine.seal(Block::new(g.clone(), Vec::new())).await,
        Err(EngineError::UnknownBlock)
    ));

    let header = child_header(&g, &keys[0], 1, &roster);
    let transactions = vec![vec![0x01], vec![0x02]];
    engine
        .seal(Block::new(header, transactions.clone()))
        .await
        .unwrap();
    settle().await;

    // The sealed block went out as the round's proposal, seal recovering to
    // this node.
    let sent = network.sent.lock();
    assert_eq!(sent.len(), 1);
    let proposal = match &sent[0] {
        ConsensusMessage::Preprepare(msg) => msg,
        other => panic!("expected a proposal, got {other}"),
    };
    assert!(proposal.block.header.is_sealed());
    assert_eq!(proposal.block.transactions, transactions);
    let recovered = SignatureCache::new()
        .recover(&proposal.block.header)
        .unwrap();
    assert_eq!(recovered, addr_of(&keys[0]));
}

#[test]
fn test_signer_endpoints_read_the_chain() {
    let (keys, roster) = witness_set(4);
    let chain = Arc::new(StaticChain::default());
    let (engine, _, _, _) = engine_with(&keys[0], Arc::clone(&chain), Arc::default());

    assert!(matches!(
        engine.signers_at(None),
        Err(EngineError::UnknownBlock)
    ));

    let g = genesis(1_700_000_000, &roster);
    chain.insert(g.clone());
    let h1 = sealed_child(&g, &keys[0], 1, &roster);
    chain.insert(h1.clone());

    assert_eq!(engine.signers_at(None).unwrap(), roster);
    assert_eq!(engine.signers_at(Some(0)).unwrap(), roster);
    assert!(matches!(
        engine.signers_at(Some(7)),
        Err(EngineError::UnknownBlock)
    ));

    assert_eq!(engine.signers_at_hash(&h1.hash()).unwrap(), roster);
    assert!(matches!(
        engine.signers_at_hash(&H256::keccak256(b"nowhere")),
        Err(EngineError::UnknownBlock)
    ));

    assert_eq!(engine.current_step(), Step::NewRound);
}
