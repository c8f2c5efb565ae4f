//! Tests for the voting round message pools.
//!
//! These tests verify the pool behavior the round handlers lean on:
//! - Duplicate suppression by message digest
//! - At most one proposal per height and round
//! - Quorum grouping by cited block hash, with deterministic tie breaks
//! - Protocol ordering of replayed messages
//! - Height-based sweeping

use meridian_consensus::msg_pool::MessagePool;
use meridian_consensus::PoolError;
use meridian_types::{
    Address, Block, BlockHeader, CommitMsg, ConsensusMessage, PrepareMsg, PreprepareMsg, H256,
};

fn addr(tag: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = tag;
    Address::new(bytes)
}

fn hash(tag: u8) -> H256 {
    H256::keccak256(&[tag])
}

fn preprepare(round: u32, number: u64, time: u64) -> ConsensusMessage {
    let header = BlockHeader::new(number, time, H256::NIL, addr(1));
    ConsensusMessage::Preprepare(PreprepareMsg::new(round, Block::new(header, Vec::new())))
}

fn prepare(round: u32, number: u64, voter: u8, block_hash: H256) -> ConsensusMessage {
    ConsensusMessage::Prepare(PrepareMsg::new(round, addr(voter), number, block_hash))
}

fn commit(round: u32, number: u64, voter: u8, block_hash: H256) -> ConsensusMessage {
    ConsensusMessage::Commit(CommitMsg::new(round, addr(voter), number, block_hash))
}

#[test]
fn test_duplicate_message_rejected() {
    let pool = MessagePool::new(3, "test");
    let vote = prepare(0, 5, 1, hash(7));

    pool.add_message(&vote).unwrap();
    let result = pool.add_message(&vote);
    assert!(matches!(result, Err(PoolError::DuplicateMessage { .. })));
    assert_eq!(pool.message_count(), 1);
}

#[test]
fn test_second_preprepare_rejected() {
    let pool = MessagePool::new(3, "test");
    pool.add_message(&preprepare(0, 5, 100)).unwrap();

    // A different proposal for the same slot is refused outright.
    let rival = preprepare(0, 5, 102);
    let result = pool.add_message(&rival);
    assert!(matches!(
        result,
        Err(PoolError::DuplicatePreprepare {
            height: 5,
            round: 0
        })
    ));

    // The rival's digest was never recorded, so a retry fails the same
    // way instead of claiming it is already pooled.
    let retry = pool.add_message(&rival);
    assert!(matches!(retry, Err(PoolError::DuplicatePreprepare { .. })));
    assert_eq!(pool.message_count(), 1);
}

#[test]
fn test_same_proposal_different_round_accepted() {
    let pool = MessagePool::new(3, "test");
    pool.add_message(&preprepare(0, 5, 100)).unwrap();
    pool.add_message(&preprepare(1, 5, 100)).unwrap();
    pool.add_message(&preprepare(0, 6, 102)).unwrap();
    assert_eq!(pool.message_count(), 3);
}

#[test]
fn test_missing_preprepare() {
    let pool = MessagePool::new(3, "test");
    let result = pool.preprepare(5, 0);
    assert!(matches!(
        result,
        Err(PoolError::MissingPreprepare {
            height: 5,
            round: 0
        })
    ));
}

#[test]
fn test_quorum_requires_enough_votes() {
    let pool = MessagePool::new(3, "test");
    let target = hash(7);

    pool.add_message(&prepare(0, 5, 1, target)).unwrap();
    pool.add_message(&prepare(0, 5, 2, target)).unwrap();
    let result = pool.quorum_prepares(5, 0);
    assert!(matches!(
        result,
        Err(PoolError::InsufficientVotes { got: 2, need: 3 })
    ));

    // An empty slot reports zero votes rather than a missing entry.
    let result = pool.quorum_prepares(9, 0);
    assert!(matches!(
        result,
        Err(PoolError::InsufficientVotes { got: 0, need: 3 })
    ));

    pool.add_message(&prepare(0, 5, 3, target)).unwrap();
    let votes = pool.quorum_prepares(5, 0).unwrap();
    assert_eq!(votes.len(), 3);
    // Arrival order is preserved.
    assert_eq!(votes[0].prepare_addr, addr(1));
    assert_eq!(votes[1].prepare_addr, addr(2));
    assert_eq!(votes[2].prepare_addr, addr(3));
}

#[test]
fn test_quorum_needs_majority_on_one_hash() {
    let pool = MessagePool::new(3, "test");

    // Four votes pooled, but split two against two.
    pool.add_message(&prepare(0, 5, 1, hash(7))).unwrap();
    pool.add_message(&prepare(0, 5, 2, hash(7))).unwrap();
    pool.add_message(&prepare(0, 5, 3, hash(8))).unwrap();
    pool.add_message(&prepare(0, 5, 4, hash(8))).unwrap();
    let result = pool.quorum_prepares(5, 0);
    assert!(matches!(result, Err(PoolError::NoMajority { need: 3 })));

    // A fifth vote settles it.
    pool.add_message(&prepare(0, 5, 5, hash(8))).unwrap();
    let votes = pool.quorum_prepares(5, 0).unwrap();
    assert_eq!(votes.len(), 3);
    assert!(votes.iter().all(|v| v.block_hash == hash(8)));
}

#[test]
fn test_quorum_tie_goes_to_first() {
    let pool = MessagePool::new(2, "test");

    // Both hashes end on two votes; the one that reached two first wins.
    pool.add_message(&commit(0, 5, 1, hash(7))).unwrap();
    pool.add_message(&commit(0, 5, 2, hash(8))).unwrap();
    pool.add_message(&commit(0, 5, 3, hash(7))).unwrap();
    pool.add_message(&commit(0, 5, 4, hash(8))).unwrap();

    let votes = pool.quorum_commits(5, 0).unwrap();
    assert_eq!(votes.len(), 2);
    assert!(votes.iter().all(|v| v.block_hash == hash(7)));
}

#[test]
fn test_all_messages_in_protocol_order() {
    let pool = MessagePool::new(3, "test");

    // Inserted backwards on purpose.
    pool.add_message(&commit(0, 5, 1, hash(7))).unwrap();
    pool.add_message(&prepare(0, 5, 1, hash(7))).unwrap();
    pool.add_message(&preprepare(0, 5, 100)).unwrap();
    pool.add_message(&prepare(0, 5, 2, hash(7))).unwrap();

    let replay = pool.all_messages(5, 0);
    assert_eq!(replay.len(), 4);
    assert!(matches!(replay[0], ConsensusMessage::Preprepare(_)));
    assert!(matches!(replay[1], ConsensusMessage::Prepare(_)));
    assert!(matches!(replay[2], ConsensusMessage::Prepare(_)));
    assert!(matches!(replay[3], ConsensusMessage::Commit(_)));

    // Other slots are untouched.
    assert!(pool.all_messages(5, 1).is_empty());
    assert!(pool.all_messages(6, 0).is_empty());
}

#[test]
fn test_clean_below_keeps_the_boundary() {
    let pool = MessagePool::new(3, "test");
    let old = prepare(0, 99, 1, hash(7));
    pool.add_message(&old).unwrap();
    pool.add_message(&prepare(0, 100, 1, hash(7))).unwrap();
    pool.add_message(&prepare(0, 101, 1, hash(7))).unwrap();

    pool.clean_below(100);

    assert!(pool.all_messages(99, 0).is_empty());
    assert_eq!(pool.all_messages(100, 0).len(), 1);
    assert_eq!(pool.all_messages(101, 0).len(), 1);
    assert_eq!(pool.message_count(), 2);

    // The swept digest is forgotten with its message, so a late copy can
    // be pooled again instead of bouncing off the duplicate check.
    pool.add_message(&old).unwrap();
}

#[test]
fn test_clean_height_drops_every_round() {
    let pool = MessagePool::new(3, "test");
    pool.add_message(&prepare(0, 5, 1, hash(7))).unwrap();
    pool.add_message(&prepare(1, 5, 1, hash(7))).unwrap();
    pool.add_message(&prepare(0, 6, 1, hash(7))).unwrap();

    pool.clean_height(5);

    assert!(pool.all_messages(5, 0).is_empty());
    assert!(pool.all_messages(5, 1).is_empty());
    assert_eq!(pool.all_messages(6, 0).len(), 1);
    assert_eq!(pool.message_count(), 1);
}

#[test]
fn test_clean_all_resets_the_pool() {
    let pool = MessagePool::new(3, "test");
    pool.add_message(&preprepare(0, 5, 100)).unwrap();
    pool.add_message(&prepare(0, 5, 1, hash(7))).unwrap();

    pool.clean_all();

    assert_eq!(pool.message_count(), 0);
    assert!(pool.all_messages(5, 0).is_empty());
    assert!(matches!(
        pool.preprepare(5, 0),
        Err(PoolError::MissingPreprepare { .. })
    ));
}
