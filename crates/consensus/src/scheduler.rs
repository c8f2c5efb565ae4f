//! Witness rotation schedule.
//!
//! Production slots open every `period` seconds and rotate through the
//! elected roster in order. The schedule is pure arithmetic over the roster,
//! the previous producer and the two timestamps, so any node can check any
//! header without extra state.

use meridian_types::Address;
use tracing::warn;

/// Deterministic slot assignment over an ordered witness roster.
#[derive(Debug, Clone)]
pub struct RotationManager {
    witnesses: Vec<Address>,
    period: u64,
}

impl RotationManager {
    /// Creates a schedule over `witnesses` with `period` seconds per slot.
    pub fn new(witnesses: Vec<Address>, period: u64) -> Self {
        Self { witnesses, period }
    }

    /// Decides whether `witness` owns the slot at `witness_time`, given the
    /// previous in-roster producer and its production time.
    ///
    /// The number of whole periods between the two timestamps, rounded up,
    /// advances the rotation from the previous producer's index. Empty slots
    /// left by offline witnesses are skipped, not reassigned.
    pub fn in_turn(
        &self,
        witness: Address,
        prev_witness: Address,
        witness_time: u64,
        prev_time: u64,
    ) -> bool {
        if self.period == 0 || self.witnesses.is_empty() {
            warn!("rotation schedule is not configured");
            return false;
        }
        if witness_time <= prev_time {
            warn!(
                witness_time,
                prev_time, "production slot does not advance the clock"
            );
            return false;
        }

        let (witness_index, prev_index) = match (self.index_of(&witness), self.index_of(&prev_witness)) {
            (Some(w), Some(p)) => (w, p),
            _ => {
                warn!(
                    witness = %witness,
                    prev_witness = %prev_witness,
                    "producer not in the witness roster"
                );
                return false;
            }
        };

        let elapsed = witness_time - prev_time;
        let n_period = (elapsed + self.period - 1) / self.period;
        let offset = (n_period as usize) % self.witnesses.len();
        let target = (prev_index + offset) % self.witnesses.len();
        target == witness_index
    }

    /// Returns the position of `witness` in the roster.
    pub fn index_of(&self, witness: &Address) -> Option<usize> {
        self.witnesses.iter().position(|w| w == witness)
    }

    /// Checks roster membership.
    pub fn contains(&self, witness: &Address) -> bool {
        self.index_of(witness).is_some()
    }

    /// Returns the first witness in the roster, the producer of block one.
    pub fn first(&self) -> Option<Address> {
        self.witnesses.first().copied()
    }

    /// Returns the roster size.
    pub fn len(&self) -> usize {
        self.witnesses.len()
    }

    /// Checks whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.witnesses.is_empty()
    }
}

/// Computes the next production slot after `parent_time`.
///
/// Returns the slot timestamp and the count of whole periods between parent
/// and slot. The slot is always strictly in the future: when `now` lands
/// exactly on a boundary the next one is chosen.
pub fn next_produce_slot(parent_time: u64, now: u64, period: u64) -> (u64, u64) {
    let n_period = now.saturating_sub(parent_time) / period + 1;
    (parent_time + n_period * period, n_period)
}
