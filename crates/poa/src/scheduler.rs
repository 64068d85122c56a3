//! Proposer scheduling: deterministic slot assignment over the authorized
//! proposer set, rotating past absentees.

use crate::{
    errors::{SchedulerError, SchedulerResult},
    shuffle::shuffle,
};
use alloy_primitives::Address;
use std::collections::BTreeSet;
use tracing::trace;

/// The network-wide spacing between consecutive block slots, in seconds.
pub const BLOCK_INTERVAL: u64 = 10;

/// A [Schedule] answers, for one parent block, when a given proposer may
/// legally produce the next block. It is a pure function of its construction
/// inputs: the ordered proposer set, the subset currently marked absent, and
/// the parent block's number and timestamp. Every honest node derives the
/// same answers, which is what makes [Self::validate] a consensus predicate.
///
/// A schedule is built per block decision and discarded after use; it keeps
/// no history of its own.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The ordered set of authorized proposers.
    proposers: Vec<Address>,
    /// Proposers whose last turn was skipped.
    absentee: BTreeSet<Address>,
    /// The parent block number.
    parent_number: u32,
    /// The parent block timestamp.
    parent_time: u64,
    /// The block interval, in seconds.
    interval: u64,
}

impl Schedule {
    /// Creates a new [Schedule] for the child of the given parent block.
    ///
    /// ## Takes
    /// - `proposers`: The ordered authorized proposer set.
    /// - `absentee`: The proposers currently marked absent. Must be a proper
    ///   subset of `proposers`; at least one proposer is always live.
    /// - `parent_number`: The parent block number.
    /// - `parent_time`: The parent block timestamp.
    /// - `interval`: The protocol block interval in seconds, e.g.
    ///   [BLOCK_INTERVAL].
    ///
    /// ## Returns
    /// - `Ok(Schedule)`: The schedule for the next block.
    /// - `Err(_)`: The snapshot is unusable.
    pub fn new(
        proposers: Vec<Address>,
        absentee: BTreeSet<Address>,
        parent_number: u32,
        parent_time: u64,
        interval: u64,
    ) -> SchedulerResult<Self> {
        if interval == 0 {
            return Err(SchedulerError::InvalidInterval);
        }
        let distinct = proposers.iter().copied().collect::<BTreeSet<_>>();
        if proposers.is_empty()
            || distinct.len() != proposers.len()
            || absentee.len() >= proposers.len()
        {
            return Err(SchedulerError::InvalidProposerSet {
                proposers: proposers.len(),
                absentees: absentee.len(),
            });
        }
        if let Some(unknown) = absentee.iter().find(|absent| !distinct.contains(*absent)) {
            return Err(SchedulerError::NotAProposer(*unknown));
        }
        Ok(Self { proposers, absentee, parent_number, parent_time, interval })
    }

    /// Determines the next legal block timestamp at which `address` may
    /// produce, at or after `now`, together with the absentee set the block
    /// should carry: every live proposer walked over on the way to the slot
    /// is marked absent, and `address` itself is cleared.
    ///
    /// The walk is deterministic. Each round is a fresh permutation of the
    /// proposer set drawn from the parent number and the round index; a
    /// proposer ahead of `address` consumes one interval of the round iff the
    /// schedule's input set considers it live. When `now` is behind the first
    /// predicted slot (clocks trailing the chain) the round index clamps to
    /// zero and the walk simply answers with the earliest legal slot.
    ///
    /// ## Takes
    /// - `address`: The proposer asking for its slot.
    /// - `now`: The current wall-clock time.
    ///
    /// ## Returns
    /// - `Ok((slot, absentee))`: The slot timestamp (`>= now`, a positive
    ///   multiple of the interval past the parent timestamp) and the updated
    ///   absentee set.
    /// - `Err(SchedulerError::NotAProposer)`: `address` is not authorized.
    pub fn timing(&self, address: Address, now: u64) -> SchedulerResult<(u64, BTreeSet<Address>)> {
        if !self.proposers.contains(&address) {
            return Err(SchedulerError::NotAProposer(address));
        }

        let predicted = self.parent_time + self.interval;
        let live = (self.proposers.len() - self.absentee.len()) as u64;
        let round_span = live * self.interval;

        let mut round = now.saturating_sub(predicted) / round_span;
        let mut updates = if round > 0 {
            // Whole rounds were skipped; everyone starts marked absent.
            self.proposers.iter().copied().filter(|proposer| *proposer != address).collect()
        } else {
            self.absentee.clone()
        };

        loop {
            let order = shuffle(&self.seed(round), self.proposers.len());
            let mut slot = predicted + round_span * round;
            let mut scheduled = false;

            for index in order {
                let proposer = self.proposers[index];
                if proposer == address {
                    scheduled = now <= slot;
                    break;
                }
                if !self.absentee.contains(&proposer) {
                    slot += self.interval;
                }
                updates.insert(proposer);
            }

            if scheduled {
                updates.remove(&address);
                trace!(target: "poa", slot, round, %address, "scheduled proposer slot");
                return Ok((slot, updates));
            }
            round += 1;
        }
    }

    /// Returns `true` iff `timestamp` is exactly the slot [Self::timing]
    /// assigns to `signer`. This is the predicate a verifier applies to every
    /// inbound block header.
    pub fn validate(&self, signer: Address, timestamp: u64) -> bool {
        self.timing(signer, timestamp).map(|(slot, _)| slot == timestamp).unwrap_or(false)
    }

    /// The shuffle seed for a round: the big-endian parent number followed by
    /// the big-endian round index.
    fn seed(&self, round: u64) -> [u8; 12] {
        let mut seed = [0u8; 12];
        seed[..4].copy_from_slice(&self.parent_number.to_be_bytes());
        seed[4..].copy_from_slice(&round.to_be_bytes());
        seed
    }
}
