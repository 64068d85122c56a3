//! Errors for the `tempo-poa` crate.

use alloy_primitives::Address;

/// A [Result] type alias where the error is [SchedulerError].
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// An error type for proposer schedule operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The address is not in the authorized proposer set.
    #[error("address {0} is not an authorized proposer")]
    NotAProposer(Address),
    /// The proposer set snapshot is unusable: empty, duplicated, or with
    /// every proposer marked absent.
    #[error("invalid proposer set: {absentees} absent of {proposers} proposers")]
    InvalidProposerSet {
        /// The number of authorized proposers.
        proposers: usize,
        /// The number of proposers marked absent.
        absentees: usize,
    },
    /// The block interval must be non-zero.
    #[error("block interval must be non-zero")]
    InvalidInterval,
}
