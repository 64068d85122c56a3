//! Errors for the `tempo-state` crate.

use alloy_primitives::B256;
use tempo_trie::TrieError;

/// A [Result] type alias where the error is [StateError].
pub type StateResult<T> = Result<T, StateError>;

/// An error type for state layer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Trie substrate error.
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),
    /// A stored account record failed to decode.
    #[error("failed to decode stored account: {0}")]
    Account(alloy_rlp::Error),
    /// A stored storage slot value failed to decode.
    #[error("failed to decode storage slot value: {0}")]
    Slot(alloy_rlp::Error),
    /// An account's code blob was missing from the backing store.
    #[error("missing code preimage {0}")]
    MissingCode(B256),
}
