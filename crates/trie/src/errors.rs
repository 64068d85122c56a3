//! Errors for the `tempo-trie` crate.

use alloy_primitives::B256;

/// A [Result] type alias where the error is [TrieError].
pub type TrieResult<T> = Result<T, TrieError>;

/// An error type for trie operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrieError {
    /// The backing store failed to read or write.
    #[error("backing store failure: {0}")]
    Store(String),
    /// A node preimage was missing from the backing store.
    #[error("missing preimage for trie node {0}")]
    MissingNode(B256),
    /// Failed to decode a trie node.
    #[error("failed to decode trie node: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// Invalid trie node type encountered.
    #[error("invalid trie node type encountered")]
    InvalidNodeType,
    /// Key does not exist in the trie.
    #[error("key does not exist in trie")]
    KeyNotFound,
}
