#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod errors;
pub use errors::{TrieError, TrieResult};

mod node;
pub use node::TrieNode;

mod secure;
pub use secure::SecureTrie;

mod store;
pub use store::{KeyValueStore, MemoryBatch, MemoryStore, NoopBatch, NoopStore, WriteBatch};

mod util;

pub use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};
