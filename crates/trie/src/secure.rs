//! This module contains the [SecureTrie], a Merkle-Patricia trie whose keys
//! are hashed before descent and whose writes buffer in memory until they are
//! committed into a store batch.

use crate::{
    errors::{TrieError, TrieResult},
    node::TrieNode,
    store::{KeyValueStore, WriteBatch},
};
use alloy_primitives::{keccak256, Bytes, B256};
use alloy_rlp::Encodable;
use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};
use tracing::trace;

/// A secure trie over a [KeyValueStore]. Every key is hashed with `keccak256`
/// before descent, which keeps path structure independent of key shape.
///
/// **Behavior**:
/// - Reads resolve blinded nodes through the store on demand and cache the
///   resolved nodes in place until the trie is dropped or committed.
/// - Writes restructure the in-memory node tree only; the store is untouched
///   until [Self::commit] serializes every in-memory node into a batch.
/// - [Self::root] computes the current root commitment without persisting
///   anything, so a caller can compare a candidate root before committing.
#[derive(Debug, Clone)]
pub struct SecureTrie<S> {
    /// The root node of the trie.
    root: TrieNode,
    /// The backing store handle.
    store: S,
}

impl<S: KeyValueStore> SecureTrie<S> {
    /// Creates a new, empty trie over `store`.
    pub const fn new(store: S) -> Self {
        Self { root: TrieNode::Empty, store }
    }

    /// Opens the trie at `root`.
    ///
    /// ## Takes
    /// - `root`: The root commitment to open at.
    /// - `store`: The backing store holding the trie's node preimages.
    ///
    /// ## Returns
    /// - `Ok(SecureTrie)`: The opened trie.
    /// - `Err(TrieError::MissingNode)`: The root preimage is not reachable in
    ///   the store.
    pub fn open(root: B256, store: S) -> TrieResult<Self> {
        let root_node = if root == EMPTY_ROOT_HASH {
            TrieNode::Empty
        } else {
            TrieNode::try_fetch(root, &store)?
        };
        Ok(Self { root: root_node, store })
    }

    /// Returns the value associated with `key`, or `None` if the key is
    /// absent.
    pub fn get(&mut self, key: &[u8]) -> TrieResult<Option<Bytes>> {
        let path = Nibbles::unpack(keccak256(key));
        self.root.get(&path, &self.store).map(|value| value.cloned())
    }

    /// Records an update for `key`. The write is buffered in memory.
    pub fn insert(&mut self, key: &[u8], value: Bytes) -> TrieResult<()> {
        let path = Nibbles::unpack(keccak256(key));
        self.root.insert(&path, value, &self.store)
    }

    /// Removes `key` from the trie. Removing an absent key is a no-op, which
    /// lets callers canonicalize zero-valued entries blindly.
    pub fn delete(&mut self, key: &[u8]) -> TrieResult<()> {
        let path = Nibbles::unpack(keccak256(key));
        match self.root.delete(&path, &self.store) {
            Err(TrieError::KeyNotFound) => Ok(()),
            result => result,
        }
    }

    /// Computes the root commitment of the current in-memory state without
    /// persisting anything.
    pub fn root(&self) -> B256 {
        self.root.commitment()
    }

    /// Returns `true` if the trie holds no entries.
    pub const fn is_empty(&self) -> bool {
        matches!(self.root, TrieNode::Empty)
    }

    /// Serializes every in-memory node into `batch`, keyed by node hash, and
    /// returns the resulting root. Once the batch is written the trie may be
    /// reopened at that root.
    pub fn commit<B: WriteBatch>(&mut self, batch: &mut B) -> TrieResult<B256> {
        if matches!(self.root, TrieNode::Empty) {
            return Ok(EMPTY_ROOT_HASH);
        }

        Self::flush(&mut self.root, batch);

        // Short subtrees stay embedded in their parent, but the root node is
        // always persisted under its own hash so the trie can be reopened.
        let commitment = match &self.root {
            TrieNode::Blinded { commitment } => *commitment,
            node => {
                let encoded = alloy_rlp::encode(node);
                let commitment = keccak256(&encoded);
                batch.put(commitment, encoded.into());
                commitment
            }
        };
        self.root = TrieNode::new_blinded(commitment);

        trace!(target: "trie", root = ?commitment, "committed trie nodes");
        Ok(commitment)
    }

    /// Walks the in-memory tree bottom-up, serializing each node whose
    /// encoding is at least one hash wide into `batch` and replacing it with
    /// its commitment.
    fn flush<B: WriteBatch>(node: &mut TrieNode, batch: &mut B) {
        match node {
            TrieNode::Empty | TrieNode::Blinded { .. } | TrieNode::Leaf { .. } => {}
            TrieNode::Extension { node: child, .. } => Self::flush(child, batch),
            TrieNode::Branch { stack } => {
                stack.iter_mut().for_each(|child| Self::flush(child, batch))
            }
        }

        if matches!(node, TrieNode::Empty | TrieNode::Blinded { .. }) {
            return;
        }
        if node.length() >= B256::len_bytes() {
            let encoded = alloy_rlp::encode(&*node);
            let commitment = keccak256(&encoded);
            batch.put(commitment, encoded.into());
            *node = TrieNode::new_blinded(commitment);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::MemoryStore;
    use alloy_primitives::B256;
    use alloy_trie::HashBuilder;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::BTreeMap;

    /// Computes the expected root of `entries` with the independent
    /// [HashBuilder] implementation.
    fn oracle_root(entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> B256 {
        let mut leaves = entries
            .iter()
            .map(|(key, value)| (Nibbles::unpack(keccak256(key)), value))
            .collect::<Vec<_>>();
        leaves.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hash_builder = HashBuilder::default();
        for (path, value) in leaves {
            hash_builder.add_leaf(path, value);
        }
        hash_builder.root()
    }

    fn random_entries(seed: u64, count: usize) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let key = (0..rng.gen_range(1..48)).map(|_| rng.gen()).collect::<Vec<u8>>();
                let value = (0..rng.gen_range(1..64)).map(|_| rng.gen()).collect::<Vec<u8>>();
                (key, value)
            })
            .collect()
    }

    #[test]
    fn test_empty_trie_root() {
        let trie = SecureTrie::new(MemoryStore::new());
        assert_eq!(trie.root(), EMPTY_ROOT_HASH);
        assert!(trie.is_empty());
    }

    #[test]
    fn test_single_entry_matches_oracle() {
        let mut trie = SecureTrie::new(MemoryStore::new());
        trie.insert(b"doge", Bytes::from_static(b"coin")).unwrap();

        let entries = BTreeMap::from([(b"doge".to_vec(), b"coin".to_vec())]);
        assert_eq!(trie.root(), oracle_root(&entries));
        assert_eq!(trie.get(b"doge").unwrap(), Some(Bytes::from_static(b"coin")));
        assert_eq!(trie.get(b"dog").unwrap(), None);
    }

    #[test]
    fn test_insertion_order_is_irrelevant() {
        let entries = random_entries(1, 64);

        let mut forward = SecureTrie::new(MemoryStore::new());
        for (key, value) in &entries {
            forward.insert(key, value.clone().into()).unwrap();
        }

        let mut backward = SecureTrie::new(MemoryStore::new());
        for (key, value) in entries.iter().rev() {
            backward.insert(key, value.clone().into()).unwrap();
        }

        assert_eq!(forward.root(), backward.root());
        assert_eq!(forward.root(), oracle_root(&entries));
    }

    #[test]
    fn test_overwrite_matches_oracle() {
        let mut entries = random_entries(2, 16);
        let mut trie = SecureTrie::new(MemoryStore::new());
        for (key, value) in &entries {
            trie.insert(key, value.clone().into()).unwrap();
        }

        let (key, _) = entries.iter().next().map(|(k, v)| (k.clone(), v.clone())).unwrap();
        entries.insert(key.clone(), b"overwritten".to_vec());
        trie.insert(&key, Bytes::from_static(b"overwritten")).unwrap();

        assert_eq!(trie.root(), oracle_root(&entries));
    }

    #[test]
    fn test_commit_and_reopen() {
        let store = MemoryStore::new();
        let entries = random_entries(3, 48);

        let mut trie = SecureTrie::new(store.clone());
        for (key, value) in &entries {
            trie.insert(key, value.clone().into()).unwrap();
        }
        let expected = trie.root();

        let mut batch = store.batch();
        let committed = trie.commit(&mut batch).unwrap();
        assert_eq!(committed, expected);
        batch.write().unwrap();

        let mut reopened = SecureTrie::open(committed, store).unwrap();
        for (key, value) in &entries {
            assert_eq!(reopened.get(key).unwrap(), Some(value.clone().into()));
        }
        assert_eq!(reopened.get(b"missing key").unwrap(), None);
        assert_eq!(reopened.root(), committed);
    }

    #[test]
    fn test_reopen_and_extend() {
        let store = MemoryStore::new();
        let mut entries = random_entries(4, 32);

        let mut trie = SecureTrie::new(store.clone());
        for (key, value) in &entries {
            trie.insert(key, value.clone().into()).unwrap();
        }
        let mut batch = store.batch();
        let root = trie.commit(&mut batch).unwrap();
        batch.write().unwrap();

        // Extend the persisted trie with a second generation of writes.
        let mut reopened = SecureTrie::open(root, store).unwrap();
        for (key, value) in random_entries(5, 32) {
            reopened.insert(&key, value.clone().into()).unwrap();
            entries.insert(key, value);
        }
        assert_eq!(reopened.root(), oracle_root(&entries));
    }

    #[test]
    fn test_delete_matches_oracle() {
        let mut entries = random_entries(6, 48);
        let mut trie = SecureTrie::new(MemoryStore::new());
        for (key, value) in &entries {
            trie.insert(key, value.clone().into()).unwrap();
        }

        let doomed = entries.keys().step_by(2).cloned().collect::<Vec<_>>();
        for key in &doomed {
            trie.delete(key).unwrap();
            entries.remove(key);
        }

        assert_eq!(trie.root(), oracle_root(&entries));
        for key in &doomed {
            assert_eq!(trie.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_delete_to_empty() {
        let entries = random_entries(7, 8);
        let mut trie = SecureTrie::new(MemoryStore::new());
        for (key, value) in &entries {
            trie.insert(key, value.clone().into()).unwrap();
        }
        for key in entries.keys() {
            trie.delete(key).unwrap();
        }
        assert_eq!(trie.root(), EMPTY_ROOT_HASH);
        assert!(trie.is_empty());
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let entries = random_entries(8, 8);
        let mut trie = SecureTrie::new(MemoryStore::new());
        for (key, value) in &entries {
            trie.insert(key, value.clone().into()).unwrap();
        }
        let before = trie.root();
        trie.delete(b"never inserted").unwrap();
        assert_eq!(trie.root(), before);
    }

    #[test]
    fn test_delete_through_persisted_nodes() {
        let store = MemoryStore::new();
        let mut entries = random_entries(9, 48);

        let mut trie = SecureTrie::new(store.clone());
        for (key, value) in &entries {
            trie.insert(key, value.clone().into()).unwrap();
        }
        let mut batch = store.batch();
        let root = trie.commit(&mut batch).unwrap();
        batch.write().unwrap();

        // Deleting through a reopened trie exercises branch collapse against
        // blinded siblings that must be resolved from the store.
        let mut reopened = SecureTrie::open(root, store).unwrap();
        let doomed = entries.keys().take(24).cloned().collect::<Vec<_>>();
        for key in &doomed {
            reopened.delete(key).unwrap();
            entries.remove(key);
        }
        assert_eq!(reopened.root(), oracle_root(&entries));
    }

    #[test]
    fn test_open_missing_root() {
        let mut rng = StdRng::seed_from_u64(10);
        let bogus = B256::from(rng.gen::<[u8; 32]>());
        let result = SecureTrie::open(bogus, MemoryStore::new());
        assert!(matches!(result, Err(TrieError::MissingNode(hash)) if hash == bogus));
    }

    proptest! {
        #[test]
        fn proptest_root_matches_oracle(
            entries in prop::collection::btree_map(
                prop::collection::vec(any::<u8>(), 1..48),
                prop::collection::vec(any::<u8>(), 1..48),
                1..48,
            )
        ) {
            let store = MemoryStore::new();
            let mut trie = SecureTrie::new(store.clone());
            for (key, value) in &entries {
                trie.insert(key, value.clone().into()).unwrap();
            }
            prop_assert_eq!(trie.root(), oracle_root(&entries));

            let mut batch = store.batch();
            let root = trie.commit(&mut batch).unwrap();
            batch.write().unwrap();

            let mut reopened = SecureTrie::open(root, store).unwrap();
            for (key, value) in &entries {
                prop_assert_eq!(reopened.get(key).unwrap(), Some(Bytes::from(value.clone())));
            }
        }

        #[test]
        fn proptest_delete_matches_oracle(
            mut entries in prop::collection::btree_map(
                prop::collection::vec(any::<u8>(), 1..32),
                prop::collection::vec(any::<u8>(), 1..32),
                2..32,
            )
        ) {
            let mut trie = SecureTrie::new(MemoryStore::new());
            for (key, value) in &entries {
                trie.insert(key, value.clone().into()).unwrap();
            }

            let doomed = entries.keys().step_by(3).cloned().collect::<Vec<_>>();
            for key in &doomed {
                trie.delete(key).unwrap();
                entries.remove(key);
            }
            prop_assert_eq!(trie.root(), oracle_root(&entries));
        }
    }
}
