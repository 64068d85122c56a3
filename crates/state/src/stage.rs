//! This module contains the [Stage]: the frozen snapshot of one block's
//! account mutations, able to compute the post-state root without writing and
//! to commit it atomically.

use crate::{account::Account, errors::StateResult};
use alloy_primitives::{Address, Bytes, B256, U256};
use std::collections::{BTreeMap, HashMap};
use tempo_trie::{KeyValueStore, SecureTrie, WriteBatch, EMPTY_ROOT_HASH};
use tracing::debug;

/// One account of the frozen changed-object set.
#[derive(Debug, Clone)]
pub(crate) struct StagedAccount {
    /// The mutated account record.
    pub(crate) account: Account,
    /// Code blob installed during the block, if any.
    pub(crate) code: Option<Bytes>,
    /// Pending storage writes; zero values are deletions.
    pub(crate) storage: BTreeMap<B256, U256>,
}

/// A [Stage] lives from "block executed" to "block committed or discarded".
///
/// Its contract is two-phase: [Self::hash] computes what the post-state root
/// would be without touching the store, and [Self::commit] persists code
/// blobs, storage tries and the accounts trie through a single atomic write
/// batch. The tries built by the first phase are kept for the second, so both
/// phases agree on the root and the work is done once.
#[derive(Debug)]
pub struct Stage<S: KeyValueStore> {
    /// The backing store handle.
    store: S,
    /// The accounts trie, carried over from the state map together with its
    /// resolved node cache.
    accounts: SecureTrie<S>,
    /// Storage tries opened during execution, reused instead of reopened.
    storage_tries: HashMap<Address, SecureTrie<S>>,
    /// Storage tries mutated by [Self::prepare], pending persistence.
    touched: Vec<SecureTrie<S>>,
    /// The frozen changed-object set, in address order.
    changes: Vec<(Address, StagedAccount)>,
    /// The post-state root, once computed.
    prepared: Option<B256>,
}

impl<S: KeyValueStore + Clone> Stage<S> {
    pub(crate) fn new(
        accounts: SecureTrie<S>,
        storage_tries: HashMap<Address, SecureTrie<S>>,
        changes: Vec<(Address, StagedAccount)>,
        store: S,
    ) -> Self {
        Self { store, accounts, storage_tries, touched: Vec::new(), changes, prepared: None }
    }

    /// Computes the post-state root without writing anything.
    pub fn hash(&mut self) -> StateResult<B256> {
        self.prepare()
    }

    /// Persists the staged mutations through one atomic write batch and
    /// returns the new state root. On failure the batch is dropped and no
    /// partial state is observable; the prior root remains current.
    pub fn commit(mut self) -> StateResult<B256> {
        let root = self.prepare()?;

        let mut batch = self.store.batch();
        for (_, staged) in &self.changes {
            if let (Some(code), Some(code_hash)) = (&staged.code, staged.account.code_hash) {
                batch.put(code_hash, code.clone());
            }
        }
        for trie in &mut self.touched {
            trie.commit(&mut batch)?;
        }
        let committed = self.accounts.commit(&mut batch)?;
        debug_assert_eq!(committed, root);

        batch
            .write()
            .map_err(|err| tempo_trie::TrieError::Store(err.to_string()))?;

        debug!(target: "state", ?root, accounts = self.changes.len(), "committed state stage");
        Ok(root)
    }

    /// Applies the frozen mutations to the in-memory tries and caches the
    /// resulting root. Runs once; both [Self::hash] and [Self::commit] reuse
    /// the outcome.
    fn prepare(&mut self) -> StateResult<B256> {
        if let Some(root) = self.prepared {
            return Ok(root);
        }

        for (address, staged) in &mut self.changes {
            if !staged.storage.is_empty() {
                let previous_root = staged.account.storage_root.unwrap_or(EMPTY_ROOT_HASH);
                let mut trie = match self.storage_tries.remove(address) {
                    Some(trie) => trie,
                    None => SecureTrie::open(previous_root, self.store.clone())?,
                };
                for (slot, value) in &staged.storage {
                    if value.is_zero() {
                        trie.delete(slot.as_slice())?;
                    } else {
                        trie.insert(slot.as_slice(), alloy_rlp::encode(value).into())?;
                    }
                }
                let storage_root = trie.root();
                staged.account.storage_root =
                    (storage_root != EMPTY_ROOT_HASH).then_some(storage_root);
                self.touched.push(trie);
            }

            if staged.account.is_empty() {
                self.accounts.delete(address.as_slice())?;
            } else {
                self.accounts.insert(address.as_slice(), alloy_rlp::encode(&staged.account).into())?;
            }
        }

        let root = self.accounts.root();
        self.prepared = Some(root);
        Ok(root)
    }
}
