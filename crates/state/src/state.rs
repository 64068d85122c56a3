//! This module contains the [State] map: the typed, copy-on-write façade over
//! the accounts trie that the transaction executor drives while a block runs.

use crate::{
    account::Account,
    errors::{StateError, StateResult},
    stage::{Stage, StagedAccount},
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::Decodable;
use std::collections::{btree_map, hash_map, BTreeMap, HashMap};
use tempo_trie::{KeyValueStore, SecureTrie, TrieError};

/// The per-address record in the changed-object set: the account as it was
/// read from the trie, the mutable working copy, any code blob installed this
/// session, and the pending storage slot writes.
#[derive(Debug, Clone)]
pub(crate) struct AccountEntry {
    /// The account record as stored at the block's parent root.
    pub(crate) origin: Account,
    /// The working copy carrying this block's mutations.
    pub(crate) account: Account,
    /// Code blob installed during this block, keyed by [Account::code_hash].
    pub(crate) code: Option<Bytes>,
    /// Pending storage writes; a zero value marks a deletion.
    pub(crate) storage: BTreeMap<B256, U256>,
}

impl AccountEntry {
    fn new(account: Account) -> Self {
        Self { origin: account.clone(), account, code: None, storage: BTreeMap::new() }
    }

    /// An entry is dirty once its record differs from the stored original or
    /// it carries pending storage writes. Clean entries are skipped entirely
    /// at stage time.
    pub(crate) fn is_dirty(&self) -> bool {
        !self.storage.is_empty() || self.account != self.origin
    }
}

/// A [State] is the account map for the execution of exactly one block. It is
/// opened at the parent block's state root, accumulates every mutation in its
/// changed-object set, and is consumed by [Self::stage] once the block's
/// transactions have run.
///
/// Reads are cached: a stored account record is decoded on first access and
/// the decoded original is kept alongside the working copy, which makes the
/// dirty check at stage time a plain comparison.
#[derive(Debug)]
pub struct State<S: KeyValueStore> {
    /// The accounts trie, opened at the parent state root.
    trie: SecureTrie<S>,
    /// The backing store handle, shared with the trie.
    store: S,
    /// The changed-object set.
    entries: BTreeMap<Address, AccountEntry>,
    /// Lazily opened per-account storage tries, for reads.
    storage_tries: HashMap<Address, SecureTrie<S>>,
    /// Checkpoint journal: one layer per open checkpoint, holding the prior
    /// entry state of every address first touched under that layer.
    checkpoints: Vec<BTreeMap<Address, Option<AccountEntry>>>,
}

impl<S: KeyValueStore + Clone> State<S> {
    /// Opens the state at `root`.
    ///
    /// ## Takes
    /// - `root`: The state root of the parent block.
    /// - `store`: The backing store holding trie nodes and code blobs.
    ///
    /// ## Returns
    /// - `Ok(State)`: The opened state map.
    /// - `Err(_)`: The root is not reachable in the store.
    pub fn new(root: B256, store: S) -> StateResult<Self> {
        let trie = SecureTrie::open(root, store.clone())?;
        Ok(Self {
            trie,
            store,
            entries: BTreeMap::new(),
            storage_tries: HashMap::new(),
            checkpoints: Vec::new(),
        })
    }

    /// Returns a copy of the current account record for `address`. Unknown
    /// addresses yield the empty record.
    pub fn account(&mut self, address: Address) -> StateResult<Account> {
        Ok(self.entry_mut(address)?.account.clone())
    }

    /// Returns the balance of `address`.
    pub fn balance(&mut self, address: Address) -> StateResult<U256> {
        Ok(self.entry_mut(address)?.account.balance)
    }

    /// Sets the balance of `address`. The energy binding is left untouched;
    /// callers settle accrued energy explicitly via [Self::set_energy].
    pub fn set_balance(&mut self, address: Address, balance: U256) -> StateResult<()> {
        self.entry_mut(address)?.account.balance = balance;
        Ok(())
    }

    /// Returns the energy of `address` at `now`, including lazily accrued
    /// growth since the last settlement.
    pub fn energy(&mut self, address: Address, now: u64) -> StateResult<U256> {
        Ok(self.entry_mut(address)?.account.energy_at(now))
    }

    /// Sets the energy of `address`, binding the accrual clock to `now`.
    pub fn set_energy(&mut self, address: Address, energy: U256, now: u64) -> StateResult<()> {
        let entry = self.entry_mut(address)?;
        entry.account.energy = energy;
        entry.account.block_time = now;
        Ok(())
    }

    /// Returns the master of `address`, if one is set.
    pub fn master(&mut self, address: Address) -> StateResult<Option<Address>> {
        Ok(self.entry_mut(address)?.account.master)
    }

    /// Sets or clears the master of `address`.
    pub fn set_master(&mut self, address: Address, master: Option<Address>) -> StateResult<()> {
        self.entry_mut(address)?.account.master = master;
        Ok(())
    }

    /// Returns the code hash of `address`, or `None` for a codeless account.
    pub fn code_hash(&mut self, address: Address) -> StateResult<Option<B256>> {
        Ok(self.entry_mut(address)?.account.code_hash)
    }

    /// Returns the code blob of `address`. Codeless accounts yield empty
    /// bytes; blobs installed this session are served from memory, everything
    /// else resolves through the store by hash.
    pub fn code(&mut self, address: Address) -> StateResult<Bytes> {
        let code_hash = {
            let entry = self.entry_mut(address)?;
            if let Some(code) = &entry.code {
                return Ok(code.clone());
            }
            entry.account.code_hash
        };
        let Some(code_hash) = code_hash else {
            return Ok(Bytes::new());
        };
        self.store
            .get(code_hash)
            .map_err(|err| StateError::Trie(TrieError::Store(err.to_string())))?
            .ok_or(StateError::MissingCode(code_hash))
    }

    /// Installs `code` for `address`. An empty blob clears the code hash
    /// rather than storing the hash of the empty string, preserving the empty
    /// account predicate.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> StateResult<()> {
        let entry = self.entry_mut(address)?;
        if code.is_empty() {
            entry.account.code_hash = None;
            entry.code = None;
        } else {
            entry.account.code_hash = Some(keccak256(&code));
            entry.code = Some(code);
        }
        Ok(())
    }

    /// Returns the value of the storage `slot` of `address`. Pending writes
    /// overlay the persisted storage trie; absent slots are zero.
    pub fn storage(&mut self, address: Address, slot: B256) -> StateResult<U256> {
        let storage_root = {
            let entry = self.entry_mut(address)?;
            if let Some(value) = entry.storage.get(&slot) {
                return Ok(*value);
            }
            entry.account.storage_root
        };
        let Some(storage_root) = storage_root else {
            return Ok(U256::ZERO);
        };

        let trie = match self.storage_tries.entry(address) {
            hash_map::Entry::Occupied(occupied) => occupied.into_mut(),
            hash_map::Entry::Vacant(vacant) => {
                vacant.insert(SecureTrie::open(storage_root, self.store.clone())?)
            }
        };
        let Some(raw) = trie.get(slot.as_slice())? else {
            return Ok(U256::ZERO);
        };
        U256::decode(&mut raw.as_ref()).map_err(StateError::Slot)
    }

    /// Records a storage write for `address`. Zero values canonicalize to
    /// deletions when the block is staged.
    pub fn set_storage(&mut self, address: Address, slot: B256, value: U256) -> StateResult<()> {
        self.entry_mut(address)?.storage.insert(slot, value);
        Ok(())
    }

    /// Returns `true` if the account at `address` is non-empty.
    pub fn exists(&mut self, address: Address) -> StateResult<bool> {
        Ok(!self.entry_mut(address)?.account.is_empty())
    }

    /// Opens a checkpoint and returns its handle. All mutations made after
    /// this call can be rolled back with [Self::revert_to].
    pub fn checkpoint(&mut self) -> usize {
        self.checkpoints.push(BTreeMap::new());
        self.checkpoints.len() - 1
    }

    /// Rolls the changed-object set back to the state it had when
    /// `checkpoint` was opened, discarding that checkpoint and every one
    /// nested inside it.
    pub fn revert_to(&mut self, checkpoint: usize) {
        while self.checkpoints.len() > checkpoint {
            let Some(layer) = self.checkpoints.pop() else {
                return;
            };
            for (address, prior) in layer {
                match prior {
                    Some(entry) => {
                        self.entries.insert(address, entry);
                    }
                    None => {
                        self.entries.remove(&address);
                    }
                }
            }
        }
    }

    /// Freezes the changed-object set and produces the [Stage] that computes
    /// and commits the post-state root. Clean entries are dropped here, so a
    /// state map that only read accounts stages as a no-op.
    pub fn stage(self) -> Stage<S> {
        let changes = self
            .entries
            .into_iter()
            .filter(|(_, entry)| entry.is_dirty())
            .map(|(address, entry)| {
                (
                    address,
                    StagedAccount {
                        account: entry.account,
                        code: entry.code,
                        storage: entry.storage,
                    },
                )
            })
            .collect();
        Stage::new(self.trie, self.storage_tries, changes, self.store)
    }

    /// Returns the changed-object entry for `address`, loading and caching
    /// the stored record on first touch and journaling the prior entry into
    /// the active checkpoint layer.
    fn entry_mut(&mut self, address: Address) -> StateResult<&mut AccountEntry> {
        if let Some(layer) = self.checkpoints.last_mut() {
            if !layer.contains_key(&address) {
                layer.insert(address, self.entries.get(&address).cloned());
            }
        }

        let stored = match self.entries.contains_key(&address) {
            true => None,
            false => Some(match self.trie.get(address.as_slice())? {
                Some(raw) => {
                    Account::decode(&mut raw.as_ref()).map_err(StateError::Account)?
                }
                None => Account::default(),
            }),
        };
        Ok(match self.entries.entry(address) {
            btree_map::Entry::Occupied(occupied) => occupied.into_mut(),
            btree_map::Entry::Vacant(vacant) => {
                vacant.insert(AccountEntry::new(stored.unwrap_or_default()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::uint;
    use tempo_trie::{MemoryStore, EMPTY_ROOT_HASH};

    fn addr(byte: u8) -> Address {
        Address::with_last_byte(byte)
    }

    fn fresh_state() -> State<MemoryStore> {
        State::new(EMPTY_ROOT_HASH, MemoryStore::new()).unwrap()
    }

    #[test]
    fn test_unknown_account_reads_empty() {
        let mut state = fresh_state();
        assert_eq!(state.balance(addr(1)).unwrap(), U256::ZERO);
        assert_eq!(state.master(addr(1)).unwrap(), None);
        assert_eq!(state.code(addr(1)).unwrap(), Bytes::new());
        assert_eq!(state.storage(addr(1), B256::ZERO).unwrap(), U256::ZERO);
        assert!(!state.exists(addr(1)).unwrap());
    }

    #[test]
    fn test_read_your_writes() {
        let mut state = fresh_state();
        state.set_balance(addr(1), uint!(100_U256)).unwrap();
        state.set_master(addr(1), Some(addr(2))).unwrap();
        state.set_storage(addr(1), B256::with_last_byte(1), uint!(42_U256)).unwrap();

        assert_eq!(state.balance(addr(1)).unwrap(), uint!(100_U256));
        assert_eq!(state.master(addr(1)).unwrap(), Some(addr(2)));
        assert_eq!(state.storage(addr(1), B256::with_last_byte(1)).unwrap(), uint!(42_U256));
        assert!(state.exists(addr(1)).unwrap());
    }

    #[test]
    fn test_set_code_round_trip() {
        let mut state = fresh_state();
        let code = Bytes::from_static(b"\x60\x80\x60\x40");
        state.set_code(addr(1), code.clone()).unwrap();

        assert_eq!(state.code_hash(addr(1)).unwrap(), Some(keccak256(&code)));
        assert_eq!(state.code(addr(1)).unwrap(), code);
    }

    #[test]
    fn test_set_empty_code_clears_hash() {
        let mut state = fresh_state();
        state.set_code(addr(1), Bytes::from_static(b"\x00")).unwrap();
        state.set_code(addr(1), Bytes::new()).unwrap();

        assert_eq!(state.code_hash(addr(1)).unwrap(), None);
        assert!(!state.exists(addr(1)).unwrap());
    }

    #[test]
    fn test_energy_settlement() {
        let mut state = fresh_state();
        state.set_balance(addr(1), crate::constants::ENERGY_SCALE).unwrap();
        state.set_energy(addr(1), U256::ZERO, 1_000).unwrap();

        let accrued = state.energy(addr(1), 1_010).unwrap();
        assert_eq!(accrued, crate::constants::ENERGY_GROWTH_RATE * uint!(10_U256));

        // Settling rebinds the clock.
        state.set_energy(addr(1), accrued, 1_010).unwrap();
        assert_eq!(state.energy(addr(1), 1_010).unwrap(), accrued);
    }

    #[test]
    fn test_checkpoint_revert() {
        let mut state = fresh_state();
        state.set_balance(addr(1), uint!(1_U256)).unwrap();

        let outer = state.checkpoint();
        state.set_balance(addr(1), uint!(2_U256)).unwrap();
        state.set_balance(addr(2), uint!(9_U256)).unwrap();

        let inner = state.checkpoint();
        state.set_balance(addr(1), uint!(3_U256)).unwrap();
        state.revert_to(inner);
        assert_eq!(state.balance(addr(1)).unwrap(), uint!(2_U256));

        state.revert_to(outer);
        assert_eq!(state.balance(addr(1)).unwrap(), uint!(1_U256));
        assert!(!state.exists(addr(2)).unwrap());
    }

    #[test]
    fn test_revert_discards_nested_checkpoints() {
        let mut state = fresh_state();
        let outer = state.checkpoint();
        state.set_balance(addr(1), uint!(1_U256)).unwrap();
        let _inner = state.checkpoint();
        state.set_balance(addr(1), uint!(2_U256)).unwrap();

        // Reverting the outer checkpoint unwinds through the inner one.
        state.revert_to(outer);
        assert_eq!(state.balance(addr(1)).unwrap(), U256::ZERO);
    }
}
