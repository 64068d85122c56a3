//! Contains the [KeyValueStore] and [WriteBatch] traits the trie persists
//! through, along with the in-memory implementations used for testing.

use alloy_primitives::{Bytes, B256};
use core::{convert::Infallible, fmt::Display};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// The [KeyValueStore] trait defines the synchronous interface to the backing
/// store beneath the trie. Trie nodes and code blobs are both keyed by their
/// own hash; no other layout is assumed.
pub trait KeyValueStore {
    /// The error type for store operations.
    type Error: Display;
    /// The write batch type produced by [Self::batch].
    type Batch: WriteBatch<Error = Self::Error>;

    /// Fetches the value associated with `key`, or `None` if absent.
    fn get(&self, key: B256) -> Result<Option<Bytes>, Self::Error>;

    /// Writes a single value directly, outside of any batch.
    fn put(&self, key: B256, value: Bytes) -> Result<(), Self::Error>;

    /// Returns a new, empty [WriteBatch] against this store.
    fn batch(&self) -> Self::Batch;
}

/// A buffered set of writes that is published atomically. A batch may be
/// written at most once; it is consumed by [Self::write].
pub trait WriteBatch {
    /// The error type for publishing the batch.
    type Error: Display;

    /// Buffers a write into the batch.
    fn put(&mut self, key: B256, value: Bytes);

    /// Publishes every buffered write atomically.
    fn write(self) -> Result<(), Self::Error>;
}

/// An in-memory [KeyValueStore] backed by a shared hash map. Cloning yields a
/// handle onto the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<B256, Bytes>>>,
}

impl MemoryStore {
    /// Creates a new, empty [MemoryStore].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries held by the store.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    type Error = Infallible;
    type Batch = MemoryBatch;

    fn get(&self, key: B256) -> Result<Option<Bytes>, Self::Error> {
        Ok(self.inner.lock().get(&key).cloned())
    }

    fn put(&self, key: B256, value: Bytes) -> Result<(), Self::Error> {
        self.inner.lock().insert(key, value);
        Ok(())
    }

    fn batch(&self) -> Self::Batch {
        MemoryBatch { entries: Vec::new(), inner: Arc::clone(&self.inner) }
    }
}

/// A [WriteBatch] over a [MemoryStore]. Writes land in the shared map only
/// when [WriteBatch::write] is called.
#[derive(Debug)]
pub struct MemoryBatch {
    entries: Vec<(B256, Bytes)>,
    inner: Arc<Mutex<HashMap<B256, Bytes>>>,
}

impl WriteBatch for MemoryBatch {
    type Error = Infallible;

    fn put(&mut self, key: B256, value: Bytes) {
        self.entries.push((key, value));
    }

    fn write(self) -> Result<(), Self::Error> {
        self.inner.lock().extend(self.entries);
        Ok(())
    }
}

/// A [KeyValueStore] that holds nothing and accepts everything, used for
/// tries that live entirely in memory.
#[derive(Debug, Clone, Copy)]
pub struct NoopStore;

impl KeyValueStore for NoopStore {
    type Error = Infallible;
    type Batch = NoopBatch;

    fn get(&self, _key: B256) -> Result<Option<Bytes>, Self::Error> {
        Ok(None)
    }

    fn put(&self, _key: B256, _value: Bytes) -> Result<(), Self::Error> {
        Ok(())
    }

    fn batch(&self) -> Self::Batch {
        NoopBatch
    }
}

/// The [WriteBatch] counterpart to [NoopStore].
#[derive(Debug, Clone, Copy)]
pub struct NoopBatch;

impl WriteBatch for NoopBatch {
    type Error = Infallible;

    fn put(&mut self, _key: B256, _value: Bytes) {}

    fn write(self) -> Result<(), Self::Error> {
        Ok(())
    }
}
