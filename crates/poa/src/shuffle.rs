//! Deterministic permutation generation.
//!
//! The schedule walks proposers in an order derived from a per-round seed.
//! Every node must reproduce the permutation byte-for-byte, so the stream
//! feeding the shuffle is pinned down exactly here: block `i` of the stream
//! is `keccak256(seed || be_u64(i))`, consumed as big-endian 32-bit words,
//! and bounded draws reject samples past the largest multiple of the bound
//! so the permutation carries no modulo bias.

use alloy_primitives::keccak256;

/// A byte stream expanded from a seed by counter-mode hashing.
struct HashStream<'a> {
    seed: &'a [u8],
    block: [u8; 32],
    offset: usize,
    counter: u64,
}

impl<'a> HashStream<'a> {
    const fn new(seed: &'a [u8]) -> Self {
        Self { seed, block: [0; 32], offset: 32, counter: 0 }
    }

    /// Returns the next big-endian 32-bit word of the stream.
    fn next_u32(&mut self) -> u32 {
        if self.offset + 4 > self.block.len() {
            let mut material = Vec::with_capacity(self.seed.len() + 8);
            material.extend_from_slice(self.seed);
            material.extend_from_slice(&self.counter.to_be_bytes());
            self.block = keccak256(&material).0;
            self.counter += 1;
            self.offset = 0;
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.block[self.offset..self.offset + 4]);
        self.offset += 4;
        u32::from_be_bytes(word)
    }

    /// Returns a uniform sample in `0..bound` via rejection sampling.
    fn next_bounded(&mut self, bound: u32) -> u32 {
        let limit = u32::MAX - (u32::MAX % bound);
        loop {
            let sample = self.next_u32();
            if sample < limit {
                return sample % bound;
            }
        }
    }
}

/// Deterministically permutes the indices `0..len` with a Fisher–Yates walk
/// driven by the seed's hash stream. The same seed yields the same
/// permutation on every platform.
pub fn shuffle(seed: &[u8], len: usize) -> Vec<usize> {
    let mut indices = (0..len).collect::<Vec<_>>();
    let mut stream = HashStream::new(seed);
    for i in (1..len).rev() {
        let j = stream.next_bounded(i as u32 + 1) as usize;
        indices.swap(i, j);
    }
    indices
}
