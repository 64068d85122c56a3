//! This module contains the [Account] record stored in the accounts trie.

use crate::constants::{ENERGY_GROWTH_RATE, ENERGY_SCALE};
use alloy_primitives::{Address, B256, U256};
use alloy_rlp::{Buf, BufMut, Decodable, Encodable, Header, EMPTY_STRING_CODE};

/// An account as represented in the accounts trie.
///
/// The record is a fixed-shape 6-item RLP list. Optional fields encode as
/// empty strings when absent: an account without code carries no code hash
/// (never the hash of the empty blob), and an account without storage carries
/// no storage root. This keeps the empty account representable in exactly one
/// way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    /// Token balance.
    pub balance: U256,
    /// Energy balance, bound at [Self::block_time].
    pub energy: U256,
    /// The timestamp the energy balance was last settled at.
    pub block_time: u64,
    /// The address controlling the account, if one is set.
    pub master: Option<Address>,
    /// Hash of the account's code blob; absent when the account has no code.
    pub code_hash: Option<B256>,
    /// Root of the account's storage trie; absent when storage is empty.
    pub storage_root: Option<B256>,
}

impl Account {
    /// Returns `true` if every field of the record is zero or absent. Empty
    /// accounts are elided from the accounts trie entirely.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero()
            && self.energy.is_zero()
            && self.block_time == 0
            && self.master.is_none()
            && self.code_hash.is_none()
            && self.storage_root.is_none()
    }

    /// Returns the energy balance at `now`, including the energy accrued from
    /// the balance since [Self::block_time]. The stored record is untouched;
    /// accrual is settled only by an explicit energy write.
    pub fn energy_at(&self, now: u64) -> U256 {
        if now <= self.block_time || self.balance.is_zero() {
            return self.energy;
        }
        let elapsed = U256::from(now - self.block_time);
        let accrued =
            self.balance.saturating_mul(ENERGY_GROWTH_RATE).saturating_mul(elapsed) / ENERGY_SCALE;
        self.energy.saturating_add(accrued)
    }
}

/// Decodes a fixed-width field that encodes as the empty string when absent.
fn decode_optional<T: Decodable>(buf: &mut &[u8]) -> alloy_rlp::Result<Option<T>> {
    if buf.first() == Some(&EMPTY_STRING_CODE) {
        buf.advance(1);
        return Ok(None);
    }
    Ok(Some(T::decode(buf)?))
}

/// Encoded length of an optional fixed-width field.
fn optional_length<T: Encodable>(field: &Option<T>) -> usize {
    field.as_ref().map_or(1, Encodable::length)
}

/// Encodes an optional fixed-width field, writing the empty string when the
/// field is absent.
fn encode_optional<T: Encodable>(field: &Option<T>, out: &mut dyn BufMut) {
    match field {
        Some(value) => value.encode(out),
        None => out.put_u8(EMPTY_STRING_CODE),
    }
}

impl Encodable for Account {
    fn encode(&self, out: &mut dyn BufMut) {
        let payload_length = self.rlp_payload_length();
        Header { list: true, payload_length }.encode(out);
        self.balance.encode(out);
        self.energy.encode(out);
        self.block_time.encode(out);
        encode_optional(&self.master, out);
        encode_optional(&self.code_hash, out);
        encode_optional(&self.storage_root, out);
    }

    fn length(&self) -> usize {
        let payload_length = self.rlp_payload_length();
        Header { list: true, payload_length }.length() + payload_length
    }
}

impl Account {
    fn rlp_payload_length(&self) -> usize {
        self.balance.length()
            + self.energy.length()
            + self.block_time.length()
            + optional_length(&self.master)
            + optional_length(&self.code_hash)
            + optional_length(&self.storage_root)
    }
}

impl Decodable for Account {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let remaining = *buf;
        if header.payload_length > remaining.len() {
            return Err(alloy_rlp::Error::InputTooShort);
        }
        let mut payload = &remaining[..header.payload_length];
        buf.advance(header.payload_length);

        let account = Self {
            balance: U256::decode(&mut payload)?,
            energy: U256::decode(&mut payload)?,
            block_time: u64::decode(&mut payload)?,
            master: decode_optional(&mut payload)?,
            code_hash: decode_optional(&mut payload)?,
            storage_root: decode_optional(&mut payload)?,
        };
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::Custom("trailing bytes in account record"));
        }
        Ok(account)
    }
}
