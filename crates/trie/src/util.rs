//! Utilities for `tempo-trie`.

use alloy_rlp::{Buf, Header};
use alloy_trie::Nibbles;

/// Returns the number of leading nibbles shared by `a` and `b`.
pub(crate) fn common_prefix_length(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Concatenates two nibble paths.
pub(crate) fn join_nibbles(a: &Nibbles, b: &Nibbles) -> Nibbles {
    Nibbles::from_nibbles_unchecked([&a[..], &b[..]].concat())
}

/// Prepends a single nibble to a path.
pub(crate) fn prepend_nibble(nibble: u8, rest: &Nibbles) -> Nibbles {
    let mut nibbles = Vec::with_capacity(rest.len() + 1);
    nibbles.push(nibble);
    nibbles.extend_from_slice(rest);
    Nibbles::from_nibbles_unchecked(nibbles)
}

/// Walks through a RLP list payload and returns the total number of elements
/// in the list.
pub(crate) fn count_list_elements(mut buf: &[u8]) -> alloy_rlp::Result<usize> {
    let mut count = 0;
    while !buf.is_empty() {
        let header = Header::decode(&mut buf)?;
        if header.payload_length > buf.len() {
            return Err(alloy_rlp::Error::InputTooShort);
        }
        buf.advance(header.payload_length);
        count += 1;
    }
    Ok(count)
}

/// Unpack node path to nibbles.
///
/// ## Takes
/// - `first` - first nibble of the path if it is odd. Must be <= 0x0F, or will
///   create invalid nibbles.
/// - `rest` - rest of the nibbles packed
///
/// ## Returns
/// - `Nibbles` - unpacked nibbles
pub(crate) fn unpack_path_to_nibbles(first: Option<u8>, rest: &[u8]) -> Nibbles {
    let rest = Nibbles::unpack(rest);
    Nibbles::from_nibbles_unchecked(first.into_iter().chain(rest.iter().copied()).collect::<Vec<u8>>())
}
