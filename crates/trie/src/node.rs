//! This module contains the [TrieNode] type, which represents the nodes of a
//! Merkle-Patricia trie and carries the insert/delete/lookup walks over them.

use crate::{
    errors::{TrieError, TrieResult},
    store::KeyValueStore,
    util,
};
use alloy_primitives::{keccak256, Bytes, B256};
use alloy_rlp::{Buf, BufMut, Decodable, Encodable, Header, EMPTY_LIST_CODE, EMPTY_STRING_CODE};
use alloy_trie::{Nibbles, EMPTY_ROOT_HASH};

/// The length of the branch list when RLP encoded.
const BRANCH_LIST_LENGTH: usize = 17;

/// The length of a leaf or extension node's RLP encoded list.
const LEAF_OR_EXTENSION_LIST_LENGTH: usize = 2;

/// The number of children of a branch node.
const BRANCH_WIDTH: usize = 16;

/// Prefix for even-nibbled extension node paths.
const PREFIX_EXTENSION_EVEN: u8 = 0;

/// Prefix for odd-nibbled extension node paths.
const PREFIX_EXTENSION_ODD: u8 = 1;

/// Prefix for even-nibbled leaf node paths.
const PREFIX_LEAF_EVEN: u8 = 2;

/// Prefix for odd-nibbled leaf node paths.
const PREFIX_LEAF_ODD: u8 = 3;

/// A [TrieNode] is a node within a standard Merkle Patricia Trie.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TrieNode {
    /// An empty node.
    Empty,
    /// A blinded node is a node that has been hashed down to its commitment;
    /// its preimage lives in the backing store.
    Blinded {
        /// The commitment that blinds the node.
        commitment: B256,
    },
    /// A leaf node is a 2-item node with the encoding `rlp([encoded_path, value])`.
    Leaf {
        /// The key path of the leaf, relative to its parent.
        prefix: Nibbles,
        /// The value of the leaf node.
        value: Bytes,
    },
    /// An extension node is a 2-item pointer node with the encoding
    /// `rlp([encoded_path, child_ref])`.
    Extension {
        /// The path prefix of the extension.
        prefix: Nibbles,
        /// The child node behind the extension.
        node: Box<TrieNode>,
    },
    /// A branch node refers to up to 16 child nodes with the encoding
    /// `rlp([ v0, ..., v15, value ])`. Keys in this trie are fixed-width
    /// hashes, so the branch value slot is always empty.
    Branch {
        /// The 16 child nodes of the branch.
        stack: Vec<TrieNode>,
    },
}

impl TrieNode {
    /// Creates a new [TrieNode::Blinded] node from a commitment.
    pub const fn new_blinded(commitment: B256) -> Self {
        Self::Blinded { commitment }
    }

    /// Fetches the preimage of `commitment` from the backing store and decodes
    /// it into a [TrieNode].
    pub fn try_fetch<S: KeyValueStore>(commitment: B256, store: &S) -> TrieResult<Self> {
        let Some(preimage) =
            store.get(commitment).map_err(|err| TrieError::Store(err.to_string()))?
        else {
            return Err(TrieError::MissingNode(commitment));
        };
        Ok(Self::decode(&mut preimage.as_ref())?)
    }

    /// Returns the commitment (hash) of the node. For every node but the
    /// root this is only meaningful once the node's encoding is final; the
    /// empty node commits to the well-known empty root.
    pub fn commitment(&self) -> B256 {
        match self {
            Self::Empty => EMPTY_ROOT_HASH,
            Self::Blinded { commitment } => *commitment,
            node => keccak256(alloy_rlp::encode(node)),
        }
    }

    /// Retrieves the value associated with `path`, resolving blinded nodes on
    /// the walk through the backing store and caching them in place.
    ///
    /// ## Takes
    /// - `path`: The nibble path of the (hashed) key.
    /// - `store`: The backing store used to resolve blinded nodes.
    ///
    /// ## Returns
    /// - `Ok(Some(value))`: The value at `path`.
    /// - `Ok(None)`: `path` is not present in the trie.
    /// - `Err(_)`: The walk could not be completed.
    pub fn get<'a, S: KeyValueStore>(
        &'a mut self,
        path: &Nibbles,
        store: &S,
    ) -> TrieResult<Option<&'a Bytes>> {
        match self {
            Self::Empty => Ok(None),
            Self::Blinded { .. } => {
                self.unblind(store)?;
                self.get(path, store)
            }
            Self::Leaf { prefix, value } => Ok((*prefix == *path).then_some(&*value)),
            Self::Extension { prefix, node } => {
                let shared = util::common_prefix_length(prefix, path);
                if shared == prefix.len() {
                    node.get(&path.slice(shared..), store)
                } else {
                    Ok(None)
                }
            }
            Self::Branch { stack } => {
                let Some(index) = path.first() else {
                    return Ok(None);
                };
                stack[index as usize].get(&path.slice(1..), store)
            }
        }
    }

    /// Inserts `value` at `path`, splitting leaves and extensions as needed.
    /// The update is buffered in memory; nothing is persisted.
    ///
    /// ## Takes
    /// - `path`: The nibble path of the (hashed) key.
    /// - `value`: The value to associate with `path`.
    /// - `store`: The backing store used to resolve blinded nodes.
    pub fn insert<S: KeyValueStore>(
        &mut self,
        path: &Nibbles,
        value: Bytes,
        store: &S,
    ) -> TrieResult<()> {
        match self {
            Self::Empty => {
                *self = Self::Leaf { prefix: path.clone(), value };
                Ok(())
            }
            Self::Blinded { .. } => {
                self.unblind(store)?;
                self.insert(path, value, store)
            }
            Self::Leaf { prefix, value: leaf_value } => {
                let shared = util::common_prefix_length(prefix, path);
                if shared == prefix.len() && shared == path.len() {
                    *leaf_value = value;
                    return Ok(());
                }
                // Keys are fixed-width, so two distinct keys always diverge
                // before either path is exhausted.
                if shared == prefix.len() || shared == path.len() {
                    return Err(TrieError::InvalidNodeType);
                }

                let mut stack = vec![Self::Empty; BRANCH_WIDTH];
                stack[prefix[shared] as usize] =
                    Self::Leaf { prefix: prefix.slice(shared + 1..), value: leaf_value.clone() };
                stack[path[shared] as usize] =
                    Self::Leaf { prefix: path.slice(shared + 1..), value };

                let branch = Self::Branch { stack };
                *self = if shared > 0 {
                    Self::Extension { prefix: path.slice(..shared), node: Box::new(branch) }
                } else {
                    branch
                };
                Ok(())
            }
            Self::Extension { prefix, node } => {
                let shared = util::common_prefix_length(prefix, path);
                if shared == prefix.len() {
                    return node.insert(&path.slice(shared..), value, store);
                }
                if shared == path.len() {
                    return Err(TrieError::InvalidNodeType);
                }

                let ext_prefix = prefix.clone();
                let child = core::mem::replace(node.as_mut(), Self::Empty);

                let mut stack = vec![Self::Empty; BRANCH_WIDTH];
                let rest = ext_prefix.slice(shared + 1..);
                stack[ext_prefix[shared] as usize] = if rest.is_empty() {
                    child
                } else {
                    Self::Extension { prefix: rest, node: Box::new(child) }
                };
                stack[path[shared] as usize] =
                    Self::Leaf { prefix: path.slice(shared + 1..), value };

                let branch = Self::Branch { stack };
                *self = if shared > 0 {
                    Self::Extension { prefix: path.slice(..shared), node: Box::new(branch) }
                } else {
                    branch
                };
                Ok(())
            }
            Self::Branch { stack } => {
                let Some(index) = path.first() else {
                    return Err(TrieError::InvalidNodeType);
                };
                stack[index as usize].insert(&path.slice(1..), value, store)
            }
        }
    }

    /// Deletes the value at `path` and restructures the trie so that its
    /// encoding stays canonical: a branch left with a single child collapses
    /// into its child, and extensions merge with the node they point at.
    ///
    /// ## Takes
    /// - `path`: The nibble path of the (hashed) key.
    /// - `store`: The backing store used to resolve blinded nodes.
    ///
    /// ## Returns
    /// - `Ok(())`: The key was removed.
    /// - `Err(TrieError::KeyNotFound)`: The key was not present.
    pub fn delete<S: KeyValueStore>(&mut self, path: &Nibbles, store: &S) -> TrieResult<()> {
        match self {
            Self::Empty => Err(TrieError::KeyNotFound),
            Self::Blinded { .. } => {
                self.unblind(store)?;
                self.delete(path, store)
            }
            Self::Leaf { prefix, .. } => {
                if *prefix == *path {
                    *self = Self::Empty;
                    Ok(())
                } else {
                    Err(TrieError::KeyNotFound)
                }
            }
            Self::Extension { prefix, node } => {
                let shared = util::common_prefix_length(prefix, path);
                if shared != prefix.len() {
                    return Err(TrieError::KeyNotFound);
                }
                node.delete(&path.slice(shared..), store)?;

                // Merge the extension with whatever survived below it.
                let ext_prefix = prefix.clone();
                let child = core::mem::replace(node.as_mut(), Self::Empty);
                *self = match child {
                    Self::Empty => Self::Empty,
                    Self::Leaf { prefix: child_prefix, value } => Self::Leaf {
                        prefix: util::join_nibbles(&ext_prefix, &child_prefix),
                        value,
                    },
                    Self::Extension { prefix: child_prefix, node: child_node } => Self::Extension {
                        prefix: util::join_nibbles(&ext_prefix, &child_prefix),
                        node: child_node,
                    },
                    child => Self::Extension { prefix: ext_prefix, node: Box::new(child) },
                };
                Ok(())
            }
            Self::Branch { stack } => {
                let Some(index) = path.first() else {
                    return Err(TrieError::InvalidNodeType);
                };
                stack[index as usize].delete(&path.slice(1..), store)?;

                if stack.iter().filter(|node| !matches!(node, Self::Empty)).count() > 1 {
                    return Ok(());
                }
                let Some(index) = stack.iter().position(|node| !matches!(node, Self::Empty))
                else {
                    *self = Self::Empty;
                    return Ok(());
                };

                let mut only = core::mem::replace(&mut stack[index], Self::Empty);
                only.unblind(store)?;
                *self = match only {
                    Self::Leaf { prefix, value } => {
                        Self::Leaf { prefix: util::prepend_nibble(index as u8, &prefix), value }
                    }
                    Self::Extension { prefix, node } => {
                        Self::Extension { prefix: util::prepend_nibble(index as u8, &prefix), node }
                    }
                    branch @ Self::Branch { .. } => Self::Extension {
                        prefix: Nibbles::from_nibbles_unchecked([index as u8]),
                        node: Box::new(branch),
                    },
                    _ => return Err(TrieError::InvalidNodeType),
                };
                Ok(())
            }
        }
    }

    /// Replaces a [TrieNode::Blinded] node with its preimage from the backing
    /// store. A no-op for any other node.
    pub(crate) fn unblind<S: KeyValueStore>(&mut self, store: &S) -> TrieResult<()> {
        if let Self::Blinded { commitment } = self {
            *self = Self::try_fetch(*commitment, store)?;
        }
        Ok(())
    }

    /// The encoded length of the node as referenced by a parent: nodes whose
    /// encoding is shorter than a hash are embedded verbatim, anything else
    /// is referenced by its commitment.
    fn ref_length(&self) -> usize {
        match self {
            Self::Empty => 1,
            Self::Blinded { commitment } => commitment.length(),
            node => {
                let length = node.length();
                if length < B256::len_bytes() {
                    length
                } else {
                    B256::len_bytes() + 1
                }
            }
        }
    }

    /// Encodes the node as referenced by a parent node. See [Self::ref_length].
    fn encode_ref(&self, out: &mut dyn BufMut) {
        match self {
            Self::Empty => out.put_u8(EMPTY_STRING_CODE),
            Self::Blinded { commitment } => commitment.encode(out),
            node => {
                if node.length() < B256::len_bytes() {
                    node.encode(out);
                } else {
                    keccak256(alloy_rlp::encode(node)).encode(out);
                }
            }
        }
    }

    /// Decodes a child reference: an empty slot, an embedded short node, or a
    /// 32-byte commitment.
    fn decode_ref(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        match buf.first() {
            None => Err(alloy_rlp::Error::InputTooShort),
            Some(&EMPTY_STRING_CODE) => {
                buf.advance(1);
                Ok(Self::Empty)
            }
            Some(&byte) if byte >= EMPTY_LIST_CODE => Self::decode(buf),
            _ => {
                let hash = Bytes::decode(buf)?;
                if hash.len() != B256::len_bytes() {
                    return Err(alloy_rlp::Error::UnexpectedLength);
                }
                Ok(Self::Blinded { commitment: B256::from_slice(&hash) })
            }
        }
    }
}

/// Packs a nibble path into the hex-prefix encoding, flagging parity and
/// whether the node is a leaf.
fn encode_path(prefix: &Nibbles, is_leaf: bool) -> Vec<u8> {
    let flag = match (is_leaf, prefix.len() % 2 == 1) {
        (false, false) => PREFIX_EXTENSION_EVEN,
        (false, true) => PREFIX_EXTENSION_ODD,
        (true, false) => PREFIX_LEAF_EVEN,
        (true, true) => PREFIX_LEAF_ODD,
    };

    let mut nibbles: &[u8] = prefix;
    let mut packed = Vec::with_capacity(prefix.len() / 2 + 1);
    if prefix.len() % 2 == 1 {
        packed.push(flag << 4 | nibbles[0]);
        nibbles = &nibbles[1..];
    } else {
        packed.push(flag << 4);
    }
    for pair in nibbles.chunks(2) {
        packed.push(pair[0] << 4 | pair[1]);
    }
    packed
}

/// Unpacks a hex-prefix encoded path into nibbles.
fn decode_path(path: &[u8]) -> alloy_rlp::Result<Nibbles> {
    let first = match path[0] >> 4 {
        PREFIX_EXTENSION_EVEN | PREFIX_LEAF_EVEN => {
            if path[0] & 0x0F != 0 {
                return Err(alloy_rlp::Error::Custom("invalid even-length path prefix"));
            }
            None
        }
        PREFIX_EXTENSION_ODD | PREFIX_LEAF_ODD => Some(path[0] & 0x0F),
        _ => {
            return Err(alloy_rlp::Error::Custom("unexpected path identifier in high-order nibble"))
        }
    };
    Ok(util::unpack_path_to_nibbles(first, &path[1..]))
}

impl Encodable for TrieNode {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            Self::Empty => out.put_u8(EMPTY_STRING_CODE),
            Self::Blinded { commitment } => commitment.encode(out),
            Self::Leaf { prefix, value } => {
                let path = encode_path(prefix, true);
                let payload_length = path.as_slice().length() + value.length();
                Header { list: true, payload_length }.encode(out);
                path.as_slice().encode(out);
                value.encode(out);
            }
            Self::Extension { prefix, node } => {
                let path = encode_path(prefix, false);
                let payload_length = path.as_slice().length() + node.ref_length();
                Header { list: true, payload_length }.encode(out);
                path.as_slice().encode(out);
                node.encode_ref(out);
            }
            Self::Branch { stack } => {
                let payload_length = stack.iter().map(Self::ref_length).sum::<usize>() + 1;
                Header { list: true, payload_length }.encode(out);
                stack.iter().for_each(|node| node.encode_ref(out));
                out.put_u8(EMPTY_STRING_CODE);
            }
        }
    }

    fn length(&self) -> usize {
        match self {
            Self::Empty => 1,
            Self::Blinded { commitment } => commitment.length(),
            Self::Leaf { prefix, value } => {
                let path = encode_path(prefix, true);
                let payload_length = path.as_slice().length() + value.length();
                Header { list: true, payload_length }.length() + payload_length
            }
            Self::Extension { prefix, node } => {
                let path = encode_path(prefix, false);
                let payload_length = path.as_slice().length() + node.ref_length();
                Header { list: true, payload_length }.length() + payload_length
            }
            Self::Branch { stack } => {
                let payload_length = stack.iter().map(Self::ref_length).sum::<usize>() + 1;
                Header { list: true, payload_length }.length() + payload_length
            }
        }
    }
}

impl Decodable for TrieNode {
    /// Attempts to decode the [TrieNode].
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

        match util::count_list_elements(payload)? {
            BRANCH_LIST_LENGTH => {
                let mut stack = Vec::with_capacity(BRANCH_WIDTH);
                for _ in 0..BRANCH_WIDTH {
                    stack.push(Self::decode_ref(&mut payload)?);
                }
                let value = Bytes::decode(&mut payload)?;
                if !value.is_empty() {
                    return Err(alloy_rlp::Error::Custom("unexpected value in branch node"));
                }
                Ok(Self::Branch { stack })
            }
            LEAF_OR_EXTENSION_LIST_LENGTH => {
                let path = Bytes::decode(&mut payload)?;
                let Some(&flag_byte) = path.first() else {
                    return Err(alloy_rlp::Error::Custom("empty path in trie node"));
                };
                let prefix = decode_path(&path)?;
                match flag_byte >> 4 {
                    PREFIX_LEAF_EVEN | PREFIX_LEAF_ODD => {
                        let value = Bytes::decode(&mut payload)?;
                        Ok(Self::Leaf { prefix, value })
                    }
                    _ => {
                        let node = Self::decode_ref(&mut payload)?;
                        Ok(Self::Extension { prefix, node: Box::new(node) })
                    }
                }
            }
            _ => Err(alloy_rlp::Error::UnexpectedLength),
        }
    }
}
