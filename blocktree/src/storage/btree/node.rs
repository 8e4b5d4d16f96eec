//! B-tree node type and serialization.
//!
//! Every node fills exactly one 512-byte block. Keys, values, and child
//! pointers live in fixed-size arrays sized by the minimal degree, so a node
//! never allocates and always encodes to the same layout.
//!
//! Layout (all integers u64 big-endian):
//! - `[0..8)`: block id
//! - `[8..16)`: parent block id (0 for the root)
//! - `[16..24)`: key count
//! - `[24..176)`: 19 keys
//! - `[176..328)`: 19 values
//! - `[328..488)`: 20 child block ids (0 = no child)
//! - `[488..512)`: zero

#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{BLOCK_SIZE, Block, BlockId, INT_SIZE};

/// Minimal degree of the tree.
pub const MIN_DEGREE: usize = 10;

/// Maximum number of keys in a node (2t - 1).
pub const MAX_KEYS: usize = 2 * MIN_DEGREE - 1;

/// Maximum number of children of a node (2t).
pub const MAX_CHILDREN: usize = MAX_KEYS + 1;

/// Minimum number of keys in a non-root node (t - 1).
pub const MIN_KEYS: usize = MIN_DEGREE - 1;

/// Index of the promoted entry when an overfull node (`MAX_KEYS + 1` keys)
/// splits. Entries before it stay left, entries after it move right.
pub const SPLIT_INDEX: usize = MIN_DEGREE - 1;

mod offsets {
    use super::{INT_SIZE, MAX_CHILDREN, MAX_KEYS};

    pub const BLOCK_ID: usize = 0;
    pub const PARENT_ID: usize = 8;
    pub const KEY_COUNT: usize = 16;
    pub const KEYS: usize = 24;
    pub const VALUES: usize = KEYS + MAX_KEYS * INT_SIZE;
    pub const CHILDREN: usize = VALUES + MAX_KEYS * INT_SIZE;
    pub const END: usize = CHILDREN + MAX_CHILDREN * INT_SIZE;
}

const _: () = assert!(offsets::END <= BLOCK_SIZE);

/// A B-tree node.
///
/// Only `keys[..key_count]`, `values[..key_count]`, and, for internal nodes,
/// `children[..=key_count]` are meaningful. A leaf has every child set to 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Block this node lives in.
    pub block_id: BlockId,
    /// Parent block, or 0 for the root.
    pub parent_id: BlockId,
    /// Number of active keys.
    pub key_count: usize,
    /// Keys in strictly ascending order.
    pub keys: [u64; MAX_KEYS],
    /// `values[i]` belongs to `keys[i]`.
    pub values: [u64; MAX_KEYS],
    /// Child block ids.
    pub children: [BlockId; MAX_CHILDREN],
}

/// The result of splitting an overfull node.
///
/// The node that was split keeps the left half in place. The right half has
/// no block yet; the caller allocates one and stamps it with `assign_block`.
#[derive(Debug)]
pub struct Split {
    /// Key promoted into the parent.
    pub median_key: u64,
    /// Value travelling with the promoted key.
    pub median_value: u64,
    /// Entries (and children) that were to the right of the median.
    pub right: Node,
}

impl Node {
    /// Create a new empty node.
    #[must_use]
    pub const fn new(block_id: BlockId, parent_id: BlockId) -> Self {
        Self {
            block_id,
            parent_id,
            key_count: 0,
            keys: [0; MAX_KEYS],
            values: [0; MAX_KEYS],
            children: [0; MAX_CHILDREN],
        }
    }

    /// Create a root node holding a single promoted entry over two children.
    #[must_use]
    pub const fn with_children(
        block_id: BlockId,
        left_child: BlockId,
        key: u64,
        value: u64,
        right_child: BlockId,
    ) -> Self {
        let mut node = Self::new(block_id, 0);
        node.key_count = 1;
        node.keys[0] = key;
        node.values[0] = value;
        node.children[0] = left_child;
        node.children[1] = right_child;
        node
    }

    /// Decode a node from raw block bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, NodeError> {
        let block = Block::from_slice(bytes).ok_or(NodeError::WrongSize(bytes.len()))?;
        Self::from_block(&block)
    }

    /// Read a node from a block.
    pub fn from_block(block: &Block) -> Result<Self, NodeError> {
        let key_count = block.read_u64(offsets::KEY_COUNT);
        if key_count > MAX_KEYS as u64 {
            return Err(NodeError::KeyCountOutOfRange(key_count));
        }

        let mut node = Self::new(
            block.read_u64(offsets::BLOCK_ID),
            block.read_u64(offsets::PARENT_ID),
        );
        node.key_count = key_count as usize;
        block.read_u64_array(offsets::KEYS, &mut node.keys);
        block.read_u64_array(offsets::VALUES, &mut node.values);
        block.read_u64_array(offsets::CHILDREN, &mut node.children);

        Ok(node)
    }

    /// Encode the node into a fresh, zero-padded block.
    #[must_use]
    pub fn to_block(&self) -> Block {
        let mut block = Block::new();
        block.write_u64(offsets::BLOCK_ID, self.block_id);
        block.write_u64(offsets::PARENT_ID, self.parent_id);
        block.write_u64(offsets::KEY_COUNT, self.key_count as u64);
        block.write_u64_array(offsets::KEYS, &self.keys);
        block.write_u64_array(offsets::VALUES, &self.values);
        block.write_u64_array(offsets::CHILDREN, &self.children);
        block
    }

    /// Active keys.
    #[must_use]
    pub fn keys(&self) -> &[u64] {
        &self.keys[..self.key_count]
    }

    /// Active values.
    #[must_use]
    pub fn values(&self) -> &[u64] {
        &self.values[..self.key_count]
    }

    /// Active children. Empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[BlockId] {
        if self.is_leaf() {
            &[]
        } else {
            &self.children[..=self.key_count]
        }
    }

    /// A node is a leaf when it has no first child.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.children[0] == 0
    }

    /// Check if the node has no room for another key.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.key_count >= MAX_KEYS
    }

    /// Locate `key` among the active keys.
    ///
    /// `Ok(i)` if `keys[i] == key`, otherwise `Err(i)` where `i` is the
    /// insertion position and also the child to descend into.
    pub fn find(&self, key: u64) -> Result<usize, usize> {
        self.keys().binary_search(&key)
    }

    /// Insert an entry at `pos`, with `right_child` to the right of it.
    ///
    /// Leaves pass 0 for `right_child`. Returns `None` when the entry fit,
    /// or the split halves when the node would have exceeded `MAX_KEYS`.
    pub fn insert_at(
        &mut self,
        pos: usize,
        key: u64,
        value: u64,
        right_child: BlockId,
    ) -> Option<Split> {
        debug_assert!(pos <= self.key_count);

        if !self.is_full() {
            let n = self.key_count;
            self.keys.copy_within(pos..n, pos + 1);
            self.values.copy_within(pos..n, pos + 1);
            self.children.copy_within(pos + 1..=n, pos + 2);
            self.keys[pos] = key;
            self.values[pos] = value;
            self.children[pos + 1] = right_child;
            self.key_count += 1;
            return None;
        }

        Some(self.split_with(pos, key, value, right_child))
    }

    /// Split a full node around the entry that would have landed at `pos`.
    fn split_with(&mut self, pos: usize, key: u64, value: u64, right_child: BlockId) -> Split {
        // Lay out the MAX_KEYS + 1 entries in order.
        let mut keys = [0u64; MAX_KEYS + 1];
        let mut values = [0u64; MAX_KEYS + 1];
        let mut children: [BlockId; MAX_CHILDREN + 1] = [0; MAX_CHILDREN + 1];

        keys[..pos].copy_from_slice(&self.keys[..pos]);
        keys[pos] = key;
        keys[pos + 1..].copy_from_slice(&self.keys[pos..]);

        values[..pos].copy_from_slice(&self.values[..pos]);
        values[pos] = value;
        values[pos + 1..].copy_from_slice(&self.values[pos..]);

        children[..=pos].copy_from_slice(&self.children[..=pos]);
        children[pos + 1] = right_child;
        children[pos + 2..].copy_from_slice(&self.children[pos + 1..]);

        let mut right = Self::new(0, self.parent_id);
        let right_count = MAX_KEYS - SPLIT_INDEX;
        right.key_count = right_count;
        right.keys[..right_count].copy_from_slice(&keys[SPLIT_INDEX + 1..]);
        right.values[..right_count].copy_from_slice(&values[SPLIT_INDEX + 1..]);
        right.children[..=right_count].copy_from_slice(&children[SPLIT_INDEX + 1..]);

        self.keys = [0; MAX_KEYS];
        self.values = [0; MAX_KEYS];
        self.children = [0; MAX_CHILDREN];
        self.key_count = SPLIT_INDEX;
        self.keys[..SPLIT_INDEX].copy_from_slice(&keys[..SPLIT_INDEX]);
        self.values[..SPLIT_INDEX].copy_from_slice(&values[..SPLIT_INDEX]);
        self.children[..=SPLIT_INDEX].copy_from_slice(&children[..=SPLIT_INDEX]);

        Split {
            median_key: keys[SPLIT_INDEX],
            median_value: values[SPLIT_INDEX],
            right,
        }
    }
}

impl Split {
    /// Give the right half its freshly allocated block id.
    pub const fn assign_block(&mut self, block_id: BlockId) {
        self.right.block_id = block_id;
    }
}

/// Errors that can occur when decoding B-tree nodes.
#[derive(Debug, PartialEq, Eq)]
pub enum NodeError {
    /// Input is not exactly one block.
    WrongSize(usize),
    /// Stored key count exceeds `MAX_KEYS`.
    KeyCountOutOfRange(u64),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongSize(len) => {
                write!(f, "node block is {len} bytes (expected {BLOCK_SIZE})")
            }
            Self::KeyCountOutOfRange(n) => {
                write!(f, "key count {n} exceeds maximum of {MAX_KEYS}")
            }
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn leaf_with_keys(keys: &[u64]) -> Node {
        let mut node = Node::new(1, 0);
        for &key in keys {
            let pos = node.find(key).expect_err("key should be new");
            assert!(node.insert_at(pos, key, key * 100, 0).is_none());
        }
        node
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(MAX_KEYS, 19);
        assert_eq!(MAX_CHILDREN, 20);
        assert_eq!(MIN_KEYS, 9);
        assert_eq!(offsets::VALUES, 176);
        assert_eq!(offsets::CHILDREN, 328);
        assert_eq!(offsets::END, 488);
    }

    #[test]
    fn test_empty_node_roundtrip() {
        let node = Node::new(3, 1);
        let block = node.to_block();
        let restored = Node::decode(block.as_bytes()).expect("should decode");
        assert_eq!(restored, node);
        assert!(restored.is_leaf());
    }

    #[test]
    fn test_full_node_roundtrip() {
        let mut node = Node::new(9, 4);
        node.key_count = MAX_KEYS;
        for i in 0..MAX_KEYS {
            node.keys[i] = (i as u64 + 1) * 10;
            node.values[i] = u64::MAX - i as u64;
        }
        for (i, child) in node.children.iter_mut().enumerate() {
            *child = 100 + i as u64;
        }

        let restored = Node::decode(node.to_block().as_bytes()).expect("should decode");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_arbitrary_arrays_roundtrip() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let mut node = Node::new(rng.random(), rng.random());
            node.key_count = rng.random_range(0..=MAX_KEYS);
            rng.fill(&mut node.keys[..]);
            rng.fill(&mut node.values[..]);
            rng.fill(&mut node.children[..]);

            let restored = Node::decode(node.to_block().as_bytes()).expect("should decode");
            assert_eq!(restored, node);
        }
    }

    #[test]
    fn test_encoding_layout() {
        let mut node = Node::new(2, 1);
        node.key_count = 1;
        node.keys[0] = 5;
        node.values[0] = 50;
        node.children[0] = 7;
        node.children[1] = 8;

        let block = node.to_block();
        assert_eq!(block.read_u64(0), 2);
        assert_eq!(block.read_u64(8), 1);
        assert_eq!(block.read_u64(16), 1);
        assert_eq!(block.read_u64(24), 5);
        assert_eq!(block.read_u64(176), 50);
        assert_eq!(block.read_u64(328), 7);
        assert_eq!(block.read_u64(336), 8);
        assert!(block.as_bytes()[488..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_wrong_size() {
        let block = Node::new(1, 0).to_block();
        assert_eq!(
            Node::decode(&block.as_bytes()[..511]),
            Err(NodeError::WrongSize(511))
        );
        let mut long = block.as_bytes().to_vec();
        long.push(0);
        assert_eq!(Node::decode(&long), Err(NodeError::WrongSize(513)));
    }

    #[test]
    fn test_decode_key_count_out_of_range() {
        let mut block = Node::new(1, 0).to_block();
        block.write_u64(16, 20);
        assert_eq!(
            Node::from_block(&block),
            Err(NodeError::KeyCountOutOfRange(20))
        );
    }

    #[test]
    fn test_insert_keeps_order() {
        let node = leaf_with_keys(&[50, 10, 40, 20, 30]);
        assert_eq!(node.keys(), &[10, 20, 30, 40, 50]);
        assert_eq!(node.values(), &[1000, 2000, 3000, 4000, 5000]);
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_find() {
        let node = leaf_with_keys(&[10, 20, 30]);
        assert_eq!(node.find(20), Ok(1));
        assert_eq!(node.find(5), Err(0));
        assert_eq!(node.find(25), Err(2));
        assert_eq!(node.find(35), Err(3));
    }

    #[test]
    fn test_internal_insert_places_right_child() {
        let mut node = Node::with_children(1, 10, 50, 500, 11);
        assert!(node.insert_at(0, 20, 200, 12).is_none());
        assert!(node.insert_at(2, 80, 800, 13).is_none());

        assert_eq!(node.keys(), &[20, 50, 80]);
        assert_eq!(node.children(), &[10, 12, 11, 13]);
    }

    #[test]
    fn test_leaf_split() {
        let keys: Vec<u64> = (1..=19).collect();
        let mut node = leaf_with_keys(&keys);
        assert!(node.is_full());

        let split = node.insert_at(19, 20, 2000, 0).expect("should split");

        assert_eq!(split.median_key, 10);
        assert_eq!(split.median_value, 1000);
        assert_eq!(node.keys(), (1..=9).collect::<Vec<_>>().as_slice());
        assert_eq!(split.right.keys(), (11..=20).collect::<Vec<_>>().as_slice());
        assert_eq!(split.right.values()[0], 1100);
        assert!(node.is_leaf());
        assert!(split.right.is_leaf());
        // Slots past the left half are cleared.
        assert!(node.keys[SPLIT_INDEX..].iter().all(|&k| k == 0));
    }

    #[test]
    fn test_internal_split_distributes_children() {
        let mut node = Node::new(1, 7);
        node.key_count = MAX_KEYS;
        for i in 0..MAX_KEYS {
            // Keys 10, 20, ..., 190
            node.keys[i] = (i as u64 + 1) * 10;
            node.values[i] = i as u64;
        }
        for (i, child) in node.children.iter_mut().enumerate() {
            *child = 100 + i as u64;
        }

        // 15 lands between 10 and 20; its right child is 999.
        let mut split = node.insert_at(1, 15, 15, 999).expect("should split");
        split.assign_block(42);

        // Ordered keys: 10, 15, 20, ..., 190 -> median is the 10th (90).
        assert_eq!(split.median_key, 90);
        assert_eq!(node.key_count, 9);
        assert_eq!(node.keys(), &[10, 15, 20, 30, 40, 50, 60, 70, 80]);
        assert_eq!(
            node.children(),
            &[100, 101, 999, 102, 103, 104, 105, 106, 107, 108]
        );

        assert_eq!(split.right.block_id, 42);
        assert_eq!(split.right.parent_id, 7);
        assert_eq!(split.right.key_count, 10);
        assert_eq!(split.right.keys()[0], 100);
        assert_eq!(split.right.children().len(), 11);
        assert_eq!(split.right.children()[0], 109);
        assert_eq!(split.right.children()[10], 119);
    }
}
