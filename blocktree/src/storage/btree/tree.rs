//! B-tree engine over block storage.
//!
//! This is a classic (not B+) B-tree with minimal degree 10: every node holds
//! keys and values, and internal nodes also hold child block ids. Nodes are
//! never cached; each step of a search or insert reads the block it needs and
//! every modified node is written back before anything refers to it.
//!
//! Splits happen after an insert overflows a node. The overflow walks up the
//! recorded search path one parent at a time, and the tree only grows taller
//! when the root itself splits.

use std::path::Path;

use crate::config::IndexConfig;
use crate::storage::block::BlockId;
use crate::storage::btree::node::{Node, NodeError};
use crate::storage::file::{FileError, IndexFile};
use crate::storage::io::{BlockStorage, StorageError};

/// Deepest descent any valid tree can need. With at least 10 children per
/// internal node below the root, u64 keys never need more than 20 levels.
const MAX_HEIGHT: usize = 64;

/// What to do when inserting a key that is already in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Overwrite the stored value in place.
    #[default]
    Update,
    /// Leave the tree unchanged and fail with `BTreeError::DuplicateKey`.
    Reject,
}

/// A B-tree stored in block storage.
pub struct BTree<S = IndexFile> {
    storage: S,
    policy: DuplicatePolicy,
    /// Internal nodes visited by the current insert, root first.
    path: Vec<BlockId>,
}

impl BTree<IndexFile> {
    /// Create a new index file with an empty tree.
    pub fn create(path: &Path, config: &IndexConfig) -> Result<Self, BTreeError> {
        let file = IndexFile::create(path, config.durability)?;
        Ok(Self::new(file, config.duplicates))
    }

    /// Open an existing index file.
    ///
    /// Only the header is read; nodes are loaded on demand.
    pub fn load(path: &Path, config: &IndexConfig) -> Result<Self, BTreeError> {
        let file = IndexFile::open(path, config.durability)?;
        Ok(Self::new(file, config.duplicates))
    }
}

impl<S: BlockStorage> BTree<S> {
    /// Wrap storage whose header has already been validated.
    #[must_use]
    pub const fn new(storage: S, policy: DuplicatePolicy) -> Self {
        Self {
            storage,
            policy,
            path: Vec::new(),
        }
    }

    /// Get the root block id, or 0 if the tree is empty.
    #[must_use]
    pub fn root_block(&self) -> BlockId {
        self.storage.header().root_block
    }

    /// Whether the tree has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.header().is_empty()
    }

    /// Get a reference to the underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Get mutable access to the underlying storage.
    pub const fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Flush pending writes.
    pub fn sync(&mut self) -> Result<(), BTreeError> {
        Ok(self.storage.sync()?)
    }

    /// Look up a value by key.
    ///
    /// Returns `Ok(None)` when the key is absent and `BTreeError::EmptyTree`
    /// when there is no root to search from.
    pub fn search(&mut self, key: u64) -> Result<Option<u64>, BTreeError> {
        let root = self.root_block();
        if root == 0 {
            return Err(BTreeError::EmptyTree);
        }

        let mut node = read_node(&mut self.storage, root)?;
        let mut depth = 1;
        loop {
            match node.find(key) {
                Ok(i) => return Ok(Some(node.values[i])),
                Err(_) if node.is_leaf() => return Ok(None),
                Err(i) => {
                    let child = child_at(&node, i)?;
                    depth += 1;
                    check_depth(depth, child)?;
                    node = read_node(&mut self.storage, child)?;
                }
            }
        }
    }

    /// Insert a key-value pair.
    ///
    /// Returns the previous value when the key was already present and the
    /// duplicate policy is `Update`.
    pub fn insert(&mut self, key: u64, value: u64) -> Result<Option<u64>, BTreeError> {
        let root = self.root_block();
        if root == 0 {
            return self.insert_first(key, value).map(|()| None);
        }

        self.path.clear();
        let mut node = read_node(&mut self.storage, root)?;
        let pos = loop {
            match node.find(key) {
                Ok(i) => return self.update_existing(node, i, key, value),
                Err(i) if node.is_leaf() => break i,
                Err(i) => {
                    let child = child_at(&node, i)?;
                    self.path.push(node.block_id);
                    check_depth(self.path.len() + 1, child)?;
                    node = read_node(&mut self.storage, child)?;
                }
            }
        };

        self.insert_into_leaf(node, pos, key, value)?;
        Ok(None)
    }

    /// Walk all entries in ascending key order.
    ///
    /// The walk starts from the current root each time it is called.
    pub fn traverse(&mut self) -> BTreeIterator<'_, S> {
        let root = self.root_block();
        BTreeIterator {
            storage: &mut self.storage,
            stack: Vec::new(),
            descend: (root != 0).then_some(root),
        }
    }

    /// Count the total number of entries in the tree.
    pub fn count(&mut self) -> Result<usize, BTreeError> {
        self.traverse().try_fold(0, |count, entry| entry.map(|_| count + 1))
    }

    /// Read a node, checking that it is stored where it claims to be.
    pub(crate) fn read_node(&mut self, block_id: BlockId) -> Result<Node, BTreeError> {
        read_node(&mut self.storage, block_id)
    }

    /// Start the tree with a single-entry root in block 1.
    fn insert_first(&mut self, key: u64, value: u64) -> Result<(), BTreeError> {
        let block_id = self.storage.allocate_block()?;
        let mut node = Node::new(block_id, 0);
        node.key_count = 1;
        node.keys[0] = key;
        node.values[0] = value;

        self.write_node(&node)?;
        self.storage.set_root(block_id)?;

        tracing::debug!("started tree at block {block_id}");
        Ok(())
    }

    /// Apply the duplicate policy to a key found at `node.keys[index]`.
    fn update_existing(
        &mut self,
        mut node: Node,
        index: usize,
        key: u64,
        value: u64,
    ) -> Result<Option<u64>, BTreeError> {
        match self.policy {
            DuplicatePolicy::Reject => Err(BTreeError::DuplicateKey(key)),
            DuplicatePolicy::Update => {
                let old = std::mem::replace(&mut node.values[index], value);
                self.write_node(&node)?;
                Ok(Some(old))
            }
        }
    }

    /// Insert into a leaf and split upwards as long as nodes overflow.
    fn insert_into_leaf(
        &mut self,
        mut node: Node,
        mut pos: usize,
        mut key: u64,
        mut value: u64,
    ) -> Result<(), BTreeError> {
        let mut right_child = 0;

        loop {
            let Some(mut split) = node.insert_at(pos, key, value, right_child) else {
                return self.write_node(&node);
            };

            let right_id = self.storage.allocate_block()?;
            split.assign_block(right_id);
            tracing::debug!(
                "split block {} at key {}, right half in block {right_id}",
                node.block_id,
                split.median_key
            );

            let Some(parent_id) = self.path.pop() else {
                return self.grow_root(node, split.right, split.median_key, split.median_value);
            };

            if node.parent_id != parent_id {
                return Err(BTreeError::Corrupt {
                    block_id: node.block_id,
                    reason: format!(
                        "parent pointer {} does not match parent {parent_id} on search path",
                        node.parent_id
                    ),
                });
            }

            // Children first, then the parent that will reference them.
            self.write_node(&split.right)?;
            self.write_node(&node)?;
            self.adopt_children(&split.right)?;

            let parent = read_node(&mut self.storage, parent_id)?;
            pos = parent.find(split.median_key).err().ok_or_else(|| BTreeError::Corrupt {
                block_id: parent_id,
                reason: format!("key {} present in parent and child", split.median_key),
            })?;
            key = split.median_key;
            value = split.median_value;
            right_child = right_id;
            node = parent;
        }
    }

    /// Replace the root after it split into `left` and `right`.
    fn grow_root(
        &mut self,
        mut left: Node,
        mut right: Node,
        key: u64,
        value: u64,
    ) -> Result<(), BTreeError> {
        let root_id = self.storage.allocate_block()?;
        left.parent_id = root_id;
        right.parent_id = root_id;

        self.write_node(&right)?;
        self.write_node(&left)?;
        self.adopt_children(&right)?;

        let root = Node::with_children(root_id, left.block_id, key, value, right.block_id);
        self.write_node(&root)?;
        self.storage.set_root(root_id)?;

        tracing::debug!("new root in block {root_id} with key {key}");
        Ok(())
    }

    /// Point every child of `node` back at it.
    fn adopt_children(&mut self, node: &Node) -> Result<(), BTreeError> {
        for &child_id in node.children() {
            let mut child = read_node(&mut self.storage, child_id)?;
            if child.parent_id != node.block_id {
                child.parent_id = node.block_id;
                self.write_node(&child)?;
            }
        }
        Ok(())
    }

    fn write_node(&mut self, node: &Node) -> Result<(), BTreeError> {
        self.storage.write_block(node.block_id, &node.to_block())?;
        Ok(())
    }
}

fn read_node<S: BlockStorage>(storage: &mut S, block_id: BlockId) -> Result<Node, BTreeError> {
    let block = storage.read_block(block_id)?;
    let node = Node::from_block(&block)?;
    if node.block_id != block_id {
        return Err(BTreeError::Corrupt {
            block_id,
            reason: format!("block claims to be block {}", node.block_id),
        });
    }
    Ok(node)
}

/// Fail once a descent reaches `block_id` deeper than any valid tree goes,
/// which only happens when child pointers loop back up the tree.
fn check_depth(depth: usize, block_id: BlockId) -> Result<(), BTreeError> {
    if depth > MAX_HEIGHT {
        return Err(BTreeError::Corrupt {
            block_id,
            reason: format!("reached at depth {depth}, child pointers form a cycle"),
        });
    }
    Ok(())
}

/// The `index`-th child of an internal node, which must not be 0.
fn child_at(node: &Node, index: usize) -> Result<BlockId, BTreeError> {
    match node.children[index] {
        0 => Err(BTreeError::Corrupt {
            block_id: node.block_id,
            reason: format!("internal node is missing child {index}"),
        }),
        child => Ok(child),
    }
}

/// Lazy in-order iterator over B-tree entries.
///
/// Holds the path from the root to the current position as a stack of
/// nodes, each with the index of the next key to yield.
pub struct BTreeIterator<'a, S> {
    storage: &'a mut S,
    stack: Vec<Frame>,
    /// Subtree whose leftmost path must be pushed before yielding again.
    descend: Option<BlockId>,
}

struct Frame {
    node: Node,
    next: usize,
}

impl<S: BlockStorage> BTreeIterator<'_, S> {
    /// Get the next entry.
    pub fn next_entry(&mut self) -> Result<Option<(u64, u64)>, BTreeError> {
        loop {
            if let Some(block_id) = self.descend.take() {
                self.push_leftmost(block_id)?;
            }

            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };

            if frame.next < frame.node.key_count {
                let i = frame.next;
                frame.next += 1;
                if !frame.node.is_leaf() {
                    self.descend = Some(child_at(&frame.node, i + 1)?);
                }
                return Ok(Some((frame.node.keys[i], frame.node.values[i])));
            }

            self.stack.pop();
        }
    }

    fn push_leftmost(&mut self, mut block_id: BlockId) -> Result<(), BTreeError> {
        loop {
            check_depth(self.stack.len() + 1, block_id)?;
            let node = read_node(self.storage, block_id)?;
            let first_child = node.children[0];
            self.stack.push(Frame { node, next: 0 });
            if first_child == 0 {
                return Ok(());
            }
            block_id = first_child;
        }
    }
}

impl<S: BlockStorage> Iterator for BTreeIterator<'_, S> {
    type Item = Result<(u64, u64), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                // Stop after the first error.
                self.stack.clear();
                self.descend = None;
                Some(Err(e))
            }
        }
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Index file error (create/open).
    File(FileError),
    /// Block storage error.
    Storage(StorageError),
    /// Malformed node block.
    Node(NodeError),
    /// Search on a tree with no root.
    EmptyTree,
    /// Insert of an existing key under `DuplicatePolicy::Reject`.
    DuplicateKey(u64),
    /// Structural damage found while walking the tree.
    Corrupt { block_id: BlockId, reason: String },
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "malformed node: {e}"),
            Self::EmptyTree => write!(f, "tree is empty"),
            Self::DuplicateKey(key) => write!(f, "key {key} already exists"),
            Self::Corrupt { block_id, reason } => {
                write!(f, "corrupt tree at block {block_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::EmptyTree | Self::DuplicateKey(_) | Self::Corrupt { .. } => None,
        }
    }
}

impl From<FileError> for BTreeError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}
