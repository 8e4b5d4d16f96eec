//! Structural checks over a whole tree.

use std::collections::HashSet;

use crate::storage::block::BlockId;
use crate::storage::btree::node::{MAX_CHILDREN, MIN_KEYS};
use crate::storage::btree::tree::{BTree, BTreeError};
use crate::storage::io::BlockStorage;

/// Shape of a tree that passed `BTree::verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Number of key-value pairs.
    pub entries: usize,
    /// Number of node blocks reachable from the root.
    pub nodes: usize,
    /// Nodes on any root-to-leaf path. 0 for an empty tree.
    pub height: usize,
}

/// A subtree still to be checked.
struct Pending {
    block_id: BlockId,
    parent_id: BlockId,
    /// Exclusive key bounds inherited from the ancestors.
    lower: Option<u64>,
    upper: Option<u64>,
    depth: usize,
}

impl<S: BlockStorage> BTree<S> {
    /// Walk every node and check the tree's structural invariants.
    ///
    /// Checks key order across the whole tree, node fill, parent pointers,
    /// leaf depth, and that every block is referenced at most once.
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        let root = self.root_block();
        if root == 0 {
            return Ok(TreeStats::default());
        }

        let next_block = self.storage().header().next_block;
        let mut stats = TreeStats::default();
        let mut seen = HashSet::new();
        let mut leaf_depth = None;
        let mut pending = vec![Pending {
            block_id: root,
            parent_id: 0,
            lower: None,
            upper: None,
            depth: 1,
        }];

        while let Some(item) = pending.pop() {
            let corrupt = |reason: String| BTreeError::Corrupt {
                block_id: item.block_id,
                reason,
            };

            if item.block_id >= next_block {
                return Err(corrupt(format!("past next block {next_block}")));
            }
            if !seen.insert(item.block_id) {
                return Err(corrupt("referenced twice".to_string()));
            }

            let node = self.read_node(item.block_id)?;
            stats.nodes += 1;
            stats.entries += node.key_count;

            if node.parent_id != item.parent_id {
                return Err(corrupt(format!(
                    "parent pointer {} but reached from {}",
                    node.parent_id, item.parent_id
                )));
            }

            let is_root = item.parent_id == 0;
            if node.key_count == 0 || (!is_root && node.key_count < MIN_KEYS) {
                return Err(corrupt(format!("underfull with {} keys", node.key_count)));
            }

            let keys = node.keys();
            if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(corrupt("keys out of order".to_string()));
            }
            let first = keys[0];
            let last = keys[keys.len() - 1];
            if item.lower.is_some_and(|lower| first <= lower)
                || item.upper.is_some_and(|upper| last >= upper)
            {
                return Err(corrupt("keys outside the range of the parent".to_string()));
            }

            if node.is_leaf() {
                if node.children.iter().any(|&child| child != 0) {
                    return Err(corrupt("leaf with child pointers".to_string()));
                }
                match leaf_depth {
                    None => leaf_depth = Some(item.depth),
                    Some(depth) if depth != item.depth => {
                        return Err(corrupt(format!(
                            "leaf at depth {} but others at {depth}",
                            item.depth
                        )));
                    }
                    Some(_) => {}
                }
                continue;
            }

            let children = node.children();
            if children.contains(&0) {
                return Err(corrupt("internal node is missing a child".to_string()));
            }
            if node.children[children.len()..MAX_CHILDREN]
                .iter()
                .any(|&child| child != 0)
            {
                return Err(corrupt("stray child pointer past key count".to_string()));
            }

            for (i, &child) in children.iter().enumerate() {
                pending.push(Pending {
                    block_id: child,
                    parent_id: node.block_id,
                    lower: if i == 0 { item.lower } else { Some(keys[i - 1]) },
                    upper: keys.get(i).copied().or(item.upper),
                    depth: item.depth + 1,
                });
            }
        }

        stats.height = leaf_depth.unwrap_or(0);
        tracing::debug!(
            "verified {} entries in {} nodes, height {}",
            stats.entries,
            stats.nodes,
            stats.height
        );
        Ok(stats)
    }
}
