//! B-tree index over fixed-size blocks.
//!
//! # Structure
//!
//! Every node occupies one 512-byte block and holds up to 19 key-value pairs
//! of unsigned 64-bit integers. Internal nodes also hold up to 20 child block
//! ids. Values live in internal nodes as well as leaves, so a search can stop
//! as soon as it meets its key.
//!
//! # Usage
//!
//! ```
//! use blocktree::simulation::SimulatedStorage;
//! use blocktree::storage::btree::{BTree, DuplicatePolicy};
//!
//! let mut tree = BTree::new(SimulatedStorage::new(0), DuplicatePolicy::Update);
//! tree.insert(15, 100).unwrap();
//! tree.insert(7, 42).unwrap();
//!
//! assert_eq!(tree.search(7).unwrap(), Some(42));
//! assert_eq!(tree.search(8).unwrap(), None);
//!
//! let keys: Vec<u64> = tree.traverse().map(|e| e.unwrap().0).collect();
//! assert_eq!(keys, vec![7, 15]);
//! ```

mod node;
mod tree;
mod verify;

pub use node::{MAX_CHILDREN, MAX_KEYS, MIN_DEGREE, MIN_KEYS, Node, NodeError, Split};
pub use tree::{BTree, BTreeError, BTreeIterator, DuplicatePolicy};
pub use verify::TreeStats;
