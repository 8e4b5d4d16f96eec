//! Single-file block storage for the B-tree index.
//!
//! # File Format
//!
//! The index file is a sequence of 512-byte blocks addressed by id, where
//! block N starts at byte offset N * 512. Every integer is a big-endian u64.
//!
//! - Block 0: header (magic `4348PRJ3`, root block id, next block id)
//! - Blocks 1-N: B-tree nodes, one per block, in allocation order
//!
//! Block ids are handed out by bumping the counter in the header and are never
//! reused.
//!
//! # Usage
//!
//! ```ignore
//! use blocktree::storage::{IndexFile, Durability};
//!
//! let mut file = IndexFile::create(path, Durability::Buffered)?;
//! let block_id = file.allocate_block()?;
//! file.write_block(block_id, &node.to_block())?;
//! file.set_root(block_id)?;
//! ```

mod block;
pub mod btree;
mod file;
mod header;
mod io;

pub use block::{BLOCK_SIZE, BLOCK_SIZE_U64, Block, BlockId, HEADER_BLOCK, INT_SIZE, block_offset};
pub use file::{Durability, FileError, IndexFile};
pub use header::{Header, HeaderError, MAGIC};
pub use io::{BlockStorage, StorageError, check_node_block};
