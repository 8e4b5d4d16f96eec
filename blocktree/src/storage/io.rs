//! Storage abstraction for the B-tree engine.
//!
//! The `BlockStorage` trait is the minimal set of block operations the engine
//! needs, allowing the tree to run over a real index file in production and
//! over simulated in-memory storage in tests.
//!
//! Implementations own the header exclusively. The only ways to change it are
//! `allocate_block` and `set_root`, and both persist the new header before
//! returning.

use crate::storage::block::{Block, BlockId, HEADER_BLOCK};
use crate::storage::header::Header;

/// Block-addressed storage with an owned header.
pub trait BlockStorage {
    /// Current header state.
    fn header(&self) -> Header;

    /// Read a node block. Block 0 and unallocated ids are out of range.
    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StorageError>;

    /// Write a node block. Block 0 and unallocated ids are out of range.
    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StorageError>;

    /// Hand out the next block id and persist the advanced counter.
    fn allocate_block(&mut self) -> Result<BlockId, StorageError>;

    /// Point the header at a new root block and persist it.
    fn set_root(&mut self, block_id: BlockId) -> Result<(), StorageError>;

    /// Flush pending writes to the underlying medium.
    fn sync(&mut self) -> Result<(), StorageError>;
}

/// Check that `block_id` names an allocated node block.
pub const fn check_node_block(header: &Header, block_id: BlockId) -> Result<(), StorageError> {
    if block_id == HEADER_BLOCK || block_id >= header.next_block {
        return Err(StorageError::BlockOutOfRange {
            block_id,
            next_block: header.next_block,
        });
    }
    Ok(())
}

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Block id is the header, unallocated, or past the end of the file.
    BlockOutOfRange { block_id: BlockId, next_block: u64 },
    /// Header error.
    Header(String),
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BlockOutOfRange {
                block_id,
                next_block,
            } => write!(
                f,
                "block {block_id} out of range (next block: {next_block})"
            ),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_node_block() {
        let header = Header {
            root_block: 1,
            next_block: 4,
        };

        assert!(check_node_block(&header, 1).is_ok());
        assert!(check_node_block(&header, 3).is_ok());
        assert!(matches!(
            check_node_block(&header, 0),
            Err(StorageError::BlockOutOfRange { block_id: 0, .. })
        ));
        assert!(matches!(
            check_node_block(&header, 4),
            Err(StorageError::BlockOutOfRange {
                block_id: 4,
                next_block: 4
            })
        ));
    }
}
