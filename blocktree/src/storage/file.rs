//! Index file I/O operations.
//!
//! This module handles reading and writing blocks to the index file and
//! keeps the header in block 0 current.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::{BLOCK_SIZE, BLOCK_SIZE_U64, Block, BlockId, block_offset};
use crate::storage::header::{Header, HeaderError};
use crate::storage::io::{self, BlockStorage, StorageError};

/// How hard the file pushes writes to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Writes go to the OS and are flushed whenever it decides.
    #[default]
    Buffered,
    /// Every header rewrite and node write is followed by `sync_data`.
    Synced,
}

/// An index file handle with low-level block I/O operations.
pub struct IndexFile {
    file: File,
    header: Header,
    durability: Durability,
}

impl IndexFile {
    /// Create a new index file at the given path.
    ///
    /// Returns an error if the file already exists. The new file holds only
    /// the header block, with an empty tree and block 1 as the next id.
    pub fn create(path: &Path, durability: Durability) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => FileError::AlreadyExists(path.to_path_buf()),
                _ => FileError::Io(e),
            })?;

        let header = Header::new();
        file.write_all(header.to_block().as_bytes())
            .map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        tracing::info!("created index file {}", path.display());

        Ok(Self {
            file,
            header,
            durability,
        })
    }

    /// Open an existing index file and validate its header.
    pub fn open(path: &Path, durability: Durability) -> Result<Self, FileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        // Read up to one block; a short file is a corrupt header, not an I/O error.
        let mut buf = Vec::with_capacity(BLOCK_SIZE);
        (&mut file)
            .take(BLOCK_SIZE_U64)
            .read_to_end(&mut buf)
            .map_err(FileError::Io)?;

        let header = Header::from_bytes(&buf).map_err(FileError::Header)?;

        tracing::info!(
            "opened index file {}: root={}, next_block={}",
            path.display(),
            header.root_block,
            header.next_block
        );

        Ok(Self {
            file,
            header,
            durability,
        })
    }

    /// Get the current header.
    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Read a node block from the file.
    ///
    /// Returns an error if the block is the header, has not been allocated,
    /// or lies past the end of the file.
    pub fn read_block(&mut self, block_id: BlockId) -> Result<Block, FileError> {
        let offset = self.node_block_offset(block_id)?;

        let next_block = self.header.next_block;
        let mut block = Block::new();
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(FileError::Io)?;

        self.file
            .read_exact(block.as_bytes_mut())
            .map_err(|e| match e.kind() {
                // Allocated but never written, or the file was truncated.
                ErrorKind::UnexpectedEof => FileError::BlockOutOfRange {
                    block_id,
                    next_block,
                },
                _ => FileError::Io(e),
            })?;

        Ok(block)
    }

    /// Write a node block to the file.
    ///
    /// The block id must have been handed out by `allocate_block` first.
    pub fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), FileError> {
        let offset = self.node_block_offset(block_id)?;

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(FileError::Io)?;

        self.file
            .write_all(block.as_bytes())
            .map_err(FileError::Io)?;

        self.sync_if_required()
    }

    /// Allocate the next block id.
    ///
    /// The advanced counter is written to the header before the id is
    /// returned, so an id is never handed out twice even if the process stops
    /// before the block is written.
    pub fn allocate_block(&mut self) -> Result<BlockId, FileError> {
        let block_id = self.header.next_block;
        let next_block = block_id
            .checked_add(1)
            .ok_or_else(|| self.out_of_range(block_id))?;
        self.header.next_block = next_block;
        self.write_header()?;

        tracing::debug!("allocated block {block_id}");
        Ok(block_id)
    }

    /// Change the root block id and persist the header.
    pub fn set_root(&mut self, block_id: BlockId) -> Result<(), FileError> {
        self.check_node_block(block_id)?;
        self.header.root_block = block_id;
        self.write_header()?;

        tracing::debug!("root is now block {block_id}");
        Ok(())
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), FileError> {
        self.file.sync_all().map_err(FileError::Io)
    }

    /// Write the header to block 0.
    fn write_header(&mut self) -> Result<(), FileError> {
        self.file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        self.file
            .write_all(self.header.to_block().as_bytes())
            .map_err(FileError::Io)?;

        self.sync_if_required()
    }

    fn sync_if_required(&self) -> Result<(), FileError> {
        match self.durability {
            Durability::Buffered => Ok(()),
            Durability::Synced => self.file.sync_data().map_err(FileError::Io),
        }
    }

    fn check_node_block(&self, block_id: BlockId) -> Result<(), FileError> {
        io::check_node_block(&self.header, block_id).map_err(|_| self.out_of_range(block_id))
    }

    /// Byte offset of an allocated node block.
    fn node_block_offset(&self, block_id: BlockId) -> Result<u64, FileError> {
        self.check_node_block(block_id)?;
        block_offset(block_id).ok_or_else(|| self.out_of_range(block_id))
    }

    const fn out_of_range(&self, block_id: BlockId) -> FileError {
        FileError::BlockOutOfRange {
            block_id,
            next_block: self.header.next_block,
        }
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// Header error.
    Header(HeaderError),
    /// Block id out of range.
    BlockOutOfRange { block_id: BlockId, next_block: u64 },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Header(e) => write!(f, "corrupt header: {e}"),
            Self::BlockOutOfRange {
                block_id,
                next_block,
            } => {
                write!(
                    f,
                    "block {block_id} out of range (next block: {next_block})"
                )
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::AlreadyExists(_) | Self::BlockOutOfRange { .. } => None,
        }
    }
}

impl From<FileError> for StorageError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::BlockOutOfRange {
                block_id,
                next_block,
            } => Self::BlockOutOfRange {
                block_id,
                next_block,
            },
            FileError::AlreadyExists(path) => Self::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )),
            FileError::Header(e) => Self::Header(e.to_string()),
        }
    }
}

impl BlockStorage for IndexFile {
    fn header(&self) -> Header {
        self.header
    }

    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StorageError> {
        Self::read_block(self, block_id).map_err(StorageError::from)
    }

    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StorageError> {
        Self::write_block(self, block_id, block).map_err(StorageError::from)
    }

    fn allocate_block(&mut self) -> Result<BlockId, StorageError> {
        Self::allocate_block(self).map_err(StorageError::from)
    }

    fn set_root(&mut self, block_id: BlockId) -> Result<(), StorageError> {
        Self::set_root(self, block_id).map_err(StorageError::from)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        Self::sync(self).map_err(StorageError::from)
    }
}
