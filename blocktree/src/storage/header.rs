//! Header structure and serialization.
//!
//! The header occupies block 0 and records where the tree starts and which
//! block id will be handed out next.

use crate::storage::block::{BLOCK_SIZE, Block, BlockId, HEADER_BLOCK};

/// Magic number identifying an index file: "4348PRJ3"
pub const MAGIC: [u8; 8] = *b"4348PRJ3";

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const ROOT_BLOCK: usize = 8;
    pub const NEXT_BLOCK: usize = 16;
    // 24-511: zero
}

/// File-level metadata stored in block 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    /// Block id of the root node, or 0 if the tree is empty.
    pub root_block: BlockId,
    /// Next block id to allocate. Only ever grows.
    pub next_block: BlockId,
}

impl Header {
    /// Create a header for a freshly created, empty index.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root_block: 0,
            next_block: 1,
        }
    }

    /// Serialize the header to a block.
    #[must_use]
    pub fn to_block(&self) -> Block {
        let mut block = Block::new();
        block.write_bytes(offsets::MAGIC, &MAGIC);
        block.write_u64(offsets::ROOT_BLOCK, self.root_block);
        block.write_u64(offsets::NEXT_BLOCK, self.next_block);
        block
    }

    /// Deserialize a header from raw bytes read from block 0.
    ///
    /// Fails if fewer than `BLOCK_SIZE` bytes were read or the magic number
    /// does not match.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        let block = Block::from_slice(bytes).ok_or(HeaderError::ShortRead(bytes.len()))?;
        Self::from_block(&block)
    }

    /// Deserialize a header from a block.
    ///
    /// The next id must be past block 0, and a non-zero root must already
    /// have been allocated.
    pub fn from_block(block: &Block) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(block.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        let root_block = block.read_u64(offsets::ROOT_BLOCK);
        let next_block = block.read_u64(offsets::NEXT_BLOCK);
        if next_block == HEADER_BLOCK || (root_block != 0 && root_block >= next_block) {
            return Err(HeaderError::InvalidBlockIds {
                root_block,
                next_block,
            });
        }

        Ok(Self {
            root_block,
            next_block,
        })
    }

    /// Whether the tree has no nodes yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root_block == 0
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when reading a header.
#[derive(Debug)]
pub enum HeaderError {
    /// Block 0 is shorter than a full block.
    ShortRead(usize),
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Root or next block id that no valid file can hold.
    InvalidBlockIds { root_block: BlockId, next_block: BlockId },
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortRead(len) => {
                write!(f, "header too short: {len} bytes (expected {BLOCK_SIZE})")
            }
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::InvalidBlockIds {
                root_block,
                next_block,
            } => write!(
                f,
                "invalid block ids: root {root_block}, next block {next_block}"
            ),
        }
    }
}

impl std::error::Error for HeaderError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = Header {
            root_block: 7,
            next_block: 42,
        };

        let block = header.to_block();
        let restored = Header::from_block(&block).expect("should parse");

        assert_eq!(restored, header);
    }

    #[test]
    fn test_header_layout() {
        let header = Header {
            root_block: 0x0102,
            next_block: 3,
        };
        let block = header.to_block();
        let bytes = block.as_bytes();

        assert_eq!(&bytes[0..8], b"4348PRJ3");
        assert_eq!(&bytes[8..16], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_eq!(&bytes[16..24], &[0, 0, 0, 0, 0, 0, 0, 3]);
        assert!(bytes[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_new_header_is_empty() {
        let header = Header::new();
        assert!(header.is_empty());
        assert_eq!(header.next_block, 1);
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut block = Header::new().to_block();
        block.write_bytes(0, b"4348PRJ4");

        let result = Header::from_block(&block);
        assert!(matches!(result, Err(HeaderError::InvalidMagic(_))));
    }

    #[test]
    fn test_header_invalid_block_ids() {
        for (root_block, next_block) in [(0, 0), (5, 5), (9, 3), (1 << 60, 1)] {
            let block = Header {
                root_block,
                next_block,
            }
            .to_block();
            assert!(
                matches!(
                    Header::from_block(&block),
                    Err(HeaderError::InvalidBlockIds { .. })
                ),
                "expected rejection of root {root_block}, next {next_block}"
            );
        }

        // A huge but consistent header is accepted here; offsets are checked
        // when blocks are read.
        let header = Header {
            root_block: 1 << 60,
            next_block: u64::MAX,
        };
        assert_eq!(Header::from_block(&header.to_block()).expect("parse"), header);
    }

    #[test]
    fn test_header_short_read() {
        let block = Header::new().to_block();
        let result = Header::from_bytes(&block.as_bytes()[..100]);
        assert!(matches!(result, Err(HeaderError::ShortRead(100))));
    }
}
