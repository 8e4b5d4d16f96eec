//! Block types and constants for the index file.
//!
//! The index file is a sequence of 512-byte blocks. Block 0 holds the header;
//! every other block holds exactly one B-tree node.

/// Block size in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Block size as u64 for offset calculations.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// Width of every integer stored in the file.
pub const INT_SIZE: usize = 8;

/// A block identifier (0-indexed block number). Block 0 is the header.
pub type BlockId = u64;

/// The block id reserved for the header. Also used as the "no block" marker
/// in parent and child pointers.
pub const HEADER_BLOCK: BlockId = 0;

/// A raw block buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    data: Box<[u8; BLOCK_SIZE]>,
}

impl Block {
    /// Create a new zeroed block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; BLOCK_SIZE]),
        }
    }

    /// Create a block from a byte slice.
    ///
    /// Returns `None` unless the slice is exactly `BLOCK_SIZE` bytes long.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let data: [u8; BLOCK_SIZE] = bytes.try_into().ok()?;
        Some(Self {
            data: Box::new(data),
        })
    }

    /// Get the raw block data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    /// Get mutable access to the raw block data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u64 (big-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; INT_SIZE];
        buf.copy_from_slice(&self.data[offset..offset + INT_SIZE]);
        u64::from_be_bytes(buf)
    }

    /// Write a u64 (big-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + INT_SIZE].copy_from_slice(&value.to_be_bytes());
    }

    /// Read `out.len()` consecutive u64 values starting at `offset`.
    pub fn read_u64_array(&self, offset: usize, out: &mut [u64]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.read_u64(offset + i * INT_SIZE);
        }
    }

    /// Write consecutive u64 values starting at `offset`.
    pub fn write_u64_array(&mut self, offset: usize, values: &[u64]) {
        for (i, value) in values.iter().enumerate() {
            self.write_u64(offset + i * INT_SIZE, *value);
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("first_24_bytes", &&self.data[..24])
            .finish_non_exhaustive()
    }
}

/// Byte offset of a block inside the index file.
///
/// Returns `None` when the offset does not fit in a u64.
#[must_use]
pub const fn block_offset(block_id: BlockId) -> Option<u64> {
    block_id.checked_mul(BLOCK_SIZE_U64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_read_write() {
        let mut block = Block::new();

        block.write_u64(8, 0x0102_0304_0506_0708);
        assert_eq!(block.read_u64(8), 0x0102_0304_0506_0708);

        block.write_bytes(500, b"hello");
        assert_eq!(block.read_bytes(500, 5), b"hello");
    }

    #[test]
    fn test_u64_is_big_endian() {
        let mut block = Block::new();
        block.write_u64(0, 1);
        assert_eq!(block.read_bytes(0, 8), &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_u64_array_roundtrip() {
        let mut block = Block::new();
        block.write_u64_array(24, &[3, 1, 4, 1, 5]);

        let mut out = [0u64; 5];
        block.read_u64_array(24, &mut out);
        assert_eq!(out, [3, 1, 4, 1, 5]);
    }

    #[test]
    fn test_from_slice_requires_exact_size() {
        assert!(Block::from_slice(&[0u8; BLOCK_SIZE]).is_some());
        assert!(Block::from_slice(&[0u8; BLOCK_SIZE - 1]).is_none());
        assert!(Block::from_slice(&[0u8; BLOCK_SIZE + 1]).is_none());
    }

    #[test]
    fn test_block_offset() {
        assert_eq!(block_offset(0), Some(0));
        assert_eq!(block_offset(3), Some(1536));
        assert_eq!(block_offset(u64::MAX / BLOCK_SIZE_U64), Some(u64::MAX - 511));
        assert_eq!(block_offset(1 << 60), None);
        assert_eq!(block_offset(u64::MAX), None);
    }
}
