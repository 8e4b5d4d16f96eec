//! Simulated in-memory block storage for deterministic testing.
//!
//! This module provides an in-memory implementation of the `BlockStorage`
//! trait with seeded fault injection:
//! - Block-level read/write errors
//! - Sync failures

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::{
    BLOCK_SIZE, Block, BlockId, BlockStorage, HEADER_BLOCK, Header, StorageError,
    check_node_block,
};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            read_error_rate: 0.05,
            write_error_rate: 0.05,
            sync_error_rate: 0.05,
        }
    }
}

/// In-memory block storage for deterministic testing.
///
/// Blocks live in a map keyed by id and the header is held as a value, so the
/// layout seen by the engine matches an index file without touching disk.
/// Faults are drawn from a seeded RNG, so the same seed and operations give
/// the same failures.
pub struct SimulatedStorage {
    /// Node blocks that have been written at least once.
    blocks: HashMap<BlockId, Block>,
    header: Header,

    /// Fault injection configuration.
    fault_config: FaultConfig,
    /// Random number generator for fault injection.
    rng: StdRng,

    /// Statistics for tracking.
    stats: SimulatedStorageStats,
}

/// Statistics about simulated storage operations.
#[derive(Debug, Default, Clone)]
pub struct SimulatedStorageStats {
    /// Number of block reads.
    pub reads: u64,
    /// Number of block writes.
    pub writes: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of blocks allocated.
    pub allocations: u64,
    /// Number of root changes.
    pub root_changes: u64,
    /// Number of times the header block was rewritten.
    pub header_writes: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of injected sync errors.
    pub injected_sync_errors: u64,
}

impl SimulatedStorage {
    /// Create a new, empty simulated storage with the given seed.
    ///
    /// The seed ensures deterministic behavior - the same seed will
    /// produce the same sequence of faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::default())
    }

    /// Create a new simulated storage with custom fault configuration.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            blocks: HashMap::new(),
            header: Header::new(),
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: SimulatedStorageStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &SimulatedStorageStats {
        &self.stats
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.stats = SimulatedStorageStats::default();
    }

    /// Update the fault configuration.
    pub const fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Render the storage as the bytes an index file with the same contents
    /// would hold.
    ///
    /// Blocks that were allocated but never written are left as zeros.
    #[must_use]
    pub fn to_file_bytes(&self) -> Vec<u8> {
        let last_written = self.blocks.keys().copied().max().unwrap_or(HEADER_BLOCK);
        let block_count = usize::try_from(last_written + 1).unwrap_or(usize::MAX);
        let mut bytes = vec![0u8; block_count * BLOCK_SIZE];

        bytes[..BLOCK_SIZE].copy_from_slice(self.header.to_block().as_bytes());
        for (&block_id, block) in &self.blocks {
            let Ok(index) = usize::try_from(block_id) else {
                continue;
            };
            let start = index * BLOCK_SIZE;
            bytes[start..start + BLOCK_SIZE].copy_from_slice(block.as_bytes());
        }
        bytes
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    fn write_header(&mut self) {
        self.stats.header_writes += 1;
    }
}

impl BlockStorage for SimulatedStorage {
    fn header(&self) -> Header {
        self.header
    }

    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StorageError> {
        self.stats.reads += 1;

        check_node_block(&self.header, block_id)?;

        // Check for injected read error
        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated read error".to_string(),
            ));
        }

        // An allocated block that was never written lies past the end of a
        // real file.
        self.blocks
            .get(&block_id)
            .cloned()
            .ok_or(StorageError::BlockOutOfRange {
                block_id,
                next_block: self.header.next_block,
            })
    }

    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StorageError> {
        self.stats.writes += 1;

        check_node_block(&self.header, block_id)?;

        // Check for injected write error
        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated write error".to_string(),
            ));
        }

        self.blocks.insert(block_id, block.clone());
        Ok(())
    }

    fn allocate_block(&mut self) -> Result<BlockId, StorageError> {
        let block_id = self.header.next_block;
        self.header.next_block = block_id
            .checked_add(1)
            .ok_or(StorageError::BlockOutOfRange {
                block_id,
                next_block: block_id,
            })?;
        self.stats.allocations += 1;
        self.write_header();
        Ok(block_id)
    }

    fn set_root(&mut self, block_id: BlockId) -> Result<(), StorageError> {
        check_node_block(&self.header, block_id)?;
        self.header.root_block = block_id;
        self.stats.root_changes += 1;
        self.write_header();
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.stats.syncs += 1;

        // Check for injected sync error
        if self.should_inject_fault(self.fault_config.sync_error_rate) {
            self.stats.injected_sync_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated sync error".to_string(),
            ));
        }

        // In simulated storage, sync is a no-op (writes are already "durable")
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::storage::btree::{BTree, BTreeError, DuplicatePolicy};
    use tempfile::tempdir;

    #[test]
    fn test_simulated_storage_basic() {
        let mut storage = SimulatedStorage::new(42);

        let block_id = storage.allocate_block().expect("allocate");
        assert_eq!(block_id, 1);
        assert_eq!(storage.header().next_block, 2);

        let mut block = Block::new();
        block.write_u64(0, 1);
        storage.write_block(block_id, &block).expect("write");

        let read = storage.read_block(block_id).expect("read");
        assert_eq!(read.read_u64(0), 1);
    }

    #[test]
    fn test_simulated_storage_header_updates() {
        let mut storage = SimulatedStorage::new(42);
        let first = storage.allocate_block().expect("allocate");
        let second = storage.allocate_block().expect("allocate");
        storage.set_root(second).expect("set root");

        assert_eq!((first, second), (1, 2));
        assert_eq!(storage.header().root_block, 2);
        assert_eq!(storage.header().next_block, 3);
        assert_eq!(storage.stats().header_writes, 3);
    }

    #[test]
    fn test_simulated_storage_block_out_of_range() {
        let mut storage = SimulatedStorage::new(42);
        storage.allocate_block().expect("allocate");

        assert!(matches!(
            storage.read_block(0),
            Err(StorageError::BlockOutOfRange { block_id: 0, .. })
        ));
        assert!(matches!(
            storage.write_block(2, &Block::new()),
            Err(StorageError::BlockOutOfRange { block_id: 2, .. })
        ));
        // Allocated but never written.
        assert!(matches!(
            storage.read_block(1),
            Err(StorageError::BlockOutOfRange { block_id: 1, .. })
        ));
        assert!(matches!(
            storage.set_root(5),
            Err(StorageError::BlockOutOfRange { block_id: 5, .. })
        ));
    }

    #[test]
    fn test_simulated_storage_allocation_exhausted() {
        let mut storage = SimulatedStorage::new(42);
        storage.header.next_block = u64::MAX;

        assert!(matches!(
            storage.allocate_block(),
            Err(StorageError::BlockOutOfRange {
                block_id: u64::MAX,
                ..
            })
        ));
        assert_eq!(storage.header().next_block, u64::MAX);
        assert_eq!(storage.stats().allocations, 0);
    }

    #[test]
    fn test_simulated_storage_fault_injection() {
        let config = FaultConfig {
            read_error_rate: 1.0,
            ..FaultConfig::default()
        };
        let mut storage = SimulatedStorage::with_config(42, config);

        let block_id = storage.allocate_block().expect("allocate");
        storage.write_block(block_id, &Block::new()).expect("write");

        let result = storage.read_block(block_id);
        assert!(matches!(result, Err(StorageError::InjectedFault(_))));
        assert_eq!(storage.stats().injected_read_errors, 1);
    }

    #[test]
    fn test_simulated_storage_deterministic() {
        let run = |seed: u64| {
            let mut tree = BTree::new(
                SimulatedStorage::with_config(seed, FaultConfig::high_faults()),
                DuplicatePolicy::Update,
            );
            let outcomes: Vec<bool> = (0..500u64)
                .map(|key| tree.insert(key * 31 % 500, key).is_ok())
                .collect();
            (outcomes, tree.storage().stats().injected_write_errors)
        };

        let (first, first_errors) = run(12345);
        let (second, second_errors) = run(12345);

        assert_eq!(first, second);
        assert_eq!(first_errors, second_errors);
        assert!(first_errors > 0);
    }

    #[test]
    fn test_simulated_storage_sync_fault() {
        let config = FaultConfig {
            sync_error_rate: 1.0,
            ..FaultConfig::default()
        };
        let mut tree = BTree::new(
            SimulatedStorage::with_config(1, config),
            DuplicatePolicy::Update,
        );
        tree.insert(1, 1).expect("insert");

        assert!(matches!(
            tree.sync(),
            Err(BTreeError::Storage(StorageError::InjectedFault(_)))
        ));
        assert_eq!(tree.storage().stats().injected_sync_errors, 1);
    }

    #[test]
    fn test_simulated_storage_matches_index_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");

        let mut file_tree = BTree::create(&path, &IndexConfig::default()).expect("create tree");
        let mut sim_tree = BTree::new(SimulatedStorage::new(0), DuplicatePolicy::Update);

        for key in 0..400u64 {
            let key = key * 7919 % 400;
            file_tree.insert(key, key + 1).expect("file insert");
            sim_tree.insert(key, key + 1).expect("sim insert");
        }
        file_tree.sync().expect("sync");
        drop(file_tree);

        let on_disk = std::fs::read(&path).expect("read index file");
        assert_eq!(on_disk, sim_tree.storage().to_file_bytes());
    }
}
