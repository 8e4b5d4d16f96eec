//! Workload simulator for deterministic simulation testing.
//!
//! Drives a seeded stream of inserts, searches, and traversals against a tree
//! over `SimulatedStorage` and checks every answer against an in-memory model.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::storage::{FaultConfig, SimulatedStorage, SimulatedStorageStats};
use crate::storage::btree::{BTree, BTreeError, DuplicatePolicy, TreeStats};

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Fault injection configuration.
    pub fault_config: FaultConfig,
    /// Keys are drawn from `0..key_space`.
    pub key_space: u64,
    /// Duplicate-key policy of the tree under test.
    pub policy: DuplicatePolicy,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fault_config: FaultConfig::default(),
            key_space: 10_000,
            policy: DuplicatePolicy::Update,
        }
    }

    /// Set the fault configuration.
    #[must_use]
    pub const fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }

    /// Set the size of the key space.
    #[must_use]
    pub const fn with_key_space(mut self, key_space: u64) -> Self {
        self.key_space = key_space;
        self
    }

    /// Set the duplicate-key policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A mismatch between the tree and the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Index of the operation that exposed it.
    pub operation: u64,
    /// What went wrong.
    pub description: String,
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Number of operations run.
    pub operations: u64,
    /// Number of operations that returned `Ok`.
    pub successful_operations: u64,
    /// Number of operations that returned an error.
    pub failed_operations: u64,
    /// Invariant violations detected.
    pub invariant_violations: Vec<InvariantViolation>,
    /// Tree shape at the end, if the final check ran and passed.
    pub tree_stats: Option<TreeStats>,
    /// Storage statistics at the end of the run.
    pub storage_stats: SimulatedStorageStats,
}

impl SimulationResult {
    /// Check if the simulation passed (no invariant violations).
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

/// The main simulator harness.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    tree: BTree<SimulatedStorage>,
    /// Expected contents of the tree.
    model: BTreeMap<u64, u64>,
    /// Set once an insert fails part way; the model can no longer be trusted.
    diverged: bool,
    violations: Vec<InvariantViolation>,
    operations: u64,
    successful_operations: u64,
    failed_operations: u64,
}

impl Simulator {
    /// Create a new simulator with the given configuration.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        // Workload and fault streams use separate generators so that changing
        // fault rates does not change the workload.
        let storage = SimulatedStorage::with_config(config.seed, config.fault_config.clone());
        let rng = StdRng::seed_from_u64(config.seed.rotate_left(32));

        Self {
            tree: BTree::new(storage, config.policy),
            rng,
            config,
            model: BTreeMap::new(),
            diverged: false,
            violations: Vec::new(),
            operations: 0,
            successful_operations: 0,
            failed_operations: 0,
        }
    }

    /// Run `count` random operations, then check the whole tree.
    pub fn run(&mut self, count: u64) -> SimulationResult {
        for _ in 0..count {
            let roll = self.rng.random_range(0..100u32);
            let key = self.rng.random_range(0..self.config.key_space.max(1));
            match roll {
                0..60 => {
                    let value = self.rng.random();
                    self.check_insert(key, value);
                }
                60..98 => self.check_search(key),
                _ => self.check_traverse(),
            }
            self.operations += 1;
        }

        let tree_stats = self.check_final();
        tracing::debug!(
            "simulation seed {} finished {} operations with {} violations",
            self.config.seed,
            self.operations,
            self.violations.len()
        );

        SimulationResult {
            seed: self.config.seed,
            operations: self.operations,
            successful_operations: self.successful_operations,
            failed_operations: self.failed_operations,
            invariant_violations: std::mem::take(&mut self.violations),
            tree_stats,
            storage_stats: self.tree.storage().stats().clone(),
        }
    }

    fn check_insert(&mut self, key: u64, value: u64) {
        let result = self.tree.insert(key, value);
        self.record(result.is_ok());

        match (result, self.config.policy) {
            (Ok(old), _) => {
                let expected = self.model.insert(key, value);
                if old != expected && !self.diverged {
                    self.violation(format!(
                        "insert {key} returned previous value {old:?}, expected {expected:?}"
                    ));
                }
            }
            (Err(BTreeError::DuplicateKey(_)), DuplicatePolicy::Reject) => {
                if !self.model.contains_key(&key) && !self.diverged {
                    self.violation(format!("insert {key} rejected as duplicate"));
                }
            }
            (Err(_), _) => self.diverged = true,
        }
    }

    fn check_search(&mut self, key: u64) {
        let result = self.tree.search(key);
        self.record(matches!(result, Ok(_) | Err(BTreeError::EmptyTree)));
        if self.diverged {
            return;
        }

        let expected = self.model.get(&key).copied();
        match result {
            Ok(found) if found == expected => {}
            Ok(found) => {
                self.violation(format!("search {key} found {found:?}, expected {expected:?}"));
            }
            Err(BTreeError::EmptyTree) if self.model.is_empty() => {}
            Err(BTreeError::Storage(_)) => {}
            Err(e) => self.violation(format!("search {key} failed: {e}")),
        }
    }

    fn check_traverse(&mut self) {
        let result: Result<Vec<(u64, u64)>, BTreeError> = self.tree.traverse().collect();
        self.record(result.is_ok());
        if self.diverged {
            return;
        }

        match result {
            Ok(entries) => {
                if !entries.iter().copied().eq(self.model.iter().map(|(&k, &v)| (k, v))) {
                    self.violation(format!(
                        "traversal returned {} entries that differ from the {} expected",
                        entries.len(),
                        self.model.len()
                    ));
                }
            }
            Err(BTreeError::Storage(_)) => {}
            Err(e) => self.violation(format!("traversal failed: {e}")),
        }
    }

    /// Verify the tree structure with faults switched off.
    fn check_final(&mut self) -> Option<TreeStats> {
        if self.diverged {
            return None;
        }

        self.tree.storage_mut().set_fault_config(FaultConfig::no_faults());
        match self.tree.verify() {
            Ok(stats) if stats.entries == self.model.len() => Some(stats),
            Ok(stats) => {
                self.violation(format!(
                    "tree holds {} entries, expected {}",
                    stats.entries,
                    self.model.len()
                ));
                None
            }
            Err(e) => {
                self.violation(format!("verify failed: {e}"));
                None
            }
        }
    }

    const fn record(&mut self, ok: bool) {
        if ok {
            self.successful_operations += 1;
        } else {
            self.failed_operations += 1;
        }
    }

    fn violation(&mut self, description: String) {
        tracing::warn!("operation {}: {description}", self.operations);
        self.violations.push(InvariantViolation {
            operation: self.operations,
            description,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_no_faults() {
        let mut sim = Simulator::new(SimulatorConfig::new(12345));
        let result = sim.run(3000);

        assert!(result.passed(), "violations: {:?}", result.invariant_violations);
        assert_eq!(result.operations, 3000);
        assert_eq!(result.failed_operations, 0);
        let stats = result.tree_stats.expect("tree verified");
        assert!(stats.height >= 2);
    }

    #[test]
    fn test_simulation_dense_keys_with_updates() {
        // A small key space forces many duplicate inserts.
        let config = SimulatorConfig::new(7).with_key_space(300);
        let result = Simulator::new(config).run(3000);

        assert!(result.passed(), "violations: {:?}", result.invariant_violations);
        let stats = result.tree_stats.expect("tree verified");
        assert!(stats.entries <= 300);
    }

    #[test]
    fn test_simulation_reject_policy() {
        let config = SimulatorConfig::new(99)
            .with_key_space(200)
            .with_policy(DuplicatePolicy::Reject);
        let result = Simulator::new(config).run(2000);

        assert!(result.passed(), "violations: {:?}", result.invariant_violations);
        assert!(result.failed_operations > 0);
    }

    #[test]
    fn test_simulation_multiple_seeds() {
        for seed in 0..10 {
            let result = Simulator::new(SimulatorConfig::new(seed)).run(500);
            assert!(
                result.passed(),
                "seed {seed} failed: {:?}",
                result.invariant_violations
            );
        }
    }

    #[test]
    fn test_simulation_with_read_faults() {
        let config = SimulatorConfig::new(5).with_fault_config(FaultConfig {
            read_error_rate: 0.01,
            ..FaultConfig::default()
        });
        let result = Simulator::new(config).run(2000);

        assert!(result.passed(), "violations: {:?}", result.invariant_violations);
        assert!(result.storage_stats.injected_read_errors > 0);
    }

    #[test]
    fn test_simulation_with_faults_is_deterministic() {
        let run = || {
            let config = SimulatorConfig::new(42).with_fault_config(FaultConfig::high_faults());
            let result = Simulator::new(config).run(1000);
            (
                result.successful_operations,
                result.failed_operations,
                result.storage_stats.injected_write_errors,
            )
        };

        let first = run();
        assert_eq!(first, run());
        assert!(first.1 > 0);
    }
}
