//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! This module provides tools for testing the B-tree with:
//! - In-memory block storage with fault injection
//! - Reproducible random workloads
//! - Model checking after each operation
//!
//! # Design Principles
//!
//! 1. All block I/O goes through `BlockStorage` and can be simulated
//! 2. All randomness is seeded for reproducibility
//! 3. Faults can be injected at any I/O boundary
//! 4. Given the same seed, execution is identical
//!
//! # Usage
//!
//! ```
//! use blocktree::simulation::{FaultConfig, Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345).with_fault_config(FaultConfig::no_faults());
//!
//! let mut sim = Simulator::new(config);
//! let result = sim.run(1000);
//!
//! assert!(result.invariant_violations.is_empty());
//! ```

mod simulator;
mod storage;

pub use simulator::{InvariantViolation, SimulationResult, Simulator, SimulatorConfig};
pub use storage::{FaultConfig, SimulatedStorage, SimulatedStorageStats};
