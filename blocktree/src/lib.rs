// Life of a command:
// 1. Arguments are parsed into a `commands::Command`
// 2. The index file header is validated on open
// 3. The B-tree engine reads and writes one 512-byte block per node
// 4. Results are written to stdout, diagnostics to stderr via tracing
//
// System components:
//  - Block store (index file or simulated storage)
//  - B-tree engine
//  - Command layer

pub mod commands;
pub mod config;
pub mod simulation;
pub mod storage;

pub use commands::{Command, CommandError};
pub use config::{ConfigError, IndexConfig};
pub use storage::btree::{BTree, BTreeError, DuplicatePolicy};
