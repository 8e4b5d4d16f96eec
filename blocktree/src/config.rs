//! Index configuration module.
//!
//! This module provides configuration loading for the `blocktree` command
//! from environment variables.
//!
//! # Environment Variables
//!
//! - `BLOCKTREE_DUPLICATE_KEYS`: `update` or `reject` (default: `update`)
//! - `BLOCKTREE_DURABILITY`: `buffered` or `synced` (default: `buffered`)
//!
//! Values are matched case-insensitively after trimming whitespace.

use crate::storage::Durability;
use crate::storage::btree::DuplicatePolicy;

/// Settings that apply to an opened or created index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexConfig {
    /// What inserting an existing key does.
    pub duplicates: DuplicatePolicy,
    /// Whether every block write is followed by `sync_data`.
    pub durability: Durability,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl IndexConfig {
    /// Environment variable selecting the duplicate-key policy.
    pub const DUPLICATE_KEYS_VAR: &'static str = "BLOCKTREE_DUPLICATE_KEYS";
    /// Environment variable selecting the durability mode.
    pub const DURABILITY_VAR: &'static str = "BLOCKTREE_DURABILITY";

    /// Load configuration from environment variables.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unrecognized value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup function.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let duplicates = match var(Self::DUPLICATE_KEYS_VAR) {
            Some(value) => Self::parse_duplicates(&value)?,
            None => DuplicatePolicy::default(),
        };
        let durability = match var(Self::DURABILITY_VAR) {
            Some(value) => Self::parse_durability(&value)?,
            None => Durability::default(),
        };

        Ok(Self {
            duplicates,
            durability,
        })
    }

    fn parse_duplicates(value: &str) -> Result<DuplicatePolicy, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "update" => Ok(DuplicatePolicy::Update),
            "reject" => Ok(DuplicatePolicy::Reject),
            _ => Err(ConfigError::InvalidValue {
                name: Self::DUPLICATE_KEYS_VAR.to_string(),
                message: format!("'{value}' is not one of 'update', 'reject'"),
            }),
        }
    }

    fn parse_durability(value: &str) -> Result<Durability, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(Durability::Buffered),
            "synced" => Ok(Durability::Synced),
            _ => Err(ConfigError::InvalidValue {
                name: Self::DURABILITY_VAR.to_string(),
                message: format!("'{value}' is not one of 'buffered', 'synced'"),
            }),
        }
    }
}
