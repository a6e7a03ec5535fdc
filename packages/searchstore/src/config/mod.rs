//! Store configuration
//!
//! Replaces process-global mapping/settings registries with one explicit
//! object passed at construction time.
//!
//! # Examples
//!
//! ```rust,ignore
//! use searchstore::config::StoreConfig;
//!
//! // Defaults: 4 bulk workers, 500 items per chunk, 1000 query limit
//! let config = StoreConfig::default();
//!
//! // Complete control via YAML
//! let config = StoreConfig::from_yaml("store.yaml")?;
//! ```

pub mod error;
pub mod store_config;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use store_config::{
    BulkConfig, IndexDefinition, QueryConfig, ScanConfig, StoreConfig, TimingConfig,
    CONFIG_VERSION,
};
pub use validation::{Validatable, ValidatableCollection};
