//! Configuration validation

use super::error::ConfigResult;

/// Trait for validatable configuration objects
///
/// # Example
/// ```rust,ignore
/// use searchstore::config::Validatable;
///
/// fn build<C: Validatable>(config: C) -> Result<(), ConfigError> {
///     config.validate()?;
///     Ok(())
/// }
/// ```
pub trait Validatable {
    /// Validate the configuration
    ///
    /// Returns `Ok(())` if valid, `Err(ConfigError)` with details if invalid.
    fn validate(&self) -> ConfigResult<()>;

    /// Get the configuration name for error messages
    fn config_name(&self) -> &'static str {
        "Config"
    }
}

/// Extension trait for validating collections of configs
pub trait ValidatableCollection {
    /// Validate all configs in collection
    fn validate_all(&self) -> ConfigResult<()>;
}

impl<T: Validatable> ValidatableCollection for Vec<T> {
    fn validate_all(&self) -> ConfigResult<()> {
        for config in self {
            config.validate()?;
        }
        Ok(())
    }
}

impl<T: Validatable> ValidatableCollection for Option<T> {
    fn validate_all(&self) -> ConfigResult<()> {
        if let Some(config) = self {
            config.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BulkConfig, ConfigError};

    #[test]
    fn test_validate_all_stops_at_first_error() {
        let configs = vec![
            BulkConfig::default(),
            BulkConfig {
                worker_count: 0,
                chunk_size: 500,
            },
        ];
        let err = configs.validate_all().unwrap_err();
        assert!(matches!(err, ConfigError::Range { ref field, .. } if field == "bulk.worker_count"));
    }

    #[test]
    fn test_validate_none_is_ok() {
        let config: Option<BulkConfig> = None;
        assert!(config.validate_all().is_ok());
        assert_eq!(BulkConfig::default().config_name(), "BulkConfig");
    }
}
