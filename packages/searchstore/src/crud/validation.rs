//! Argument checks run at the top of public CRUD operations

use crate::error::{Result, StoreError};

pub fn require_non_empty(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(format!("{} must be a non-empty string", name)));
    }
    Ok(())
}

pub fn require_ids(ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(StoreError::validation("entity_ids must not be empty"));
    }
    for id in ids {
        require_non_empty("entity_id", id)?;
    }
    Ok(())
}

pub fn require_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(StoreError::validation(format!("{} must be greater than zero", name)));
    }
    Ok(())
}
