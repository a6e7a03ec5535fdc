//! Moving documents from an alias's live index into its archive index
//!
//! The move is two engine calls, reindex then delete-by-query, with no
//! transaction around them. A failure after the reindex leaves the matches
//! in both indices; running the same archive again converges.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::alias_router::AliasIndexRouter;
use crate::error::{Result, StoreError};

/// Live and archive members of a two-index alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRoles {
    pub live_index: String,
    pub archive_index: String,
}

/// Counts reported by one archive run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveReport {
    pub live_index: String,
    pub archive_index: String,
    pub reindexed: u64,
    pub deleted: u64,
}

fn reported(result: &Value, field: &str) -> u64 {
    result.get(field).and_then(Value::as_u64).unwrap_or(0)
}

/// Archives documents of an alias with exactly two members
#[derive(Clone)]
pub struct ArchiveMigrator {
    alias_router: AliasIndexRouter,
}

impl ArchiveMigrator {
    pub fn new(alias_router: AliasIndexRouter) -> Self {
        Self { alias_router }
    }

    pub fn alias_router(&self) -> &AliasIndexRouter {
        &self.alias_router
    }

    /// Resolve the live (write-flagged) and archive members. Anything but
    /// two members with exactly one write flag is a usage error.
    pub fn roles(&self) -> Result<ArchiveRoles> {
        let descriptor = self.alias_router.resolve()?;
        let writers = descriptor
            .members
            .iter()
            .filter(|member| member.is_write_index)
            .count();
        if descriptor.members.len() != 2 || writers != 1 {
            return Err(StoreError::usage(format!(
                "Archiving alias {} needs one write index and one archive index, found {} members with {} write indices",
                descriptor.alias,
                descriptor.members.len(),
                writers
            )));
        }

        match (descriptor.write_index(), descriptor.archive_index()) {
            (Some(live), Some(archive)) => Ok(ArchiveRoles {
                live_index: live.index.clone(),
                archive_index: archive.index.clone(),
            }),
            _ => Err(StoreError::usage(format!(
                "Alias {} has no archive index",
                descriptor.alias
            ))),
        }
    }

    /// Copy matches of `filter` into the archive index, then delete them
    /// from the live index
    pub fn archive(&self, filter: &Value) -> Result<ArchiveReport> {
        let roles = self.roles()?;
        let router = self.alias_router.router();

        info!(
            alias = %self.alias_router.alias(),
            live = %roles.live_index,
            archive = %roles.archive_index,
            "Archive reindex started"
        );
        let reindexed = router.reindex(&json!({
            "source": { "index": roles.live_index, "query": filter },
            "dest": { "index": roles.archive_index },
            "conflicts": "proceed",
        }))?;
        let reindexed = reported(&reindexed, "total");

        info!(live = %roles.live_index, reindexed, "Archive delete started");
        let deleted = router.delete_by_query(&roles.live_index, filter)?;
        let deleted = reported(&deleted, "deleted");

        info!(
            alias = %self.alias_router.alias(),
            reindexed,
            deleted,
            "Archive complete"
        );
        Ok(ArchiveReport {
            live_index: roles.live_index,
            archive_index: roles.archive_index,
            reindexed,
            deleted,
        })
    }
}
