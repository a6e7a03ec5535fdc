//! Entities spread over the physical indices behind one alias
//!
//! Reads and creates go through the alias. Every per-id mutation first
//! locates the physical index holding the id and targets that index, so an
//! update to an archived document lands in the archive rather than in the
//! alias's write index.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crud::service::run_query;
use crate::crud::validation::{require_ids, require_non_empty};
use crate::crud::{EntityQuery, EntityStore};
use crate::domain::{AliasDescriptor, BulkOutcome, Document, ExecMode, IndexAdmin};
use crate::error::{Result, StoreError};
use crate::response;
use crate::store::DualModeRouter;
use crate::transform::TransformOptions;

/// Routes entity operations across an alias's members
#[derive(Clone)]
pub struct AliasIndexRouter {
    router: Arc<DualModeRouter>,
    admin: Arc<dyn IndexAdmin>,
    alias: String,
}

impl AliasIndexRouter {
    pub fn new(router: Arc<DualModeRouter>, admin: Arc<dyn IndexAdmin>, alias: impl Into<String>) -> Self {
        Self {
            router,
            admin,
            alias: alias.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn router(&self) -> &Arc<DualModeRouter> {
        &self.router
    }

    /// Current members of the alias; fetched on every call
    pub fn resolve(&self) -> Result<AliasDescriptor> {
        let response = self.admin.get_index(&self.alias)?;
        AliasDescriptor::from_index_response(&self.alias, &response)
    }

    /// Raw hits for `ids` in request order, `None` where an id matched
    /// nothing. One `_id` terms query against the alias.
    ///
    /// An interrupted archive can leave an id in several members, so the
    /// query is sized for one copy per member and the write member's copy
    /// wins.
    pub fn entity_hits(
        &self,
        ids: &[String],
        limit: usize,
        source: Option<&[String]>,
    ) -> Result<Vec<Option<Value>>> {
        require_ids(ids)?;
        let descriptor = self.resolve()?;
        let write_index = descriptor.write_index().map(|member| member.index.clone());
        let size = limit.max(ids.len() * descriptor.members.len().max(1));

        let mut body = Map::new();
        body.insert("query".into(), json!({ "terms": { "_id": ids } }));
        body.insert("size".into(), json!(size));
        if let Some(fields) = source {
            body.insert("_source".into(), json!(fields));
        }

        let result = self
            .router
            .query(
                &self.alias,
                Value::Object(body),
                None,
                TransformOptions::default(),
                ExecMode::Immediate,
            )?
            .unwrap_or(Value::Null);

        let mut by_id: HashMap<String, Value> = HashMap::with_capacity(ids.len());
        for hit in response::get_hits(&result) {
            let Some(id) = response::get_id(&hit).map(str::to_string) else {
                continue;
            };
            let in_write_index = write_index.is_some() && response::get_index(&hit) == write_index.as_deref();
            match by_id.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(hit);
                }
                Entry::Occupied(mut slot) => {
                    debug!(alias = %self.alias, id = %slot.key(), "Id present in more than one member");
                    if in_write_index {
                        slot.insert(hit);
                    }
                }
            }
        }
        Ok(ids.iter().map(|id| by_id.remove(id)).collect())
    }

    /// Physical index holding each id, `None` when no member has it
    pub fn locate(&self, ids: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let hits = self.entity_hits(ids, ids.len(), None)?;
        Ok(ids
            .iter()
            .cloned()
            .zip(hits.into_iter().map(|hit| {
                hit.as_ref()
                    .and_then(|hit| response::get_index(hit))
                    .map(str::to_string)
            }))
            .collect())
    }

    /// `locate` as a lookup of found ids only
    fn located(&self, ids: &[String], operation: &str) -> Result<HashMap<String, String>> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = 0usize;
        for (id, index) in self.locate(ids)? {
            match index {
                Some(index) => {
                    found.insert(id, index);
                }
                None => missing += 1,
            }
        }
        if missing > 0 {
            warn!(alias = %self.alias, operation, missing, "Ids not found behind alias, skipped");
        }
        Ok(found)
    }

    fn commit_unless_batched(&self, mode: ExecMode) -> Result<Option<BulkOutcome>> {
        if mode.is_batched() {
            return Ok(None);
        }
        self.router.batch_write().map(Some)
    }

    /// Enqueue `write` against each entry's physical index, then commit
    /// unless batched. Entries whose id is not found are dropped.
    fn mutate_all<F>(
        &self,
        entries: Vec<(String, Document)>,
        mode: ExecMode,
        operation: &str,
        write: F,
    ) -> Result<Option<BulkOutcome>>
    where
        F: Fn(&str, &str, Document) -> Result<Option<Value>>,
    {
        if !entries.is_empty() {
            let ids: Vec<String> = entries.iter().map(|(id, _)| id.clone()).collect();
            let located = self.located(&ids, operation)?;
            for (id, doc) in entries {
                if let Some(index) = located.get(&id) {
                    write(index, &id, doc)?;
                }
            }
            debug!(alias = %self.alias, operation, routed = located.len(), "Routed writes to physical indices");
        }
        self.commit_unless_batched(mode)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Batch Mutations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Partial updates by id. Returns the bulk outcome when committed.
    pub fn update_all(&self, updates: Vec<(String, Document)>, mode: ExecMode) -> Result<Option<BulkOutcome>> {
        self.mutate_all(updates, mode, "update", |index, id, doc| {
            self.router.update(index, id, doc, ExecMode::Batched)
        })
    }

    pub fn upsert_all(&self, entities: Vec<(String, Document)>, mode: ExecMode) -> Result<Option<BulkOutcome>> {
        self.mutate_all(entities, mode, "upsert", |index, id, doc| {
            self.router.upsert(index, id, doc, ExecMode::Batched)
        })
    }

    pub fn overwrite_all(&self, entities: Vec<(String, Document)>, mode: ExecMode) -> Result<Option<BulkOutcome>> {
        self.mutate_all(entities, mode, "overwrite", |index, id, doc| {
            self.router.index_doc(index, id, doc, ExecMode::Batched)
        })
    }

    pub fn delete_all(&self, ids: &[String], mode: ExecMode) -> Result<Option<BulkOutcome>> {
        let entries = ids.iter().map(|id| (id.clone(), Document::new())).collect();
        self.mutate_all(entries, mode, "delete", |index, id, _| {
            self.router.delete(index, id, ExecMode::Batched)
        })
    }
}

impl EntityStore for AliasIndexRouter {
    fn index_name(&self) -> &str {
        &self.alias
    }

    /// Created through the alias, which places it in the write index
    fn create(&self, id: Option<&str>, mut entity: Document, mode: ExecMode) -> Result<String> {
        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        entity.insert("uid".into(), json!(id));
        self.router.create(&self.alias, &id, entity, mode)?;
        Ok(id)
    }

    /// Missing ids are skipped rather than reported
    fn update(&self, id: &str, update: Document, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        self.update_all(vec![(id.to_string(), update)], mode)?;
        Ok(())
    }

    fn upsert(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        self.upsert_all(vec![(id.to_string(), entity)], mode)?;
        Ok(())
    }

    fn overwrite(&self, id: &str, entity: Document, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        self.overwrite_all(vec![(id.to_string(), entity)], mode)?;
        Ok(())
    }

    fn delete(&self, id: &str, mode: ExecMode) -> Result<()> {
        require_non_empty("entity_id", id)?;
        self.delete_all(&[id.to_string()], mode)?;
        Ok(())
    }

    /// Immediate only: the owning index isn't known until the lookup runs
    fn get_entity(&self, id: &str, source: Option<&[String]>, mode: ExecMode) -> Result<Option<Value>> {
        require_non_empty("entity_id", id)?;
        if mode.is_batched() {
            return Err(StoreError::usage(format!(
                "Batched get is not supported on alias {}",
                self.alias
            )));
        }
        let hit = self
            .entity_hits(&[id.to_string()], 1, source)?
            .into_iter()
            .next()
            .flatten();
        Ok(hit.map(|hit| response::get_source(&hit)))
    }

    fn get_entities(&self, ids: &[String], limit: usize) -> Result<Vec<Value>> {
        Ok(self
            .entity_hits(ids, limit, None)?
            .into_iter()
            .flatten()
            .take(limit)
            .map(|hit| response::get_source(&hit))
            .collect())
    }

    fn query(&self, query: EntityQuery) -> Result<Option<Value>> {
        run_query(&self.router, &self.alias, query)
    }

    fn batch_write(&self) -> Result<BulkOutcome> {
        self.router.batch_write()?.into_result()
    }

    fn batch_get(&self) -> Result<HashMap<String, Option<Value>>> {
        self.router.batch_get()
    }

    /// Refresh every member
    fn refresh(&self) -> Result<()> {
        for member in self.resolve()?.members {
            self.router.refresh_index(&member.index)?;
        }
        Ok(())
    }
}
