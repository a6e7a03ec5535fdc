//! searchstore - Batched access layer for a document search engine
//!
//! Callers issue create/read/update/delete/query/suggest operations against
//! named indices, either immediately or deferred into a batch that is later
//! committed as one bulk, multi-search or multi-get call. Entities living in
//! one of several physical indices behind an alias are routed to the index
//! that holds them, and a two-index alias can archive documents from its
//! live member into its archive member.
//!
//! ## Layers
//!
//! - `domain/`         : Write intents, bulk outcomes, alias membership, engine ports
//! - `batch/`          : Write queue, query and get batches, the batch context
//! - `store/`          : Immediate execution, the dual-mode router, scroll scans
//! - `crud/`           : Entity services (`IndexCrud`, `SoftDeleteCrud`)
//! - `multi_index/`    : Alias routing and archiving
//! - `infrastructure/` : In-memory engine adapter (`memory` feature)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use searchstore::{DualModeRouter, EntityStore, ExecMode, IndexCrud, InMemoryEngine, StoreConfig};
//!
//! let engine = Arc::new(InMemoryEngine::new());
//! let router = Arc::new(DualModeRouter::new(engine, Arc::new(StoreConfig::default())));
//! let things = IndexCrud::new(router, "thing");
//!
//! // Deferred writes, one bulk call
//! things.create(Some("1"), doc, ExecMode::Batched)?;
//! things.create(Some("2"), other, ExecMode::Batched)?;
//! let outcome = things.batch_write()?;
//! ```

#![allow(clippy::module_inception)]
#![allow(clippy::new_without_default)]

pub mod batch;
pub mod config;
pub mod crud;
pub mod domain;
pub mod error;
#[cfg(feature = "memory")]
pub mod infrastructure;
pub mod multi_index;
pub mod response;
pub mod store;
pub mod timing;
pub mod transform;

pub use error::{ErrorKind, Result, StoreError};

// ═══════════════════════════════════════════════════════════════════════════
// Re-exports
// ═══════════════════════════════════════════════════════════════════════════

pub use batch::{ActionQueue, BatchExecutionContext, CorrelatedRequestMap, GetBatch, GetIntent, QueryBatch};
pub use config::{BulkConfig, ConfigError, StoreConfig};
pub use crud::{EntityQuery, EntityStore, IndexCrud, SoftDeleteCrud, SortDirection};
pub use domain::{
    AliasDescriptor, BulkItemResult, BulkOutcome, Document, ExecMode, IndexAdmin, OpKind,
    PhysicalIndexInfo, ScriptSpec, SearchEngine, WriteIntent,
};
#[cfg(feature = "memory")]
pub use infrastructure::{EngineOp, InMemoryEngine};
pub use multi_index::{AliasIndexRouter, ArchiveMigrator, ArchiveReport};
pub use store::{DualModeRouter, ImmediateStore, ScanOptions};
pub use transform::{build_transform, Transform, TransformOptions};
