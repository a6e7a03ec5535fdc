//! Domain layer
//!
//! # Domain Models
//!
//! - `WriteIntent`: one pending bulk action (index/create/update/upsert/script/delete)
//! - `BulkOutcome`: ordered per-item results of a bulk commit
//! - `AliasDescriptor` / `PhysicalIndexInfo`: alias membership with write flags
//!
//! # Port Traits
//!
//! - `SearchEngine`: the backing document engine (bulk, msearch, mget, ...)
//! - `IndexAdmin`: alias resolution from the index-administration side

pub mod models;
pub mod ports;

pub use models::{
    now_millis, AliasDescriptor, BulkItemResult, BulkOutcome, Document, ExecMode, OpKind,
    PhysicalIndexInfo, ScriptSpec, ScrollPage, WriteIntent, DEFAULT_DOC_TYPE,
};
pub use ports::{IndexAdmin, SearchEngine};
