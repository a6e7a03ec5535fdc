//! Entity CRUD services
//!
//! - [`IndexCrud`]: entity operations on one index
//! - [`SoftDeleteCrud`]: soft-delete overlay over any [`EntityStore`]
//! - [`EntityQuery`]: searches as field documents, clauses or raw bodies

pub mod query;
pub mod service;
pub mod soft_delete;
pub mod validation;

pub use query::{and_clauses, fields_clause, EntityQuery, QuerySpec, SortDirection};
pub use service::{EntityStore, IndexCrud};
pub use soft_delete::{
    is_soft_deleted, not_deleted_clause, soft_delete_update, SoftDeleteCrud, DELETED_TIME_FIELD,
};
