//! Multi-index routing
//!
//! [`AliasIndexRouter`] resolves an alias to its physical members and routes
//! per-entity mutations to the member that holds the entity.
//! [`ArchiveMigrator`] moves documents from the live member to the archive
//! member of a two-index alias.

pub mod alias_router;
pub mod archive;

pub use alias_router::AliasIndexRouter;
pub use archive::{ArchiveMigrator, ArchiveReport, ArchiveRoles};
