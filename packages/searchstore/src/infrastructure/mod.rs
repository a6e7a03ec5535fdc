//! Infrastructure layer - Engine adapters
//!
//! - `memory`: in-process engine for tests and embedding

#[cfg(feature = "memory")]
pub mod memory_engine;
#[cfg(feature = "memory")]
pub mod query_eval;

#[cfg(feature = "memory")]
pub use memory_engine::{EngineOp, InMemoryEngine};
