//! Batched execution
//!
//! Writes, gets and queries accumulate in lock-guarded queues and are sent
//! as one consolidated call per kind on an explicit commit:
//!
//! - [`ActionQueue`]: write intents, committed as chunked bulk requests
//! - [`GetBatch`]: keyed lookups, committed as one multi-get
//! - [`QueryBatch`]: keyed queries, committed as one multi-search
//!
//! Every commit swaps its queue out under the lock first, so the pending
//! count is zero afterwards whether or not the call succeeded.

pub mod action_queue;
pub mod context;
pub mod correlated;
pub mod get_batch;
pub mod query_batch;

pub use action_queue::ActionQueue;
pub use context::BatchExecutionContext;
pub use correlated::CorrelatedRequestMap;
pub use get_batch::{found_source, GetBatch, GetIntent};
pub use query_batch::{QueryBatch, QueryIntent};
