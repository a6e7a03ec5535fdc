//! Store layer
//!
//! [`DualModeRouter`] is the single entry point callers use: every
//! operation takes an [`ExecMode`](crate::domain::ExecMode) and either runs
//! through [`ImmediateStore`] or joins the router's
//! [`BatchExecutionContext`](crate::batch::BatchExecutionContext).

pub mod immediate;
pub mod router;
pub mod scan;

pub use immediate::{suggest_body, ImmediateStore, IMMEDIATE_SUGGEST_KEY};
pub use router::DualModeRouter;
pub use scan::{sliced_scan, BatchScan, Scan, ScanOptions};
