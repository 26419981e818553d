//! SPIRE Engine
//!
//! Executes rule bodies as suspendable tasks, resolving the requests they
//! issue through the catalog, union dispatch, and a per-run result cache.
//! Every (product, subject) key is computed at most once per run.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod coordinator;
pub mod monitor;
pub mod tracker;

pub use cache::{Claim, ResultCache, SharedResult};
pub use coordinator::{Coordinator, EngineConfig};
pub use monitor::{MetricsSnapshot, RunMetrics};
pub use tracker::InProgressTracker;
