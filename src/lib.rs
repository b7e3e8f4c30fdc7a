// src/lib.rs

// Import the top-level `evoforge` module.
pub mod evoforge;

// Re-export the submodules at the crate root so callers (and the crate's own
// internals) address `evoforge::store::Store` instead of walking the full
// hierarchy.
pub use crate::evoforge::{
    agents, audit, config, error, evaluator, event, jobs, lineage, metrics, models, orchestrator,
    registry, selection, store, tools, trace,
};

// Direct access to the types most callers start from.
pub use crate::evoforge::jobs::{JobRunner, JobTracker};
pub use crate::evoforge::orchestrator::{Orchestrator, RunControl};
pub use crate::evoforge::store::Store;
