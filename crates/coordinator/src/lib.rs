//! Lease issuing and dependency gating for the derivation workers.
//!
//! The [`WorkCoordinator`] hands out non-overlapping height ranges to worker
//! instances, bounded by the [`DependencyGate`]: a worker may only process
//! heights its upstream services have already covered. A periodic reaper
//! moves expired leases to FAILED, and ranges that failed twenty times are
//! dead-lettered and never retried automatically.

mod coordinator;
mod gate;
mod graph;

pub use coordinator::WorkCoordinator;
pub use gate::DependencyGate;
pub use graph::DependencyGraph;

use flowidx_primitives::WorkerKind;

/// Errors raised by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] flowidx_store::StoreError),
    /// The declared worker DAG contains a cycle.
    #[error("dependency cycle through worker {0}")]
    CyclicDependency(WorkerKind),
    /// A worker kind is missing from the dependency graph.
    #[error("worker {0} is not registered in the dependency graph")]
    UnknownWorker(WorkerKind),
}
