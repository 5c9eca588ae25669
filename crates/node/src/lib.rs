//! Wiring and lifecycle for the Flow indexer.
//!
//! [`Node`] assembles the pipeline over any store and access implementation
//! (tests run it entirely in memory); [`launch`] is the production path:
//! Postgres store, HTTP access pool, and a cancellation tree driven by the
//! process signals.

mod node;

pub use node::{launch, Node, NodeError};

/// Process exit code for a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Process exit code for a fatal initialization failure (database or access
/// nodes unreachable, invalid worker graph).
pub const EXIT_FATAL_INIT: i32 = 1;
/// Process exit code for an unrecoverable reorg beyond the depth bound.
pub const EXIT_REORG_TOO_DEEP: i32 = 2;
