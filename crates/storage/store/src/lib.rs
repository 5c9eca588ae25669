//! Partitioned relational store for raw chain records and derived projections.
//!
//! The store is the only shared mutable resource in the indexer. Writes are
//! partitioned by ownership: the raw ingesters own `raw.*`, each derivation
//! worker kind owns its projection tables, and the lease/checkpoint
//! transitions are owned by the store itself. Every write path is idempotent
//! so that any range can be re-processed after a partial failure.

mod error;
mod rows;
mod traits;

pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::StoreError;
pub use postgres::PostgresStore;
pub use rows::*;
pub use traits::{
    CheckpointStore, ErrorStore, LeaseStore, ProjectionReader, ProjectionWriter, RawReader,
    RawWriter, Store,
};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
