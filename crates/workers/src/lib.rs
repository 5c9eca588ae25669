//! Derivation workers: processors, batch runner and live deriver.
//!
//! Each worker kind is a [`Processor`]: a deterministic transformation from
//! raw chain records over a height range into idempotent writes on its own
//! projection tables. The batch path claims leases through the coordinator;
//! the live path runs the same processors synchronously on the forward
//! ingester's tail.

mod error;
mod live;
mod processor;
mod registry;
mod runner;

pub mod processors;

pub use error::WorkerError;
pub use live::LiveDeriver;
pub use processor::{Processor, ProcessorContext};
pub use registry::{dependency_edges, registry};
pub use runner::DerivationWorker;
