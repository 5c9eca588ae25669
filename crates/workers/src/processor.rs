use crate::WorkerError;
use async_trait::async_trait;
use flowidx_access::AccessApi;
use flowidx_primitives::{HeightRange, ServiceId, WorkerKind};
use flowidx_store::Store;
use std::sync::Arc;

/// Shared dependencies handed to every processor run.
#[derive(Debug)]
pub struct ProcessorContext<S, A> {
    /// The store, for raw reads and projection writes.
    pub store: Arc<S>,
    /// The access pool, for script execution.
    pub access: Arc<A>,
}

impl<S, A> Clone for ProcessorContext<S, A> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), access: self.access.clone() }
    }
}

impl<S, A> ProcessorContext<S, A> {
    /// Bundles the dependencies.
    pub fn new(store: Arc<S>, access: Arc<A>) -> Self {
        Self { store, access }
    }
}

/// The per-kind logic of a derivation worker.
///
/// Implementations must be deterministic over their inputs and write only
/// through idempotent store operations: running [`Processor::process`] twice
/// over the same range leaves the projection tables in the same final state.
#[async_trait]
pub trait Processor<S, A>: Send + Sync
where
    S: Store,
    A: AccessApi,
{
    /// The worker kind this processor implements.
    fn kind(&self) -> WorkerKind;

    /// Services whose checkpoints bound this processor's claims.
    fn upstreams(&self) -> Vec<ServiceId>;

    /// Clears this processor's rows in the range, ahead of a retry or after
    /// a reorg clamp.
    async fn delete_by_height(&self, store: &S, range: HeightRange) -> Result<(), WorkerError> {
        store.delete_projection_rows(self.kind(), range).await?;
        Ok(())
    }

    /// Reads raw rows overlapping `range` and writes the derived batch.
    async fn process(
        &self,
        ctx: &ProcessorContext<S, A>,
        range: HeightRange,
    ) -> Result<(), WorkerError>;
}
