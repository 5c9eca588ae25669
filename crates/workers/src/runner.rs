use crate::{Processor, ProcessorContext, WorkerError};
use flowidx_access::AccessApi;
use flowidx_coordinator::WorkCoordinator;
use flowidx_primitives::{ErrorRecord, Lease, ServiceId, Severity};
use flowidx_store::Store;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Executes claimed leases for one worker kind.
///
/// Each instance runs an independent claim loop; concurrency per kind is
/// achieved by spawning several instances with distinct labels. A lease is
/// either completed with the kind's checkpoint advanced, or failed with a
/// deduplicated error row attached, including on shutdown so the reaper is
/// not needed for a clean exit.
pub struct DerivationWorker<S, A> {
    processor: Arc<dyn Processor<S, A>>,
    coordinator: Arc<WorkCoordinator<S>>,
    ctx: ProcessorContext<S, A>,
    range_size: u64,
    claim_interval: Duration,
    start_floor: u64,
    instance: String,
}

impl<S, A> std::fmt::Debug for DerivationWorker<S, A>
where
    S: Store,
    A: AccessApi,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivationWorker")
            .field("kind", &self.processor.kind())
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl<S, A> DerivationWorker<S, A>
where
    S: Store,
    A: AccessApi,
{
    /// Creates one worker instance.
    pub fn new(
        processor: Arc<dyn Processor<S, A>>,
        coordinator: Arc<WorkCoordinator<S>>,
        ctx: ProcessorContext<S, A>,
        range_size: u64,
        claim_interval: Duration,
        start_floor: u64,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            processor,
            coordinator,
            ctx,
            range_size,
            claim_interval,
            start_floor,
            instance: instance.into(),
        }
    }

    /// Claim loop: drains available leases, then idles one tick.
    pub async fn run(&self, cancel: CancellationToken) {
        let kind = self.processor.kind();
        info!(target: "workers", worker = %kind, instance = %self.instance, "worker started");
        let mut interval = tokio::time::interval(self.claim_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match self
                    .coordinator
                    .claim_next(kind, &self.instance, self.range_size, self.start_floor)
                    .await
                {
                    Ok(Some(lease)) => {
                        if let Err(err) = self.execute(lease, &cancel).await {
                            error!(
                                target: "workers",
                                worker = %kind, %err, "lease bookkeeping failed"
                            );
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        error!(target: "workers", worker = %kind, %err, "claim failed");
                        break;
                    }
                }
            }
        }
        info!(target: "workers", worker = %kind, instance = %self.instance, "worker stopped");
    }

    /// Runs one claimed lease to completion or failure. The returned error
    /// covers bookkeeping only; processor failures are absorbed into the
    /// lease state.
    pub async fn execute(
        &self,
        lease: Lease,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        let kind = self.processor.kind();
        let range = lease.range;
        debug!(
            target: "workers",
            worker = %kind, %range, attempt = lease.attempt, "processing lease"
        );

        let result = async {
            // Retries first clear any partial writes from the failed run.
            if lease.attempt > 0 {
                self.processor.delete_by_height(&self.ctx.store, range).await?;
            }
            tokio::select! {
                _ = cancel.cancelled() => Err(WorkerError::Cancelled),
                result = self.processor.process(&self.ctx, range) => result,
            }
        }
        .await;

        match result {
            Ok(()) => {
                if let Some(last) = range.last() {
                    self.ctx
                        .store
                        .advance_checkpoint(ServiceId::Worker(kind), last)
                        .await?;
                }
                self.coordinator.complete(&lease).await?;
                metrics::counter!("flowidx_worker_ranges_processed", "worker" => kind.as_static_str())
                    .increment(1);
                Ok(())
            }
            Err(err) => {
                debug!(target: "workers", worker = %kind, %range, %err, "lease failed");
                metrics::counter!("flowidx_worker_failures", "worker" => kind.as_static_str())
                    .increment(1);
                let record = ErrorRecord::new(
                    kind.as_static_str(),
                    Some(range.start),
                    None,
                    err.to_string(),
                    &err.stack(),
                    Severity::Error,
                );
                let error_id = self.ctx.store.record_error(&record).await?;
                self.coordinator.fail(&lease, Some(error_id)).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowidx_access::{MockAccessApi, MockChain};
    use flowidx_coordinator::DependencyGraph;
    use flowidx_primitives::{HeightRange, WorkerKind};
    use flowidx_store::{CheckpointStore, LeaseStore, MemoryStore, StoreError};

    /// A processor that always raises the same failure.
    struct FailingProcessor;

    #[async_trait]
    impl Processor<MemoryStore, MockAccessApi> for FailingProcessor {
        fn kind(&self) -> WorkerKind {
            WorkerKind::Token
        }

        fn upstreams(&self) -> Vec<ServiceId> {
            vec![ServiceId::RawIngester]
        }

        async fn process(
            &self,
            _ctx: &ProcessorContext<MemoryStore, MockAccessApi>,
            _range: HeightRange,
        ) -> Result<(), WorkerError> {
            Err(WorkerError::Store(StoreError::malformed("app.ft_transfers", "boom")))
        }
    }

    fn worker(
        store: Arc<MemoryStore>,
        processor: Arc<dyn Processor<MemoryStore, MockAccessApi>>,
    ) -> DerivationWorker<MemoryStore, MockAccessApi> {
        let graph = DependencyGraph::from_edges([(
            WorkerKind::Token,
            vec![ServiceId::RawIngester],
        )])
        .unwrap();
        let coordinator = Arc::new(WorkCoordinator::new(
            store.clone(),
            graph,
            Duration::from_secs(300),
            Duration::from_secs(30),
        ));
        let ctx = ProcessorContext::new(store, Arc::new(MockAccessApi::new(MockChain::new())));
        DerivationWorker::new(
            processor,
            coordinator,
            ctx,
            1_000,
            Duration::from_millis(10),
            0,
            "token-0",
        )
    }

    #[tokio::test]
    async fn always_failing_range_dead_letters_with_one_error_row() {
        let store = Arc::new(MemoryStore::new());
        store.advance_checkpoint(ServiceId::RawIngester, 10_000).await.unwrap();
        let worker = worker(store.clone(), Arc::new(FailingProcessor));
        let cancel = CancellationToken::new();

        // Drive claims until the range dead-letters and claims dry up.
        let mut executed = 0;
        loop {
            match worker
                .coordinator
                .claim_next(WorkerKind::Token, "token-0", 1_000, 0)
                .await
                .unwrap()
            {
                Some(lease) => {
                    worker.execute(lease, &cancel).await.unwrap();
                    executed += 1;
                    assert!(executed <= 20, "claims continued past the dead-letter threshold");
                }
                None => break,
            }
        }
        assert_eq!(executed, 20);

        // One deduplicated row for the processor failure, one for the
        // dead-letter alert.
        let errors = store.errors();
        assert_eq!(
            errors.iter().filter(|e| e.message.contains("boom")).count(),
            1
        );
        assert_eq!(
            errors.iter().filter(|e| e.severity == Severity::Critical).count(),
            1
        );
        // The worker checkpoint never advanced.
        assert_eq!(
            store.checkpoint_height(ServiceId::Worker(WorkerKind::Token)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn cancellation_fails_the_lease_before_returning() {
        struct SlowProcessor;

        #[async_trait]
        impl Processor<MemoryStore, MockAccessApi> for SlowProcessor {
            fn kind(&self) -> WorkerKind {
                WorkerKind::Token
            }

            fn upstreams(&self) -> Vec<ServiceId> {
                vec![ServiceId::RawIngester]
            }

            async fn process(
                &self,
                _ctx: &ProcessorContext<MemoryStore, MockAccessApi>,
                _range: HeightRange,
            ) -> Result<(), WorkerError> {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(())
            }
        }

        let store = Arc::new(MemoryStore::new());
        store.advance_checkpoint(ServiceId::RawIngester, 10_000).await.unwrap();
        let worker = worker(store.clone(), Arc::new(SlowProcessor));
        let cancel = CancellationToken::new();
        let lease = worker
            .coordinator
            .claim_next(WorkerKind::Token, "token-0", 1_000, 0)
            .await
            .unwrap()
            .unwrap();
        cancel.cancel();
        worker.execute(lease, &cancel).await.unwrap();

        let leases = store.leases_for(WorkerKind::Token).await.unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].status, flowidx_primitives::LeaseStatus::Failed);
    }
}
