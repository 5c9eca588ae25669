use crate::{Processor, ProcessorContext};
use flowidx_access::AccessApi;
use flowidx_primitives::{ErrorRecord, HeightRange, Severity};
use flowidx_store::Store;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// An in-line derivation failure awaiting retry.
#[derive(Debug, Clone, Copy)]
struct RetryEntry {
    processor: usize,
    range: HeightRange,
    attempt: u32,
}

/// Runs every enabled processor synchronously on the forward ingester's
/// tail.
///
/// No leases are involved: the forward ingester's monotonic advance is the
/// ordering guarantee. Failures land in a bounded FIFO retried with
/// exponential backoff; a range that exhausts its retries is logged
/// critically and left for the batch workers, which will find the hole
/// through the gap scan.
pub struct LiveDeriver<S, A> {
    processors: Vec<Arc<dyn Processor<S, A>>>,
    ctx: ProcessorContext<S, A>,
    queue: Mutex<VecDeque<RetryEntry>>,
    wakeup: Notify,
}

impl<S, A> std::fmt::Debug for LiveDeriver<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDeriver")
            .field("processors", &self.processors.len())
            .finish_non_exhaustive()
    }
}

impl<S, A> LiveDeriver<S, A>
where
    S: Store,
    A: AccessApi,
{
    /// Retry ceiling per failed range.
    const MAX_ATTEMPTS: u32 = 3;
    /// Backoff base; doubles per attempt.
    const BACKOFF_BASE: Duration = Duration::from_secs(1);
    /// Bound on the retry queue. Overflow drops the entry (the batch path
    /// closes the gap).
    const QUEUE_CAPACITY: usize = 256;

    /// Creates a live deriver over the enabled processors.
    pub fn new(processors: Vec<Arc<dyn Processor<S, A>>>, ctx: ProcessorContext<S, A>) -> Self {
        Self { processors, ctx, queue: Mutex::new(VecDeque::new()), wakeup: Notify::new() }
    }

    /// Derives a freshly ingested range through every processor. Failures
    /// are queued for retry; this call itself never fails the ingest.
    pub async fn derive(&self, range: HeightRange) {
        for (index, processor) in self.processors.iter().enumerate() {
            match processor.process(&self.ctx, range).await {
                Ok(()) => {
                    trace!(
                        target: "live",
                        worker = %processor.kind(), %range, "derived in-line"
                    );
                }
                Err(err) => {
                    debug!(
                        target: "live",
                        worker = %processor.kind(), %range, %err, "in-line derivation failed"
                    );
                    self.enqueue(RetryEntry { processor: index, range, attempt: 1 }).await;
                }
            }
        }
    }

    /// Drains the retry queue until cancellation.
    pub async fn run_retries(&self, cancel: CancellationToken) {
        info!(target: "live", "retry loop started");
        loop {
            let entry = {
                let mut queue = self.queue.lock().await;
                queue.pop_front()
            };
            let Some(entry) = entry else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.wakeup.notified() => continue,
                }
            };

            let backoff = Self::BACKOFF_BASE * 2_u32.saturating_pow(entry.attempt - 1);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }

            let processor = &self.processors[entry.processor];
            match processor.process(&self.ctx, entry.range).await {
                Ok(()) => {
                    debug!(
                        target: "live",
                        worker = %processor.kind(), range = %entry.range,
                        attempt = entry.attempt, "retry succeeded"
                    );
                }
                Err(err) if entry.attempt >= Self::MAX_ATTEMPTS => {
                    error!(
                        target: "live",
                        worker = %processor.kind(), range = %entry.range, %err,
                        "CRITICAL: in-line derivation exhausted retries, leaving gap for batch worker"
                    );
                    let record = ErrorRecord::new(
                        processor.kind().as_static_str(),
                        Some(entry.range.start),
                        None,
                        err.to_string(),
                        "live::retry_exhausted",
                        Severity::Critical,
                    );
                    if let Err(err) = self.ctx.store.record_error(&record).await {
                        error!(target: "live", %err, "failed to record retry exhaustion");
                    }
                }
                Err(err) => {
                    debug!(
                        target: "live",
                        worker = %processor.kind(), range = %entry.range, %err,
                        attempt = entry.attempt, "retry failed"
                    );
                    self.enqueue(RetryEntry { attempt: entry.attempt + 1, ..entry }).await;
                }
            }
        }
        info!(target: "live", "retry loop stopped");
    }

    async fn enqueue(&self, entry: RetryEntry) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= Self::QUEUE_CAPACITY {
            error!(
                target: "live",
                range = %entry.range,
                "CRITICAL: retry queue full, dropping range for batch recovery"
            );
            return;
        }
        queue.push_back(entry);
        self.wakeup.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkerError;
    use async_trait::async_trait;
    use flowidx_access::{MockAccessApi, MockChain};
    use flowidx_primitives::{ServiceId, WorkerKind};
    use flowidx_store::{MemoryStore, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyProcessor {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Processor<MemoryStore, MockAccessApi> for FlakyProcessor {
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
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(WorkerError::Store(StoreError::malformed("app.ft_transfers", "flaky")))
            } else {
                Ok(())
            }
        }
    }

    fn deriver(
        store: Arc<MemoryStore>,
        failures: u32,
    ) -> Arc<LiveDeriver<MemoryStore, MockAccessApi>> {
        let ctx = ProcessorContext::new(store, Arc::new(MockAccessApi::new(MockChain::new())));
        Arc::new(LiveDeriver::new(
            vec![Arc::new(FlakyProcessor { failures, calls: AtomicU32::new(0) })],
            ctx,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_through_the_retry_queue() {
        let store = Arc::new(MemoryStore::new());
        let deriver = deriver(store.clone(), 1);
        let cancel = CancellationToken::new();
        let retries = {
            let deriver = deriver.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { deriver.run_retries(cancel).await })
        };

        deriver.derive(HeightRange::new(0, 5)).await;
        // The single failure retries after ~1s of (auto-advanced) backoff.
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        retries.await.unwrap();
        assert_eq!(store.error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_record_a_critical_error() {
        let store = Arc::new(MemoryStore::new());
        let deriver = deriver(store.clone(), u32::MAX);
        let cancel = CancellationToken::new();
        let retries = {
            let deriver = deriver.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { deriver.run_retries(cancel).await })
        };

        deriver.derive(HeightRange::new(0, 5)).await;
        // Attempts back off 1s, 2s, 4s; well within the advanced window.
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        retries.await.unwrap();

        let errors = store.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::Critical);
        assert_eq!(errors[0].worker, "token");
    }
}
