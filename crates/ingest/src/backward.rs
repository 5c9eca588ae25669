use crate::{policy::prepare_bundle, IngestError};
use flowidx_access::AccessApi;
use flowidx_config::IngestConfig;
use flowidx_primitives::{ErrorRecord, HeightRange, ServiceId, Severity};
use flowidx_store::Store;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Service name used for history ingest error rows.
const SERVICE: &str = "history_ingester";

/// The history backfiller.
///
/// Works downward from the lowest ingested height to the configured start
/// block in fixed-size batches spread across parallel workers. Its
/// checkpoint records the lowest height of the contiguously completed
/// suffix, so a restart resumes where the previous run left off. All writes
/// go through the same idempotent path as the forward ingester.
pub struct HistoryIngester<S, A> {
    store: Arc<S>,
    access: Arc<A>,
    config: IngestConfig,
    state: Mutex<BackfillState>,
}

#[derive(Debug, Default)]
struct BackfillState {
    queue: VecDeque<HeightRange>,
    attempts: HashMap<u64, u32>,
    tracker: DescendingTracker,
}

impl<S, A> std::fmt::Debug for HistoryIngester<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryIngester").finish_non_exhaustive()
    }
}

impl<S, A> HistoryIngester<S, A>
where
    S: Store,
    A: AccessApi,
{
    /// Creates the history ingester.
    pub fn new(store: Arc<S>, access: Arc<A>, config: IngestConfig) -> Self {
        Self { store, access, config, state: Mutex::new(BackfillState::default()) }
    }

    /// Runs the backfill to completion or cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), IngestError> {
        if !self.config.enable_history_ingester {
            info!(target: "ingest::backward", "history ingester disabled");
            return Ok(());
        }

        // The forward ingester defines the upper bound: history fills
        // everything below the lowest block it (or a previous backfill)
        // wrote.
        let upper = loop {
            if let Some(lowest) = self.store.lowest_block().await? {
                break lowest;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
            }
        };
        let resume = self
            .store
            .checkpoint_height(ServiceId::HistoryIngester)
            .await?
            .map(|c| c.min(upper))
            .unwrap_or(upper);
        if resume <= self.config.start_block {
            info!(target: "ingest::backward", resume, "history backfill already complete");
            return Ok(());
        }
        info!(
            target: "ingest::backward",
            from = resume, to = self.config.start_block, "history backfill started"
        );

        {
            let mut state = self.state.lock().await;
            state.tracker = DescendingTracker::new(resume);
            let mut cursor = resume;
            while cursor > self.config.start_block {
                let low = cursor.saturating_sub(self.config.history_batch_size).max(self.config.start_block);
                state.queue.push_back(HeightRange::new(low, cursor));
                cursor = low;
            }
        }

        let workers = self.config.history_worker_count.max(1);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let ingester = self.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { ingester.worker_loop(index, cancel).await }));
        }
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(err) => {
                    error!(target: "ingest::backward", %err, "history worker panicked");
                }
            }
        }

        let frontier = self.state.lock().await.tracker.frontier();
        if frontier <= self.config.start_block {
            info!(target: "ingest::backward", "history backfill complete");
        }
        Ok(())
    }

    async fn worker_loop(
        &self,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        debug!(target: "ingest::backward", index, "history worker started");
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let Some(batch) = self.state.lock().await.queue.pop_front() else {
                return Ok(());
            };
            match self.ingest_batch(batch, &cancel).await {
                Ok(true) => {
                    let frontier = {
                        let mut state = self.state.lock().await;
                        state.attempts.remove(&batch.start);
                        state.tracker.complete(batch);
                        state.tracker.frontier()
                    };
                    self.store.set_checkpoint(ServiceId::HistoryIngester, frontier).await?;
                    metrics::counter!("flowidx_blocks_ingested", "ingester" => "backward")
                        .increment(batch.len());
                }
                // Cancelled mid-batch; the checkpoint resumes it next run.
                Ok(false) => return Ok(()),
                Err(err) => {
                    self.note_batch_failure(batch, &err).await?;
                }
            }
        }
    }

    /// Ingests one batch. Returns `false` when interrupted by cancellation.
    async fn ingest_batch(
        &self,
        batch: HeightRange,
        cancel: &CancellationToken,
    ) -> Result<bool, IngestError> {
        for height in batch.iter() {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let mut bundle = self.access.block_bundle_at(height).await?;
            let scripts = prepare_bundle(&mut bundle, self.config.tx_script_inline_max_bytes);
            self.store.insert_block(&bundle, &scripts).await?;
        }
        debug!(target: "ingest::backward", %batch, "batch ingested");
        Ok(true)
    }

    async fn note_batch_failure(
        &self,
        batch: HeightRange,
        err: &IngestError,
    ) -> Result<(), IngestError> {
        let attempt = {
            let mut state = self.state.lock().await;
            let entry = state.attempts.entry(batch.start).or_insert(0);
            *entry += 1;
            *entry
        };
        warn!(target: "ingest::backward", %batch, attempt, %err, "batch failed");
        let record = ErrorRecord::new(
            SERVICE,
            Some(batch.start),
            None,
            err.to_string(),
            "backward::batch",
            Severity::Error,
        );
        self.store.record_error(&record).await?;

        if attempt >= self.config.max_attempts {
            error!(
                target: "ingest::backward",
                %batch, attempt, "CRITICAL: batch dead-lettered, leaving hole"
            );
            let record = ErrorRecord::new(
                SERVICE,
                Some(batch.start),
                None,
                format!("batch {batch} dead-lettered after {attempt} attempts"),
                "backward::dead_letter",
                Severity::Critical,
            );
            self.store.record_error(&record).await?;
        } else {
            self.state.lock().await.queue.push_back(batch);
        }
        Ok(())
    }
}

/// Tracks descending completion: the frontier is the lowest height such
/// that everything from the starting point down to it is done.
#[derive(Debug, Default)]
struct DescendingTracker {
    frontier: u64,
    /// Completed batches keyed by their upper bound.
    completed: HashMap<u64, u64>,
}

impl DescendingTracker {
    fn new(start: u64) -> Self {
        Self { frontier: start, completed: HashMap::new() }
    }

    fn complete(&mut self, batch: HeightRange) {
        self.completed.insert(batch.end, batch.start);
        while let Some(start) = self.completed.remove(&self.frontier) {
            self.frontier = start;
        }
    }

    fn frontier(&self) -> u64 {
        self.frontier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontier_only_advances_contiguously() {
        let mut tracker = DescendingTracker::new(100);
        tracker.complete(HeightRange::new(80, 90));
        assert_eq!(tracker.frontier(), 100);
        tracker.complete(HeightRange::new(90, 100));
        assert_eq!(tracker.frontier(), 80);
        tracker.complete(HeightRange::new(60, 70));
        tracker.complete(HeightRange::new(70, 80));
        assert_eq!(tracker.frontier(), 60);
    }
}
