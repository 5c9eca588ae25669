use crate::{policy::prepare_bundle, IngestError};
use flowidx_access::{AccessApi, AccessError};
use flowidx_config::IngestConfig;
use flowidx_events::ObserverBus;
use flowidx_primitives::{
    BlockBundle, ErrorRecord, HeightRange, ServiceId, Severity, WorkerKind,
};
use flowidx_store::Store;
use flowidx_workers::LiveDeriver;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Service name used for forward ingest error rows.
const SERVICE: &str = "raw_ingester";

/// The live-tip ingester.
///
/// Polls the sealed tip, fetches the next window of block bundles in
/// parallel, applies them in ascending order with a reorg check per height,
/// and only then advances its checkpoint, so the checkpoint always marks a
/// contiguous prefix. Divergence at the head triggers surgical retraction
/// back to the common ancestor; divergence deeper than the configured bound
/// is fatal.
pub struct ForwardIngester<S, A> {
    store: Arc<S>,
    access: Arc<A>,
    bus: ObserverBus,
    live: Option<Arc<LiveDeriver<S, A>>>,
    config: IngestConfig,
    /// Worker kinds whose checkpoints are clamped on reorg.
    downstream: Vec<WorkerKind>,
    attempts: Mutex<HashMap<u64, u32>>,
}

impl<S, A> std::fmt::Debug for ForwardIngester<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardIngester").finish_non_exhaustive()
    }
}

impl<S, A> ForwardIngester<S, A>
where
    S: Store,
    A: AccessApi,
{
    /// Creates the forward ingester.
    pub fn new(
        store: Arc<S>,
        access: Arc<A>,
        bus: ObserverBus,
        live: Option<Arc<LiveDeriver<S, A>>>,
        config: IngestConfig,
        downstream: Vec<WorkerKind>,
    ) -> Self {
        Self { store, access, bus, live, config, downstream, attempts: Mutex::new(HashMap::new()) }
    }

    /// Runs until cancellation. Returns an error only for fatal conditions
    /// (a reorg beyond the depth bound).
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), IngestError> {
        info!(target: "ingest::forward", start_block = self.config.start_block, "forward ingester started");
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(target: "ingest::forward", "forward ingester stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let latest = match self.access.latest_sealed_height().await {
                Ok(latest) => latest,
                Err(err) => {
                    warn!(target: "ingest::forward", %err, "tip poll failed");
                    continue;
                }
            };
            metrics::gauge!("flowidx_chain_tip").set(latest as f64);

            let checkpoint = match self.store.checkpoint_height(ServiceId::RawIngester).await {
                Ok(checkpoint) => checkpoint,
                Err(err) => {
                    warn!(target: "ingest::forward", %err, "checkpoint read failed");
                    continue;
                }
            };
            let start = checkpoint.map(|c| c + 1).unwrap_or(self.config.start_block);
            metrics::gauge!("flowidx_forward_lag")
                .set(latest.saturating_sub(start.saturating_sub(1)) as f64);
            if start > latest {
                continue;
            }
            let window =
                (self.config.latest_batch_size * self.config.latest_worker_count as u64).max(1);
            let end = latest.min(start + window - 1);

            match self.ingest_window(start, end).await {
                Ok(_) => {}
                Err(err @ IngestError::ReorgTooDeep { .. }) => {
                    let record = ErrorRecord::new(
                        SERVICE,
                        Some(start),
                        None,
                        err.to_string(),
                        "forward::reorg_too_deep",
                        Severity::Fatal,
                    );
                    let _ = self.store.record_error(&record).await;
                    error!(target: "ingest::forward", %err, "FATAL: stopping forward ingester");
                    return Err(err);
                }
                Err(err) => {
                    warn!(target: "ingest::forward", %err, "ingest window failed");
                }
            }
        }
    }

    /// One scheduling step: fetch `[start, end]` concurrently, apply in
    /// order, run in-line derivation, then advance the checkpoint over the
    /// contiguous prefix. Returns the highest applied height.
    pub async fn ingest_window(&self, start: u64, end: u64) -> Result<Option<u64>, IngestError> {
        let fetched = self.fetch_window(start, end).await?;

        let mut last_applied = None;
        for height in start..=end {
            let Some(bundle) = fetched.get(&height) else { break };
            match self.apply_block(bundle.clone()).await? {
                Applied::Block => last_applied = Some(height),
                // The chain above the ancestor was retracted; the next tick
                // resumes from the clamped checkpoint.
                Applied::ReorgResolved => return Ok(last_applied),
            }
        }

        let Some(last) = last_applied else { return Ok(None) };
        let range = HeightRange::new(start, last + 1);
        if let Some(live) = &self.live {
            if self.config.enable_derived_writes {
                live.derive(range).await;
            }
        }
        self.store.advance_checkpoint(ServiceId::RawIngester, last).await?;
        self.bus.notify_indexed_range(range);
        metrics::counter!("flowidx_blocks_ingested", "ingester" => "forward")
            .increment(range.len());
        trace!(target: "ingest::forward", %range, "window applied");
        Ok(last_applied)
    }

    async fn fetch_window(
        &self,
        start: u64,
        end: u64,
    ) -> Result<BTreeMap<u64, BlockBundle>, IngestError> {
        let results: Vec<(u64, Result<BlockBundle, AccessError>)> =
            stream::iter(start..=end)
                .map(|height| {
                    let access = self.access.clone();
                    async move { (height, access.block_bundle_at(height).await) }
                })
                .buffer_unordered(self.config.latest_worker_count.max(1))
                .collect()
                .await;

        let mut fetched = BTreeMap::new();
        for (height, result) in results {
            match result {
                Ok(bundle) => {
                    self.attempts.lock().remove(&height);
                    fetched.insert(height, bundle);
                }
                // The head is simply not sealed yet; not an error.
                Err(AccessError::HeightNotSealed { .. }) => {}
                Err(err) => {
                    self.note_fetch_failure(height, &err).await?;
                }
            }
        }
        Ok(fetched)
    }

    async fn note_fetch_failure(&self, height: u64, err: &AccessError) -> Result<(), IngestError> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(height).or_insert(0);
            *entry += 1;
            *entry
        };
        debug!(target: "ingest::forward", height, attempt, %err, "height fetch failed");
        let record = ErrorRecord::new(
            SERVICE,
            Some(height),
            None,
            err.to_string(),
            "forward::fetch",
            Severity::Error,
        );
        self.store.record_error(&record).await?;
        if attempt == self.config.max_attempts {
            error!(
                target: "ingest::forward",
                height, attempt, "CRITICAL: height fetch dead-lettered, ingest is stalled"
            );
            let record = ErrorRecord::new(
                SERVICE,
                Some(height),
                None,
                format!("height {height} dead-lettered after {attempt} fetch attempts"),
                "forward::dead_letter",
                Severity::Critical,
            );
            self.store.record_error(&record).await?;
        }
        Ok(())
    }

    async fn apply_block(&self, mut bundle: BlockBundle) -> Result<Applied, IngestError> {
        let height = bundle.height();
        if height > 0 {
            if let Some(stored_parent) = self.store.block_id_at(height - 1).await? {
                if bundle.block.parent_id != stored_parent {
                    self.resolve_reorg(height).await?;
                    return Ok(Applied::ReorgResolved);
                }
            }
        }

        let scripts = prepare_bundle(&mut bundle, self.config.tx_script_inline_max_bytes);
        self.store.insert_block(&bundle, &scripts).await?;

        let block = Arc::new(bundle.block.clone());
        self.bus.notify_block(block);
        for tx in &bundle.transactions {
            self.bus.notify_transaction(Arc::new(tx.transaction.clone()));
        }
        Ok(Applied::Block)
    }

    /// Walks back from the divergent height to the common ancestor, then
    /// retracts everything above it: raw rows deleted, downstream
    /// projection rows cleared, checkpoints clamped. Never truncates.
    async fn resolve_reorg(&self, divergent: u64) -> Result<(), IngestError> {
        let parent = divergent - 1;
        let mut ancestor = parent;
        loop {
            if parent - ancestor >= self.config.max_reorg_depth {
                return Err(IngestError::ReorgTooDeep {
                    height: divergent,
                    max_depth: self.config.max_reorg_depth,
                });
            }
            let Some(local) = self.store.block_id_at(ancestor).await? else {
                // Nothing stored this far down; everything above is ours to
                // rewrite.
                break;
            };
            let remote = self.access.block_bundle_at(ancestor).await?.block.id;
            if remote == local {
                break;
            }
            if ancestor == 0 {
                break;
            }
            ancestor -= 1;
        }

        let old_tip = self.store.highest_block().await?.unwrap_or(parent);
        let retract = HeightRange::new(ancestor + 1, old_tip + 1);
        warn!(
            target: "ingest::forward",
            ancestor, depth = parent - ancestor, %retract, "reorg detected, retracting"
        );
        metrics::counter!("flowidx_reorgs").increment(1);

        let deleted = self.store.delete_blocks(retract).await?;
        for kind in &self.downstream {
            self.store.delete_projection_rows(*kind, retract).await?;
            self.store.clamp_checkpoint(ServiceId::Worker(*kind), ancestor).await?;
        }
        self.store.clamp_checkpoint(ServiceId::RawIngester, ancestor).await?;

        let record = ErrorRecord::new(
            SERVICE,
            Some(divergent),
            None,
            format!("reorg resolved at ancestor {ancestor}, {deleted} blocks retracted"),
            "forward::reorg",
            Severity::Warning,
        );
        self.store.record_error(&record).await?;
        Ok(())
    }
}

enum Applied {
    Block,
    ReorgResolved,
}
