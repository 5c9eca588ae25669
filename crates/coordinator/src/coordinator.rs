use crate::{CoordinatorError, DependencyGate, DependencyGraph};
use chrono::Utc;
use flowidx_primitives::{ErrorRecord, HeightRange, Lease, Severity, WorkerKind};
use flowidx_store::{CheckpointStore, ErrorStore, LeaseStore};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Hands out non-overlapping height ranges to derivation workers and keeps
/// the lease table healthy.
#[derive(Debug)]
pub struct WorkCoordinator<S> {
    store: Arc<S>,
    gate: DependencyGate<S>,
    lease_ttl: Duration,
    reap_interval: Duration,
}

impl<S> WorkCoordinator<S>
where
    S: LeaseStore + CheckpointStore + ErrorStore + Send + Sync + 'static,
{
    /// Creates a coordinator. The graph must already be validated.
    pub fn new(
        store: Arc<S>,
        graph: DependencyGraph,
        lease_ttl: Duration,
        reap_interval: Duration,
    ) -> Self {
        let gate = DependencyGate::new(store.clone(), graph);
        Self { store, gate, lease_ttl, reap_interval }
    }

    /// The dependency gate, shared with callers that need safe-height reads.
    pub fn gate(&self) -> &DependencyGate<S> {
        &self.gate
    }

    /// Claims a specific range for `kind`, bounded by the dependency gate.
    /// Returns `None` when the range is unavailable (gated, completed, held
    /// or dead-lettered).
    pub async fn claim(
        &self,
        kind: WorkerKind,
        leased_by: &str,
        desired: HeightRange,
    ) -> Result<Option<Lease>, CoordinatorError> {
        let Some(bounded) = self.gate.bound(kind, desired).await? else {
            trace!(target: "coordinator", worker = %kind, %desired, "claim gated");
            return Ok(None);
        };
        let lease = self.store.try_claim(kind, bounded, leased_by, self.lease_ttl).await?;
        if let Some(lease) = &lease {
            metrics::counter!("flowidx_leases_claimed", "worker" => kind.as_static_str())
                .increment(1);
            debug!(
                target: "coordinator",
                worker = %kind, range = %lease.range, attempt = lease.attempt, "lease claimed"
            );
        }
        Ok(lease)
    }

    /// Picks and claims the next range for `kind`: the oldest gap between
    /// completed leases first, otherwise the frontier range of `size`
    /// heights starting no lower than `start_floor`. One claim attempt per
    /// call.
    pub async fn claim_next(
        &self,
        kind: WorkerKind,
        leased_by: &str,
        size: u64,
        start_floor: u64,
    ) -> Result<Option<Lease>, CoordinatorError> {
        let frontier = self.store.lease_frontier(kind).await?.unwrap_or(start_floor);

        // Gaps are re-enqueued before new frontier work so reorg clamps and
        // dead ranges cleared by operators are closed promptly.
        if let Some(gap) = self.store.find_gaps(kind, frontier).await?.into_iter().next() {
            let gap = HeightRange::new(gap.start, gap.end.min(gap.start + size));
            if let Some(lease) = self.claim(kind, leased_by, gap).await? {
                return Ok(Some(lease));
            }
        }

        let start = frontier.max(start_floor);
        self.claim(kind, leased_by, HeightRange::new(start, start + size)).await
    }

    /// Marks a lease completed.
    pub async fn complete(&self, lease: &Lease) -> Result<(), CoordinatorError> {
        self.store.complete_lease(lease.worker, lease.range.start).await?;
        metrics::counter!("flowidx_leases_completed", "worker" => lease.worker.as_static_str())
            .increment(1);
        Ok(())
    }

    /// Marks a lease failed, recording the error row. Dead-lettered leases
    /// are logged critically and will not be retried.
    pub async fn fail(
        &self,
        lease: &Lease,
        error_id: Option<i64>,
    ) -> Result<Lease, CoordinatorError> {
        let failed = self.store.fail_lease(lease.worker, lease.range.start, error_id).await?;
        metrics::counter!("flowidx_leases_failed", "worker" => lease.worker.as_static_str())
            .increment(1);
        if failed.is_dead_letter() {
            self.raise_dead_letter(&failed).await?;
        }
        Ok(failed)
    }

    /// One reaper pass: expired ACTIVE leases move to FAILED with their
    /// attempt counted, and freshly dead-lettered ranges raise alerts.
    pub async fn reap_once(&self) -> Result<Vec<Lease>, CoordinatorError> {
        let reaped = self.store.reap_expired(Utc::now()).await?;
        for lease in &reaped {
            debug!(
                target: "coordinator",
                worker = %lease.worker, range = %lease.range, attempt = lease.attempt,
                "reaped expired lease"
            );
            if lease.is_dead_letter() {
                self.raise_dead_letter(lease).await?;
            }
        }
        Ok(reaped)
    }

    /// Runs the reaper until cancellation.
    pub async fn run_reaper(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.reap_interval);
        info!(target: "coordinator", interval = ?self.reap_interval, "reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(err) = self.reap_once().await {
                error!(target: "coordinator", %err, "reaper pass failed");
            }
        }
        info!(target: "coordinator", "reaper stopped");
    }

    async fn raise_dead_letter(&self, lease: &Lease) -> Result<(), CoordinatorError> {
        error!(
            target: "coordinator",
            worker = %lease.worker, range = %lease.range, attempt = lease.attempt,
            "CRITICAL: lease dead-lettered, no further retries"
        );
        metrics::counter!("flowidx_leases_dead_lettered", "worker" => lease.worker.as_static_str())
            .increment(1);
        let record = ErrorRecord::new(
            lease.worker.as_static_str(),
            Some(lease.range.start),
            None,
            format!("range {} dead-lettered after {} attempts", lease.range, lease.attempt),
            "coordinator::dead_letter",
            Severity::Critical,
        );
        self.store.record_error(&record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_primitives::{LeaseStatus, ServiceId};
    use flowidx_store::MemoryStore;

    const TTL: Duration = Duration::from_secs(300);

    fn coordinator(store: Arc<MemoryStore>) -> WorkCoordinator<MemoryStore> {
        let graph = DependencyGraph::from_edges([
            (WorkerKind::Token, vec![ServiceId::RawIngester]),
            (WorkerKind::FtHoldings, vec![ServiceId::Worker(WorkerKind::Token)]),
        ])
        .unwrap();
        WorkCoordinator::new(store, graph, TTL, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn claims_are_bounded_by_upstream_checkpoints() {
        let store = Arc::new(MemoryStore::new());
        store.advance_checkpoint(ServiceId::RawIngester, 149).await.unwrap();
        let coordinator = coordinator(store.clone());

        let lease = coordinator
            .claim_next(WorkerKind::Token, "token-0", 1_000, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.range, HeightRange::new(0, 150));
    }

    #[tokio::test]
    async fn leases_never_overlap() {
        let store = Arc::new(MemoryStore::new());
        store.advance_checkpoint(ServiceId::RawIngester, 10_000).await.unwrap();
        let coordinator = coordinator(store.clone());

        let a = coordinator
            .claim_next(WorkerKind::Token, "token-0", 100, 0)
            .await
            .unwrap()
            .unwrap();
        let b = coordinator
            .claim_next(WorkerKind::Token, "token-1", 100, 0)
            .await
            .unwrap()
            .unwrap();
        assert!(!a.range.overlaps(&b.range));
        assert_eq!(b.range.start, a.range.end);
    }

    #[tokio::test]
    async fn gaps_are_claimed_before_frontier_work() {
        let store = Arc::new(MemoryStore::new());
        store.advance_checkpoint(ServiceId::RawIngester, 10_000).await.unwrap();
        let coordinator = coordinator(store.clone());

        // Complete 0..100 and 200..300, leaving 100..200 open.
        for range in [HeightRange::new(0, 100), HeightRange::new(200, 300)] {
            let lease = coordinator.claim(WorkerKind::Token, "t", range).await.unwrap().unwrap();
            coordinator.complete(&lease).await.unwrap();
        }
        let lease = coordinator
            .claim_next(WorkerKind::Token, "token-0", 100, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.range, HeightRange::new(100, 200));
    }

    #[tokio::test]
    async fn dead_letter_records_one_error_and_stops_retries() {
        let store = Arc::new(MemoryStore::new());
        store.advance_checkpoint(ServiceId::RawIngester, 10_000).await.unwrap();
        let coordinator = coordinator(store.clone());

        let mut lease = coordinator
            .claim(WorkerKind::Token, "t", HeightRange::new(0, 1_000))
            .await
            .unwrap()
            .unwrap();
        for _ in 0..Lease::DEAD_LETTER_ATTEMPTS {
            lease = coordinator.fail(&lease, None).await.unwrap();
            if !lease.is_dead_letter() {
                lease = coordinator
                    .claim(WorkerKind::Token, "t", HeightRange::new(0, 1_000))
                    .await
                    .unwrap()
                    .unwrap();
            }
        }
        assert!(lease.is_dead_letter());
        assert_eq!(store.error_count(), 1);
        // No further claims for the dead range.
        assert!(coordinator
            .claim(WorkerKind::Token, "t", HeightRange::new(0, 1_000))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reaper_fails_expired_leases() {
        let store = Arc::new(MemoryStore::new());
        store.advance_checkpoint(ServiceId::RawIngester, 10_000).await.unwrap();
        let graph =
            DependencyGraph::from_edges([(WorkerKind::Token, vec![ServiceId::RawIngester])])
                .unwrap();
        let coordinator =
            WorkCoordinator::new(store.clone(), graph, Duration::ZERO, Duration::from_secs(30));

        coordinator
            .claim(WorkerKind::Token, "t", HeightRange::new(0, 100))
            .await
            .unwrap()
            .unwrap();
        // TTL zero: the lease is expired the moment it is claimed.
        let reaped = coordinator.reap_once().await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].status, LeaseStatus::Failed);
        assert_eq!(reaped[0].attempt, 1);
    }
}
