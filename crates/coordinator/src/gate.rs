use crate::{CoordinatorError, DependencyGraph};
use flowidx_primitives::{HeightRange, WorkerKind};
use flowidx_store::CheckpointStore;
use std::sync::Arc;

/// Bounds each worker's claims by the checkpoints of its upstream services.
///
/// `max_safe_height(W) = min(checkpoint(U) for U in upstreams(W))`. A claim
/// whose range would extend past the safe height is truncated; one that
/// starts past it is refused.
#[derive(Debug)]
pub struct DependencyGate<S> {
    store: Arc<S>,
    graph: DependencyGraph,
}

impl<S> DependencyGate<S>
where
    S: CheckpointStore,
{
    /// Creates a gate over a validated graph.
    pub fn new(store: Arc<S>, graph: DependencyGraph) -> Self {
        Self { store, graph }
    }

    /// The graph behind the gate.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Highest height `kind` may process: the minimum of its upstream
    /// checkpoints. `None` until every upstream has processed something.
    pub async fn max_safe_height(&self, kind: WorkerKind) -> Result<Option<u64>, CoordinatorError> {
        let mut safe: Option<u64> = None;
        for upstream in self.graph.upstreams(kind)? {
            match self.store.checkpoint_height(*upstream).await? {
                None => return Ok(None),
                Some(height) => {
                    safe = Some(safe.map_or(height, |s| s.min(height)));
                }
            }
        }
        Ok(safe)
    }

    /// Truncates `desired` to the safe bound. `None` when nothing in the
    /// range is claimable yet.
    pub async fn bound(
        &self,
        kind: WorkerKind,
        desired: HeightRange,
    ) -> Result<Option<HeightRange>, CoordinatorError> {
        let Some(safe) = self.max_safe_height(kind).await? else { return Ok(None) };
        // A checkpoint at h means h itself is processed, so claims may
        // extend to h + 1 exclusive.
        let bounded = desired.clamp_end(safe + 1);
        Ok((!bounded.is_empty()).then_some(bounded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_primitives::ServiceId;
    use flowidx_store::MemoryStore;

    fn gate(store: Arc<MemoryStore>) -> DependencyGate<MemoryStore> {
        let graph = DependencyGraph::from_edges([
            (WorkerKind::Token, vec![ServiceId::RawIngester]),
            (
                WorkerKind::FtHoldings,
                vec![ServiceId::RawIngester, ServiceId::Worker(WorkerKind::Token)],
            ),
        ])
        .unwrap();
        DependencyGate::new(store, graph)
    }

    #[tokio::test]
    async fn no_upstream_checkpoint_means_no_claims() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate(store);
        assert_eq!(gate.max_safe_height(WorkerKind::Token).await.unwrap(), None);
        assert_eq!(
            gate.bound(WorkerKind::Token, HeightRange::new(0, 100)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn safe_height_is_the_minimum_upstream_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        store.advance_checkpoint(ServiceId::RawIngester, 500).await.unwrap();
        store.advance_checkpoint(ServiceId::Worker(WorkerKind::Token), 200).await.unwrap();
        let gate = gate(store);
        assert_eq!(gate.max_safe_height(WorkerKind::FtHoldings).await.unwrap(), Some(200));
        // Claims are truncated, not refused, when partially safe.
        assert_eq!(
            gate.bound(WorkerKind::FtHoldings, HeightRange::new(0, 1_000)).await.unwrap(),
            Some(HeightRange::new(0, 201))
        );
        // Fully unsafe claims are refused.
        assert_eq!(
            gate.bound(WorkerKind::FtHoldings, HeightRange::new(300, 400)).await.unwrap(),
            None
        );
    }
}
