use crate::{EXIT_FATAL_INIT, EXIT_REORG_TOO_DEEP};
use flowidx_access::{http::HttpAccessApi, AccessApi, AccessPool};
use flowidx_config::Config;
use flowidx_coordinator::{DependencyGraph, WorkCoordinator};
use flowidx_events::ObserverBus;
use flowidx_ingest::{ForwardIngester, HistoryIngester, IngestError};
use flowidx_store::{PostgresStore, Store};
use flowidx_workers::{dependency_edges, registry, DerivationWorker, LiveDeriver, ProcessorContext};
use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Top-level node failures, mapped onto process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Startup could not complete: database or access nodes unreachable,
    /// legacy schema, or an invalid worker graph.
    #[error("initialization failed: {0}")]
    Init(String),
    /// The forward ingester hit a fatal condition mid-run.
    #[error(transparent)]
    Fatal(#[from] IngestError),
}

impl NodeError {
    /// The process exit code this failure maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Init(_) => EXIT_FATAL_INIT,
            Self::Fatal(IngestError::ReorgTooDeep { .. }) => EXIT_REORG_TOO_DEEP,
            Self::Fatal(_) => EXIT_FATAL_INIT,
        }
    }
}

/// The assembled indexer: ingesters, coordinator, workers and observer bus
/// over explicit store/access dependencies.
pub struct Node<S, A> {
    config: Config,
    store: Arc<S>,
    access: Arc<A>,
    bus: ObserverBus,
    cancel: CancellationToken,
}

impl<S, A> std::fmt::Debug for Node<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").finish_non_exhaustive()
    }
}

impl<S, A> Node<S, A>
where
    S: Store,
    A: AccessApi,
{
    /// Bundles the dependencies. Nothing runs until [`Node::run`].
    pub fn new(
        config: Config,
        store: Arc<S>,
        access: Arc<A>,
        bus: ObserverBus,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, store, access, bus, cancel }
    }

    /// The observer bus, for the external query layer to subscribe before
    /// the node starts.
    pub fn bus(&self) -> ObserverBus {
        self.bus.clone()
    }

    /// Runs the pipeline until cancellation or a fatal failure.
    pub async fn run(self) -> Result<(), NodeError> {
        let Self { config, store, access, bus, cancel } = self;

        let processors = registry::<S, A>(&config.workers);
        let graph = DependencyGraph::from_edges(dependency_edges(&processors))
            .map_err(|err| NodeError::Init(err.to_string()))?;
        let downstream: Vec<_> = processors.iter().map(|p| p.kind()).collect();
        info!(target: "node", workers = processors.len(), "starting indexer");

        let coordinator = Arc::new(WorkCoordinator::new(
            store.clone(),
            graph,
            config.workers.lease_ttl,
            config.workers.reap_interval,
        ));
        let ctx = ProcessorContext::new(store.clone(), access.clone());
        let live = config
            .ingest
            .enable_derived_writes
            .then(|| Arc::new(LiveDeriver::new(processors.clone(), ctx.clone())));

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move { coordinator.run_reaper(cancel).await }));
        }
        if let Some(live) = &live {
            let live = live.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move { live.run_retries(cancel).await }));
        }

        let history = Arc::new(HistoryIngester::new(
            store.clone(),
            access.clone(),
            config.ingest.clone(),
        ));
        {
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = history.run(cancel).await {
                    error!(target: "node", %err, "history ingester failed");
                }
            }));
        }

        for processor in &processors {
            let kind = processor.kind();
            let worker_config = *config.workers.for_kind(kind);
            for instance in 0..worker_config.concurrency.max(1) {
                let worker = Arc::new(DerivationWorker::new(
                    processor.clone(),
                    coordinator.clone(),
                    ctx.clone(),
                    worker_config.range,
                    config.workers.claim_interval,
                    config.ingest.start_block,
                    format!("{kind}-{instance}"),
                ));
                let cancel = cancel.clone();
                tasks.push(tokio::spawn(async move { worker.run(cancel).await }));
            }
        }

        let forward = Arc::new(ForwardIngester::new(
            store,
            access,
            bus,
            live,
            config.ingest.clone(),
            downstream,
        ));
        let forward_result = {
            let cancel = cancel.clone();
            tokio::spawn(async move { forward.run(cancel).await })
        };

        // The forward ingester is the node's heartbeat: it returns Ok only
        // on cancellation, and Err only on fatal conditions that must take
        // the whole process down.
        let result = match forward_result.await {
            Ok(result) => result.map_err(NodeError::from),
            Err(err) => {
                error!(target: "node", %err, "forward ingester panicked");
                Ok(())
            }
        };

        cancel.cancel();
        for task in tasks {
            let _ = task.await;
        }
        info!(target: "node", "indexer stopped");
        result
    }
}

/// Production launcher: Postgres store, HTTP access pool, background health
/// probing. Fails fast (exit code 1) when the database or every access node
/// is unreachable.
pub async fn launch(config: Config, cancel: CancellationToken) -> Result<(), NodeError> {
    let store = PostgresStore::connect(&config.database)
        .await
        .map_err(|err| NodeError::Init(err.to_string()))?;
    store
        .ensure_partitions(config.ingest.start_block)
        .await
        .map_err(|err| NodeError::Init(err.to_string()))?;

    // Build every endpoint client up front so bad node strings fail startup
    // rather than the first routed call.
    let mut clients: HashMap<String, HttpAccessApi> = HashMap::new();
    let node_names = config
        .access
        .access_nodes
        .iter()
        .chain(config.access.sporks.iter().flat_map(|s| s.nodes.iter()))
        .chain(config.access.archive_node.iter());
    for node in node_names {
        if !clients.contains_key(node) {
            let client = HttpAccessApi::new(node, config.access.request_timeout)
                .map_err(|err| NodeError::Init(format!("access node {node}: {err}")))?;
            clients.insert(node.clone(), client);
        }
    }
    let pool = Arc::new(AccessPool::from_config(&config.access, |node| {
        clients.get(node).expect("client pre-built for every configured node").clone()
    }));

    let tip = pool
        .latest_sealed_height()
        .await
        .map_err(|err| NodeError::Init(format!("access nodes unreachable: {err}")))?;
    info!(target: "node", tip, endpoints = pool.endpoint_count(), "upstream reachable");
    pool.spawn_health_task(cancel.clone());

    Node::new(config, Arc::new(store), pool, ObserverBus::default(), cancel).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::{fixtures, MockAccessApi, MockChain};
    use flowidx_primitives::{ServiceId, WorkerKind};
    use flowidx_store::{CheckpointStore, LeaseStore, MemoryStore, ProjectionReader};
    use flowidx_primitives::LeaseStatus;
    use serde_json::json;
    use std::time::Duration;

    fn deposit_event(height: u64) -> flowidx_primitives::Event {
        fixtures::event(
            height,
            0,
            0,
            "A.1654653399040a61.FlowToken.TokensDeposited",
            json!({
                "type": "Event",
                "value": {
                    "id": "A.1654653399040a61.FlowToken.TokensDeposited",
                    "fields": [
                        {"name": "amount", "value": {"type": "UFix64", "value": "2.5"}},
                        {"name": "to", "value": {"type": "Optional", "value": {
                            "type": "Address", "value": "0x0202020202020202"
                        }}}
                    ]
                }
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn full_pipeline_ingests_and_derives() {
        let chain = MockChain::new();
        for height in 0..=5u64 {
            let tx = fixtures::tx_bundle(
                fixtures::transaction(height, 0, fixtures::address(1)),
                vec![deposit_event(height)],
            );
            chain.insert_bundle(fixtures::bundle_with(height, 0, vec![tx]));
        }

        let store = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.ingest.start_block = 0;
        config.workers.claim_interval = Duration::from_millis(50);
        config.workers.token = flowidx_config::WorkerConfig {
            enabled: true,
            range: 3,
            concurrency: 1,
        };

        let cancel = CancellationToken::new();
        let node = Node::new(
            config,
            store.clone(),
            Arc::new(MockAccessApi::new(chain.clone())),
            ObserverBus::new(64),
            cancel.clone(),
        );
        let handle = tokio::spawn(node.run());

        // Raw ingestion reaches the tip, the live deriver fills transfers,
        // and the batch token worker completes leases behind it.
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                let raw_done = store.checkpoint_height(ServiceId::RawIngester).await.unwrap()
                    == Some(5);
                let leases = store.leases_for(WorkerKind::Token).await.unwrap();
                let batch_done = leases
                    .iter()
                    .any(|l| l.status == LeaseStatus::Completed && l.range.contains(4));
                if raw_done && batch_done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("pipeline did not converge");

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let transfers = store
            .ft_transfers_in_range(flowidx_primitives::HeightRange::new(0, 6))
            .await
            .unwrap();
        assert_eq!(transfers.len(), 6);
        // Lease non-overlap across everything the token worker claimed.
        let leases = store.leases_for(WorkerKind::Token).await.unwrap();
        for (i, a) in leases.iter().enumerate() {
            for b in leases.iter().skip(i + 1) {
                assert!(!a.range.overlaps(&b.range), "{} overlaps {}", a.range, b.range);
            }
        }
        // The dependency gate held every claim at or below the raw
        // checkpoint.
        for lease in &leases {
            assert!(lease.range.end <= 6);
        }
    }
}
