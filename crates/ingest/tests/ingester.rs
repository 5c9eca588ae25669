//! End-to-end ingester scenarios against the scripted chain.

use async_trait::async_trait;
use flowidx_access::mock::{fixtures, MockAccessApi, MockChain};
use flowidx_config::IngestConfig;
use flowidx_events::ObserverBus;
use flowidx_ingest::{ForwardIngester, HistoryIngester, IngestError};
use flowidx_primitives::{HeightRange, ServiceId, Severity, WorkerKind};
use flowidx_store::{CheckpointStore, MemoryStore, RawReader, RawWriter};
use flowidx_workers::{LiveDeriver, Processor, ProcessorContext, WorkerError};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

fn config() -> IngestConfig {
    IngestConfig {
        start_block: 1_000,
        latest_worker_count: 4,
        latest_batch_size: 2,
        history_worker_count: 3,
        history_batch_size: 7,
        max_attempts: 3,
        poll_interval: Duration::from_millis(500),
        ..Default::default()
    }
}

fn chain_from(start: u64, end: u64) -> MockChain {
    let chain = MockChain::new();
    for height in start..=end {
        chain.insert_bundle(fixtures::bundle(height, 0));
    }
    chain
}

fn forward(
    store: Arc<MemoryStore>,
    chain: &MockChain,
    bus: ObserverBus,
    config: IngestConfig,
) -> Arc<ForwardIngester<MemoryStore, MockAccessApi>> {
    Arc::new(ForwardIngester::new(
        store,
        Arc::new(MockAccessApi::new(chain.clone())),
        bus,
        None,
        config,
        vec![WorkerKind::Token],
    ))
}

async fn wait_for_checkpoint(store: &MemoryStore, service: ServiceId, height: u64) {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if store.checkpoint_height(service).await.unwrap() == Some(height) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("checkpoint did not reach target");
}

#[tokio::test(start_paused = true)]
async fn cold_start_indexes_to_the_tip_in_order() {
    let chain = chain_from(1_000, 1_005);
    let store = Arc::new(MemoryStore::new());
    let bus = ObserverBus::new(64);
    let mut blocks_rx = bus.subscribe_blocks();
    let mut ranges_rx = bus.subscribe_ranges();

    let ingester = forward(store.clone(), &chain, bus, config());
    let cancel = CancellationToken::new();
    let handle = {
        let ingester = ingester.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingester.run(cancel).await })
    };
    wait_for_checkpoint(&store, ServiceId::RawIngester, 1_005).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(store.block_heights(), (1_000..=1_005).collect::<Vec<_>>());
    let mut emitted = Vec::new();
    while let Ok(block) = blocks_rx.try_recv() {
        emitted.push(block.height);
    }
    assert_eq!(emitted, (1_000..=1_005).collect::<Vec<_>>());
    assert!(ranges_rx.try_recv().is_ok());
}

#[tokio::test]
async fn re_ingesting_the_same_window_changes_nothing() {
    let chain = chain_from(1_000, 1_005);
    let store = Arc::new(MemoryStore::new());
    let ingester = forward(store.clone(), &chain, ObserverBus::new(16), config());

    ingester.ingest_window(1_000, 1_005).await.unwrap();
    let ids_before: Vec<_> = store.block_heights();
    let count_before = store.block_count();

    ingester.ingest_window(1_000, 1_005).await.unwrap();
    assert_eq!(store.block_heights(), ids_before);
    assert_eq!(store.block_count(), count_before);
    assert_eq!(
        store.block_id_at(1_003).await.unwrap(),
        Some(fixtures::block_id(1_003, 0))
    );
}

#[tokio::test]
async fn checkpoint_never_regresses() {
    let chain = chain_from(1_000, 1_005);
    let store = Arc::new(MemoryStore::new());
    let ingester = forward(store.clone(), &chain, ObserverBus::new(16), config());

    ingester.ingest_window(1_000, 1_003).await.unwrap();
    assert_eq!(
        store.checkpoint_height(ServiceId::RawIngester).await.unwrap(),
        Some(1_003)
    );
    // A smaller overlapping window must not move the checkpoint down.
    ingester.ingest_window(1_000, 1_001).await.unwrap();
    assert_eq!(
        store.checkpoint_height(ServiceId::RawIngester).await.unwrap(),
        Some(1_003)
    );
}

#[tokio::test(start_paused = true)]
async fn reorg_retracts_the_divergent_tail_and_clamps_downstream() {
    let chain = chain_from(100, 110);
    let store = Arc::new(MemoryStore::new());
    let mut config = config();
    config.start_block = 100;
    let ingester = forward(store.clone(), &chain, ObserverBus::new(16), config);

    // Ingest chain A to 110, with the token worker caught up.
    ingester.ingest_window(100, 110).await.unwrap();
    store
        .advance_checkpoint(ServiceId::Worker(WorkerKind::Token), 110)
        .await
        .unwrap();

    // Chain B replaces everything above 107 and extends to 112.
    chain.fork_at(107, 112, 1);
    let cancel = CancellationToken::new();
    let handle = {
        let ingester = ingester.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingester.run(cancel).await })
    };
    wait_for_checkpoint(&store, ServiceId::RawIngester, 112).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    // Chain A rows above the ancestor are gone; chain B is canonical.
    for height in 108..=112 {
        assert_eq!(
            store.block_id_at(height).await.unwrap(),
            Some(fixtures::block_id(height, 1)),
            "height {height} should come from the fork"
        );
    }
    assert_eq!(
        store.block_id_at(107).await.unwrap(),
        Some(fixtures::block_id(107, 0))
    );
    // Downstream checkpoints were clamped to the common ancestor.
    let token_cp = store
        .checkpoint_height(ServiceId::Worker(WorkerKind::Token))
        .await
        .unwrap()
        .unwrap();
    assert!(token_cp <= 107, "token checkpoint {token_cp} not clamped");
}

#[tokio::test]
async fn reorg_beyond_the_depth_bound_is_fatal() {
    let chain = chain_from(100, 120);
    let store = Arc::new(MemoryStore::new());
    let mut config = config();
    config.start_block = 100;
    config.max_reorg_depth = 3;
    let ingester = forward(store.clone(), &chain, ObserverBus::new(16), config);

    ingester.ingest_window(100, 120).await.unwrap();
    // Fork ten blocks deep, well past the bound of three.
    chain.fork_at(110, 122, 1);

    let err = ingester.ingest_window(121, 122).await.unwrap_err();
    assert!(matches!(err, IngestError::ReorgTooDeep { .. }));
}

#[tokio::test]
async fn identical_scripts_deduplicate_to_one_row() {
    let chain = MockChain::new();
    let txs = (0..300)
        .map(|i| fixtures::tx_bundle(fixtures::transaction(1_000, i, fixtures::address(1)), vec![]))
        .collect();
    chain.insert_bundle(fixtures::bundle_with(1_000, 0, txs));
    let store = Arc::new(MemoryStore::new());
    let ingester = forward(store.clone(), &chain, ObserverBus::new(16), config());

    ingester.ingest_window(1_000, 1_000).await.unwrap();

    assert_eq!(store.script_count(), 1);
    let transactions = store.all_transactions();
    assert_eq!(transactions.len(), 300);
    let hash = transactions[0].script_hash.unwrap();
    for tx in &transactions {
        assert!(tx.script.is_none());
        assert_eq!(tx.script_hash, Some(hash));
    }
}

#[tokio::test(start_paused = true)]
async fn persistent_fetch_failure_dead_letters_and_stalls() {
    let chain = chain_from(1_000, 1_005);
    chain.fail_bundle_at(1_003, u32::MAX);
    let store = Arc::new(MemoryStore::new());
    let ingester = forward(store.clone(), &chain, ObserverBus::new(16), config());
    let cancel = CancellationToken::new();
    let handle = {
        let ingester = ingester.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingester.run(cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            let critical = store
                .errors()
                .iter()
                .any(|e| e.severity == Severity::Critical && e.message.contains("dead-lettered"));
            if critical {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("dead letter never raised");
    cancel.cancel();
    handle.await.unwrap().unwrap();

    // The checkpoint holds at the last contiguous height.
    assert_eq!(
        store.checkpoint_height(ServiceId::RawIngester).await.unwrap(),
        Some(1_002)
    );
    // The repeated failure deduplicated into a single error row.
    let fetch_errors = store
        .errors()
        .iter()
        .filter(|e| e.block_height == Some(1_003) && e.severity == Severity::Error)
        .count();
    assert_eq!(fetch_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn history_backfill_fills_down_to_the_start_block() {
    let chain = chain_from(0, 50);
    let store = Arc::new(MemoryStore::new());
    // The forward ingester has written the tip block already.
    store.insert_block(&fixtures::bundle(50, 0), &[]).await.unwrap();
    store.advance_checkpoint(ServiceId::RawIngester, 50).await.unwrap();

    let mut config = config();
    config.start_block = 0;
    let ingester = Arc::new(HistoryIngester::new(
        store.clone(),
        Arc::new(MockAccessApi::new(chain.clone())),
        config,
    ));
    ingester.run(CancellationToken::new()).await.unwrap();

    assert_eq!(store.block_heights(), (0..=50).collect::<Vec<_>>());
    assert_eq!(
        store.checkpoint_height(ServiceId::HistoryIngester).await.unwrap(),
        Some(0)
    );
}

/// A processor that counts the ranges it sees.
struct CountingProcessor(AtomicU64);

#[async_trait]
impl Processor<MemoryStore, MockAccessApi> for CountingProcessor {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Token
    }

    fn upstreams(&self) -> Vec<ServiceId> {
        vec![ServiceId::RawIngester]
    }

    async fn process(
        &self,
        _ctx: &ProcessorContext<MemoryStore, MockAccessApi>,
        range: HeightRange,
    ) -> Result<(), WorkerError> {
        self.0.fetch_add(range.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn live_deriver_runs_on_each_ingested_window() {
    let chain = chain_from(1_000, 1_002);
    let store = Arc::new(MemoryStore::new());
    let counter = Arc::new(CountingProcessor(AtomicU64::new(0)));
    let ctx = ProcessorContext::new(
        store.clone(),
        Arc::new(MockAccessApi::new(chain.clone())),
    );
    let live = Arc::new(LiveDeriver::new(
        vec![counter.clone() as Arc<dyn Processor<_, _>>],
        ctx,
    ));

    let ingester = Arc::new(ForwardIngester::new(
        store.clone(),
        Arc::new(MockAccessApi::new(chain.clone())),
        ObserverBus::new(16),
        Some(live),
        config(),
        vec![],
    ));
    ingester.ingest_window(1_000, 1_002).await.unwrap();
    assert_eq!(counter.0.load(Ordering::SeqCst), 3);
}
