//! Observer bus bridging the ingesters and external subscribers.
//!
//! A single-producer, multi-consumer broadcast of newly indexed blocks,
//! transactions and completed ranges. Per-subscriber buffers are bounded;
//! a subscriber that falls behind loses the oldest buffered events rather
//! than ever blocking the forward ingester.

use flowidx_primitives::{Block, HeightRange, Transaction};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

/// Default per-subscriber buffer, in events.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Handle for publishing and subscribing to indexing events.
///
/// Cheap to clone; all clones publish into the same subscriber set. Sends
/// are best-effort: with no subscribers the event is dropped.
#[derive(Debug, Clone)]
pub struct ObserverBus {
    blocks: broadcast::Sender<Arc<Block>>,
    transactions: broadcast::Sender<Arc<Transaction>>,
    ranges: broadcast::Sender<HeightRange>,
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ObserverBus {
    /// Creates a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (blocks, _) = broadcast::channel(capacity);
        let (transactions, _) = broadcast::channel(capacity);
        let (ranges, _) = broadcast::channel(capacity);
        Self { blocks, transactions, ranges }
    }

    /// Publishes a newly indexed block.
    pub fn notify_block(&self, block: Arc<Block>) {
        trace!(target: "events", height = block.height, "OnNewBlock");
        let _ = self.blocks.send(block);
    }

    /// Publishes a newly indexed transaction.
    pub fn notify_transaction(&self, transaction: Arc<Transaction>) {
        let _ = self.transactions.send(transaction);
    }

    /// Publishes a range whose raw ingestion has completed contiguously.
    pub fn notify_indexed_range(&self, range: HeightRange) {
        trace!(target: "events", %range, "OnIndexedRange");
        let _ = self.ranges.send(range);
    }

    /// Subscribes to `OnNewBlock` events.
    pub fn subscribe_blocks(&self) -> broadcast::Receiver<Arc<Block>> {
        self.blocks.subscribe()
    }

    /// Subscribes to `OnNewTransaction` events.
    pub fn subscribe_transactions(&self) -> broadcast::Receiver<Arc<Transaction>> {
        self.transactions.subscribe()
    }

    /// Subscribes to `OnIndexedRange` events.
    pub fn subscribe_ranges(&self) -> broadcast::Receiver<HeightRange> {
        self.ranges.subscribe()
    }

    /// `OnNewBlock` as a stream, for select-loop consumers. Lagged gaps are
    /// surfaced as stream errors.
    pub fn block_stream(&self) -> BroadcastStream<Arc<Block>> {
        BroadcastStream::new(self.subscribe_blocks())
    }

    /// Number of live block subscribers.
    pub fn block_subscriber_count(&self) -> usize {
        self.blocks.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn block(height: u64) -> Arc<Block> {
        Arc::new(Block {
            height,
            id: Default::default(),
            parent_id: Default::default(),
            timestamp: Utc::now(),
            is_sealed: true,
            tx_count: 0,
            event_count: 0,
            gas_used: 0,
            collection_guarantees: serde_json::Value::Null,
            block_seals: serde_json::Value::Null,
            signatures: serde_json::Value::Null,
        })
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = ObserverBus::new(16);
        let mut rx = bus.subscribe_blocks();
        for h in 0..5 {
            bus.notify_block(block(h));
        }
        for h in 0..5 {
            assert_eq!(rx.recv().await.unwrap().height, h);
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_keeps_tail() {
        let bus = ObserverBus::new(4);
        let mut rx = bus.subscribe_blocks();
        for h in 0..10 {
            bus.notify_block(block(h));
        }
        // The subscriber lagged: the gap is reported once, then delivery
        // resumes from the oldest retained event, preserving the tail.
        match rx.recv().await {
            Err(RecvError::Lagged(skipped)) => assert_eq!(skipped, 6),
            other => panic!("expected lag, got {other:?}"),
        }
        let mut seen = Vec::new();
        while let Ok(b) = rx.try_recv() {
            seen.push(b.height);
        }
        assert_eq!(seen, vec![6, 7, 8, 9]);
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_noop() {
        let bus = ObserverBus::new(4);
        bus.notify_block(block(1));
        bus.notify_indexed_range(HeightRange::new(0, 2));
        assert_eq!(bus.block_subscriber_count(), 0);
    }
}
