use crate::AccessResult;
use async_trait::async_trait;
use flowidx_primitives::{BlockBundle, Event, HeightRange, TransactionBundle, B256};

/// The upstream RPC surface the indexer consumes.
///
/// One implementation speaks the wire protocol per endpoint
/// ([`crate::http::HttpAccessApi`]); [`crate::AccessPool`] implements the
/// same trait on top of a fleet of endpoints and is what the pipeline
/// components hold.
#[async_trait]
pub trait AccessApi: Send + Sync + 'static {
    /// Height of the latest sealed block.
    async fn latest_sealed_height(&self) -> AccessResult<u64>;

    /// The block at `height` with all of its transactions and events, as a
    /// single logical unit.
    async fn block_bundle_at(&self, height: u64) -> AccessResult<BlockBundle>;

    /// One transaction with its events, by id.
    async fn transaction(&self, id: B256) -> AccessResult<TransactionBundle>;

    /// Transaction ids of a collection.
    async fn collection(&self, id: B256) -> AccessResult<Vec<B256>>;

    /// Events of the given type over a height range. `None` matches every
    /// type.
    async fn events_in_range(
        &self,
        event_type: Option<&str>,
        range: HeightRange,
    ) -> AccessResult<Vec<Event>>;

    /// Executes a read-only Cadence script, optionally pinned to a height,
    /// returning the JSON-Cadence encoded result.
    async fn execute_script(
        &self,
        script: &str,
        arguments: &[serde_json::Value],
        height: Option<u64>,
    ) -> AccessResult<serde_json::Value>;
}
