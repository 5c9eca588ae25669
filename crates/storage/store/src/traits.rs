//! Store trait seams.
//!
//! The pipeline components are generic over these traits so the whole engine
//! runs against Postgres in production and against [`crate::MemoryStore`] in
//! tests. Implementations must keep every write idempotent: re-running any
//! write with the same inputs leaves the store unchanged.

use crate::{
    AccountKey, AccountSeen, AddressTransaction, ContractVersion, EvmTransaction, EvmTxHash,
    FtHolding, FtTransfer, HoldingDelta, KeyRevocation, NftItem, NftOwnership, NftTransfer,
    ScriptRow, SmartContract, StoreResult, TokenMetadata, TxContract, TxMetrics, TxTag,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowidx_primitives::{
    Address, Block, BlockBundle, Checkpoint, ErrorRecord, Event, HeightRange, Lease, ServiceId,
    Transaction, WorkerKind, B256,
};
use std::time::Duration;

/// Writes immutable raw chain records. Owned exclusively by the raw
/// ingesters.
#[async_trait]
pub trait RawWriter: Send + Sync {
    /// Persists a block bundle (block, lookup rows, transactions, events)
    /// plus any offloaded scripts in a single transaction. Conflicting
    /// primary keys are left untouched, so re-ingesting a height is a no-op.
    async fn insert_block(&self, bundle: &BlockBundle, scripts: &[ScriptRow]) -> StoreResult<()>;

    /// Deletes all raw rows in the height range. Used only by reorg surgery.
    /// Returns the number of blocks removed.
    async fn delete_blocks(&self, range: HeightRange) -> StoreResult<u64>;
}

/// Range and point reads over the raw tables.
#[async_trait]
pub trait RawReader: Send + Sync {
    /// Id of the block at `height`, when present.
    async fn block_id_at(&self, height: u64) -> StoreResult<Option<B256>>;

    /// Full block row at `height`.
    async fn block_by_height(&self, height: u64) -> StoreResult<Option<Block>>;

    /// Highest ingested height, if any block exists.
    async fn highest_block(&self) -> StoreResult<Option<u64>>;

    /// Lowest ingested height, if any block exists. Bounds the history
    /// backfill.
    async fn lowest_block(&self) -> StoreResult<Option<u64>>;

    /// All transactions with `block_height` in the range, ordered by
    /// `(block_height, transaction_index)`.
    async fn transactions_in_range(&self, range: HeightRange) -> StoreResult<Vec<Transaction>>;

    /// All events with `block_height` in the range, ordered by
    /// `(block_height, transaction_index, event_index)`.
    async fn events_in_range(&self, range: HeightRange) -> StoreResult<Vec<Event>>;

    /// Offloaded script text by content hash.
    async fn script_by_hash(&self, hash: B256) -> StoreResult<Option<String>>;
}

/// Persisted high-water marks, one per logical service.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The full checkpoint row for a service.
    async fn checkpoint(&self, service: ServiceId) -> StoreResult<Option<Checkpoint>>;

    /// The checkpoint height for a service.
    async fn checkpoint_height(&self, service: ServiceId) -> StoreResult<Option<u64>>;

    /// Moves the checkpoint up to `height`. Never moves it down.
    async fn advance_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()>;

    /// Writes the checkpoint unconditionally. Only the descending history
    /// ingester uses this; its progress marker moves downward by design.
    async fn set_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()>;

    /// Moves the checkpoint down to `height` if it currently lies above.
    /// Used only by reorg surgery; `height` is clamped to at least 1 so a
    /// checkpoint is never reset to zero.
    async fn clamp_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()>;

    /// Replaces the service's opaque subcursor.
    async fn set_subcursor(
        &self,
        service: ServiceId,
        subcursor: Option<serde_json::Value>,
    ) -> StoreResult<()>;
}

/// Lease rows backing the work coordinator. One row per
/// `(worker, from_height)`, carried through the whole lifecycle.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Atomically claims `range` for `worker`. Returns the ACTIVE lease on
    /// success, or `None` when the range is already COMPLETED, held by a
    /// live ACTIVE lease, or dead-lettered. An expired ACTIVE row or a
    /// retryable FAILED row is taken over (attempt accounting preserved).
    async fn try_claim(
        &self,
        worker: WorkerKind,
        range: HeightRange,
        leased_by: &str,
        ttl: Duration,
    ) -> StoreResult<Option<Lease>>;

    /// Marks the lease COMPLETED.
    async fn complete_lease(&self, worker: WorkerKind, from_height: u64) -> StoreResult<()>;

    /// Marks the lease FAILED, increments its attempt counter and records
    /// the associated error row id. Returns the updated lease so callers can
    /// check the dead-letter threshold.
    async fn fail_lease(
        &self,
        worker: WorkerKind,
        from_height: u64,
        error_id: Option<i64>,
    ) -> StoreResult<Lease>;

    /// Moves every expired ACTIVE lease to FAILED (attempt + 1) and returns
    /// the reaped leases.
    async fn reap_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Lease>>;

    /// Highest `to_height` any lease for `worker` has reached.
    async fn lease_frontier(&self, worker: WorkerKind) -> StoreResult<Option<u64>>;

    /// Ranges below `up_to` not covered by any COMPLETED lease, computed by
    /// walking completed leases in `from_height` order.
    async fn find_gaps(&self, worker: WorkerKind, up_to: u64) -> StoreResult<Vec<HeightRange>>;

    /// All leases for a worker kind, ordered by `from_height`.
    async fn leases_for(&self, worker: WorkerKind) -> StoreResult<Vec<Lease>>;
}

/// Deduplicated indexing error sink.
#[async_trait]
pub trait ErrorStore: Send + Sync {
    /// Upserts an error record, deduplicating on
    /// `(worker, block_height, transaction_id, error_hash)`. Returns the row
    /// id (existing or new).
    async fn record_error(&self, record: &ErrorRecord) -> StoreResult<i64>;
}

/// Idempotent writes into the derived projection tables. Each method is
/// owned by exactly one worker kind.
#[async_trait]
pub trait ProjectionWriter: Send + Sync {
    /// Token worker: fungible transfers.
    async fn write_ft_transfers(&self, rows: &[FtTransfer]) -> StoreResult<()>;

    /// Token worker: NFT transfers.
    async fn write_nft_transfers(&self, rows: &[NftTransfer]) -> StoreResult<()>;

    /// Meta worker: address participation rows.
    async fn write_address_transactions(&self, rows: &[AddressTransaction]) -> StoreResult<()>;

    /// Meta worker: first/last-seen accounting.
    async fn touch_accounts(&self, rows: &[AccountSeen]) -> StoreResult<()>;

    /// Accounts worker: key additions.
    async fn write_account_keys(&self, rows: &[AccountKey]) -> StoreResult<()>;

    /// Accounts worker: key removals. Rows survive with `revoked = true`.
    async fn revoke_account_keys(&self, rows: &[KeyRevocation]) -> StoreResult<()>;

    /// FT holdings worker: balance deltas, applied only when the delta's
    /// height lies above the stored `last_height`.
    async fn apply_holding_deltas(&self, rows: &[HoldingDelta]) -> StoreResult<()>;

    /// NFT ownership worker: owner updates, applied only when the row's
    /// height is at or above the stored `last_height`.
    async fn write_nft_ownerships(&self, rows: &[NftOwnership]) -> StoreResult<()>;

    /// Accounts worker: contract registry.
    async fn write_smart_contracts(&self, rows: &[SmartContract]) -> StoreResult<()>;

    /// Accounts worker: contract change log.
    async fn write_contract_versions(&self, rows: &[ContractVersion]) -> StoreResult<()>;

    /// EVM worker: embedded EVM transactions.
    async fn write_evm_transactions(&self, rows: &[EvmTransaction]) -> StoreResult<()>;

    /// EVM worker: EVM hash lookup rows.
    async fn write_evm_tx_hashes(&self, rows: &[EvmTxHash]) -> StoreResult<()>;

    /// Tx-contracts worker: script imports.
    async fn write_tx_contracts(&self, rows: &[TxContract]) -> StoreResult<()>;

    /// Tx-contracts worker: classification tags.
    async fn write_tx_tags(&self, rows: &[TxTag]) -> StoreResult<()>;

    /// Tx-metrics worker: fee/effort rows.
    async fn write_tx_metrics(&self, rows: &[TxMetrics]) -> StoreResult<()>;

    /// Token-metadata worker: fetched metadata.
    async fn upsert_token_metadata(&self, row: &TokenMetadata) -> StoreResult<()>;

    /// Token-metadata worker: failed fetch accounting.
    async fn bump_token_metadata_retry(
        &self,
        contract_address: Address,
        contract_name: &str,
        refetch_after: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Token-metadata worker: per-item display metadata.
    async fn upsert_nft_item(&self, row: &NftItem) -> StoreResult<()>;

    /// Token-metadata worker: failed item fetch accounting.
    async fn bump_nft_item_retry(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
        refetch_after: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Clears the rows a worker kind owns within a height range, ahead of a
    /// re-run or after a reorg clamp. Fold tables (holdings, ownership) drop
    /// rows whose `last_height` falls inside the range.
    async fn delete_projection_rows(
        &self,
        worker: WorkerKind,
        range: HeightRange,
    ) -> StoreResult<()>;
}

/// Reads over the derived projections, used by downstream workers and tests.
#[async_trait]
pub trait ProjectionReader: Send + Sync {
    /// Fungible transfers in a height range.
    async fn ft_transfers_in_range(&self, range: HeightRange) -> StoreResult<Vec<FtTransfer>>;

    /// NFT transfers in a height range.
    async fn nft_transfers_in_range(&self, range: HeightRange) -> StoreResult<Vec<NftTransfer>>;

    /// One holding row.
    async fn ft_holding(
        &self,
        address: Address,
        contract_address: Address,
        contract_name: &str,
    ) -> StoreResult<Option<FtHolding>>;

    /// One ownership row.
    async fn nft_ownership(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
    ) -> StoreResult<Option<NftOwnership>>;

    /// One token metadata row.
    async fn token_metadata(
        &self,
        contract_address: Address,
        contract_name: &str,
    ) -> StoreResult<Option<TokenMetadata>>;

    /// One NFT item metadata row.
    async fn nft_item(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
    ) -> StoreResult<Option<NftItem>>;

    /// One account key row.
    async fn account_key(
        &self,
        address: Address,
        key_index: u32,
    ) -> StoreResult<Option<AccountKey>>;
}

/// The full store surface the pipeline is generic over.
pub trait Store:
    RawWriter
    + RawReader
    + CheckpointStore
    + LeaseStore
    + ErrorStore
    + ProjectionWriter
    + ProjectionReader
    + Send
    + Sync
    + 'static
{
}

impl<T> Store for T where
    T: RawWriter
        + RawReader
        + CheckpointStore
        + LeaseStore
        + ErrorStore
        + ProjectionWriter
        + ProjectionReader
        + Send
        + Sync
        + 'static
{
}
