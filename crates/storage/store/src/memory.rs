//! An in-memory store used by the test suites of every pipeline crate.
//!
//! Mirrors the Postgres implementation's conflict handling exactly: inserts
//! into raw tables are ignore-on-conflict, projection writes upsert with the
//! same height guards, and lease rows move through the same lifecycle.

use crate::{
    AccountKey, AccountSeen, AddressTransaction, ContractVersion, EvmTransaction, EvmTxHash,
    FtHolding, FtTransfer, HoldingDelta, KeyRevocation, NftItem, NftOwnership, NftTransfer,
    ScriptRow, SmartContract, StoreError, StoreResult, TokenMetadata, TxContract, TxMetrics,
    TxTag,
};
use crate::traits::{
    CheckpointStore, ErrorStore, LeaseStore, ProjectionReader, ProjectionWriter, RawReader,
    RawWriter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowidx_primitives::{
    Address, Block, BlockBundle, Checkpoint, ErrorRecord, Event, HeightRange, Lease, LeaseStatus,
    ServiceId, Transaction, WorkerKind, B256,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    blocks: BTreeMap<u64, Block>,
    block_lookup: HashMap<B256, u64>,
    transactions: BTreeMap<(u64, u32), Transaction>,
    events: BTreeMap<(u64, u32, u32), Event>,
    scripts: HashMap<B256, String>,
    checkpoints: HashMap<ServiceId, Checkpoint>,
    leases: BTreeMap<(WorkerKind, u64), Lease>,
    errors: Vec<ErrorRecord>,
    error_ids: HashMap<(String, Option<u64>, Option<B256>, B256), i64>,
    ft_transfers: BTreeMap<(u64, B256, u32), FtTransfer>,
    nft_transfers: BTreeMap<(u64, B256, u32), NftTransfer>,
    address_transactions: BTreeMap<(Address, u64, B256, crate::AddressRole), AddressTransaction>,
    accounts: HashMap<Address, (u64, u64)>,
    account_keys: HashMap<(Address, u32), AccountKey>,
    ft_holdings: HashMap<(Address, Address, String), FtHolding>,
    nft_ownership: HashMap<(Address, String, u64), NftOwnership>,
    smart_contracts: HashMap<(Address, String), SmartContract>,
    contract_versions: BTreeMap<(Address, String, u64), ContractVersion>,
    evm_transactions: BTreeMap<(u64, B256, u32), EvmTransaction>,
    evm_tx_hashes: BTreeMap<(B256, B256, u32), EvmTxHash>,
    tx_contracts: BTreeMap<(u64, B256, Address, String), TxContract>,
    tx_tags: BTreeMap<(u64, B256, String), TxTag>,
    tx_metrics: BTreeMap<(u64, B256), TxMetrics>,
    token_metadata: HashMap<(Address, String), TokenMetadata>,
    nft_items: HashMap<(Address, String, u64), NftItem>,
}

/// In-memory implementation of the full store surface.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently held.
    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Number of de-duplicated scripts currently held.
    pub fn script_count(&self) -> usize {
        self.inner.lock().scripts.len()
    }

    /// Number of de-duplicated error rows currently held.
    pub fn error_count(&self) -> usize {
        self.inner.lock().errors.len()
    }

    /// Snapshot of all error rows.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.inner.lock().errors.clone()
    }

    /// Heights currently present in the block table.
    pub fn block_heights(&self) -> Vec<u64> {
        self.inner.lock().blocks.keys().copied().collect()
    }

    /// All stored transactions, in `(height, index)` order.
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.inner.lock().transactions.values().cloned().collect()
    }

    /// All FT transfer rows, in key order.
    pub fn all_ft_transfers(&self) -> Vec<FtTransfer> {
        self.inner.lock().ft_transfers.values().cloned().collect()
    }

    /// All address-transaction rows, in key order.
    pub fn all_address_transactions(&self) -> Vec<AddressTransaction> {
        self.inner.lock().address_transactions.values().cloned().collect()
    }

    /// First/last-seen heights for an address.
    pub fn account_seen(&self, address: Address) -> Option<(u64, u64)> {
        self.inner.lock().accounts.get(&address).copied()
    }

    /// All NFT transfer rows, in key order.
    pub fn all_nft_transfers(&self) -> Vec<NftTransfer> {
        self.inner.lock().nft_transfers.values().cloned().collect()
    }

    /// All EVM transaction rows, in key order.
    pub fn all_evm_transactions(&self) -> Vec<EvmTransaction> {
        self.inner.lock().evm_transactions.values().cloned().collect()
    }

    /// All EVM hash lookup rows, in key order.
    pub fn all_evm_tx_hashes(&self) -> Vec<EvmTxHash> {
        self.inner.lock().evm_tx_hashes.values().cloned().collect()
    }

    /// All transaction contract-import rows, in key order.
    pub fn all_tx_contracts(&self) -> Vec<TxContract> {
        self.inner.lock().tx_contracts.values().cloned().collect()
    }

    /// All transaction tag rows, in key order.
    pub fn all_tx_tags(&self) -> Vec<TxTag> {
        self.inner.lock().tx_tags.values().cloned().collect()
    }

    /// All transaction metric rows, in key order.
    pub fn all_tx_metrics(&self) -> Vec<TxMetrics> {
        self.inner.lock().tx_metrics.values().cloned().collect()
    }

    /// All contract change-log rows, in key order.
    pub fn all_contract_versions(&self) -> Vec<ContractVersion> {
        self.inner.lock().contract_versions.values().cloned().collect()
    }
}

#[async_trait]
impl RawWriter for MemoryStore {
    async fn insert_block(&self, bundle: &BlockBundle, scripts: &[ScriptRow]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let height = bundle.block.height;
        // ON CONFLICT DO NOTHING across the board.
        if !inner.blocks.contains_key(&height) {
            inner.blocks.insert(height, bundle.block.clone());
            inner.block_lookup.insert(bundle.block.id, height);
        }
        for tx in &bundle.transactions {
            let key = (height, tx.transaction.transaction_index);
            inner.transactions.entry(key).or_insert_with(|| tx.transaction.clone());
            for event in &tx.events {
                let key = (height, event.transaction_index, event.event_index);
                inner.events.entry(key).or_insert_with(|| event.clone());
            }
        }
        for script in scripts {
            inner.scripts.entry(script.hash).or_insert_with(|| script.text.clone());
        }
        Ok(())
    }

    async fn delete_blocks(&self, range: HeightRange) -> StoreResult<u64> {
        if range.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock();
        let heights: Vec<u64> =
            inner.blocks.range(range.start..range.end).map(|(h, _)| *h).collect();
        for height in &heights {
            if let Some(block) = inner.blocks.remove(height) {
                inner.block_lookup.remove(&block.id);
            }
        }
        inner.transactions.retain(|(h, _), _| !range.contains(*h));
        inner.events.retain(|(h, _, _), _| !range.contains(*h));
        Ok(heights.len() as u64)
    }
}

#[async_trait]
impl RawReader for MemoryStore {
    async fn block_id_at(&self, height: u64) -> StoreResult<Option<B256>> {
        Ok(self.inner.lock().blocks.get(&height).map(|b| b.id))
    }

    async fn block_by_height(&self, height: u64) -> StoreResult<Option<Block>> {
        Ok(self.inner.lock().blocks.get(&height).cloned())
    }

    async fn highest_block(&self) -> StoreResult<Option<u64>> {
        Ok(self.inner.lock().blocks.keys().next_back().copied())
    }

    async fn lowest_block(&self) -> StoreResult<Option<u64>> {
        Ok(self.inner.lock().blocks.keys().next().copied())
    }

    async fn transactions_in_range(&self, range: HeightRange) -> StoreResult<Vec<Transaction>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .inner
            .lock()
            .transactions
            .range((range.start, 0)..(range.end, 0))
            .map(|(_, tx)| tx.clone())
            .collect())
    }

    async fn events_in_range(&self, range: HeightRange) -> StoreResult<Vec<Event>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .inner
            .lock()
            .events
            .range((range.start, 0, 0)..(range.end, 0, 0))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn script_by_hash(&self, hash: B256) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().scripts.get(&hash).cloned())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn checkpoint(&self, service: ServiceId) -> StoreResult<Option<Checkpoint>> {
        Ok(self.inner.lock().checkpoints.get(&service).cloned())
    }

    async fn checkpoint_height(&self, service: ServiceId) -> StoreResult<Option<u64>> {
        Ok(self.inner.lock().checkpoints.get(&service).map(|c| c.height))
    }

    async fn advance_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .checkpoints
            .entry(service)
            .or_insert_with(|| Checkpoint::new(service, height));
        if height >= entry.height {
            entry.height = height;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .checkpoints
            .entry(service)
            .or_insert_with(|| Checkpoint::new(service, height));
        entry.height = height;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn clamp_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()> {
        let height = height.max(1);
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.checkpoints.get_mut(&service) {
            if entry.height > height {
                entry.height = height;
                entry.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_subcursor(
        &self,
        service: ServiceId,
        subcursor: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.checkpoints.get_mut(&service) {
            entry.subcursor = subcursor;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_claim(
        &self,
        worker: WorkerKind,
        range: HeightRange,
        leased_by: &str,
        ttl: Duration,
    ) -> StoreResult<Option<Lease>> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let mut inner = self.inner.lock();
        let key = (worker, range.start);
        let lease = match inner.leases.get_mut(&key) {
            None => {
                let lease = Lease {
                    worker,
                    range,
                    leased_by: leased_by.to_owned(),
                    expires_at,
                    status: LeaseStatus::Active,
                    attempt: 0,
                    last_error_id: None,
                };
                inner.leases.insert(key, lease.clone());
                lease
            }
            Some(existing) => match existing.status {
                LeaseStatus::Completed => return Ok(None),
                LeaseStatus::Active if existing.expires_at >= now => return Ok(None),
                LeaseStatus::Active => {
                    // Expired: reap in place, then take over.
                    existing.attempt += 1;
                    existing.status = LeaseStatus::Active;
                    existing.leased_by = leased_by.to_owned();
                    existing.expires_at = expires_at;
                    existing.range = range;
                    existing.clone()
                }
                LeaseStatus::Failed if existing.attempt >= Lease::DEAD_LETTER_ATTEMPTS => {
                    return Ok(None)
                }
                LeaseStatus::Failed => {
                    existing.status = LeaseStatus::Active;
                    existing.leased_by = leased_by.to_owned();
                    existing.expires_at = expires_at;
                    existing.range = range;
                    existing.clone()
                }
            },
        };
        Ok(Some(lease))
    }

    async fn complete_lease(&self, worker: WorkerKind, from_height: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let lease = inner
            .leases
            .get_mut(&(worker, from_height))
            .ok_or(StoreError::LeaseNotFound { worker, from_height })?;
        lease.status = LeaseStatus::Completed;
        Ok(())
    }

    async fn fail_lease(
        &self,
        worker: WorkerKind,
        from_height: u64,
        error_id: Option<i64>,
    ) -> StoreResult<Lease> {
        let mut inner = self.inner.lock();
        let lease = inner
            .leases
            .get_mut(&(worker, from_height))
            .ok_or(StoreError::LeaseNotFound { worker, from_height })?;
        lease.status = LeaseStatus::Failed;
        lease.attempt += 1;
        if error_id.is_some() {
            lease.last_error_id = error_id;
        }
        Ok(lease.clone())
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Lease>> {
        let mut inner = self.inner.lock();
        let mut reaped = Vec::new();
        for lease in inner.leases.values_mut() {
            if lease.status == LeaseStatus::Active && lease.expires_at < now {
                lease.status = LeaseStatus::Failed;
                lease.attempt += 1;
                reaped.push(lease.clone());
            }
        }
        Ok(reaped)
    }

    async fn lease_frontier(&self, worker: WorkerKind) -> StoreResult<Option<u64>> {
        Ok(self
            .inner
            .lock()
            .leases
            .values()
            .filter(|l| l.worker == worker)
            .map(|l| l.range.end)
            .max())
    }

    async fn find_gaps(&self, worker: WorkerKind, up_to: u64) -> StoreResult<Vec<HeightRange>> {
        let inner = self.inner.lock();
        let mut completed: Vec<HeightRange> = inner
            .leases
            .values()
            .filter(|l| l.worker == worker && l.status == LeaseStatus::Completed)
            .map(|l| l.range)
            .collect();
        completed.sort_by_key(|r| r.start);
        let mut gaps = Vec::new();
        for pair in completed.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.start > prev.end && prev.end < up_to {
                gaps.push(HeightRange::new(prev.end, next.start.min(up_to)));
            }
        }
        Ok(gaps)
    }

    async fn leases_for(&self, worker: WorkerKind) -> StoreResult<Vec<Lease>> {
        Ok(self
            .inner
            .lock()
            .leases
            .values()
            .filter(|l| l.worker == worker)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ErrorStore for MemoryStore {
    async fn record_error(&self, record: &ErrorRecord) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        let key = (
            record.worker.clone(),
            record.block_height,
            record.transaction_id,
            record.error_hash,
        );
        if let Some(id) = inner.error_ids.get(&key) {
            return Ok(*id);
        }
        let id = inner.errors.len() as i64 + 1;
        inner.errors.push(record.clone());
        inner.error_ids.insert(key, id);
        Ok(id)
    }
}

#[async_trait]
impl ProjectionWriter for MemoryStore {
    async fn write_ft_transfers(&self, rows: &[FtTransfer]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.block_height, row.transaction_id, row.event_index);
            inner.ft_transfers.insert(key, row.clone());
        }
        Ok(())
    }

    async fn write_nft_transfers(&self, rows: &[NftTransfer]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.block_height, row.transaction_id, row.event_index);
            inner.nft_transfers.insert(key, row.clone());
        }
        Ok(())
    }

    async fn write_address_transactions(&self, rows: &[AddressTransaction]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.address, row.block_height, row.transaction_id, row.role);
            inner.address_transactions.insert(key, row.clone());
        }
        Ok(())
    }

    async fn touch_accounts(&self, rows: &[AccountSeen]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let entry = inner.accounts.entry(row.address).or_insert((row.height, row.height));
            entry.0 = entry.0.min(row.height);
            entry.1 = entry.1.max(row.height);
        }
        Ok(())
    }

    async fn write_account_keys(&self, rows: &[AccountKey]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            inner.account_keys.insert((row.address, row.key_index), row.clone());
        }
        Ok(())
    }

    async fn revoke_account_keys(&self, rows: &[KeyRevocation]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            if let Some(key) = inner.account_keys.get_mut(&(row.address, row.key_index)) {
                // A key re-added above the revocation height stays live.
                if key.added_at_height <= row.height {
                    key.revoked = true;
                    key.revoked_at_height = Some(row.height);
                }
            }
        }
        Ok(())
    }

    async fn apply_holding_deltas(&self, rows: &[HoldingDelta]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.address, row.contract_address, row.contract_name.clone());
            match inner.ft_holdings.get_mut(&key) {
                None => {
                    inner.ft_holdings.insert(
                        key,
                        FtHolding {
                            address: row.address,
                            contract_address: row.contract_address,
                            contract_name: row.contract_name.clone(),
                            balance: row.delta.clone(),
                            last_height: row.height,
                        },
                    );
                }
                // Height monotonicity guard: replays never double-apply.
                Some(holding) if holding.last_height < row.height => {
                    holding.balance += row.delta.clone();
                    holding.last_height = row.height;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn write_nft_ownerships(&self, rows: &[NftOwnership]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.contract_address, row.contract_name.clone(), row.nft_id);
            match inner.nft_ownership.get_mut(&key) {
                None => {
                    inner.nft_ownership.insert(key, row.clone());
                }
                // Stale out-of-order writes are rejected silently.
                Some(existing) if row.last_height >= existing.last_height => {
                    *existing = row.clone();
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn write_smart_contracts(&self, rows: &[SmartContract]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.address, row.name.clone());
            match inner.smart_contracts.get_mut(&key) {
                None => {
                    inner.smart_contracts.insert(key, row.clone());
                }
                Some(existing) if row.last_height >= existing.last_height => {
                    *existing = row.clone();
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn write_contract_versions(&self, rows: &[ContractVersion]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.address, row.name.clone(), row.block_height);
            inner.contract_versions.entry(key).or_insert_with(|| row.clone());
        }
        Ok(())
    }

    async fn write_evm_transactions(&self, rows: &[EvmTransaction]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.block_height, row.transaction_id, row.event_index);
            inner.evm_transactions.insert(key, row.clone());
        }
        Ok(())
    }

    async fn write_evm_tx_hashes(&self, rows: &[EvmTxHash]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.evm_hash, row.transaction_id, row.event_index);
            inner.evm_tx_hashes.insert(key, row.clone());
        }
        Ok(())
    }

    async fn write_tx_contracts(&self, rows: &[TxContract]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (
                row.block_height,
                row.transaction_id,
                row.contract_address,
                row.contract_name.clone(),
            );
            inner.tx_contracts.insert(key, row.clone());
        }
        Ok(())
    }

    async fn write_tx_tags(&self, rows: &[TxTag]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            let key = (row.block_height, row.transaction_id, row.tag.clone());
            inner.tx_tags.insert(key, row.clone());
        }
        Ok(())
    }

    async fn write_tx_metrics(&self, rows: &[TxMetrics]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for row in rows {
            inner.tx_metrics.insert((row.block_height, row.transaction_id), row.clone());
        }
        Ok(())
    }

    async fn upsert_token_metadata(&self, row: &TokenMetadata) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner
            .token_metadata
            .insert((row.contract_address, row.contract_name.clone()), row.clone());
        Ok(())
    }

    async fn bump_token_metadata_retry(
        &self,
        contract_address: Address,
        contract_name: &str,
        refetch_after: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(row) =
            inner.token_metadata.get_mut(&(contract_address, contract_name.to_owned()))
        {
            row.retries += 1;
            row.refetch_after = Some(refetch_after);
        }
        Ok(())
    }

    async fn upsert_nft_item(&self, row: &NftItem) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner
            .nft_items
            .insert((row.contract_address, row.contract_name.clone(), row.nft_id), row.clone());
        Ok(())
    }

    async fn bump_nft_item_retry(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
        refetch_after: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(row) =
            inner.nft_items.get_mut(&(contract_address, contract_name.to_owned(), nft_id))
        {
            row.retries += 1;
            row.refetch_after = Some(refetch_after);
        }
        Ok(())
    }

    async fn delete_projection_rows(
        &self,
        worker: WorkerKind,
        range: HeightRange,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        match worker {
            WorkerKind::Token => {
                inner.ft_transfers.retain(|(h, _, _), _| !range.contains(*h));
                inner.nft_transfers.retain(|(h, _, _), _| !range.contains(*h));
            }
            WorkerKind::Meta => {
                inner.address_transactions.retain(|(_, h, _, _), _| !range.contains(*h));
            }
            WorkerKind::Accounts => {
                inner.account_keys.retain(|_, key| !range.contains(key.added_at_height));
                inner.contract_versions.retain(|(_, _, h), _| !range.contains(*h));
                inner.smart_contracts.retain(|_, c| !range.contains(c.last_height));
            }
            WorkerKind::FtHoldings => {
                inner.ft_holdings.retain(|_, h| !range.contains(h.last_height));
            }
            WorkerKind::NftOwnership => {
                inner.nft_ownership.retain(|_, o| !range.contains(o.last_height));
            }
            WorkerKind::TokenMetadata => {}
            WorkerKind::TxContracts => {
                inner.tx_contracts.retain(|(h, _, _, _), _| !range.contains(*h));
                inner.tx_tags.retain(|(h, _, _), _| !range.contains(*h));
            }
            WorkerKind::TxMetrics => {
                inner.tx_metrics.retain(|(h, _), _| !range.contains(*h));
            }
            WorkerKind::Evm => {
                inner.evm_transactions.retain(|(h, _, _), _| !range.contains(*h));
                inner.evm_tx_hashes.retain(|_, row| !range.contains(row.block_height));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectionReader for MemoryStore {
    async fn ft_transfers_in_range(&self, range: HeightRange) -> StoreResult<Vec<FtTransfer>> {
        Ok(self
            .inner
            .lock()
            .ft_transfers
            .values()
            .filter(|t| range.contains(t.block_height))
            .cloned()
            .collect())
    }

    async fn nft_transfers_in_range(&self, range: HeightRange) -> StoreResult<Vec<NftTransfer>> {
        Ok(self
            .inner
            .lock()
            .nft_transfers
            .values()
            .filter(|t| range.contains(t.block_height))
            .cloned()
            .collect())
    }

    async fn ft_holding(
        &self,
        address: Address,
        contract_address: Address,
        contract_name: &str,
    ) -> StoreResult<Option<FtHolding>> {
        Ok(self
            .inner
            .lock()
            .ft_holdings
            .get(&(address, contract_address, contract_name.to_owned()))
            .cloned())
    }

    async fn nft_ownership(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
    ) -> StoreResult<Option<NftOwnership>> {
        Ok(self
            .inner
            .lock()
            .nft_ownership
            .get(&(contract_address, contract_name.to_owned(), nft_id))
            .cloned())
    }

    async fn token_metadata(
        &self,
        contract_address: Address,
        contract_name: &str,
    ) -> StoreResult<Option<TokenMetadata>> {
        Ok(self
            .inner
            .lock()
            .token_metadata
            .get(&(contract_address, contract_name.to_owned()))
            .cloned())
    }

    async fn nft_item(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
    ) -> StoreResult<Option<NftItem>> {
        Ok(self
            .inner
            .lock()
            .nft_items
            .get(&(contract_address, contract_name.to_owned(), nft_id))
            .cloned())
    }

    async fn account_key(
        &self,
        address: Address,
        key_index: u32,
    ) -> StoreResult<Option<AccountKey>> {
        Ok(self.inner.lock().account_keys.get(&(address, key_index)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AddressRole;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn bundle(height: u64, id: u8, parent: u8) -> BlockBundle {
        BlockBundle {
            block: Block {
                height,
                id: B256::repeat_byte(id),
                parent_id: B256::repeat_byte(parent),
                timestamp: Utc::now(),
                is_sealed: true,
                tx_count: 0,
                event_count: 0,
                gas_used: 0,
                collection_guarantees: serde_json::Value::Null,
                block_seals: serde_json::Value::Null,
                signatures: serde_json::Value::Null,
            },
            transactions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn re_ingesting_a_height_is_a_noop() {
        let store = MemoryStore::new();
        store.insert_block(&bundle(5, 1, 0), &[]).await.unwrap();
        // Second ingest with a different id must not overwrite.
        store.insert_block(&bundle(5, 2, 0), &[]).await.unwrap();
        assert_eq!(store.block_id_at(5).await.unwrap(), Some(B256::repeat_byte(1)));
        assert_eq!(store.block_count(), 1);
    }

    #[tokio::test]
    async fn checkpoint_never_moves_backwards_on_advance() {
        let store = MemoryStore::new();
        store.advance_checkpoint(ServiceId::RawIngester, 10).await.unwrap();
        store.advance_checkpoint(ServiceId::RawIngester, 7).await.unwrap();
        assert_eq!(store.checkpoint_height(ServiceId::RawIngester).await.unwrap(), Some(10));
        store.clamp_checkpoint(ServiceId::RawIngester, 7).await.unwrap();
        assert_eq!(store.checkpoint_height(ServiceId::RawIngester).await.unwrap(), Some(7));
        // Clamp never resets to zero.
        store.clamp_checkpoint(ServiceId::RawIngester, 0).await.unwrap();
        assert_eq!(store.checkpoint_height(ServiceId::RawIngester).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn claim_skips_completed_and_dead_lettered() {
        let store = MemoryStore::new();
        let range = HeightRange::new(0, 100);
        let ttl = Duration::from_secs(60);

        let lease = store.try_claim(WorkerKind::Token, range, "a", ttl).await.unwrap().unwrap();
        assert_eq!(lease.attempt, 0);
        // Active and unexpired: nobody else can claim.
        assert!(store.try_claim(WorkerKind::Token, range, "b", ttl).await.unwrap().is_none());

        store.complete_lease(WorkerKind::Token, 0).await.unwrap();
        assert!(store.try_claim(WorkerKind::Token, range, "b", ttl).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_lease_is_reclaimable_until_dead_letter() {
        let store = MemoryStore::new();
        let range = HeightRange::new(0, 100);
        let ttl = Duration::from_secs(60);

        store.try_claim(WorkerKind::Token, range, "a", ttl).await.unwrap().unwrap();
        for attempt in 1..Lease::DEAD_LETTER_ATTEMPTS {
            let failed = store.fail_lease(WorkerKind::Token, 0, None).await.unwrap();
            assert_eq!(failed.attempt, attempt);
            let lease = store.try_claim(WorkerKind::Token, range, "a", ttl).await.unwrap();
            assert!(lease.is_some(), "attempt {attempt} should be reclaimable");
        }
        let failed = store.fail_lease(WorkerKind::Token, 0, None).await.unwrap();
        assert!(failed.is_dead_letter());
        assert!(store.try_claim(WorkerKind::Token, range, "a", ttl).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gap_scan_finds_holes_between_completed_leases() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        for range in [HeightRange::new(0, 100), HeightRange::new(200, 300)] {
            store.try_claim(WorkerKind::Meta, range, "a", ttl).await.unwrap().unwrap();
            store.complete_lease(WorkerKind::Meta, range.start).await.unwrap();
        }
        let gaps = store.find_gaps(WorkerKind::Meta, 1_000).await.unwrap();
        assert_eq!(gaps, vec![HeightRange::new(100, 200)]);
        // The bound truncates gaps.
        let gaps = store.find_gaps(WorkerKind::Meta, 150).await.unwrap();
        assert_eq!(gaps, vec![HeightRange::new(100, 150)]);
    }

    #[tokio::test]
    async fn error_rows_deduplicate() {
        let store = MemoryStore::new();
        let record = ErrorRecord::new(
            "token",
            Some(42),
            None,
            "parse failure",
            "stack",
            flowidx_primitives::Severity::Error,
        );
        let first = store.record_error(&record).await.unwrap();
        let second = store.record_error(&record).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.error_count(), 1);
    }

    #[tokio::test]
    async fn holding_deltas_guarded_by_height() {
        let store = MemoryStore::new();
        let addr = Address::repeat_byte(1);
        let contract = Address::repeat_byte(2);
        let delta = |amount: &str, height| HoldingDelta {
            address: addr,
            contract_address: contract,
            contract_name: "FlowToken".to_owned(),
            delta: BigDecimal::from_str(amount).unwrap(),
            height,
        };
        store.apply_holding_deltas(&[delta("10", 100)]).await.unwrap();
        // Replay of the same fold is a no-op.
        store.apply_holding_deltas(&[delta("10", 100)]).await.unwrap();
        store.apply_holding_deltas(&[delta("-4", 150)]).await.unwrap();
        let holding = store.ft_holding(addr, contract, "FlowToken").await.unwrap().unwrap();
        assert_eq!(holding.balance, BigDecimal::from_str("6").unwrap());
        assert_eq!(holding.last_height, 150);
    }

    #[tokio::test]
    async fn stale_nft_ownership_write_is_rejected() {
        let store = MemoryStore::new();
        let contract = Address::repeat_byte(3);
        let row = |owner: u8, height| NftOwnership {
            contract_address: contract,
            contract_name: "TopShot".to_owned(),
            nft_id: 42,
            owner: Some(Address::repeat_byte(owner)),
            last_height: height,
        };
        store.write_nft_ownerships(&[row(1, 200)]).await.unwrap();
        store.write_nft_ownerships(&[row(2, 150)]).await.unwrap();
        let ownership = store.nft_ownership(contract, "TopShot", 42).await.unwrap().unwrap();
        assert_eq!(ownership.owner, Some(Address::repeat_byte(1)));
        assert_eq!(ownership.last_height, 200);
    }

    #[tokio::test]
    async fn address_roles_key_separately() {
        let store = MemoryStore::new();
        let addr = Address::repeat_byte(9);
        let tx = B256::repeat_byte(1);
        let row = |role| AddressTransaction {
            address: addr,
            block_height: 7,
            transaction_id: tx,
            role,
            timestamp: Utc::now(),
        };
        store
            .write_address_transactions(&[row(AddressRole::Proposer), row(AddressRole::Payer)])
            .await
            .unwrap();
        assert_eq!(store.all_address_transactions().len(), 2);
    }
}
