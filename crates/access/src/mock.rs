//! A scripted in-memory chain implementing [`AccessApi`], shared by the
//! pipeline test suites.
//!
//! The chain is deterministic: block ids encode `(height, fork)` so reorg
//! tests can fork at an ancestor and assert exactly which rows survive.
//! Failure injection is per endpoint name (transport) and per height
//! (fetch), and every call is counted for rate-limit assertions.

use crate::{AccessApi, AccessError, AccessResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flowidx_primitives::{
    Address, Block, BlockBundle, Event, EventType, HeightRange, Transaction, TransactionBundle,
    TransactionStatus, B256,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    str::FromStr,
    sync::Arc,
};

#[derive(Debug, Default)]
struct ChainState {
    blocks: BTreeMap<u64, BlockBundle>,
    transport_failures: HashMap<String, u32>,
    bundle_failures: HashMap<u64, u32>,
    calls: HashMap<String, u64>,
    total_calls: u64,
    script_results: VecDeque<serde_json::Value>,
}

/// Shared scripted chain state. Clones share the same chain.
#[derive(Debug, Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain with empty blocks at heights `start..=end` on fork 0.
    pub fn with_blocks(start: u64, end: u64) -> Self {
        let chain = Self::new();
        for height in start..=end {
            chain.insert_bundle(fixtures::bundle(height, 0));
        }
        chain
    }

    /// Inserts (or replaces) a block bundle.
    pub fn insert_bundle(&self, bundle: BlockBundle) {
        self.state.lock().blocks.insert(bundle.block.height, bundle);
    }

    /// Extends the chain with empty fork-0 blocks up to `tip`.
    pub fn extend_to(&self, tip: u64) {
        let mut state = self.state.lock();
        let next = state.blocks.keys().next_back().map(|h| h + 1).unwrap_or(0);
        for height in next..=tip {
            state.blocks.insert(height, fixtures::bundle(height, 0));
        }
    }

    /// Replaces everything above `ancestor` with a fork-`fork` chain ending
    /// at `tip`. The block at `ancestor + 1` points back at the ancestor's
    /// id, so the divergence is discoverable by parent walking.
    pub fn fork_at(&self, ancestor: u64, tip: u64, fork: u8) {
        let mut state = self.state.lock();
        state.blocks.split_off(&(ancestor + 1));
        for height in ancestor + 1..=tip {
            let mut bundle = fixtures::bundle(height, fork);
            if height == ancestor + 1 {
                if let Some(parent) = state.blocks.get(&ancestor) {
                    bundle.block.parent_id = parent.block.id;
                }
            }
            state.blocks.insert(height, bundle);
        }
    }

    /// Makes the next `count` calls through the endpoint named `name` fail
    /// with a transport error.
    pub fn fail_next_transport(&self, name: &str, count: u32) {
        self.state.lock().transport_failures.insert(name.to_owned(), count);
    }

    /// Makes the next `count` bundle fetches of `height` fail.
    pub fn fail_bundle_at(&self, height: u64, count: u32) {
        self.state.lock().bundle_failures.insert(height, count);
    }

    /// Queues a script execution result.
    pub fn push_script_result(&self, value: serde_json::Value) {
        self.state.lock().script_results.push_back(value);
    }

    /// Total calls across all endpoints.
    pub fn call_count(&self) -> u64 {
        self.state.lock().total_calls
    }

    /// Calls made through the endpoint named `name`.
    pub fn calls_for(&self, name: &str) -> u64 {
        self.state.lock().calls.get(name).copied().unwrap_or(0)
    }

    fn tip(&self) -> Option<u64> {
        self.state.lock().blocks.keys().next_back().copied()
    }

    fn enter(&self, name: Option<&str>) -> AccessResult<()> {
        let mut state = self.state.lock();
        state.total_calls += 1;
        if let Some(name) = name {
            *state.calls.entry(name.to_owned()).or_insert(0) += 1;
            if let Some(remaining) = state.transport_failures.get_mut(name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AccessError::Transport(format!("{name}: injected failure")));
                }
            }
        }
        Ok(())
    }
}

/// [`AccessApi`] over a [`MockChain`], optionally carrying an endpoint name
/// for per-endpoint failure injection and call accounting.
#[derive(Debug, Clone)]
pub struct MockAccessApi {
    chain: MockChain,
    name: Option<String>,
}

impl MockAccessApi {
    /// An anonymous client.
    pub fn new(chain: MockChain) -> Self {
        Self { chain, name: None }
    }

    /// A client labeled with an endpoint name.
    pub fn named(chain: MockChain, name: impl Into<String>) -> Self {
        Self { chain, name: Some(name.into()) }
    }
}

#[async_trait]
impl AccessApi for MockAccessApi {
    async fn latest_sealed_height(&self) -> AccessResult<u64> {
        self.chain.enter(self.name.as_deref())?;
        self.chain.tip().ok_or_else(|| AccessError::NotFound("empty chain".to_owned()))
    }

    async fn block_bundle_at(&self, height: u64) -> AccessResult<BlockBundle> {
        self.chain.enter(self.name.as_deref())?;
        {
            let mut state = self.chain.state.lock();
            if let Some(remaining) = state.bundle_failures.get_mut(&height) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AccessError::Transport(format!(
                        "injected failure at height {height}"
                    )));
                }
            }
        }
        let tip = self.chain.tip().unwrap_or(0);
        let state = self.chain.state.lock();
        match state.blocks.get(&height) {
            Some(bundle) => Ok(bundle.clone()),
            None if height > tip => Err(AccessError::HeightNotSealed { height }),
            None => Err(AccessError::NotFound(format!("block at height {height}"))),
        }
    }

    async fn transaction(&self, id: B256) -> AccessResult<TransactionBundle> {
        self.chain.enter(self.name.as_deref())?;
        let state = self.chain.state.lock();
        state
            .blocks
            .values()
            .flat_map(|b| b.transactions.iter())
            .find(|tx| tx.transaction.id == id)
            .cloned()
            .ok_or_else(|| AccessError::NotFound(format!("transaction {id}")))
    }

    async fn collection(&self, _id: B256) -> AccessResult<Vec<B256>> {
        self.chain.enter(self.name.as_deref())?;
        Ok(Vec::new())
    }

    async fn events_in_range(
        &self,
        event_type: Option<&str>,
        range: HeightRange,
    ) -> AccessResult<Vec<Event>> {
        self.chain.enter(self.name.as_deref())?;
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.chain.state.lock();
        Ok(state
            .blocks
            .range(range.start..range.end)
            .flat_map(|(_, b)| b.events())
            .filter(|e| event_type.map(|t| e.event_type.qualified() == t).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn execute_script(
        &self,
        _script: &str,
        _arguments: &[serde_json::Value],
        _height: Option<u64>,
    ) -> AccessResult<serde_json::Value> {
        self.chain.enter(self.name.as_deref())?;
        let mut state = self.chain.state.lock();
        Ok(state.script_results.pop_front().unwrap_or(serde_json::Value::Null))
    }
}

/// Deterministic chain-building helpers shared by the pipeline tests.
pub mod fixtures {
    use super::*;

    /// Deterministic block id for `(height, fork)`.
    pub fn block_id(height: u64, fork: u8) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&height.to_be_bytes());
        bytes[31] = fork;
        B256::from(bytes)
    }

    /// Deterministic transaction id for `(height, index)`.
    pub fn tx_id(height: u64, index: u32) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&height.to_be_bytes());
        bytes[8..12].copy_from_slice(&index.to_be_bytes());
        bytes[31] = 0xaa;
        B256::from(bytes)
    }

    /// Deterministic timestamp: one second per height.
    pub fn timestamp(height: u64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + height as i64, 0).unwrap()
    }

    /// An 8-byte address from a single byte.
    pub fn address(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    /// An empty block at `(height, fork)`, parent-linked within the fork.
    pub fn block(height: u64, fork: u8) -> Block {
        Block {
            height,
            id: block_id(height, fork),
            parent_id: if height == 0 { B256::ZERO } else { block_id(height - 1, fork) },
            timestamp: timestamp(height),
            is_sealed: true,
            tx_count: 0,
            event_count: 0,
            gas_used: 0,
            collection_guarantees: serde_json::Value::Null,
            block_seals: serde_json::Value::Null,
            signatures: serde_json::Value::Null,
        }
    }

    /// An empty bundle at `(height, fork)`.
    pub fn bundle(height: u64, fork: u8) -> BlockBundle {
        BlockBundle { block: block(height, fork), transactions: Vec::new() }
    }

    /// A bundle carrying the given transactions, with block counters filled
    /// in.
    pub fn bundle_with(height: u64, fork: u8, transactions: Vec<TransactionBundle>) -> BlockBundle {
        let mut block = block(height, fork);
        block.tx_count = transactions.len() as u64;
        block.event_count = transactions.iter().map(|t| t.events.len() as u64).sum();
        block.gas_used = transactions.iter().map(|t| t.transaction.gas_used).sum();
        BlockBundle { block, transactions }
    }

    /// A plain transaction at `(height, index)` proposed, paid and
    /// authorized by `signer`.
    pub fn transaction(height: u64, index: u32, signer: Address) -> Transaction {
        Transaction {
            block_height: height,
            id: tx_id(height, index),
            transaction_index: index,
            proposer: signer,
            payer: signer,
            authorizers: vec![signer],
            script: Some("transaction { execute {} }".to_owned()),
            script_hash: None,
            arguments: serde_json::Value::Array(Vec::new()),
            status: TransactionStatus::Sealed,
            gas_limit: 9_999,
            gas_used: 21,
            event_count: 0,
            is_evm: false,
            timestamp: timestamp(height),
        }
    }

    /// Wraps a transaction with its events, fixing up the event count.
    pub fn tx_bundle(mut transaction: Transaction, events: Vec<Event>) -> TransactionBundle {
        transaction.event_count = events.len() as u64;
        TransactionBundle { transaction, events }
    }

    /// An event at `(height, tx_index, event_index)` with the given type tag
    /// and JSON-Cadence payload.
    pub fn event(
        height: u64,
        tx_index: u32,
        event_index: u32,
        type_tag: &str,
        payload: serde_json::Value,
    ) -> Event {
        Event {
            block_height: height,
            transaction_id: tx_id(height, tx_index),
            transaction_index: tx_index,
            event_index,
            event_type: EventType::from_str(type_tag).expect("valid type tag"),
            payload,
            timestamp: timestamp(height),
        }
    }
}
