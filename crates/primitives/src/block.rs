use crate::{Event, Transaction, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sealed Flow block as persisted into `raw.blocks`.
///
/// Immutable once written; a reorg replaces blocks only through explicit
/// delete-by-height followed by re-ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height. Primary key.
    pub height: u64,
    /// Block id.
    pub id: B256,
    /// Id of the parent block at `height - 1`.
    pub parent_id: B256,
    /// Proposal timestamp.
    pub timestamp: DateTime<Utc>,
    /// Whether the block is sealed. The ingesters only persist sealed blocks.
    pub is_sealed: bool,
    /// Number of transactions in the block.
    pub tx_count: u64,
    /// Number of events emitted by the block's transactions.
    pub event_count: u64,
    /// Total gas used by the block's transactions.
    pub gas_used: u64,
    /// Collection guarantees, kept as an opaque JSON bag.
    pub collection_guarantees: serde_json::Value,
    /// Block seals, kept as an opaque JSON bag.
    pub block_seals: serde_json::Value,
    /// Block signatures, kept as an opaque JSON bag.
    pub signatures: serde_json::Value,
}

/// A transaction together with the events it emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBundle {
    /// The transaction row.
    pub transaction: Transaction,
    /// Events emitted by the transaction, dense in `event_index`.
    pub events: Vec<Event>,
}

/// Everything the ingesters fetch for one height as a single logical unit:
/// the block plus all of its transactions and their events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBundle {
    /// The block row.
    pub block: Block,
    /// All transactions in collection order, each with its events.
    pub transactions: Vec<TransactionBundle>,
}

impl BlockBundle {
    /// Height of the bundled block.
    pub fn height(&self) -> u64 {
        self.block.height
    }

    /// Iterates all events across all transactions.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.transactions.iter().flat_map(|tx| tx.events.iter())
    }

    /// Total number of events in the bundle.
    pub fn event_count(&self) -> u64 {
        self.transactions.iter().map(|tx| tx.events.len() as u64).sum()
    }
}
