//! Commonly used types for the Flow indexer.
//!
//! This crate contains the chain data model (blocks, transactions, events),
//! the bookkeeping types shared by the ingestion and derivation pipelines
//! (checkpoints, leases, indexing errors), and a decoder for JSON-Cadence
//! event payloads.

pub mod cadence;

mod block;
mod checkpoint;
mod error_record;
mod event;
mod lease;
mod range;
mod transaction;
mod worker;

pub use block::{Block, BlockBundle, TransactionBundle};
pub use checkpoint::{Checkpoint, ServiceId};
pub use error_record::{error_hash, ErrorRecord, Severity, MAX_INLINE_PAYLOAD_BYTES};
pub use event::{Event, EventType, MalformedEventType};
pub use lease::{Lease, LeaseStatus};
pub use range::HeightRange;
pub use transaction::{script_hash, Transaction, TransactionStatus};
pub use worker::WorkerKind;

pub use alloy_primitives::{self, B256};

/// A Flow account address. 8 bytes, rendered as `0x`-prefixed hex.
pub type Address = alloy_primitives::FixedBytes<8>;

/// An address inside Flow's embedded EVM. 20 bytes.
pub type EvmAddress = alloy_primitives::Address;

/// A block height.
pub type BlockHeight = u64;
