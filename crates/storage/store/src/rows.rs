//! Row models for the derived projection tables.
//!
//! Each type maps one-to-one onto an `app.*` table. The primary-key fields
//! come first; every write path upserts on that key so re-processing a range
//! converges to the same final state.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use flowidx_primitives::{Address, EvmAddress, B256};
use serde::{Deserialize, Serialize};

/// A fungible token movement extracted from a `Tokens*` event.
/// Keyed `(block_height, transaction_id, event_index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtTransfer {
    /// Height of the emitting block.
    pub block_height: u64,
    /// Emitting transaction.
    pub transaction_id: B256,
    /// Event position within the transaction.
    pub event_index: u32,
    /// Token contract address.
    pub contract_address: Address,
    /// Token contract name.
    pub contract_name: String,
    /// Sender; absent for mints.
    pub sender: Option<Address>,
    /// Recipient; absent for burns.
    pub recipient: Option<Address>,
    /// Amount moved, preserved at full precision.
    pub amount: BigDecimal,
    /// Timestamp of the emitting block.
    pub timestamp: DateTime<Utc>,
}

/// A non-fungible token movement. Keyed `(block_height, transaction_id, event_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftTransfer {
    /// Height of the emitting block.
    pub block_height: u64,
    /// Emitting transaction.
    pub transaction_id: B256,
    /// Event position within the transaction.
    pub event_index: u32,
    /// Collection contract address.
    pub contract_address: Address,
    /// Collection contract name.
    pub contract_name: String,
    /// Sender; absent for mints.
    pub sender: Option<Address>,
    /// Recipient; absent for burns.
    pub recipient: Option<Address>,
    /// Token id within the collection.
    pub nft_id: u64,
    /// Timestamp of the emitting block.
    pub timestamp: DateTime<Utc>,
}

/// Roles an address can play in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressRole {
    /// Proposed the transaction.
    Proposer,
    /// Paid for the transaction.
    Payer,
    /// Authorized the transaction.
    Authorizer,
    /// Appeared as the subject of an emitted event.
    EventSubject,
}

impl AddressRole {
    /// Persisted string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proposer => "proposer",
            Self::Payer => "payer",
            Self::Authorizer => "authorizer",
            Self::EventSubject => "event_subject",
        }
    }
}

/// Address participation in a transaction.
/// Keyed `(address, block_height, transaction_id, role)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTransaction {
    /// Participating address.
    pub address: Address,
    /// Height of the containing block.
    pub block_height: u64,
    /// The transaction.
    pub transaction_id: B256,
    /// How the address participated.
    pub role: AddressRole,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
}

/// First/last-seen accounting for an address. Keyed `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSeen {
    /// The address.
    pub address: Address,
    /// Height the address was observed at.
    pub height: u64,
}

/// A fungible token balance. Keyed `(address, contract_address, contract_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtHolding {
    /// Holder.
    pub address: Address,
    /// Token contract address.
    pub contract_address: Address,
    /// Token contract name.
    pub contract_name: String,
    /// Current balance.
    pub balance: BigDecimal,
    /// Height of the last applied transfer.
    pub last_height: u64,
}

/// A balance delta produced by folding `ft_transfers` over a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingDelta {
    /// Holder.
    pub address: Address,
    /// Token contract address.
    pub contract_address: Address,
    /// Token contract name.
    pub contract_name: String,
    /// Net balance change over the folded range.
    pub delta: BigDecimal,
    /// Highest transfer height folded into the delta.
    pub height: u64,
}

/// Current owner of an NFT. Keyed `(contract_address, contract_name, nft_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftOwnership {
    /// Collection contract address.
    pub contract_address: Address,
    /// Collection contract name.
    pub contract_name: String,
    /// Token id.
    pub nft_id: u64,
    /// Current owner; cleared by burns.
    pub owner: Option<Address>,
    /// Height of the last applied transfer.
    pub last_height: u64,
}

/// An account key row. Keyed `(address, key_index)`. Removed keys survive
/// with `revoked = true` as an audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKey {
    /// Owning account.
    pub address: Address,
    /// Key index within the account.
    pub key_index: u32,
    /// Public key, hex.
    pub public_key: String,
    /// Signature weight.
    pub weight: u32,
    /// Signing algorithm id.
    pub signing_algorithm: u32,
    /// Hash algorithm id.
    pub hash_algorithm: u32,
    /// Whether the key has been removed.
    pub revoked: bool,
    /// Height the key was added at.
    pub added_at_height: u64,
    /// Height the key was removed at, when revoked.
    pub revoked_at_height: Option<u64>,
}

/// A key removal observed in a `flow.AccountKeyRemoved` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRevocation {
    /// Owning account.
    pub address: Address,
    /// Key index within the account.
    pub key_index: u32,
    /// Height the key was removed at.
    pub height: u64,
}

/// A deployed contract. Keyed `(address, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartContract {
    /// Deploying account.
    pub address: Address,
    /// Contract name.
    pub name: String,
    /// Height of the most recent deployment or update.
    pub last_height: u64,
}

/// One deployment or update of a contract, appended per change.
/// Keyed `(address, name, block_height)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractVersion {
    /// Deploying account.
    pub address: Address,
    /// Contract name.
    pub name: String,
    /// Height of this change.
    pub block_height: u64,
    /// What happened.
    pub change: ContractChange,
}

/// Kind of contract change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractChange {
    /// First deployment.
    Added,
    /// Code update.
    Updated,
    /// Removal.
    Removed,
}

impl ContractChange {
    /// Persisted string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

/// An EVM transaction embedded in a Cadence transaction.
/// Keyed `(block_height, transaction_id, event_index)`; one Cadence
/// transaction may carry several of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTransaction {
    /// Height of the containing block.
    pub block_height: u64,
    /// Enclosing Cadence transaction.
    pub transaction_id: B256,
    /// Position of the `TransactionExecuted` event.
    pub event_index: u32,
    /// EVM transaction hash.
    pub evm_hash: B256,
    /// EVM sender, when recoverable.
    pub from: Option<EvmAddress>,
    /// EVM recipient; absent for contract creation.
    pub to: Option<EvmAddress>,
    /// Gas consumed by the EVM execution.
    pub gas_used: u64,
    /// EVM error code, zero on success.
    pub error_code: u16,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
}

/// EVM-hash to Cadence-transaction lookup. Keyed `(evm_hash, transaction_id, event_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmTxHash {
    /// EVM transaction hash.
    pub evm_hash: B256,
    /// Enclosing Cadence transaction.
    pub transaction_id: B256,
    /// Height of the containing block.
    pub block_height: u64,
    /// Position of the `TransactionExecuted` event.
    pub event_index: u32,
}

/// A contract imported by a transaction script.
/// Keyed `(block_height, transaction_id, contract_address, contract_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxContract {
    /// Height of the containing block.
    pub block_height: u64,
    /// The importing transaction.
    pub transaction_id: B256,
    /// Imported contract address.
    pub contract_address: Address,
    /// Imported contract name.
    pub contract_name: String,
}

/// A classification tag on a transaction. Keyed `(block_height, transaction_id, tag)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTag {
    /// Height of the containing block.
    pub block_height: u64,
    /// The tagged transaction.
    pub transaction_id: B256,
    /// Tag, e.g. `ft_transfer`, `nft_mint`, `evm`.
    pub tag: String,
}

/// Fee and effort metrics for a transaction. Keyed `(block_height, transaction_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMetrics {
    /// Height of the containing block.
    pub block_height: u64,
    /// The measured transaction.
    pub transaction_id: B256,
    /// Total fee paid.
    pub fee: BigDecimal,
    /// Gas used.
    pub gas_used: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Execution effort reported by the fee event, when present.
    pub execution_effort: Option<BigDecimal>,
}

/// On-chain metadata for a token contract, fetched by script execution.
/// Keyed `(contract_address, contract_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Token contract address.
    pub contract_address: Address,
    /// Token contract name.
    pub contract_name: String,
    /// Whether this is a fungible token or an NFT collection.
    pub token_class: TokenClass,
    /// Display name.
    pub name: Option<String>,
    /// Ticker symbol.
    pub symbol: Option<String>,
    /// Decimal places, fungible tokens only.
    pub decimals: Option<u8>,
    /// Storage/receiver path info and socials, kept as an opaque JSON bag.
    pub extras: serde_json::Value,
    /// Fetch attempts so far.
    pub retries: u32,
    /// Next time a fetch may be attempted; unset once fetched.
    pub refetch_after: Option<DateTime<Utc>>,
    /// Whether metadata has been fetched successfully.
    pub fetched: bool,
}

/// On-chain display metadata for one NFT, fetched by script execution.
/// Keyed `(contract_address, contract_name, nft_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftItem {
    /// Collection contract address.
    pub contract_address: Address,
    /// Collection contract name.
    pub contract_name: String,
    /// Token id within the collection.
    pub nft_id: u64,
    /// Display name.
    pub name: Option<String>,
    /// Display description.
    pub description: Option<String>,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// The full resolved view, kept as an opaque JSON bag.
    pub extras: serde_json::Value,
    /// Fetch attempts so far.
    pub retries: u32,
    /// Next time a fetch may be attempted; unset once fetched.
    pub refetch_after: Option<DateTime<Utc>>,
    /// Whether metadata has been fetched successfully.
    pub fetched: bool,
}

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenClass {
    /// Fungible token.
    Fungible,
    /// NFT collection.
    NonFungible,
}

impl TokenClass {
    /// Persisted string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fungible => "fungible",
            Self::NonFungible => "non_fungible",
        }
    }
}

/// A script offloaded from `raw.transactions`, content-addressed by SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRow {
    /// SHA-256 of the script text.
    pub hash: B256,
    /// The script text.
    pub text: String,
}
