use crate::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

/// Terminal execution status of a transaction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Executed and sealed without error.
    Sealed,
    /// Executed but the script aborted.
    Failed,
    /// Expired before execution.
    Expired,
}

impl TransactionStatus {
    /// Returns `true` if the transaction executed successfully.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Sealed)
    }
}

/// A Flow transaction as persisted into `raw.transactions`.
///
/// Primary key is `(block_height, id)`; the height component keeps the key
/// partition-local. Large scripts are offloaded to `raw.scripts` by content
/// hash, leaving `script` unset here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Height of the containing block.
    pub block_height: u64,
    /// Transaction id.
    pub id: B256,
    /// Position within the block.
    pub transaction_index: u32,
    /// Proposer account.
    pub proposer: Address,
    /// Payer account.
    pub payer: Address,
    /// Authorizer accounts.
    pub authorizers: Vec<Address>,
    /// Cadence script text, when stored inline.
    pub script: Option<String>,
    /// SHA-256 of the script text, always set when the transaction carries a
    /// script.
    pub script_hash: Option<B256>,
    /// Script arguments as JSON-Cadence.
    pub arguments: serde_json::Value,
    /// Execution status.
    pub status: TransactionStatus,
    /// Gas limit declared by the payer.
    pub gas_limit: u64,
    /// Gas actually used.
    pub gas_used: u64,
    /// Number of events emitted.
    pub event_count: u64,
    /// Whether the transaction carries embedded EVM calls.
    pub is_evm: bool,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Returns the script text regardless of inline/offloaded storage,
    /// when available on this instance.
    pub fn script_text(&self) -> Option<&str> {
        self.script.as_deref()
    }
}

/// Content hash used to de-duplicate scripts in `raw.scripts`.
pub fn script_hash(script: &str) -> B256 {
    let digest = Sha256::digest(script.as_bytes());
    B256::from_slice(&digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_hash_is_content_addressed() {
        let a = script_hash("transaction { execute {} }");
        let b = script_hash("transaction { execute {} }");
        let c = script_hash("transaction { prepare(acct: AuthAccount) {} }");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn status_strings() {
        assert_eq!(TransactionStatus::Sealed.to_string(), "SEALED");
        assert!(TransactionStatus::Sealed.is_success());
        assert!(!TransactionStatus::Failed.is_success());
    }
}
