use crate::WorkerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a logical service that owns a checkpoint row.
///
/// The raw ingesters and every derivation worker kind each persist their own
/// high-water mark under a distinct service id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceId {
    /// The forward (live) raw ingester. Root of the dependency DAG.
    RawIngester,
    /// The backward (history) raw ingester.
    HistoryIngester,
    /// A derivation worker kind.
    Worker(WorkerKind),
}

impl ServiceId {
    /// The persisted service name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawIngester => "raw_ingester",
            Self::HistoryIngester => "history_ingester",
            Self::Worker(kind) => kind.as_static_str(),
        }
    }
}

impl WorkerKind {
    /// Static string form, usable where a `&'static str` service name is needed.
    pub const fn as_static_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Meta => "meta",
            Self::Accounts => "accounts",
            Self::FtHoldings => "ft_holdings",
            Self::NftOwnership => "nft_ownership",
            Self::TokenMetadata => "token_metadata",
            Self::TxContracts => "tx_contracts",
            Self::TxMetrics => "tx_metrics",
            Self::Evm => "evm",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<WorkerKind> for ServiceId {
    fn from(kind: WorkerKind) -> Self {
        Self::Worker(kind)
    }
}

/// A persisted high-water mark: all heights up to and including `height` have
/// been processed by `service`.
///
/// Checkpoints only move forward under normal operation. Reorg surgery may
/// clamp them down to the common ancestor, never to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Owning service.
    pub service: ServiceId,
    /// Highest contiguously processed height.
    pub height: u64,
    /// Optional service-specific cursor state (e.g. a metadata refetch queue
    /// position), opaque to the store.
    pub subcursor: Option<serde_json::Value>,
    /// Last time the checkpoint moved.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A fresh checkpoint at the given height with no subcursor.
    pub fn new(service: ServiceId, height: u64) -> Self {
        Self { service, height, subcursor: None, updated_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_names_are_stable() {
        assert_eq!(ServiceId::RawIngester.as_str(), "raw_ingester");
        assert_eq!(ServiceId::Worker(WorkerKind::NftOwnership).as_str(), "nft_ownership");
        assert_eq!(WorkerKind::Token.as_static_str(), WorkerKind::Token.as_ref());
    }
}
