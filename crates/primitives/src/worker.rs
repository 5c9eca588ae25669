use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// The derivation worker kinds.
///
/// Each kind owns a fixed set of projection tables and declares its upstream
/// dependencies in the worker registry. The string form is used as the lease
/// `worker` column and as the checkpoint service name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// FT/NFT transfer extraction from token events.
    Token,
    /// Address participation roles and first/last seen accounting.
    Meta,
    /// Account key lifecycle from `flow.*` service events.
    Accounts,
    /// Fungible token balance folding over `ft_transfers`.
    FtHoldings,
    /// Current NFT owner tracking over `nft_transfers`.
    NftOwnership,
    /// On-chain token metadata fetching via script execution.
    TokenMetadata,
    /// Contract import extraction from transaction scripts.
    TxContracts,
    /// Transaction fee and effort metrics.
    TxMetrics,
    /// EVM transaction extraction from `EVM.TransactionExecuted` events.
    Evm,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn snake_case_round_trip() {
        assert_eq!(WorkerKind::FtHoldings.to_string(), "ft_holdings");
        assert_eq!(WorkerKind::from_str("nft_ownership").unwrap(), WorkerKind::NftOwnership);
        assert_eq!(WorkerKind::Evm.as_ref(), "evm");
    }
}
