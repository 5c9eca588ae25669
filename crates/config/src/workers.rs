use crate::{env_bool, env_parse, ConfigError};
use flowidx_primitives::WorkerKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one derivation worker kind.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Whether the batch worker for this kind runs.
    /// Env: `ENABLE_<KIND>_WORKER`.
    pub enabled: bool,
    /// Heights per lease. Env: `<KIND>_WORKER_RANGE`.
    pub range: u64,
    /// Concurrent leases processed. Env: `<KIND>_WORKER_CONCURRENCY`.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { enabled: true, range: 50_000, concurrency: 1 }
    }
}

/// Configuration for the derivation worker fleet and lease scheduling.
#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// FT/NFT transfer extraction.
    pub token: WorkerConfig,
    /// Address participation.
    pub meta: WorkerConfig,
    /// Account key lifecycle.
    pub accounts: WorkerConfig,
    /// FT balance folding.
    pub ft_holdings: WorkerConfig,
    /// NFT owner tracking.
    pub nft_ownership: WorkerConfig,
    /// Token metadata fetching.
    pub token_metadata: WorkerConfig,
    /// Contract import extraction.
    pub tx_contracts: WorkerConfig,
    /// Fee/effort metrics.
    pub tx_metrics: WorkerConfig,
    /// EVM transaction extraction.
    pub evm: WorkerConfig,
    /// How long a claimed lease stays ACTIVE before the reaper may take it.
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
    /// Claim loop tick.
    #[serde(with = "humantime_serde")]
    pub claim_interval: Duration,
    /// Reaper scan cadence.
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            token: WorkerConfig::default(),
            meta: WorkerConfig::default(),
            accounts: WorkerConfig::default(),
            ft_holdings: WorkerConfig::default(),
            nft_ownership: WorkerConfig::default(),
            token_metadata: WorkerConfig::default(),
            tx_contracts: WorkerConfig::default(),
            tx_metrics: WorkerConfig::default(),
            evm: WorkerConfig::default(),
            lease_ttl: Duration::from_secs(300),
            claim_interval: Duration::from_secs(3),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Env variable triple for one worker kind.
const ENV_VARS: [(WorkerKind, &str, &str, &str); 9] = [
    (WorkerKind::Token, "ENABLE_TOKEN_WORKER", "TOKEN_WORKER_RANGE", "TOKEN_WORKER_CONCURRENCY"),
    (WorkerKind::Meta, "ENABLE_META_WORKER", "META_WORKER_RANGE", "META_WORKER_CONCURRENCY"),
    (
        WorkerKind::Accounts,
        "ENABLE_ACCOUNTS_WORKER",
        "ACCOUNTS_WORKER_RANGE",
        "ACCOUNTS_WORKER_CONCURRENCY",
    ),
    (
        WorkerKind::FtHoldings,
        "ENABLE_FT_HOLDINGS_WORKER",
        "FT_HOLDINGS_WORKER_RANGE",
        "FT_HOLDINGS_WORKER_CONCURRENCY",
    ),
    (
        WorkerKind::NftOwnership,
        "ENABLE_NFT_OWNERSHIP_WORKER",
        "NFT_OWNERSHIP_WORKER_RANGE",
        "NFT_OWNERSHIP_WORKER_CONCURRENCY",
    ),
    (
        WorkerKind::TokenMetadata,
        "ENABLE_TOKEN_METADATA_WORKER",
        "TOKEN_METADATA_WORKER_RANGE",
        "TOKEN_METADATA_WORKER_CONCURRENCY",
    ),
    (
        WorkerKind::TxContracts,
        "ENABLE_TX_CONTRACTS_WORKER",
        "TX_CONTRACTS_WORKER_RANGE",
        "TX_CONTRACTS_WORKER_CONCURRENCY",
    ),
    (
        WorkerKind::TxMetrics,
        "ENABLE_TX_METRICS_WORKER",
        "TX_METRICS_WORKER_RANGE",
        "TX_METRICS_WORKER_CONCURRENCY",
    ),
    (WorkerKind::Evm, "ENABLE_EVM_WORKER", "EVM_WORKER_RANGE", "EVM_WORKER_CONCURRENCY"),
];

impl WorkersConfig {
    /// Settings for one worker kind.
    pub fn for_kind(&self, kind: WorkerKind) -> &WorkerConfig {
        match kind {
            WorkerKind::Token => &self.token,
            WorkerKind::Meta => &self.meta,
            WorkerKind::Accounts => &self.accounts,
            WorkerKind::FtHoldings => &self.ft_holdings,
            WorkerKind::NftOwnership => &self.nft_ownership,
            WorkerKind::TokenMetadata => &self.token_metadata,
            WorkerKind::TxContracts => &self.tx_contracts,
            WorkerKind::TxMetrics => &self.tx_metrics,
            WorkerKind::Evm => &self.evm,
        }
    }

    fn for_kind_mut(&mut self, kind: WorkerKind) -> &mut WorkerConfig {
        match kind {
            WorkerKind::Token => &mut self.token,
            WorkerKind::Meta => &mut self.meta,
            WorkerKind::Accounts => &mut self.accounts,
            WorkerKind::FtHoldings => &mut self.ft_holdings,
            WorkerKind::NftOwnership => &mut self.nft_ownership,
            WorkerKind::TokenMetadata => &mut self.token_metadata,
            WorkerKind::TxContracts => &mut self.tx_contracts,
            WorkerKind::TxMetrics => &mut self.tx_metrics,
            WorkerKind::Evm => &mut self.evm,
        }
    }

    pub(crate) fn apply_env(&mut self) -> Result<(), ConfigError> {
        for (kind, enable_var, range_var, concurrency_var) in ENV_VARS {
            let config = self.for_kind_mut(kind);
            if let Some(v) = env_bool(enable_var)? {
                config.enabled = v;
            }
            if let Some(v) = env_parse(range_var)? {
                config.range = v;
            }
            if let Some(v) = env_parse(concurrency_var)? {
                config.concurrency = v;
            }
        }
        Ok(())
    }
}
