use crate::{env_bool, env_parse, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Raw ingester configuration, shared by the forward and backward instances.
#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Lowest height the backward ingester backfills to.
    /// Env: `START_BLOCK`.
    pub start_block: u64,
    /// Parallel fetch tasks on the forward ingester.
    /// Env: `LATEST_WORKER_COUNT`.
    pub latest_worker_count: usize,
    /// Parallel fetch tasks on the backward ingester.
    /// Env: `HISTORY_WORKER_COUNT`.
    pub history_worker_count: usize,
    /// Heights per forward batch. Kept small to minimize tip lag.
    /// Env: `LATEST_BATCH_SIZE`.
    pub latest_batch_size: u64,
    /// Heights per backward batch. Env: `HISTORY_BATCH_SIZE`.
    pub history_batch_size: u64,
    /// Upper bound on reorg surgery; deeper divergence is fatal.
    /// Env: `MAX_REORG_DEPTH`.
    pub max_reorg_depth: u64,
    /// Whether the backward ingester runs at all.
    /// Env: `ENABLE_HISTORY_INGESTER`.
    pub enable_history_ingester: bool,
    /// Whether the forward ingester drives the live deriver inline.
    /// Env: `ENABLE_DERIVED_WRITES`.
    pub enable_derived_writes: bool,
    /// Scripts at or below this many bytes are stored inline on the
    /// transaction row; larger (or all, at 0) scripts are offloaded by
    /// content hash. Env: `TX_SCRIPT_INLINE_MAX_BYTES`.
    pub tx_script_inline_max_bytes: usize,
    /// Fetch attempts per batch before dead-lettering.
    pub max_attempts: u32,
    /// Forward tip poll cadence.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            latest_worker_count: 4,
            history_worker_count: 8,
            latest_batch_size: 1,
            history_batch_size: 20,
            max_reorg_depth: 1_000,
            enable_history_ingester: true,
            enable_derived_writes: true,
            tx_script_inline_max_bytes: 0,
            max_attempts: 20,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl IngestConfig {
    pub(crate) fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse("START_BLOCK")? {
            self.start_block = v;
        }
        if let Some(v) = env_parse("LATEST_WORKER_COUNT")? {
            self.latest_worker_count = v;
        }
        if let Some(v) = env_parse("HISTORY_WORKER_COUNT")? {
            self.history_worker_count = v;
        }
        if let Some(v) = env_parse("LATEST_BATCH_SIZE")? {
            self.latest_batch_size = v;
        }
        if let Some(v) = env_parse("HISTORY_BATCH_SIZE")? {
            self.history_batch_size = v;
        }
        if let Some(v) = env_parse("MAX_REORG_DEPTH")? {
            self.max_reorg_depth = v;
        }
        if let Some(v) = env_bool("ENABLE_HISTORY_INGESTER")? {
            self.enable_history_ingester = v;
        }
        if let Some(v) = env_bool("ENABLE_DERIVED_WRITES")? {
            self.enable_derived_writes = v;
        }
        if let Some(v) = env_parse("TX_SCRIPT_INLINE_MAX_BYTES")? {
            self.tx_script_inline_max_bytes = v;
        }
        Ok(())
    }
}
