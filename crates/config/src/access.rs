use crate::{env_list, env_parse, env_var, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Access node pool configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Live access nodes, `host:port`. Env: `ACCESS_NODE` (single) or
    /// `ACCESS_NODES` (comma list).
    pub access_nodes: Vec<String>,
    /// Spork-pinned historic node pools, routed by requested height.
    /// Env: `HISTORIC_ACCESS_NODES` becomes a single catch-all spork below
    /// the live root height.
    pub sporks: Vec<SporkConfig>,
    /// Safety-net archive node appended to every historic pool.
    /// Env: `ARCHIVE_NODE`.
    pub archive_node: Option<String>,
    /// Earliest height the live nodes index. Heights below route to the
    /// spork-pinned pools; 0 sends everything to the live set.
    pub live_root_height: u64,
    /// Token refill rate per node, requests per second.
    /// Env: `RPC_RPS_PER_NODE`; fallback `RPC_RPS` divided across nodes.
    pub rps_per_node: Option<u32>,
    /// Token burst per node. Env: `RPC_BURST_PER_NODE`; fallback `RPC_BURST`
    /// divided across nodes.
    pub burst_per_node: Option<u32>,
    /// Global requests per second across the pool, used when the per-node
    /// rate is not set. Env: `RPC_RPS`.
    pub rps: Option<u32>,
    /// Global burst across the pool, used when the per-node burst is not
    /// set. Env: `RPC_BURST`.
    pub burst: Option<u32>,
    /// Retry attempts across alternate endpoints for transient failures.
    pub retries: u32,
    /// Per-call deadline.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long a misbehaving endpoint stays out of rotation.
    #[serde(with = "humantime_serde")]
    pub quarantine: Duration,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            access_nodes: Vec::new(),
            sporks: Vec::new(),
            archive_node: None,
            live_root_height: 0,
            rps_per_node: None,
            burst_per_node: None,
            rps: None,
            burst: None,
            retries: 3,
            request_timeout: Duration::from_secs(30),
            quarantine: Duration::from_secs(30),
        }
    }
}

impl AccessConfig {
    pub(crate) fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(node) = env_var("ACCESS_NODE") {
            self.access_nodes = vec![node];
        }
        if let Some(nodes) = env_list("ACCESS_NODES") {
            self.access_nodes = nodes;
        }
        if let Some(nodes) = env_list("HISTORIC_ACCESS_NODES") {
            // A bare node list becomes one catch-all spork covering
            // everything below the live nodes' earliest height.
            self.sporks = vec![SporkConfig {
                name: "historic".to_owned(),
                start: 0,
                end: u64::MAX,
                nodes,
            }];
        }
        if let Some(node) = env_var("ARCHIVE_NODE") {
            self.archive_node = Some(node);
        }
        if let Some(v) = env_parse("RPC_RPS_PER_NODE")? {
            self.rps_per_node = Some(v);
        }
        if let Some(v) = env_parse("RPC_BURST_PER_NODE")? {
            self.burst_per_node = Some(v);
        }
        if let Some(v) = env_parse("RPC_RPS")? {
            self.rps = Some(v);
        }
        if let Some(v) = env_parse("RPC_BURST")? {
            self.burst = Some(v);
        }
        Ok(())
    }

    /// Effective per-node refill rate: the per-node setting, or the global
    /// rate split across `node_count`, or a conservative floor of 1.
    pub fn effective_rps(&self, node_count: usize) -> u32 {
        if let Some(rps) = self.rps_per_node {
            return rps.max(1);
        }
        match self.rps {
            Some(rps) => (rps / node_count.max(1) as u32).max(1),
            None => 10,
        }
    }

    /// Effective per-node burst, mirroring [`Self::effective_rps`].
    pub fn effective_burst(&self, node_count: usize) -> u32 {
        if let Some(burst) = self.burst_per_node {
            return burst.max(1);
        }
        match self.burst {
            Some(burst) => (burst / node_count.max(1) as u32).max(1),
            None => self.effective_rps(node_count),
        }
    }
}

/// One spork: an inclusive height range served by a pinned node set.
#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
pub struct SporkConfig {
    /// Spork label, for diagnostics.
    pub name: String,
    /// First height covered.
    pub start: u64,
    /// Last height covered (inclusive).
    pub end: u64,
    /// Nodes serving the range, `host:port`.
    pub nodes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_node_rate_wins_over_global() {
        let config = AccessConfig {
            rps_per_node: Some(50),
            rps: Some(10),
            ..Default::default()
        };
        assert_eq!(config.effective_rps(4), 50);
    }

    #[test]
    fn global_rate_splits_across_nodes() {
        let config = AccessConfig { rps: Some(10), ..Default::default() };
        assert_eq!(config.effective_rps(5), 2);
        // Never rounds down to zero.
        assert_eq!(config.effective_rps(100), 1);
    }
}
