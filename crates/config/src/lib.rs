//! Configuration for the Flow indexer.
//!
//! Every knob has a hand-written default matching the documented behavior,
//! can be set from a TOML file, and can be overridden by the environment
//! variables listed per field. The binary resolves file first, environment
//! second.

mod access;
mod database;
mod ingest;
mod workers;

pub use access::{AccessConfig, SporkConfig};
pub use database::DatabaseConfig;
pub use ingest::IngestConfig;
pub use workers::{WorkerConfig, WorkersConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// An environment override carried an unparseable value.
    #[error("invalid value for {var}: {value}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    /// The resolved configuration is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level indexer configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Upstream access node pool.
    pub access: AccessConfig,
    /// Postgres connection.
    pub database: DatabaseConfig,
    /// Raw ingesters.
    pub ingest: IngestConfig,
    /// Derivation workers and lease scheduling.
    pub workers: WorkersConfig,
}

impl Config {
    /// Loads configuration: TOML file (when given) overridden by environment
    /// variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides in place.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.access.apply_env()?;
        self.database.apply_env()?;
        self.ingest.apply_env()?;
        self.workers.apply_env()?;
        Ok(())
    }

    /// Rejects configurations the indexer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access.access_nodes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one access node is required (ACCESS_NODE / ACCESS_NODES)".to_owned(),
            ));
        }
        if self.database.url.is_empty() {
            return Err(ConfigError::Invalid("database url is required (DB_URL)".to_owned()));
        }
        for spork in &self.access.sporks {
            if spork.end < spork.start {
                return Err(ConfigError::Invalid(format!(
                    "spork {} has end {} below start {}",
                    spork.name, spork.end, spork.start
                )));
            }
            if spork.nodes.is_empty() {
                return Err(ConfigError::Invalid(format!("spork {} has no nodes", spork.name)));
            }
        }
        Ok(())
    }
}

pub(crate) fn env_var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T: std::str::FromStr>(
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var: name, value }),
        None => Ok(None),
    }
}

pub(crate) fn env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match env_var(name) {
        Some(value) => match value.as_str() {
            "1" | "true" | "TRUE" | "yes" => Ok(Some(true)),
            "0" | "false" | "FALSE" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv { var: name, value }),
        },
        None => Ok(None),
    }
}

pub(crate) fn env_list(name: &'static str) -> Option<Vec<String>> {
    env_var(name).map(|v| {
        v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_nodes() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let mut config = Config::default();
        config.access.access_nodes = vec!["access.mainnet.nodes.onflow.org:9000".to_owned()];
        config.database.url = "postgres://localhost/flowidx".to_owned();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn load_reads_file_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowidx.toml");
        std::fs::write(
            &path,
            r#"
            [access]
            access_nodes = ["localhost:9000"]

            [database]
            url = "postgres://localhost/flowidx"
            "#,
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.access.access_nodes, vec!["localhost:9000".to_owned()]);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [ingest]
            start_block = 1000

            [access]
            access_nodes = ["localhost:9000"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.ingest.start_block, 1000);
        assert_eq!(parsed.ingest.history_batch_size, IngestConfig::default().history_batch_size);
        assert_eq!(parsed.workers, WorkersConfig::default());
    }
}
