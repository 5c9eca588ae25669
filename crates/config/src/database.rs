use crate::{env_parse, env_var, ConfigError};
use serde::{Deserialize, Serialize};

/// Postgres connection configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string. Env: `DB_URL`.
    pub url: String,
    /// Maximum open connections in the pool. Env: `DB_MAX_OPEN_CONNS`.
    pub max_open_conns: u32,
    /// Idle connections kept warm. Env: `DB_MAX_IDLE_CONNS`.
    pub max_idle_conns: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: String::new(), max_open_conns: 20, max_idle_conns: 2 }
    }
}

impl DatabaseConfig {
    pub(crate) fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = env_var("DB_URL") {
            self.url = url;
        }
        if let Some(v) = env_parse("DB_MAX_OPEN_CONNS")? {
            self.max_open_conns = v;
        }
        if let Some(v) = env_parse("DB_MAX_IDLE_CONNS")? {
            self.max_idle_conns = v;
        }
        Ok(())
    }
}
