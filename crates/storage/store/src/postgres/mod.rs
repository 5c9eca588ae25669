//! Postgres implementation of the store traits.
//!
//! Targets the partitioned v2 schema: logical namespaces `raw` and `app`,
//! range-partitioned by `block_height`. All statements are plain runtime
//! queries with binds; nothing here requires a live database at build time.

mod checkpoints;
mod errors;
mod leases;
mod projections;
mod raw;

use crate::{StoreError, StoreResult};
use flowidx_config::DatabaseConfig;
use flowidx_primitives::{Address, B256};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Partitioned parents and their range step sizes.
///
/// Blocks and transactions step at 5M heights per partition; the high-volume
/// event and transfer tables step at 10M.
const PARTITIONED_PARENTS: &[(&str, i64)] = &[
    ("raw.blocks", 5_000_000),
    ("raw.transactions", 5_000_000),
    ("raw.events", 10_000_000),
    ("app.ft_transfers", 10_000_000),
    ("app.nft_transfers", 10_000_000),
    ("app.evm_transactions", 10_000_000),
];

/// Store implementation over a Postgres connection pool.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
    /// Highest height partitions are known to cover, to keep the hot insert
    /// path from re-running DDL.
    partitions_ensured: AtomicU64,
}

impl PostgresStore {
    /// Connects a pool and verifies the database speaks the v2 schema.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_conns)
            .min_connections(config.max_idle_conns)
            .connect(&config.url)
            .await?;
        let store = Self { pool, partitions_ensured: AtomicU64::new(0) };
        store.probe_schema().await?;
        info!(target: "store", "connected to database");
        Ok(store)
    }

    /// Wraps an existing pool. Used by tests that manage their own database.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool, partitions_ensured: AtomicU64::new(0) }
    }

    /// The underlying pool, for read-side consumers outside the core.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fails fast when pointed at a database without the `raw` namespace
    /// (e.g. a legacy single-table deployment).
    pub async fn probe_schema(&self) -> StoreResult<()> {
        let row =
            sqlx::query("SELECT 1 FROM information_schema.schemata WHERE schema_name = 'raw'")
                .fetch_optional(&self.pool)
                .await?;
        if row.is_none() {
            return Err(StoreError::SchemaMissing);
        }
        Ok(())
    }

    /// Makes sure partitions exist for every parent table up to `height`,
    /// with one step of headroom. No-ops when already covered.
    pub async fn ensure_partitions(&self, height: u64) -> StoreResult<()> {
        if self.partitions_ensured.load(Ordering::Acquire) > height {
            return Ok(());
        }
        let mut covered_to = u64::MAX;
        for (parent, step) in PARTITIONED_PARENTS {
            let end = (height as i64 / step + 2) * step;
            sqlx::query("SELECT create_partitions($1, $2, $3, $4)")
                .bind(parent)
                .bind(0_i64)
                .bind(end)
                .bind(step)
                .execute(&self.pool)
                .await?;
            covered_to = covered_to.min(end as u64);
        }
        debug!(target: "store", height, covered_to, "ensured partitions");
        self.partitions_ensured.store(covered_to, Ordering::Release);
        Ok(())
    }
}

pub(crate) fn decode_b256(table: &'static str, bytes: Vec<u8>) -> StoreResult<B256> {
    if bytes.len() != 32 {
        return Err(StoreError::malformed(table, format!("expected 32-byte hash, got {}", bytes.len())));
    }
    Ok(B256::from_slice(&bytes))
}

pub(crate) fn decode_address(table: &'static str, bytes: Vec<u8>) -> StoreResult<Address> {
    if bytes.len() != 8 {
        return Err(StoreError::malformed(
            table,
            format!("expected 8-byte address, got {}", bytes.len()),
        ));
    }
    Ok(Address::from_slice(&bytes))
}

pub(crate) fn decode_height(table: &'static str, row: &sqlx::postgres::PgRow, column: &str) -> StoreResult<u64> {
    let height: i64 = row
        .try_get(column)
        .map_err(StoreError::Database)?;
    u64::try_from(height).map_err(|_| StoreError::malformed(table, format!("negative {column}")))
}
