//! Lease rows: atomic claims, lifecycle transitions, reaping and gap scans.

use super::{decode_height, PostgresStore};
use crate::{traits::LeaseStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowidx_primitives::{HeightRange, Lease, LeaseStatus, WorkerKind};
use sqlx::Row;
use std::{str::FromStr, time::Duration};

const LEASE_COLUMNS: &str =
    "worker_type, from_height, to_height, leased_by, lease_expires_at, status, attempt, \
     last_error_id";

#[async_trait]
impl LeaseStore for PostgresStore {
    async fn try_claim(
        &self,
        worker: WorkerKind,
        range: HeightRange,
        leased_by: &str,
        ttl: Duration,
    ) -> StoreResult<Option<Lease>> {
        let expires_at =
            Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        // A single upsert covers every claimable case: a fresh range inserts
        // an ACTIVE row; a retryable FAILED row or an expired ACTIVE row is
        // taken over (expiry counts as one more attempt). COMPLETED rows,
        // live ACTIVE rows and dead-lettered rows fall through to no row.
        let row = sqlx::query(&format!(
            "INSERT INTO raw.leases \
             (worker_type, from_height, to_height, leased_by, lease_expires_at, status, attempt) \
             VALUES ($1, $2, $3, $4, $5, 'ACTIVE', 0) \
             ON CONFLICT (worker_type, from_height) DO UPDATE \
             SET status = 'ACTIVE', \
                 leased_by = EXCLUDED.leased_by, \
                 lease_expires_at = EXCLUDED.lease_expires_at, \
                 to_height = EXCLUDED.to_height, \
                 attempt = raw.leases.attempt \
                     + CASE WHEN raw.leases.status = 'ACTIVE' THEN 1 ELSE 0 END \
             WHERE (raw.leases.status = 'FAILED' AND raw.leases.attempt < $6) \
                OR (raw.leases.status = 'ACTIVE' AND raw.leases.lease_expires_at < now()) \
             RETURNING {LEASE_COLUMNS}"
        ))
        .bind(worker.as_static_str())
        .bind(range.start as i64)
        .bind(range.end as i64)
        .bind(leased_by)
        .bind(expires_at)
        .bind(Lease::DEAD_LETTER_ATTEMPTS as i32)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| decode_lease(&r)).transpose()
    }

    async fn complete_lease(&self, worker: WorkerKind, from_height: u64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE raw.leases SET status = 'COMPLETED' \
             WHERE worker_type = $1 AND from_height = $2",
        )
        .bind(worker.as_static_str())
        .bind(from_height as i64)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseNotFound { worker, from_height });
        }
        Ok(())
    }

    async fn fail_lease(
        &self,
        worker: WorkerKind,
        from_height: u64,
        error_id: Option<i64>,
    ) -> StoreResult<Lease> {
        let row = sqlx::query(&format!(
            "UPDATE raw.leases \
             SET status = 'FAILED', attempt = attempt + 1, \
                 last_error_id = COALESCE($3, last_error_id) \
             WHERE worker_type = $1 AND from_height = $2 \
             RETURNING {LEASE_COLUMNS}"
        ))
        .bind(worker.as_static_str())
        .bind(from_height as i64)
        .bind(error_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| decode_lease(&r))
            .transpose()?
            .ok_or(StoreError::LeaseNotFound { worker, from_height })
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Lease>> {
        let rows = sqlx::query(&format!(
            "UPDATE raw.leases SET status = 'FAILED', attempt = attempt + 1 \
             WHERE status = 'ACTIVE' AND lease_expires_at < $1 \
             RETURNING {LEASE_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(decode_lease).collect()
    }

    async fn lease_frontier(&self, worker: WorkerKind) -> StoreResult<Option<u64>> {
        let row =
            sqlx::query("SELECT MAX(to_height) AS frontier FROM raw.leases WHERE worker_type = $1")
                .bind(worker.as_static_str())
                .fetch_one(self.pool())
                .await?;
        let frontier: Option<i64> = row.get("frontier");
        Ok(frontier.map(|f| f as u64))
    }

    async fn find_gaps(&self, worker: WorkerKind, up_to: u64) -> StoreResult<Vec<HeightRange>> {
        // Window over completed leases ordered by from_height: a gap opens
        // wherever a lease starts past the previous lease's end.
        let rows = sqlx::query(
            "SELECT prev_end, from_height FROM ( \
                 SELECT from_height, \
                        LAG(to_height) OVER (ORDER BY from_height) AS prev_end \
                 FROM raw.leases \
                 WHERE worker_type = $1 AND status = 'COMPLETED' \
             ) windows \
             WHERE prev_end IS NOT NULL AND from_height > prev_end AND prev_end < $2 \
             ORDER BY prev_end",
        )
        .bind(worker.as_static_str())
        .bind(up_to as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                let start = decode_height("raw.leases", row, "prev_end")?;
                let end = decode_height("raw.leases", row, "from_height")?;
                Ok(HeightRange::new(start, end.min(up_to)))
            })
            .collect()
    }

    async fn leases_for(&self, worker: WorkerKind) -> StoreResult<Vec<Lease>> {
        let rows = sqlx::query(&format!(
            "SELECT {LEASE_COLUMNS} FROM raw.leases WHERE worker_type = $1 ORDER BY from_height"
        ))
        .bind(worker.as_static_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(decode_lease).collect()
    }
}

fn decode_lease(row: &sqlx::postgres::PgRow) -> StoreResult<Lease> {
    let worker: String = row.get("worker_type");
    let status: String = row.get("status");
    Ok(Lease {
        worker: WorkerKind::from_str(&worker)
            .map_err(|_| StoreError::malformed("raw.leases", format!("worker_type {worker}")))?,
        range: HeightRange::new(
            decode_height("raw.leases", row, "from_height")?,
            decode_height("raw.leases", row, "to_height")?,
        ),
        leased_by: row.get("leased_by"),
        expires_at: row.get("lease_expires_at"),
        status: LeaseStatus::from_str(&status)
            .map_err(|_| StoreError::malformed("raw.leases", format!("status {status}")))?,
        attempt: row.get::<i32, _>("attempt") as u32,
        last_error_id: row.get("last_error_id"),
    })
}
