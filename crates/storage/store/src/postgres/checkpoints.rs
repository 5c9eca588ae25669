//! Checkpoint reads and transitions.

use super::{decode_height, PostgresStore};
use crate::{traits::CheckpointStore, StoreResult};
use async_trait::async_trait;
use flowidx_primitives::{Checkpoint, ServiceId};
use sqlx::Row;

#[async_trait]
impl CheckpointStore for PostgresStore {
    async fn checkpoint(&self, service: ServiceId) -> StoreResult<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT last_height, subcursor, updated_at FROM raw.checkpoints \
             WHERE service_name = $1",
        )
        .bind(service.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| {
            Ok(Checkpoint {
                service,
                height: decode_height("raw.checkpoints", &r, "last_height")?,
                subcursor: r.get("subcursor"),
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }

    async fn checkpoint_height(&self, service: ServiceId) -> StoreResult<Option<u64>> {
        let row =
            sqlx::query("SELECT last_height FROM raw.checkpoints WHERE service_name = $1")
                .bind(service.as_str())
                .fetch_optional(self.pool())
                .await?;
        row.map(|r| decode_height("raw.checkpoints", &r, "last_height")).transpose()
    }

    async fn advance_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO raw.checkpoints (service_name, last_height, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (service_name) DO UPDATE \
             SET last_height = GREATEST(raw.checkpoints.last_height, EXCLUDED.last_height), \
                 updated_at = now()",
        )
        .bind(service.as_str())
        .bind(height as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn set_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO raw.checkpoints (service_name, last_height, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (service_name) DO UPDATE \
             SET last_height = EXCLUDED.last_height, updated_at = now()",
        )
        .bind(service.as_str())
        .bind(height as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn clamp_checkpoint(&self, service: ServiceId, height: u64) -> StoreResult<()> {
        // Clamp reduces, never resets to zero.
        let height = height.max(1);
        sqlx::query(
            "UPDATE raw.checkpoints SET last_height = LEAST(last_height, $2), updated_at = now() \
             WHERE service_name = $1",
        )
        .bind(service.as_str())
        .bind(height as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn set_subcursor(
        &self,
        service: ServiceId,
        subcursor: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE raw.checkpoints SET subcursor = $2, updated_at = now() \
             WHERE service_name = $1",
        )
        .bind(service.as_str())
        .bind(subcursor)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
