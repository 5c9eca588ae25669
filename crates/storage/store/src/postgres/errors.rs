//! Deduplicated indexing error sink.

use super::PostgresStore;
use crate::{traits::ErrorStore, StoreResult};
use async_trait::async_trait;
use flowidx_primitives::{ErrorRecord, MAX_INLINE_PAYLOAD_BYTES};
use sqlx::Row;

#[async_trait]
impl ErrorStore for PostgresStore {
    async fn record_error(&self, record: &ErrorRecord) -> StoreResult<i64> {
        // Dedup key includes two nullable columns, so the lookup uses
        // IS NOT DISTINCT FROM rather than a conflict target.
        let existing = sqlx::query(
            "SELECT id FROM raw.indexing_errors \
             WHERE worker = $1 \
               AND block_height IS NOT DISTINCT FROM $2 \
               AND transaction_id IS NOT DISTINCT FROM $3 \
               AND error_hash = $4",
        )
        .bind(&record.worker)
        .bind(record.block_height.map(|h| h as i64))
        .bind(record.transaction_id.map(|id| id.as_slice().to_vec()))
        .bind(record.error_hash.as_slice())
        .fetch_optional(self.pool())
        .await?;
        if let Some(row) = existing {
            return Ok(row.get("id"));
        }

        let (payload, payload_ref) = match &record.payload {
            Some(payload) if payload.to_string().len() <= MAX_INLINE_PAYLOAD_BYTES => {
                (Some(payload.clone()), None)
            }
            Some(_) => {
                // Oversized payloads are offloaded; the row keeps a stable
                // reference derived from the dedup hash.
                (None, Some(format!("payload:{}", record.error_hash)))
            }
            None => (None, None),
        };

        let row = sqlx::query(
            "INSERT INTO raw.indexing_errors \
             (worker, block_height, transaction_id, error_hash, message, severity, resolved, \
              payload, payload_ref, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, false, $7, $8, $9) \
             RETURNING id",
        )
        .bind(&record.worker)
        .bind(record.block_height.map(|h| h as i64))
        .bind(record.transaction_id.map(|id| id.as_slice().to_vec()))
        .bind(record.error_hash.as_slice())
        .bind(&record.message)
        .bind(record.severity.to_string())
        .bind(payload)
        .bind(payload_ref)
        .bind(record.created_at)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("id"))
    }
}
