//! Raw table writes and reads.

use super::{decode_address, decode_b256, decode_height, PostgresStore};
use crate::{
    traits::{RawReader, RawWriter},
    ScriptRow, StoreError, StoreResult,
};
use async_trait::async_trait;
use flowidx_primitives::{
    Block, BlockBundle, Event, EventType, HeightRange, Transaction, TransactionStatus, B256,
};
use sqlx::Row;
use std::str::FromStr;
use tracing::trace;

#[async_trait]
impl RawWriter for PostgresStore {
    async fn insert_block(&self, bundle: &BlockBundle, scripts: &[ScriptRow]) -> StoreResult<()> {
        self.ensure_partitions(bundle.block.height).await?;
        let mut tx = self.pool().begin().await?;

        let block = &bundle.block;
        sqlx::query(
            "INSERT INTO raw.blocks \
             (height, id, parent_id, timestamp, is_sealed, tx_count, event_count, gas_used, \
              collection_guarantees, block_seals, signatures) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (height) DO NOTHING",
        )
        .bind(block.height as i64)
        .bind(block.id.as_slice())
        .bind(block.parent_id.as_slice())
        .bind(block.timestamp)
        .bind(block.is_sealed)
        .bind(block.tx_count as i64)
        .bind(block.event_count as i64)
        .bind(block.gas_used as i64)
        .bind(&block.collection_guarantees)
        .bind(&block.block_seals)
        .bind(&block.signatures)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO raw.block_lookup (id, height) VALUES ($1, $2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(block.id.as_slice())
        .bind(block.height as i64)
        .execute(&mut *tx)
        .await?;

        for bundle_tx in &bundle.transactions {
            let t = &bundle_tx.transaction;
            let authorizers: Vec<Vec<u8>> =
                t.authorizers.iter().map(|a| a.as_slice().to_vec()).collect();
            sqlx::query(
                "INSERT INTO raw.transactions \
                 (block_height, id, transaction_index, proposer, payer, authorizers, script, \
                  script_hash, arguments, status, gas_limit, gas_used, event_count, is_evm, \
                  timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
                 ON CONFLICT (block_height, id) DO NOTHING",
            )
            .bind(t.block_height as i64)
            .bind(t.id.as_slice())
            .bind(t.transaction_index as i32)
            .bind(t.proposer.as_slice())
            .bind(t.payer.as_slice())
            .bind(&authorizers)
            .bind(t.script.as_deref())
            .bind(t.script_hash.map(|h| h.as_slice().to_vec()))
            .bind(&t.arguments)
            .bind(t.status.to_string())
            .bind(t.gas_limit as i64)
            .bind(t.gas_used as i64)
            .bind(t.event_count as i64)
            .bind(t.is_evm)
            .bind(t.timestamp)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO raw.tx_lookup (id, block_height) VALUES ($1, $2) \
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(t.id.as_slice())
            .bind(t.block_height as i64)
            .execute(&mut *tx)
            .await?;

            for event in &bundle_tx.events {
                sqlx::query(
                    "INSERT INTO raw.events \
                     (block_height, transaction_id, transaction_index, event_index, type, \
                      contract_address, event_name, payload, timestamp) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                     ON CONFLICT (block_height, transaction_id, event_index) DO NOTHING",
                )
                .bind(event.block_height as i64)
                .bind(event.transaction_id.as_slice())
                .bind(event.transaction_index as i32)
                .bind(event.event_index as i32)
                .bind(event.event_type.qualified())
                .bind(event.event_type.contract_address.map(|a| a.as_slice().to_vec()))
                .bind(&event.event_type.name)
                .bind(&event.payload)
                .bind(event.timestamp)
                .execute(&mut *tx)
                .await?;
            }
        }

        for script in scripts {
            sqlx::query(
                "INSERT INTO raw.scripts (hash, text) VALUES ($1, $2) \
                 ON CONFLICT (hash) DO NOTHING",
            )
            .bind(script.hash.as_slice())
            .bind(&script.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        trace!(target: "store", height = bundle.block.height, "inserted block bundle");
        Ok(())
    }

    async fn delete_blocks(&self, range: HeightRange) -> StoreResult<u64> {
        let mut tx = self.pool().begin().await?;
        let (start, end) = (range.start as i64, range.end as i64);

        sqlx::query("DELETE FROM raw.events WHERE block_height >= $1 AND block_height < $2")
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM raw.tx_lookup WHERE block_height >= $1 AND block_height < $2")
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM raw.transactions WHERE block_height >= $1 AND block_height < $2")
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM raw.block_lookup WHERE height >= $1 AND height < $2")
            .bind(start)
            .bind(end)
            .execute(&mut *tx)
            .await?;
        let deleted =
            sqlx::query("DELETE FROM raw.blocks WHERE height >= $1 AND height < $2")
                .bind(start)
                .bind(end)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }
}

#[async_trait]
impl RawReader for PostgresStore {
    async fn block_id_at(&self, height: u64) -> StoreResult<Option<B256>> {
        let row = sqlx::query("SELECT id FROM raw.blocks WHERE height = $1")
            .bind(height as i64)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| decode_b256("raw.blocks", r.get("id"))).transpose()
    }

    async fn block_by_height(&self, height: u64) -> StoreResult<Option<Block>> {
        let row = sqlx::query(
            "SELECT height, id, parent_id, timestamp, is_sealed, tx_count, event_count, \
             gas_used, collection_guarantees, block_seals, signatures \
             FROM raw.blocks WHERE height = $1",
        )
        .bind(height as i64)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| decode_block(&r)).transpose()
    }

    async fn highest_block(&self) -> StoreResult<Option<u64>> {
        let row = sqlx::query("SELECT MAX(height) AS height FROM raw.blocks")
            .fetch_one(self.pool())
            .await?;
        let height: Option<i64> = row.get("height");
        Ok(height.map(|h| h as u64))
    }

    async fn lowest_block(&self) -> StoreResult<Option<u64>> {
        let row = sqlx::query("SELECT MIN(height) AS height FROM raw.blocks")
            .fetch_one(self.pool())
            .await?;
        let height: Option<i64> = row.get("height");
        Ok(height.map(|h| h as u64))
    }

    async fn transactions_in_range(&self, range: HeightRange) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(
            "SELECT block_height, id, transaction_index, proposer, payer, authorizers, script, \
             script_hash, arguments, status, gas_limit, gas_used, event_count, is_evm, timestamp \
             FROM raw.transactions WHERE block_height >= $1 AND block_height < $2 \
             ORDER BY block_height, transaction_index",
        )
        .bind(range.start as i64)
        .bind(range.end as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(decode_transaction).collect()
    }

    async fn events_in_range(&self, range: HeightRange) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT block_height, transaction_id, transaction_index, event_index, type, \
             payload, timestamp \
             FROM raw.events WHERE block_height >= $1 AND block_height < $2 \
             ORDER BY block_height, transaction_index, event_index",
        )
        .bind(range.start as i64)
        .bind(range.end as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(decode_event).collect()
    }

    async fn script_by_hash(&self, hash: B256) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT text FROM raw.scripts WHERE hash = $1")
            .bind(hash.as_slice())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get("text")))
    }
}

fn decode_block(row: &sqlx::postgres::PgRow) -> StoreResult<Block> {
    Ok(Block {
        height: decode_height("raw.blocks", row, "height")?,
        id: decode_b256("raw.blocks", row.get("id"))?,
        parent_id: decode_b256("raw.blocks", row.get("parent_id"))?,
        timestamp: row.get("timestamp"),
        is_sealed: row.get("is_sealed"),
        tx_count: row.get::<i64, _>("tx_count") as u64,
        event_count: row.get::<i64, _>("event_count") as u64,
        gas_used: row.get::<i64, _>("gas_used") as u64,
        collection_guarantees: row.get("collection_guarantees"),
        block_seals: row.get("block_seals"),
        signatures: row.get("signatures"),
    })
}

fn decode_transaction(row: &sqlx::postgres::PgRow) -> StoreResult<Transaction> {
    let authorizers: Vec<Vec<u8>> = row.get("authorizers");
    let status: String = row.get("status");
    Ok(Transaction {
        block_height: decode_height("raw.transactions", row, "block_height")?,
        id: decode_b256("raw.transactions", row.get("id"))?,
        transaction_index: row.get::<i32, _>("transaction_index") as u32,
        proposer: decode_address("raw.transactions", row.get("proposer"))?,
        payer: decode_address("raw.transactions", row.get("payer"))?,
        authorizers: authorizers
            .into_iter()
            .map(|a| decode_address("raw.transactions", a))
            .collect::<StoreResult<Vec<_>>>()?,
        script: row.get("script"),
        script_hash: row
            .get::<Option<Vec<u8>>, _>("script_hash")
            .map(|h| decode_b256("raw.transactions", h))
            .transpose()?,
        arguments: row.get("arguments"),
        status: TransactionStatus::from_str(&status)
            .map_err(|_| StoreError::malformed("raw.transactions", format!("status {status}")))?,
        gas_limit: row.get::<i64, _>("gas_limit") as u64,
        gas_used: row.get::<i64, _>("gas_used") as u64,
        event_count: row.get::<i64, _>("event_count") as u64,
        is_evm: row.get("is_evm"),
        timestamp: row.get("timestamp"),
    })
}

fn decode_event(row: &sqlx::postgres::PgRow) -> StoreResult<Event> {
    let type_tag: String = row.get("type");
    Ok(Event {
        block_height: decode_height("raw.events", row, "block_height")?,
        transaction_id: decode_b256("raw.events", row.get("transaction_id"))?,
        transaction_index: row.get::<i32, _>("transaction_index") as u32,
        event_index: row.get::<i32, _>("event_index") as u32,
        event_type: EventType::from_str(&type_tag)
            .map_err(|e| StoreError::malformed("raw.events", e.to_string()))?,
        payload: row.get("payload"),
        timestamp: row.get("timestamp"),
    })
}
