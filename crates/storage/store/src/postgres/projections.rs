//! Idempotent writes and reads over the derived projection tables.

use super::{decode_address, decode_b256, decode_height, PostgresStore};
use crate::{
    traits::{ProjectionReader, ProjectionWriter},
    AccountKey, AccountSeen, AddressTransaction, ContractVersion, EvmTransaction, EvmTxHash,
    FtHolding, FtTransfer, HoldingDelta, KeyRevocation, NftItem, NftOwnership, NftTransfer,
    SmartContract, StoreResult, TokenClass, TokenMetadata, TxContract, TxMetrics, TxTag,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowidx_primitives::{Address, HeightRange, WorkerKind};
use sqlx::Row;

#[async_trait]
impl ProjectionWriter for PostgresStore {
    async fn write_ft_transfers(&self, rows: &[FtTransfer]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.ft_transfers \
                 (block_height, transaction_id, event_index, contract_address, contract_name, \
                  sender, recipient, amount, timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (block_height, transaction_id, event_index) DO NOTHING",
            )
            .bind(row.block_height as i64)
            .bind(row.transaction_id.as_slice())
            .bind(row.event_index as i32)
            .bind(row.contract_address.as_slice())
            .bind(&row.contract_name)
            .bind(row.sender.map(|a| a.as_slice().to_vec()))
            .bind(row.recipient.map(|a| a.as_slice().to_vec()))
            .bind(&row.amount)
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_nft_transfers(&self, rows: &[NftTransfer]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.nft_transfers \
                 (block_height, transaction_id, event_index, contract_address, contract_name, \
                  sender, recipient, nft_id, timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (block_height, transaction_id, event_index) DO NOTHING",
            )
            .bind(row.block_height as i64)
            .bind(row.transaction_id.as_slice())
            .bind(row.event_index as i32)
            .bind(row.contract_address.as_slice())
            .bind(&row.contract_name)
            .bind(row.sender.map(|a| a.as_slice().to_vec()))
            .bind(row.recipient.map(|a| a.as_slice().to_vec()))
            .bind(row.nft_id as i64)
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_address_transactions(&self, rows: &[AddressTransaction]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.address_transactions \
                 (address, block_height, transaction_id, role, timestamp) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (address, block_height, transaction_id, role) DO NOTHING",
            )
            .bind(row.address.as_slice())
            .bind(row.block_height as i64)
            .bind(row.transaction_id.as_slice())
            .bind(row.role.as_str())
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn touch_accounts(&self, rows: &[AccountSeen]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.accounts (address, first_seen_height, last_seen_height) \
                 VALUES ($1, $2, $2) \
                 ON CONFLICT (address) DO UPDATE \
                 SET first_seen_height = LEAST(app.accounts.first_seen_height, EXCLUDED.first_seen_height), \
                     last_seen_height = GREATEST(app.accounts.last_seen_height, EXCLUDED.last_seen_height)",
            )
            .bind(row.address.as_slice())
            .bind(row.height as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_account_keys(&self, rows: &[AccountKey]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.account_keys \
                 (address, key_index, public_key, weight, signing_algorithm, hash_algorithm, \
                  revoked, added_at_height, revoked_at_height) \
                 VALUES ($1, $2, $3, $4, $5, $6, false, $7, NULL) \
                 ON CONFLICT (address, key_index) DO UPDATE \
                 SET public_key = EXCLUDED.public_key, weight = EXCLUDED.weight, \
                     signing_algorithm = EXCLUDED.signing_algorithm, \
                     hash_algorithm = EXCLUDED.hash_algorithm, revoked = false, \
                     added_at_height = EXCLUDED.added_at_height, revoked_at_height = NULL \
                 WHERE app.account_keys.added_at_height <= EXCLUDED.added_at_height",
            )
            .bind(row.address.as_slice())
            .bind(row.key_index as i32)
            .bind(&row.public_key)
            .bind(row.weight as i32)
            .bind(row.signing_algorithm as i32)
            .bind(row.hash_algorithm as i32)
            .bind(row.added_at_height as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn revoke_account_keys(&self, rows: &[KeyRevocation]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "UPDATE app.account_keys SET revoked = true, revoked_at_height = $3 \
                 WHERE address = $1 AND key_index = $2 AND added_at_height <= $3",
            )
            .bind(row.address.as_slice())
            .bind(row.key_index as i32)
            .bind(row.height as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn apply_holding_deltas(&self, rows: &[HoldingDelta]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            // The last_height guard makes replays of the same fold a no-op.
            sqlx::query(
                "INSERT INTO app.ft_holdings \
                 (address, contract_address, contract_name, balance, last_height) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (address, contract_address, contract_name) DO UPDATE \
                 SET balance = app.ft_holdings.balance + EXCLUDED.balance, \
                     last_height = EXCLUDED.last_height \
                 WHERE app.ft_holdings.last_height < EXCLUDED.last_height",
            )
            .bind(row.address.as_slice())
            .bind(row.contract_address.as_slice())
            .bind(&row.contract_name)
            .bind(&row.delta)
            .bind(row.height as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_nft_ownerships(&self, rows: &[NftOwnership]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            // Stale out-of-order writes fall through the height guard.
            sqlx::query(
                "INSERT INTO app.nft_ownership \
                 (contract_address, contract_name, nft_id, owner, last_height) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (contract_address, contract_name, nft_id) DO UPDATE \
                 SET owner = EXCLUDED.owner, last_height = EXCLUDED.last_height \
                 WHERE app.nft_ownership.last_height <= EXCLUDED.last_height",
            )
            .bind(row.contract_address.as_slice())
            .bind(&row.contract_name)
            .bind(row.nft_id as i64)
            .bind(row.owner.map(|a| a.as_slice().to_vec()))
            .bind(row.last_height as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_smart_contracts(&self, rows: &[SmartContract]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.smart_contracts (address, name, last_height) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (address, name) DO UPDATE \
                 SET last_height = EXCLUDED.last_height \
                 WHERE app.smart_contracts.last_height <= EXCLUDED.last_height",
            )
            .bind(row.address.as_slice())
            .bind(&row.name)
            .bind(row.last_height as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_contract_versions(&self, rows: &[ContractVersion]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.contract_versions (address, name, block_height, change) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (address, name, block_height) DO NOTHING",
            )
            .bind(row.address.as_slice())
            .bind(&row.name)
            .bind(row.block_height as i64)
            .bind(row.change.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_evm_transactions(&self, rows: &[EvmTransaction]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.evm_transactions \
                 (block_height, transaction_id, event_index, evm_hash, \"from\", \"to\", \
                  gas_used, error_code, timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (block_height, transaction_id, event_index) DO NOTHING",
            )
            .bind(row.block_height as i64)
            .bind(row.transaction_id.as_slice())
            .bind(row.event_index as i32)
            .bind(row.evm_hash.as_slice())
            .bind(row.from.map(|a| a.as_slice().to_vec()))
            .bind(row.to.map(|a| a.as_slice().to_vec()))
            .bind(row.gas_used as i64)
            .bind(row.error_code as i32)
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_evm_tx_hashes(&self, rows: &[EvmTxHash]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.evm_tx_hashes \
                 (evm_hash, transaction_id, block_height, event_index) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (evm_hash, transaction_id, event_index) DO NOTHING",
            )
            .bind(row.evm_hash.as_slice())
            .bind(row.transaction_id.as_slice())
            .bind(row.block_height as i64)
            .bind(row.event_index as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_tx_contracts(&self, rows: &[TxContract]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.tx_contracts \
                 (block_height, transaction_id, contract_address, contract_name) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (block_height, transaction_id, contract_address, contract_name) \
                 DO NOTHING",
            )
            .bind(row.block_height as i64)
            .bind(row.transaction_id.as_slice())
            .bind(row.contract_address.as_slice())
            .bind(&row.contract_name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_tx_tags(&self, rows: &[TxTag]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.tx_tags (block_height, transaction_id, tag) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (block_height, transaction_id, tag) DO NOTHING",
            )
            .bind(row.block_height as i64)
            .bind(row.transaction_id.as_slice())
            .bind(&row.tag)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write_tx_metrics(&self, rows: &[TxMetrics]) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO app.tx_metrics \
                 (block_height, transaction_id, fee, gas_used, gas_limit, execution_effort) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (block_height, transaction_id) DO NOTHING",
            )
            .bind(row.block_height as i64)
            .bind(row.transaction_id.as_slice())
            .bind(&row.fee)
            .bind(row.gas_used as i64)
            .bind(row.gas_limit as i64)
            .bind(row.execution_effort.as_ref())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_token_metadata(&self, row: &TokenMetadata) -> StoreResult<()> {
        match row.token_class {
            TokenClass::Fungible => {
                sqlx::query(
                    "INSERT INTO app.ft_tokens \
                     (contract_address, contract_name, name, symbol, decimals, extras, retries, \
                      refetch_after, fetched) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                     ON CONFLICT (contract_address, contract_name) DO UPDATE \
                     SET name = EXCLUDED.name, symbol = EXCLUDED.symbol, \
                         decimals = EXCLUDED.decimals, extras = EXCLUDED.extras, \
                         retries = EXCLUDED.retries, refetch_after = EXCLUDED.refetch_after, \
                         fetched = EXCLUDED.fetched",
                )
                .bind(row.contract_address.as_slice())
                .bind(&row.contract_name)
                .bind(row.name.as_deref())
                .bind(row.symbol.as_deref())
                .bind(row.decimals.map(|d| d as i16))
                .bind(&row.extras)
                .bind(row.retries as i32)
                .bind(row.refetch_after)
                .bind(row.fetched)
                .execute(self.pool())
                .await?;
            }
            TokenClass::NonFungible => {
                sqlx::query(
                    "INSERT INTO app.nft_collections \
                     (contract_address, contract_name, name, symbol, extras, retries, \
                      refetch_after, fetched) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (contract_address, contract_name) DO UPDATE \
                     SET name = EXCLUDED.name, symbol = EXCLUDED.symbol, \
                         extras = EXCLUDED.extras, retries = EXCLUDED.retries, \
                         refetch_after = EXCLUDED.refetch_after, fetched = EXCLUDED.fetched",
                )
                .bind(row.contract_address.as_slice())
                .bind(&row.contract_name)
                .bind(row.name.as_deref())
                .bind(row.symbol.as_deref())
                .bind(&row.extras)
                .bind(row.retries as i32)
                .bind(row.refetch_after)
                .bind(row.fetched)
                .execute(self.pool())
                .await?;
            }
        }
        Ok(())
    }

    async fn bump_token_metadata_retry(
        &self,
        contract_address: Address,
        contract_name: &str,
        refetch_after: DateTime<Utc>,
    ) -> StoreResult<()> {
        // The contract lives in exactly one of the two metadata tables.
        for table in ["app.ft_tokens", "app.nft_collections"] {
            sqlx::query(&format!(
                "UPDATE {table} SET retries = retries + 1, refetch_after = $3 \
                 WHERE contract_address = $1 AND contract_name = $2"
            ))
            .bind(contract_address.as_slice())
            .bind(contract_name)
            .bind(refetch_after)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    async fn upsert_nft_item(&self, row: &NftItem) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO app.nft_items \
             (contract_address, contract_name, nft_id, name, description, thumbnail, extras, \
              retries, refetch_after, fetched) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (contract_address, contract_name, nft_id) DO UPDATE \
             SET name = EXCLUDED.name, description = EXCLUDED.description, \
                 thumbnail = EXCLUDED.thumbnail, extras = EXCLUDED.extras, \
                 retries = EXCLUDED.retries, refetch_after = EXCLUDED.refetch_after, \
                 fetched = EXCLUDED.fetched",
        )
        .bind(row.contract_address.as_slice())
        .bind(&row.contract_name)
        .bind(row.nft_id as i64)
        .bind(row.name.as_deref())
        .bind(row.description.as_deref())
        .bind(row.thumbnail.as_deref())
        .bind(&row.extras)
        .bind(row.retries as i32)
        .bind(row.refetch_after)
        .bind(row.fetched)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn bump_nft_item_retry(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
        refetch_after: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE app.nft_items SET retries = retries + 1, refetch_after = $4 \
             WHERE contract_address = $1 AND contract_name = $2 AND nft_id = $3",
        )
        .bind(contract_address.as_slice())
        .bind(contract_name)
        .bind(nft_id as i64)
        .bind(refetch_after)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn delete_projection_rows(
        &self,
        worker: WorkerKind,
        range: HeightRange,
    ) -> StoreResult<()> {
        // Height-keyed tables drop by block_height; fold tables drop rows
        // whose last applied height falls in the range so a re-run rebuilds
        // them from scratch.
        let statements: &[&str] = match worker {
            WorkerKind::Token => &[
                "DELETE FROM app.ft_transfers WHERE block_height >= $1 AND block_height < $2",
                "DELETE FROM app.nft_transfers WHERE block_height >= $1 AND block_height < $2",
            ],
            WorkerKind::Meta => &[
                "DELETE FROM app.address_transactions \
                 WHERE block_height >= $1 AND block_height < $2",
            ],
            WorkerKind::Accounts => &[
                "DELETE FROM app.account_keys \
                 WHERE added_at_height >= $1 AND added_at_height < $2",
                "DELETE FROM app.contract_versions \
                 WHERE block_height >= $1 AND block_height < $2",
                "DELETE FROM app.smart_contracts WHERE last_height >= $1 AND last_height < $2",
            ],
            WorkerKind::FtHoldings => {
                &["DELETE FROM app.ft_holdings WHERE last_height >= $1 AND last_height < $2"]
            }
            WorkerKind::NftOwnership => {
                &["DELETE FROM app.nft_ownership WHERE last_height >= $1 AND last_height < $2"]
            }
            WorkerKind::TokenMetadata => &[],
            WorkerKind::TxContracts => &[
                "DELETE FROM app.tx_contracts WHERE block_height >= $1 AND block_height < $2",
                "DELETE FROM app.tx_tags WHERE block_height >= $1 AND block_height < $2",
            ],
            WorkerKind::TxMetrics => {
                &["DELETE FROM app.tx_metrics WHERE block_height >= $1 AND block_height < $2"]
            }
            WorkerKind::Evm => &[
                "DELETE FROM app.evm_transactions WHERE block_height >= $1 AND block_height < $2",
                "DELETE FROM app.evm_tx_hashes WHERE block_height >= $1 AND block_height < $2",
            ],
        };
        let mut tx = self.pool().begin().await?;
        for statement in statements {
            sqlx::query(statement)
                .bind(range.start as i64)
                .bind(range.end as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectionReader for PostgresStore {
    async fn ft_transfers_in_range(&self, range: HeightRange) -> StoreResult<Vec<FtTransfer>> {
        let rows = sqlx::query(
            "SELECT block_height, transaction_id, event_index, contract_address, contract_name, \
             sender, recipient, amount, timestamp \
             FROM app.ft_transfers WHERE block_height >= $1 AND block_height < $2 \
             ORDER BY block_height, transaction_id, event_index",
        )
        .bind(range.start as i64)
        .bind(range.end as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(FtTransfer {
                    block_height: decode_height("app.ft_transfers", row, "block_height")?,
                    transaction_id: decode_b256("app.ft_transfers", row.get("transaction_id"))?,
                    event_index: row.get::<i32, _>("event_index") as u32,
                    contract_address: decode_address(
                        "app.ft_transfers",
                        row.get("contract_address"),
                    )?,
                    contract_name: row.get("contract_name"),
                    sender: decode_opt_address("app.ft_transfers", row.get("sender"))?,
                    recipient: decode_opt_address("app.ft_transfers", row.get("recipient"))?,
                    amount: row.get("amount"),
                    timestamp: row.get("timestamp"),
                })
            })
            .collect()
    }

    async fn nft_transfers_in_range(&self, range: HeightRange) -> StoreResult<Vec<NftTransfer>> {
        let rows = sqlx::query(
            "SELECT block_height, transaction_id, event_index, contract_address, contract_name, \
             sender, recipient, nft_id, timestamp \
             FROM app.nft_transfers WHERE block_height >= $1 AND block_height < $2 \
             ORDER BY block_height, transaction_id, event_index",
        )
        .bind(range.start as i64)
        .bind(range.end as i64)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(NftTransfer {
                    block_height: decode_height("app.nft_transfers", row, "block_height")?,
                    transaction_id: decode_b256("app.nft_transfers", row.get("transaction_id"))?,
                    event_index: row.get::<i32, _>("event_index") as u32,
                    contract_address: decode_address(
                        "app.nft_transfers",
                        row.get("contract_address"),
                    )?,
                    contract_name: row.get("contract_name"),
                    sender: decode_opt_address("app.nft_transfers", row.get("sender"))?,
                    recipient: decode_opt_address("app.nft_transfers", row.get("recipient"))?,
                    nft_id: row.get::<i64, _>("nft_id") as u64,
                    timestamp: row.get("timestamp"),
                })
            })
            .collect()
    }

    async fn ft_holding(
        &self,
        address: Address,
        contract_address: Address,
        contract_name: &str,
    ) -> StoreResult<Option<FtHolding>> {
        let row = sqlx::query(
            "SELECT balance, last_height FROM app.ft_holdings \
             WHERE address = $1 AND contract_address = $2 AND contract_name = $3",
        )
        .bind(address.as_slice())
        .bind(contract_address.as_slice())
        .bind(contract_name)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| {
            Ok(FtHolding {
                address,
                contract_address,
                contract_name: contract_name.to_owned(),
                balance: r.get("balance"),
                last_height: decode_height("app.ft_holdings", &r, "last_height")?,
            })
        })
        .transpose()
    }

    async fn nft_ownership(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
    ) -> StoreResult<Option<NftOwnership>> {
        let row = sqlx::query(
            "SELECT owner, last_height FROM app.nft_ownership \
             WHERE contract_address = $1 AND contract_name = $2 AND nft_id = $3",
        )
        .bind(contract_address.as_slice())
        .bind(contract_name)
        .bind(nft_id as i64)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| {
            Ok(NftOwnership {
                contract_address,
                contract_name: contract_name.to_owned(),
                nft_id,
                owner: decode_opt_address("app.nft_ownership", r.get("owner"))?,
                last_height: decode_height("app.nft_ownership", &r, "last_height")?,
            })
        })
        .transpose()
    }

    async fn token_metadata(
        &self,
        contract_address: Address,
        contract_name: &str,
    ) -> StoreResult<Option<TokenMetadata>> {
        let ft = sqlx::query(
            "SELECT name, symbol, decimals, extras, retries, refetch_after, fetched \
             FROM app.ft_tokens WHERE contract_address = $1 AND contract_name = $2",
        )
        .bind(contract_address.as_slice())
        .bind(contract_name)
        .fetch_optional(self.pool())
        .await?;
        if let Some(row) = ft {
            return Ok(Some(TokenMetadata {
                contract_address,
                contract_name: contract_name.to_owned(),
                token_class: TokenClass::Fungible,
                name: row.get("name"),
                symbol: row.get("symbol"),
                decimals: row.get::<Option<i16>, _>("decimals").map(|d| d as u8),
                extras: row.get("extras"),
                retries: row.get::<i32, _>("retries") as u32,
                refetch_after: row.get("refetch_after"),
                fetched: row.get("fetched"),
            }));
        }
        let nft = sqlx::query(
            "SELECT name, symbol, extras, retries, refetch_after, fetched \
             FROM app.nft_collections WHERE contract_address = $1 AND contract_name = $2",
        )
        .bind(contract_address.as_slice())
        .bind(contract_name)
        .fetch_optional(self.pool())
        .await?;
        Ok(nft.map(|row| TokenMetadata {
            contract_address,
            contract_name: contract_name.to_owned(),
            token_class: TokenClass::NonFungible,
            name: row.get("name"),
            symbol: row.get("symbol"),
            decimals: None,
            extras: row.get("extras"),
            retries: row.get::<i32, _>("retries") as u32,
            refetch_after: row.get("refetch_after"),
            fetched: row.get("fetched"),
        }))
    }

    async fn nft_item(
        &self,
        contract_address: Address,
        contract_name: &str,
        nft_id: u64,
    ) -> StoreResult<Option<NftItem>> {
        let row = sqlx::query(
            "SELECT name, description, thumbnail, extras, retries, refetch_after, fetched \
             FROM app.nft_items \
             WHERE contract_address = $1 AND contract_name = $2 AND nft_id = $3",
        )
        .bind(contract_address.as_slice())
        .bind(contract_name)
        .bind(nft_id as i64)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| NftItem {
            contract_address,
            contract_name: contract_name.to_owned(),
            nft_id,
            name: r.get("name"),
            description: r.get("description"),
            thumbnail: r.get("thumbnail"),
            extras: r.get("extras"),
            retries: r.get::<i32, _>("retries") as u32,
            refetch_after: r.get("refetch_after"),
            fetched: r.get("fetched"),
        }))
    }

    async fn account_key(
        &self,
        address: Address,
        key_index: u32,
    ) -> StoreResult<Option<AccountKey>> {
        let row = sqlx::query(
            "SELECT public_key, weight, signing_algorithm, hash_algorithm, revoked, \
             added_at_height, revoked_at_height \
             FROM app.account_keys WHERE address = $1 AND key_index = $2",
        )
        .bind(address.as_slice())
        .bind(key_index as i32)
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| {
            Ok(AccountKey {
                address,
                key_index,
                public_key: r.get("public_key"),
                weight: r.get::<i32, _>("weight") as u32,
                signing_algorithm: r.get::<i32, _>("signing_algorithm") as u32,
                hash_algorithm: r.get::<i32, _>("hash_algorithm") as u32,
                revoked: r.get("revoked"),
                added_at_height: decode_height("app.account_keys", &r, "added_at_height")?,
                revoked_at_height: r
                    .get::<Option<i64>, _>("revoked_at_height")
                    .map(|h| h as u64),
            })
        })
        .transpose()
    }
}

fn decode_opt_address(
    table: &'static str,
    bytes: Option<Vec<u8>>,
) -> StoreResult<Option<Address>> {
    bytes.map(|b| decode_address(table, b)).transpose()
}
