use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use flowidx_access::AccessApi;
use flowidx_primitives::{cadence::CadenceValue, EvmAddress, HeightRange, ServiceId, WorkerKind, B256};
use flowidx_store::{EvmTransaction, EvmTxHash, Store};
use tracing::debug;

/// Extracts embedded EVM transactions from `EVM.TransactionExecuted` events.
///
/// One Cadence transaction may carry several EVM executions; the emitting
/// event's index disambiguates them, and every EVM hash is mapped back to
/// its enclosing Cadence transaction.
#[derive(Debug, Default)]
pub struct EvmProcessor;

#[async_trait]
impl<S, A> Processor<S, A> for EvmProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::Evm
    }

    fn upstreams(&self) -> Vec<ServiceId> {
        vec![ServiceId::RawIngester]
    }

    async fn process(
        &self,
        ctx: &ProcessorContext<S, A>,
        range: HeightRange,
    ) -> Result<(), WorkerError> {
        let events = ctx.store.events_in_range(range).await?;
        let mut transactions = Vec::new();
        let mut hashes = Vec::new();

        for event in events.iter().filter(|e| {
            e.event_type.contract == "EVM" && e.event_type.name == "TransactionExecuted"
        }) {
            let Ok(payload) = event.decode_payload() else {
                debug!(
                    target: "workers::evm",
                    height = event.block_height, "skipping undecodable EVM event"
                );
                continue;
            };
            let Some(evm_hash) = evm_hash(&payload) else { continue };
            transactions.push(EvmTransaction {
                block_height: event.block_height,
                transaction_id: event.transaction_id,
                event_index: event.event_index,
                evm_hash,
                from: evm_address(&payload, "from"),
                to: evm_address(&payload, "to"),
                gas_used: payload.field_u64("gasConsumed").unwrap_or(0),
                error_code: payload.field_u64("errorCode").unwrap_or(0) as u16,
                timestamp: event.timestamp,
            });
            hashes.push(EvmTxHash {
                evm_hash,
                transaction_id: event.transaction_id,
                block_height: event.block_height,
                event_index: event.event_index,
            });
        }

        ctx.store.write_evm_transactions(&transactions).await?;
        ctx.store.write_evm_tx_hashes(&hashes).await?;
        Ok(())
    }
}

/// The EVM hash arrives as a hex string or a `[UInt8]` array depending on
/// protocol version.
fn evm_hash(payload: &CadenceValue) -> Option<B256> {
    match payload.field_flat("hash")? {
        CadenceValue::String(hex) => {
            let hex = hex.strip_prefix("0x").unwrap_or(hex);
            let bytes = flowidx_primitives::alloy_primitives::hex::decode(hex).ok()?;
            (bytes.len() == 32).then(|| B256::from_slice(&bytes))
        }
        CadenceValue::Array(items) => {
            let bytes: Option<Vec<u8>> =
                items.iter().map(|v| v.as_u64().map(|b| b as u8)).collect();
            let bytes = bytes?;
            (bytes.len() == 32).then(|| B256::from_slice(&bytes))
        }
        _ => None,
    }
}

fn evm_address(payload: &CadenceValue, field: &str) -> Option<EvmAddress> {
    let hex = payload.field_str(field)?;
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    let bytes = flowidx_primitives::alloy_primitives::hex::decode(hex).ok()?;
    (bytes.len() == 20).then(|| EvmAddress::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::{fixtures, MockAccessApi, MockChain};
    use flowidx_store::{MemoryStore, RawWriter};
    use serde_json::json;
    use std::sync::Arc;

    fn evm_event(height: u64, event_index: u32, hash_byte: u8) -> flowidx_primitives::Event {
        let hash = format!("0x{}", hex_repeat(hash_byte));
        fixtures::event(
            height,
            0,
            event_index,
            "A.e467b9dd11fa00df.EVM.TransactionExecuted",
            json!({
                "type": "Event",
                "value": {
                    "id": "A.e467b9dd11fa00df.EVM.TransactionExecuted",
                    "fields": [
                        {"name": "hash", "value": {"type": "String", "value": hash}},
                        {"name": "gasConsumed", "value": {"type": "UInt64", "value": "21000"}},
                        {"name": "errorCode", "value": {"type": "UInt16", "value": "0"}}
                    ]
                }
            }),
        )
    }

    fn hex_repeat(byte: u8) -> String {
        format!("{byte:02x}").repeat(32)
    }

    #[tokio::test]
    async fn multiple_evm_hashes_per_cadence_tx() {
        let store = Arc::new(MemoryStore::new());
        let tx = fixtures::tx_bundle(
            fixtures::transaction(10, 0, fixtures::address(1)),
            vec![evm_event(10, 0, 0xaa), evm_event(10, 1, 0xbb)],
        );
        store.insert_block(&fixtures::bundle_with(10, 0, vec![tx]), &[]).await.unwrap();

        let ctx =
            ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(MockChain::new())));
        EvmProcessor.process(&ctx, HeightRange::new(10, 11)).await.unwrap();

        // Both executions survive under the same Cadence transaction,
        // disambiguated by event index.
        let rows = store.all_evm_transactions();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].transaction_id, rows[1].transaction_id);
        assert_ne!(rows[0].evm_hash, rows[1].evm_hash);
        assert_eq!(rows[0].gas_used, 21_000);

        let hashes = store.all_evm_tx_hashes();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.iter().all(|h| h.transaction_id == rows[0].transaction_id));
    }

    #[tokio::test]
    async fn hash_decodes_from_byte_array_payloads() {
        let payload = json!({
            "type": "Event",
            "value": {
                "id": "A.e467b9dd11fa00df.EVM.TransactionExecuted",
                "fields": [
                    {"name": "hash", "value": {"type": "Array", "value":
                        (0..32).map(|_| json!({"type": "UInt8", "value": "7"}))
                            .collect::<Vec<_>>()
                    }},
                    {"name": "gasConsumed", "value": {"type": "UInt64", "value": "1"}}
                ]
            }
        });
        let event = fixtures::event(
            5,
            0,
            0,
            "A.e467b9dd11fa00df.EVM.TransactionExecuted",
            payload,
        );
        let decoded = event.decode_payload().unwrap();
        assert_eq!(evm_hash(&decoded), Some(B256::repeat_byte(7)));
    }
}
