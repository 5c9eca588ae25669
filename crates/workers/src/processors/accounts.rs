use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use flowidx_access::AccessApi;
use flowidx_primitives::{cadence::CadenceValue, Event, HeightRange, ServiceId, WorkerKind};
use flowidx_store::{
    AccountKey, ContractChange, ContractVersion, KeyRevocation, SmartContract, Store,
};
use tracing::debug;

/// Maintains the account key audit trail and the contract registry from
/// `flow.*` service events.
///
/// Key rows survive removal with `revoked = true`; contract changes append
/// one `contract_versions` row per deployment or update.
#[derive(Debug, Default)]
pub struct AccountsProcessor;

#[async_trait]
impl<S, A> Processor<S, A> for AccountsProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::Accounts
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
        let mut added = Vec::new();
        let mut revoked = Vec::new();
        let mut contracts = Vec::new();
        let mut versions = Vec::new();

        for event in events.iter().filter(|e| e.event_type.is_service_event()) {
            let Ok(payload) = event.decode_payload() else {
                debug!(
                    target: "workers::accounts",
                    height = event.block_height, name = %event.event_type.name,
                    "skipping undecodable service event"
                );
                continue;
            };
            match event.event_type.name.as_str() {
                "AccountKeyAdded" => {
                    if let Some(key) = decode_key_added(event, &payload) {
                        added.push(key);
                    }
                }
                "AccountKeyRemoved" => {
                    if let Some(address) = payload.field_address("address") {
                        revoked.push(KeyRevocation {
                            address,
                            key_index: key_index(&payload),
                            height: event.block_height,
                        });
                    }
                }
                "AccountContractAdded" | "AccountContractUpdated" | "AccountContractRemoved" => {
                    let Some(address) = payload.field_address("address") else { continue };
                    let Some(name) = payload.field_str("contract") else { continue };
                    let change = match event.event_type.name.as_str() {
                        "AccountContractAdded" => ContractChange::Added,
                        "AccountContractUpdated" => ContractChange::Updated,
                        _ => ContractChange::Removed,
                    };
                    contracts.push(SmartContract {
                        address,
                        name: name.to_owned(),
                        last_height: event.block_height,
                    });
                    versions.push(ContractVersion {
                        address,
                        name: name.to_owned(),
                        block_height: event.block_height,
                        change,
                    });
                }
                _ => {}
            }
        }

        ctx.store.write_account_keys(&added).await?;
        ctx.store.revoke_account_keys(&revoked).await?;
        ctx.store.write_smart_contracts(&contracts).await?;
        ctx.store.write_contract_versions(&versions).await?;
        Ok(())
    }
}

fn key_index(payload: &CadenceValue) -> u32 {
    payload
        .field_u64("keyIndex")
        .or_else(|| payload.field_u64("index"))
        .unwrap_or(0) as u32
}

fn decode_key_added(event: &Event, payload: &CadenceValue) -> Option<AccountKey> {
    let address = payload.field_address("address")?;
    // The key material arrives either flattened or nested under a
    // `publicKey` struct, depending on protocol version.
    let nested = payload.field_flat("publicKey");
    let public_key = payload
        .field_str("publicKey")
        .or_else(|| nested.and_then(|k| k.field_str("publicKey")))
        .unwrap_or_default()
        .to_owned();
    let weight = payload
        .field_decimal("weight")
        .or_else(|| nested.and_then(|k| k.field_decimal("weight")))
        .map(|w| bigdecimal_to_u32(&w))
        .unwrap_or(0);
    let signing_algorithm = algorithm(payload, nested, "signatureAlgorithm");
    let hash_algorithm = algorithm(payload, nested, "hashAlgorithm");
    Some(AccountKey {
        address,
        key_index: key_index(payload),
        public_key,
        weight,
        signing_algorithm,
        hash_algorithm,
        revoked: false,
        added_at_height: event.block_height,
        revoked_at_height: None,
    })
}

fn algorithm(payload: &CadenceValue, nested: Option<&CadenceValue>, field: &str) -> u32 {
    let value = payload.field_flat(field).or_else(|| nested.and_then(|k| k.field_flat(field)));
    match value {
        Some(value) => value
            .as_u64()
            .or_else(|| value.field_u64("rawValue"))
            .unwrap_or(0) as u32,
        None => 0,
    }
}

fn bigdecimal_to_u32(value: &bigdecimal::BigDecimal) -> u32 {
    use bigdecimal::ToPrimitive;
    value.to_u32().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::{fixtures, MockAccessApi, MockChain};
    use flowidx_store::{MemoryStore, ProjectionReader, RawWriter};
    use serde_json::json;
    use std::sync::Arc;

    fn key_added(height: u64, index: u32, addr: &str, weight: &str) -> Event {
        fixtures::event(
            height,
            0,
            0,
            "flow.AccountKeyAdded",
            json!({
                "type": "Event",
                "value": {
                    "id": "flow.AccountKeyAdded",
                    "fields": [
                        {"name": "address", "value": {"type": "Address", "value": addr}},
                        {"name": "keyIndex", "value": {"type": "UInt32", "value": index.to_string()}},
                        {"name": "publicKey", "value": {"type": "String", "value": "abcd1234"}},
                        {"name": "weight", "value": {"type": "UFix64", "value": weight}},
                        {"name": "signatureAlgorithm", "value": {"type": "UInt8", "value": "2"}},
                        {"name": "hashAlgorithm", "value": {"type": "UInt8", "value": "3"}}
                    ]
                }
            }),
        )
    }

    fn key_removed(height: u64, index: u32, addr: &str) -> Event {
        fixtures::event(
            height,
            0,
            1,
            "flow.AccountKeyRemoved",
            json!({
                "type": "Event",
                "value": {
                    "id": "flow.AccountKeyRemoved",
                    "fields": [
                        {"name": "address", "value": {"type": "Address", "value": addr}},
                        {"name": "keyIndex", "value": {"type": "UInt32", "value": index.to_string()}}
                    ]
                }
            }),
        )
    }

    async fn seed(store: &MemoryStore, height: u64, events: Vec<Event>) {
        let tx = fixtures::tx_bundle(
            fixtures::transaction(height, 0, fixtures::address(1)),
            events,
        );
        store.insert_block(&fixtures::bundle_with(height, 0, vec![tx]), &[]).await.unwrap();
    }

    #[tokio::test]
    async fn removed_keys_survive_as_audit_trail() {
        let store = Arc::new(MemoryStore::new());
        let addr = "0x0101010101010101";
        seed(&store, 10, vec![key_added(10, 0, addr, "1000.0")]).await;
        seed(&store, 20, vec![key_removed(20, 0, addr)]).await;

        let ctx =
            ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(MockChain::new())));
        AccountsProcessor.process(&ctx, HeightRange::new(0, 30)).await.unwrap();

        let key = store.account_key(fixtures::address(1), 0).await.unwrap().unwrap();
        assert!(key.revoked);
        assert_eq!(key.added_at_height, 10);
        assert_eq!(key.revoked_at_height, Some(20));
        assert_eq!(key.weight, 1000);
        assert_eq!(key.signing_algorithm, 2);
    }
}
