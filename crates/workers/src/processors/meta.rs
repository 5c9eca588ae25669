use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use flowidx_access::AccessApi;
use flowidx_primitives::{cadence::CadenceValue, HeightRange, ServiceId, WorkerKind};
use flowidx_store::{AccountSeen, AddressRole, AddressTransaction, Store};
use itertools::Itertools;

/// Produces the address participation lookup and first/last-seen accounting.
///
/// Every transaction yields one row per `{proposer, payer, authorizer}`
/// role; addresses appearing in event payloads yield `event_subject` rows.
#[derive(Debug, Default)]
pub struct MetaProcessor;

#[async_trait]
impl<S, A> Processor<S, A> for MetaProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::Meta
    }

    fn upstreams(&self) -> Vec<ServiceId> {
        vec![ServiceId::RawIngester]
    }

    async fn process(
        &self,
        ctx: &ProcessorContext<S, A>,
        range: HeightRange,
    ) -> Result<(), WorkerError> {
        let transactions = ctx.store.transactions_in_range(range).await?;
        let events = ctx.store.events_in_range(range).await?;

        let mut rows = Vec::new();
        let mut seen = Vec::new();
        for tx in &transactions {
            let mut push = |address, role| {
                rows.push(AddressTransaction {
                    address,
                    block_height: tx.block_height,
                    transaction_id: tx.id,
                    role,
                    timestamp: tx.timestamp,
                });
                seen.push(AccountSeen { address, height: tx.block_height });
            };
            push(tx.proposer, AddressRole::Proposer);
            push(tx.payer, AddressRole::Payer);
            for authorizer in &tx.authorizers {
                push(*authorizer, AddressRole::Authorizer);
            }
        }

        for event in &events {
            let Ok(payload) = event.decode_payload() else { continue };
            for address in payload_addresses(&payload) {
                rows.push(AddressTransaction {
                    address,
                    block_height: event.block_height,
                    transaction_id: event.transaction_id,
                    role: AddressRole::EventSubject,
                    timestamp: event.timestamp,
                });
                seen.push(AccountSeen { address, height: event.block_height });
            }
        }

        // The store upserts, but deduping here keeps the batches small.
        let rows: Vec<AddressTransaction> = rows
            .into_iter()
            .unique_by(|r| (r.address, r.block_height, r.transaction_id, r.role))
            .collect();
        ctx.store.write_address_transactions(&rows).await?;
        ctx.store.touch_accounts(&seen).await?;
        Ok(())
    }
}

/// Addresses carried in a decoded payload's top-level fields, `Optional`
/// wrappers included.
fn payload_addresses(payload: &CadenceValue) -> Vec<flowidx_primitives::Address> {
    let CadenceValue::Composite { fields, .. } = payload else { return Vec::new() };
    fields
        .values()
        .filter_map(|value| value.unwrap_optional())
        .filter_map(CadenceValue::as_address)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::{fixtures, MockAccessApi, MockChain};
    use flowidx_store::{MemoryStore, RawWriter};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn roles_and_event_subjects_are_recorded() {
        let store = Arc::new(MemoryStore::new());
        let signer = fixtures::address(7);
        let deposit = fixtures::event(
            5,
            0,
            0,
            "A.1654653399040a61.FlowToken.TokensDeposited",
            json!({
                "type": "Event",
                "value": {
                    "id": "A.1654653399040a61.FlowToken.TokensDeposited",
                    "fields": [
                        {"name": "amount", "value": {"type": "UFix64", "value": "1.0"}},
                        {"name": "to", "value": {"type": "Optional", "value": {
                            "type": "Address", "value": "0x0909090909090909"
                        }}}
                    ]
                }
            }),
        );
        let tx = fixtures::tx_bundle(fixtures::transaction(5, 0, signer), vec![deposit]);
        store.insert_block(&fixtures::bundle_with(5, 0, vec![tx]), &[]).await.unwrap();

        let ctx =
            ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(MockChain::new())));
        MetaProcessor.process(&ctx, HeightRange::new(5, 6)).await.unwrap();

        let rows = store.all_address_transactions();
        // Proposer + payer + authorizer for the signer, event_subject for
        // the deposit recipient.
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().any(|r| r.role == AddressRole::EventSubject
            && r.address == fixtures::address(9)));
        assert_eq!(store.account_seen(signer), Some((5, 5)));
    }
}
