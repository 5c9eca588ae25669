use super::{match_token_event, TokenEvent};
use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use flowidx_access::AccessApi;
use flowidx_primitives::{HeightRange, ServiceId, WorkerKind};
use flowidx_store::{FtTransfer, NftTransfer, Store};
use tracing::debug;

/// Extracts fungible and non-fungible transfers from token events.
///
/// Each matched event becomes one row: deposits carry only a recipient,
/// withdrawals only a sender, so a vault-to-vault transfer appears as a
/// withdraw/deposit pair keyed by its own event index. Mints and burns are
/// the one-sided cases.
#[derive(Debug, Default)]
pub struct TokenProcessor;

#[async_trait]
impl<S, A> Processor<S, A> for TokenProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::Token
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
        let mut ft = Vec::new();
        let mut nft = Vec::new();
        for event in &events {
            let Some((contract_address, contract_name, movement)) = match_token_event(event)
            else {
                continue;
            };
            match movement {
                TokenEvent::FtIn { amount, to } => ft.push(FtTransfer {
                    block_height: event.block_height,
                    transaction_id: event.transaction_id,
                    event_index: event.event_index,
                    contract_address,
                    contract_name,
                    sender: None,
                    recipient: to,
                    amount,
                    timestamp: event.timestamp,
                }),
                TokenEvent::FtOut { amount, from } => ft.push(FtTransfer {
                    block_height: event.block_height,
                    transaction_id: event.transaction_id,
                    event_index: event.event_index,
                    contract_address,
                    contract_name,
                    sender: from,
                    recipient: None,
                    amount,
                    timestamp: event.timestamp,
                }),
                TokenEvent::NftIn { id, to } => nft.push(NftTransfer {
                    block_height: event.block_height,
                    transaction_id: event.transaction_id,
                    event_index: event.event_index,
                    contract_address,
                    contract_name,
                    sender: None,
                    recipient: to,
                    nft_id: id,
                    timestamp: event.timestamp,
                }),
                TokenEvent::NftOut { id, from } => nft.push(NftTransfer {
                    block_height: event.block_height,
                    transaction_id: event.transaction_id,
                    event_index: event.event_index,
                    contract_address,
                    contract_name,
                    sender: from,
                    recipient: None,
                    nft_id: id,
                    timestamp: event.timestamp,
                }),
            }
        }
        debug!(
            target: "workers::token",
            %range, ft = ft.len(), nft = nft.len(), "extracted transfers"
        );
        ctx.store.write_ft_transfers(&ft).await?;
        ctx.store.write_nft_transfers(&nft).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::{fixtures, MockAccessApi, MockChain};
    use flowidx_store::{MemoryStore, ProjectionReader, RawWriter};
    use serde_json::json;
    use std::sync::Arc;

    fn ft_payload(event: &str, amount: &str, field: &str, addr: &str) -> serde_json::Value {
        json!({
            "type": "Event",
            "value": {
                "id": format!("A.1654653399040a61.FlowToken.{event}"),
                "fields": [
                    {"name": "amount", "value": {"type": "UFix64", "value": amount}},
                    {"name": field, "value": {"type": "Optional", "value": {
                        "type": "Address", "value": addr
                    }}}
                ]
            }
        })
    }

    fn ctx(store: Arc<MemoryStore>) -> ProcessorContext<MemoryStore, MockAccessApi> {
        ProcessorContext::new(store, Arc::new(MockAccessApi::new(MockChain::new())))
    }

    #[tokio::test]
    async fn transfer_pair_becomes_two_rows() {
        let store = Arc::new(MemoryStore::new());
        let tag = "A.1654653399040a61.FlowToken.TokensWithdrawn";
        let deposit_tag = "A.1654653399040a61.FlowToken.TokensDeposited";
        let tx = fixtures::tx_bundle(
            fixtures::transaction(10, 0, fixtures::address(1)),
            vec![
                fixtures::event(10, 0, 0, tag, ft_payload("TokensWithdrawn", "5.0", "from", "0x01")),
                fixtures::event(
                    10,
                    0,
                    1,
                    deposit_tag,
                    ft_payload("TokensDeposited", "5.0", "to", "0x02"),
                ),
            ],
        );
        store.insert_block(&fixtures::bundle_with(10, 0, vec![tx]), &[]).await.unwrap();

        let ctx = ctx(store.clone());
        TokenProcessor.process(&ctx, HeightRange::new(10, 11)).await.unwrap();

        let transfers = store.ft_transfers_in_range(HeightRange::new(10, 11)).await.unwrap();
        assert_eq!(transfers.len(), 2);
        assert!(transfers[0].recipient.is_none() && transfers[0].sender.is_some());
        assert!(transfers[1].sender.is_none() && transfers[1].recipient.is_some());
    }

    #[tokio::test]
    async fn reprocessing_a_range_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let tag = "A.1654653399040a61.FlowToken.TokensDeposited";
        let tx = fixtures::tx_bundle(
            fixtures::transaction(10, 0, fixtures::address(1)),
            vec![fixtures::event(10, 0, 0, tag, ft_payload("TokensDeposited", "1.0", "to", "0x02"))],
        );
        store.insert_block(&fixtures::bundle_with(10, 0, vec![tx]), &[]).await.unwrap();

        let ctx = ctx(store.clone());
        let range = HeightRange::new(10, 11);
        TokenProcessor.process(&ctx, range).await.unwrap();
        let first = store.ft_transfers_in_range(range).await.unwrap();
        TokenProcessor.process(&ctx, range).await.unwrap();
        let second = store.ft_transfers_in_range(range).await.unwrap();
        assert_eq!(first, second);
    }
}
