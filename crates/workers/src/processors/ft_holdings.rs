use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use flowidx_access::AccessApi;
use flowidx_primitives::{Address, HeightRange, ServiceId, WorkerKind};
use flowidx_store::{HoldingDelta, Store};
use std::collections::BTreeMap;

/// Folds `ft_transfers` into per-holder balances.
///
/// Transfers are netted per `(height, holder, contract)` and applied in
/// ascending height order; the store's `last_height` guard then makes both
/// replays and the live/batch overlap converge without double-applying.
#[derive(Debug, Default)]
pub struct FtHoldingsProcessor;

#[async_trait]
impl<S, A> Processor<S, A> for FtHoldingsProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::FtHoldings
    }

    fn upstreams(&self) -> Vec<ServiceId> {
        vec![ServiceId::Worker(WorkerKind::Token)]
    }

    /// Balances are running folds, not per-height rows: deleting them on a
    /// retry would drop contributions from earlier ranges. The
    /// `last_height` guard already makes re-runs converge, so retries skip
    /// the delete entirely.
    async fn delete_by_height(
        &self,
        _store: &S,
        _range: flowidx_primitives::HeightRange,
    ) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessorContext<S, A>,
        range: HeightRange,
    ) -> Result<(), WorkerError> {
        let transfers = ctx.store.ft_transfers_in_range(range).await?;

        // Net per (height, holder, contract); BTreeMap iteration yields
        // ascending heights, which the monotonicity guard requires.
        let mut net: BTreeMap<(u64, Address, Address, String), BigDecimal> = BTreeMap::new();
        for transfer in &transfers {
            if let Some(recipient) = transfer.recipient {
                let key = (
                    transfer.block_height,
                    recipient,
                    transfer.contract_address,
                    transfer.contract_name.clone(),
                );
                *net.entry(key).or_default() += transfer.amount.clone();
            }
            if let Some(sender) = transfer.sender {
                let key = (
                    transfer.block_height,
                    sender,
                    transfer.contract_address,
                    transfer.contract_name.clone(),
                );
                *net.entry(key).or_default() -= transfer.amount.clone();
            }
        }

        let deltas: Vec<HoldingDelta> = net
            .into_iter()
            .map(|((height, address, contract_address, contract_name), delta)| HoldingDelta {
                address,
                contract_address,
                contract_name,
                delta,
                height,
            })
            .collect();
        ctx.store.apply_holding_deltas(&deltas).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowidx_access::mock::{MockAccessApi, MockChain};
    use flowidx_primitives::B256;
    use flowidx_store::{FtTransfer, MemoryStore, ProjectionReader, ProjectionWriter};
    use std::{str::FromStr, sync::Arc};

    fn transfer(
        height: u64,
        event_index: u32,
        sender: Option<Address>,
        recipient: Option<Address>,
        amount: &str,
    ) -> FtTransfer {
        FtTransfer {
            block_height: height,
            transaction_id: B256::repeat_byte(height as u8),
            event_index,
            contract_address: Address::repeat_byte(0xee),
            contract_name: "FlowToken".to_owned(),
            sender,
            recipient,
            amount: BigDecimal::from_str(amount).unwrap(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn balances_fold_and_replays_converge() {
        let store = Arc::new(MemoryStore::new());
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        store
            .write_ft_transfers(&[
                transfer(10, 0, None, Some(alice), "100"),
                transfer(20, 0, Some(alice), None, "30"),
                transfer(20, 1, None, Some(bob), "30"),
            ])
            .await
            .unwrap();

        let ctx =
            ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(MockChain::new())));
        let range = HeightRange::new(0, 100);
        FtHoldingsProcessor.process(&ctx, range).await.unwrap();
        // Replaying the fold must not double-apply.
        FtHoldingsProcessor.process(&ctx, range).await.unwrap();

        let alice_holding = store
            .ft_holding(alice, Address::repeat_byte(0xee), "FlowToken")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice_holding.balance, BigDecimal::from_str("70").unwrap());
        assert_eq!(alice_holding.last_height, 20);
        let bob_holding = store
            .ft_holding(bob, Address::repeat_byte(0xee), "FlowToken")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob_holding.balance, BigDecimal::from_str("30").unwrap());
    }
}
