use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use flowidx_access::AccessApi;
use flowidx_primitives::{HeightRange, ServiceId, WorkerKind, B256};
use flowidx_store::{Store, TxMetrics};
use std::collections::HashMap;

/// Derives fee and effort metrics per transaction.
///
/// Fees come from the `FlowFees.FeesDeducted` event a transaction emits;
/// gas figures come from the transaction row itself.
#[derive(Debug, Default)]
pub struct TxMetricsProcessor;

#[async_trait]
impl<S, A> Processor<S, A> for TxMetricsProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::TxMetrics
    }

    fn upstreams(&self) -> Vec<ServiceId> {
        vec![ServiceId::Worker(WorkerKind::Meta)]
    }

    async fn process(
        &self,
        ctx: &ProcessorContext<S, A>,
        range: HeightRange,
    ) -> Result<(), WorkerError> {
        let transactions = ctx.store.transactions_in_range(range).await?;
        let events = ctx.store.events_in_range(range).await?;

        let mut fees: HashMap<B256, (BigDecimal, Option<BigDecimal>)> = HashMap::new();
        for event in &events {
            if event.event_type.contract != "FlowFees" || event.event_type.name != "FeesDeducted" {
                continue;
            }
            let Ok(payload) = event.decode_payload() else { continue };
            let Some(amount) = payload.field_decimal("amount") else { continue };
            let effort = payload.field_decimal("executionEffort");
            fees.insert(event.transaction_id, (amount, effort));
        }

        let rows: Vec<TxMetrics> = transactions
            .iter()
            .map(|tx| {
                let (fee, execution_effort) =
                    fees.get(&tx.id).cloned().unwrap_or((BigDecimal::from(0), None));
                TxMetrics {
                    block_height: tx.block_height,
                    transaction_id: tx.id,
                    fee,
                    gas_used: tx.gas_used,
                    gas_limit: tx.gas_limit,
                    execution_effort,
                }
            })
            .collect();
        ctx.store.write_tx_metrics(&rows).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::{fixtures, MockAccessApi, MockChain};
    use flowidx_store::{MemoryStore, RawWriter};
    use serde_json::json;
    use std::{str::FromStr, sync::Arc};

    #[tokio::test]
    async fn fee_event_flows_into_the_metrics_row() {
        let store = Arc::new(MemoryStore::new());
        let fee_event = fixtures::event(
            9,
            0,
            0,
            "A.f919ee77447b7497.FlowFees.FeesDeducted",
            json!({
                "type": "Event",
                "value": {
                    "id": "A.f919ee77447b7497.FlowFees.FeesDeducted",
                    "fields": [
                        {"name": "amount", "value": {"type": "UFix64", "value": "0.00000185"}},
                        {"name": "executionEffort", "value": {"type": "UFix64", "value": "0.00000100"}}
                    ]
                }
            }),
        );
        let tx = fixtures::tx_bundle(
            fixtures::transaction(9, 0, fixtures::address(3)),
            vec![fee_event],
        );
        store.insert_block(&fixtures::bundle_with(9, 0, vec![tx]), &[]).await.unwrap();

        let ctx =
            ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(MockChain::new())));
        TxMetricsProcessor.process(&ctx, HeightRange::new(9, 10)).await.unwrap();

        let rows = store.all_tx_metrics();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fee, BigDecimal::from_str("0.00000185").unwrap());
        assert_eq!(
            rows[0].execution_effort,
            Some(BigDecimal::from_str("0.00000100").unwrap())
        );
        assert_eq!(rows[0].gas_limit, 9_999);
    }
}
