use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use flowidx_access::AccessApi;
use flowidx_primitives::{Address, Event, HeightRange, ServiceId, Transaction, WorkerKind, B256};
use flowidx_store::{Store, TxContract, TxTag};
use std::collections::HashMap;

/// Extracts contract imports from transaction scripts and classifies
/// transactions with tags.
#[derive(Debug, Default)]
pub struct TxContractsProcessor;

#[async_trait]
impl<S, A> Processor<S, A> for TxContractsProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::TxContracts
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

        let mut events_by_tx: HashMap<B256, Vec<&Event>> = HashMap::new();
        for event in &events {
            events_by_tx.entry(event.transaction_id).or_default().push(event);
        }

        let mut contracts = Vec::new();
        let mut tags = Vec::new();
        // Offloaded scripts are fetched once per content hash.
        let mut script_cache: HashMap<B256, Option<String>> = HashMap::new();

        for tx in &transactions {
            let script = match (&tx.script, tx.script_hash) {
                (Some(script), _) => Some(script.clone()),
                (None, Some(hash)) => match script_cache.get(&hash) {
                    Some(cached) => cached.clone(),
                    None => {
                        let fetched = ctx.store.script_by_hash(hash).await?;
                        script_cache.insert(hash, fetched.clone());
                        fetched
                    }
                },
                (None, None) => None,
            };
            if let Some(script) = &script {
                for (contract_address, contract_name) in parse_imports(script) {
                    contracts.push(TxContract {
                        block_height: tx.block_height,
                        transaction_id: tx.id,
                        contract_address,
                        contract_name,
                    });
                }
            }
            for tag in classify(tx, events_by_tx.get(&tx.id).map_or(&[][..], Vec::as_slice)) {
                tags.push(TxTag {
                    block_height: tx.block_height,
                    transaction_id: tx.id,
                    tag: tag.to_owned(),
                });
            }
        }

        ctx.store.write_tx_contracts(&contracts).await?;
        ctx.store.write_tx_tags(&tags).await?;
        Ok(())
    }
}

/// Parses `import Foo, Bar from 0xADDRESS` lines. The string-import form
/// carries no address and is skipped.
fn parse_imports(script: &str) -> Vec<(Address, String)> {
    let mut out = Vec::new();
    for line in script.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("import ") else { continue };
        let Some((names, address)) = rest.split_once(" from ") else { continue };
        let Some(address) = parse_address(address.trim()) else { continue };
        for name in names.split(',') {
            let name = name.trim();
            if !name.is_empty() && !name.starts_with('"') {
                out.push((address, name.to_owned()));
            }
        }
    }
    out
}

fn parse_address(raw: &str) -> Option<Address> {
    let hex = raw.strip_prefix("0x")?;
    let bytes = flowidx_primitives::alloy_primitives::hex::decode(hex).ok()?;
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let mut out = [0u8; 8];
    out[8 - bytes.len()..].copy_from_slice(&bytes);
    Some(Address::from(out))
}

fn classify(tx: &Transaction, events: &[&Event]) -> Vec<&'static str> {
    let mut tags = Vec::new();
    if tx.is_evm {
        tags.push("evm");
    }
    if events.iter().any(|e| e.event_type.name.starts_with("Tokens")) {
        tags.push("ft_transfer");
    }
    if events
        .iter()
        .any(|e| matches!(e.event_type.name.as_str(), "Deposit" | "Withdraw"))
    {
        tags.push("nft_transfer");
    }
    if events
        .iter()
        .any(|e| e.event_type.is_service_event() && e.event_type.name.starts_with("AccountContract"))
    {
        tags.push("contract_change");
    }
    if events
        .iter()
        .any(|e| e.event_type.is_service_event() && e.event_type.name == "AccountCreated")
    {
        tags.push("account_creation");
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_grouped_imports() {
        let script = "\
import FungibleToken from 0xf233dcee88fe0abe
import FlowToken, FlowFees from 0x1654653399040a61

transaction { execute {} }";
        let imports = parse_imports(script);
        assert_eq!(imports.len(), 3);
        assert_eq!(imports[0].1, "FungibleToken");
        assert_eq!(imports[1].1, "FlowToken");
        assert_eq!(imports[2].1, "FlowFees");
        assert_eq!(imports[1].0, imports[2].0);
    }

    #[test]
    fn string_imports_are_skipped() {
        assert!(parse_imports("import \"FlowToken\"\n").is_empty());
        assert!(parse_imports("import Foo from \"somewhere\"").is_empty());
    }
}
