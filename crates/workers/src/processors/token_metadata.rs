use super::{match_token_event, TokenEvent};
use crate::{Processor, ProcessorContext, WorkerError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use flowidx_access::AccessApi;
use flowidx_primitives::{cadence, Address, HeightRange, ServiceId, WorkerKind};
use flowidx_store::{NftItem, Store, TokenClass, TokenMetadata};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Cadence script resolving a token contract's display metadata through the
/// on-chain views. Takes the contract address and name.
const METADATA_SCRIPT: &str = r#"
import FungibleTokenMetadataViews from 0xf233dcee88fe0abe

access(all) fun main(contractAddress: Address, contractName: String): AnyStruct? {
    let account = getAccount(contractAddress)
    let contract = account.contracts.borrow<&{FungibleToken}>(name: contractName)
    return contract?.resolveContractView(
        resourceType: nil,
        viewType: Type<FungibleTokenMetadataViews.FTDisplay>()
    )
}
"#;

/// Cadence script resolving one NFT's display view. Takes the collection
/// contract address, its name and the token id.
const ITEM_SCRIPT: &str = r#"
import MetadataViews from 0xf233dcee88fe0abe
import NonFungibleToken from 0xf233dcee88fe0abe

access(all) fun main(contractAddress: Address, contractName: String, id: UInt64): AnyStruct? {
    let account = getAccount(contractAddress)
    let contract = account.contracts.borrow<&{NonFungibleToken}>(name: contractName)
    return contract?.resolveItemView(id: id, viewType: Type<MetadataViews.Display>())
}
"#;

/// Fetches on-chain metadata for newly observed token contracts and NFTs.
///
/// Discovery piggybacks on the token event vocabulary; each new contract
/// (and each NFT id moved by an NFT event) gets a stub row, then a script
/// execution fills it in. Failed fetches back off exponentially through a
/// `refetch_after` timestamp and stop at the retry ceiling.
#[derive(Debug, Default)]
pub struct TokenMetadataProcessor;

impl TokenMetadataProcessor {
    /// Fetch attempts per contract before giving up.
    const MAX_FETCH_RETRIES: u32 = 10;
    /// Base backoff between fetch attempts.
    const BACKOFF_BASE_SECS: i64 = 60;
    /// Backoff ceiling.
    const BACKOFF_CAP_SECS: i64 = 86_400;

    fn backoff(retries: u32) -> ChronoDuration {
        let secs = Self::BACKOFF_BASE_SECS
            .saturating_mul(1_i64 << retries.min(20))
            .min(Self::BACKOFF_CAP_SECS);
        ChronoDuration::seconds(secs)
    }
}

#[async_trait]
impl<S, A> Processor<S, A> for TokenMetadataProcessor
where
    S: Store,
    A: AccessApi,
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::TokenMetadata
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

        // Contracts observed in this range, fungible and NFT separately,
        // plus every NFT id that moved.
        let mut observed: BTreeSet<(Address, String, bool)> = BTreeSet::new();
        let mut observed_items: BTreeSet<(Address, String, u64)> = BTreeSet::new();
        for event in &events {
            if let Some((address, name, movement)) = match_token_event(event) {
                if let TokenEvent::NftIn { id, .. } | TokenEvent::NftOut { id, .. } = &movement {
                    observed_items.insert((address, name.clone(), *id));
                }
                observed.insert((address, name, movement.is_fungible()));
            }
        }

        self.fetch_contracts(ctx, observed).await?;
        self.fetch_items(ctx, observed_items).await
    }
}

impl TokenMetadataProcessor {
    async fn fetch_contracts<S, A>(
        &self,
        ctx: &ProcessorContext<S, A>,
        observed: BTreeSet<(Address, String, bool)>,
    ) -> Result<(), WorkerError>
    where
        S: Store,
        A: AccessApi,
    {
        for (contract_address, contract_name, fungible) in observed {
            let token_class =
                if fungible { TokenClass::Fungible } else { TokenClass::NonFungible };
            let existing = ctx.store.token_metadata(contract_address, &contract_name).await?;
            let (retries, due) = match &existing {
                None => (0, true),
                Some(row) if row.fetched => (row.retries, false),
                Some(row) => (
                    row.retries,
                    row.retries < Self::MAX_FETCH_RETRIES &&
                        row.refetch_after.map(|at| at <= Utc::now()).unwrap_or(true),
                ),
            };
            if existing.is_none() {
                ctx.store
                    .upsert_token_metadata(&TokenMetadata {
                        contract_address,
                        contract_name: contract_name.clone(),
                        token_class,
                        name: None,
                        symbol: None,
                        decimals: None,
                        extras: serde_json::Value::Null,
                        retries: 0,
                        refetch_after: None,
                        fetched: false,
                    })
                    .await?;
            }
            if !due {
                continue;
            }

            let arguments = [
                serde_json::json!({
                    "type": "Address",
                    "value": format!("0x{}", flowidx_primitives::alloy_primitives::hex::encode(contract_address)),
                }),
                serde_json::json!({ "type": "String", "value": contract_name }),
            ];
            match ctx.access.execute_script(METADATA_SCRIPT, &arguments, None).await {
                Ok(result) => {
                    let row = decode_metadata(
                        contract_address,
                        &contract_name,
                        token_class,
                        retries,
                        &result,
                    );
                    ctx.store.upsert_token_metadata(&row).await?;
                    debug!(
                        target: "workers::token_metadata",
                        contract = %contract_name, fetched = row.fetched, "metadata fetch"
                    );
                }
                Err(err) => {
                    warn!(
                        target: "workers::token_metadata",
                        contract = %contract_name, %err, retries, "metadata fetch failed"
                    );
                    let refetch_after = Utc::now() + Self::backoff(retries);
                    ctx.store
                        .bump_token_metadata_retry(contract_address, &contract_name, refetch_after)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn fetch_items<S, A>(
        &self,
        ctx: &ProcessorContext<S, A>,
        observed: BTreeSet<(Address, String, u64)>,
    ) -> Result<(), WorkerError>
    where
        S: Store,
        A: AccessApi,
    {
        for (contract_address, contract_name, nft_id) in observed {
            let existing = ctx.store.nft_item(contract_address, &contract_name, nft_id).await?;
            let (retries, due) = match &existing {
                None => (0, true),
                Some(row) if row.fetched => (row.retries, false),
                Some(row) => (
                    row.retries,
                    row.retries < Self::MAX_FETCH_RETRIES &&
                        row.refetch_after.map(|at| at <= Utc::now()).unwrap_or(true),
                ),
            };
            if existing.is_none() {
                ctx.store
                    .upsert_nft_item(&NftItem {
                        contract_address,
                        contract_name: contract_name.clone(),
                        nft_id,
                        name: None,
                        description: None,
                        thumbnail: None,
                        extras: serde_json::Value::Null,
                        retries: 0,
                        refetch_after: None,
                        fetched: false,
                    })
                    .await?;
            }
            if !due {
                continue;
            }

            let arguments = [
                serde_json::json!({
                    "type": "Address",
                    "value": format!("0x{}", flowidx_primitives::alloy_primitives::hex::encode(contract_address)),
                }),
                serde_json::json!({ "type": "String", "value": contract_name }),
                serde_json::json!({ "type": "UInt64", "value": nft_id.to_string() }),
            ];
            match ctx.access.execute_script(ITEM_SCRIPT, &arguments, None).await {
                Ok(result) => {
                    let row =
                        decode_item(contract_address, &contract_name, nft_id, retries, &result);
                    ctx.store.upsert_nft_item(&row).await?;
                    debug!(
                        target: "workers::token_metadata",
                        contract = %contract_name, nft_id, fetched = row.fetched, "item fetch"
                    );
                }
                Err(err) => {
                    warn!(
                        target: "workers::token_metadata",
                        contract = %contract_name, nft_id, %err, retries, "item fetch failed"
                    );
                    let refetch_after = Utc::now() + Self::backoff(retries);
                    ctx.store
                        .bump_nft_item_retry(
                            contract_address,
                            &contract_name,
                            nft_id,
                            refetch_after,
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }
}

fn decode_metadata(
    contract_address: Address,
    contract_name: &str,
    token_class: TokenClass,
    retries: u32,
    result: &serde_json::Value,
) -> TokenMetadata {
    let decoded = cadence::decode(result).ok();
    let view = decoded.as_ref().and_then(|v| v.unwrap_optional());
    let field_string =
        |name: &str| view.and_then(|v| v.field_str(name)).map(str::to_owned);
    let fetched = view.is_some();
    TokenMetadata {
        contract_address,
        contract_name: contract_name.to_owned(),
        token_class,
        name: field_string("name"),
        symbol: field_string("symbol"),
        decimals: view
            .and_then(|v| v.field_u64("decimals"))
            .map(|d| d.min(u8::MAX as u64) as u8),
        extras: result.clone(),
        retries,
        refetch_after: None,
        fetched,
    }
}

fn decode_item(
    contract_address: Address,
    contract_name: &str,
    nft_id: u64,
    retries: u32,
    result: &serde_json::Value,
) -> NftItem {
    let decoded = cadence::decode(result).ok();
    let view = decoded.as_ref().and_then(|v| v.unwrap_optional());
    let field_string = |name: &str| view.and_then(|v| v.field_str(name)).map(str::to_owned);
    // The thumbnail arrives as a plain URL string or a file struct.
    let thumbnail = field_string("thumbnail").or_else(|| {
        view.and_then(|v| v.field_flat("thumbnail"))
            .and_then(|file| file.field_str("url"))
            .map(str::to_owned)
    });
    NftItem {
        contract_address,
        contract_name: contract_name.to_owned(),
        nft_id,
        name: field_string("name"),
        description: field_string("description"),
        thumbnail,
        extras: result.clone(),
        retries,
        refetch_after: None,
        fetched: view.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::{fixtures, MockAccessApi, MockChain};
    use flowidx_store::{MemoryStore, ProjectionReader, RawWriter};
    use serde_json::json;
    use std::sync::Arc;

    fn deposit(height: u64) -> flowidx_primitives::Event {
        fixtures::event(
            height,
            0,
            0,
            "A.1654653399040a61.FlowToken.TokensDeposited",
            json!({
                "type": "Event",
                "value": {
                    "id": "A.1654653399040a61.FlowToken.TokensDeposited",
                    "fields": [
                        {"name": "amount", "value": {"type": "UFix64", "value": "1.0"}},
                        {"name": "to", "value": {"type": "Optional", "value": null}}
                    ]
                }
            }),
        )
    }

    async fn seed(store: &MemoryStore, height: u64) {
        let tx = fixtures::tx_bundle(
            fixtures::transaction(height, 0, fixtures::address(1)),
            vec![deposit(height)],
        );
        store.insert_block(&fixtures::bundle_with(height, 0, vec![tx]), &[]).await.unwrap();
    }

    fn contract_address() -> Address {
        "A.1654653399040a61.FlowToken.TokensDeposited"
            .parse::<flowidx_primitives::EventType>()
            .unwrap()
            .contract_address
            .unwrap()
    }

    #[tokio::test]
    async fn fetches_metadata_for_new_contracts() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 10).await;
        let chain = MockChain::new();
        chain.push_script_result(json!({
            "type": "Optional",
            "value": {
                "type": "Struct",
                "value": {
                    "id": "FTDisplay",
                    "fields": [
                        {"name": "name", "value": {"type": "String", "value": "Flow"}},
                        {"name": "symbol", "value": {"type": "String", "value": "FLOW"}},
                        {"name": "decimals", "value": {"type": "UInt8", "value": "8"}}
                    ]
                }
            }
        }));
        let ctx = ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(chain)));
        TokenMetadataProcessor.process(&ctx, HeightRange::new(10, 11)).await.unwrap();

        let row = store.token_metadata(contract_address(), "FlowToken").await.unwrap().unwrap();
        assert!(row.fetched);
        assert_eq!(row.name.as_deref(), Some("Flow"));
        assert_eq!(row.symbol.as_deref(), Some("FLOW"));
        assert_eq!(row.decimals, Some(8));
    }

    #[tokio::test]
    async fn nil_result_leaves_the_row_unfetched_for_refetch() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 10).await;
        let chain = MockChain::new();
        chain.push_script_result(json!({"type": "Optional", "value": null}));
        let ctx = ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(chain)));
        TokenMetadataProcessor.process(&ctx, HeightRange::new(10, 11)).await.unwrap();

        let row = store.token_metadata(contract_address(), "FlowToken").await.unwrap().unwrap();
        assert!(!row.fetched);
    }

    fn nft_deposit(height: u64, nft_id: u64) -> flowidx_primitives::Event {
        fixtures::event(
            height,
            0,
            0,
            "A.0b2a3299cc857e29.TopShot.Deposit",
            json!({
                "type": "Event",
                "value": {
                    "id": "A.0b2a3299cc857e29.TopShot.Deposit",
                    "fields": [
                        {"name": "id", "value": {"type": "UInt64", "value": nft_id.to_string()}},
                        {"name": "to", "value": {"type": "Optional", "value": {
                            "type": "Address", "value": "0x0202020202020202"
                        }}}
                    ]
                }
            }),
        )
    }

    fn collection_address() -> Address {
        "A.0b2a3299cc857e29.TopShot.Deposit"
            .parse::<flowidx_primitives::EventType>()
            .unwrap()
            .contract_address
            .unwrap()
    }

    #[tokio::test]
    async fn nft_events_fetch_collection_and_item_metadata() {
        let store = Arc::new(MemoryStore::new());
        let tx = fixtures::tx_bundle(
            fixtures::transaction(10, 0, fixtures::address(1)),
            vec![nft_deposit(10, 42)],
        );
        store.insert_block(&fixtures::bundle_with(10, 0, vec![tx]), &[]).await.unwrap();

        let chain = MockChain::new();
        // Contracts are fetched first, then items.
        chain.push_script_result(json!({
            "type": "Optional",
            "value": {
                "type": "Struct",
                "value": {
                    "id": "NFTCollectionDisplay",
                    "fields": [
                        {"name": "name", "value": {"type": "String", "value": "Top Shot"}}
                    ]
                }
            }
        }));
        chain.push_script_result(json!({
            "type": "Optional",
            "value": {
                "type": "Struct",
                "value": {
                    "id": "Display",
                    "fields": [
                        {"name": "name", "value": {"type": "String", "value": "Moment #42"}},
                        {"name": "description", "value": {"type": "String", "value": "A dunk"}},
                        {"name": "thumbnail", "value": {"type": "Struct", "value": {
                            "id": "HTTPFile",
                            "fields": [
                                {"name": "url", "value": {"type": "String", "value": "https://img/42"}}
                            ]
                        }}}
                    ]
                }
            }
        }));
        let ctx = ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(chain)));
        TokenMetadataProcessor.process(&ctx, HeightRange::new(10, 11)).await.unwrap();

        let collection =
            store.token_metadata(collection_address(), "TopShot").await.unwrap().unwrap();
        assert!(collection.fetched);
        assert_eq!(collection.name.as_deref(), Some("Top Shot"));

        let item = store.nft_item(collection_address(), "TopShot", 42).await.unwrap().unwrap();
        assert!(item.fetched);
        assert_eq!(item.name.as_deref(), Some("Moment #42"));
        assert_eq!(item.description.as_deref(), Some("A dunk"));
        assert_eq!(item.thumbnail.as_deref(), Some("https://img/42"));
    }

    #[tokio::test]
    async fn nil_item_result_stays_unfetched_for_refetch() {
        let store = Arc::new(MemoryStore::new());
        let tx = fixtures::tx_bundle(
            fixtures::transaction(10, 0, fixtures::address(1)),
            vec![nft_deposit(10, 7)],
        );
        store.insert_block(&fixtures::bundle_with(10, 0, vec![tx]), &[]).await.unwrap();

        // Both the collection and the item resolve to nil.
        let chain = MockChain::new();
        chain.push_script_result(json!({"type": "Optional", "value": null}));
        chain.push_script_result(json!({"type": "Optional", "value": null}));
        let ctx = ProcessorContext::new(store.clone(), Arc::new(MockAccessApi::new(chain)));
        TokenMetadataProcessor.process(&ctx, HeightRange::new(10, 11)).await.unwrap();

        let item = store.nft_item(collection_address(), "TopShot", 7).await.unwrap().unwrap();
        assert!(!item.fetched);
        assert_eq!(item.retries, 0, "nil results are stored, not counted as failures");
    }
}
