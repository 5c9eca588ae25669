//! HTTP client for the Access API.
//!
//! One instance per endpoint. Assembles the per-height block bundle (block,
//! collections, transactions, results) that the ingesters treat as a single
//! logical unit. Wire-level field coverage follows what the indexer
//! persists; unrecognized fields are ignored.

use crate::{AccessApi, AccessError, AccessResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowidx_primitives::{
    Address, Block, BlockBundle, Event, EventType, HeightRange, Transaction, TransactionBundle,
    TransactionStatus, B256,
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::{str::FromStr, time::Duration};
use url::Url;

/// HTTP implementation of [`AccessApi`] for one endpoint.
#[derive(Debug, Clone)]
pub struct HttpAccessApi {
    base: Url,
    client: reqwest::Client,
}

impl HttpAccessApi {
    /// Creates a client for `host:port` with the given per-request timeout.
    pub fn new(node: &str, timeout: Duration) -> AccessResult<Self> {
        let base = if node.starts_with("http://") || node.starts_with("https://") {
            node.to_owned()
        } else {
            format!("http://{node}")
        };
        let base = Url::parse(&base).map_err(|e| AccessError::Decode(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AccessError::from)?;
        Ok(Self { base, client })
    }

    fn url(&self, path: &str) -> AccessResult<Url> {
        self.base.join(path).map_err(|e| AccessError::Decode(e.to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> AccessResult<T> {
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(AccessError::NotFound(response.url().to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(AccessError::ResourceExhausted),
            status if status.is_server_error() => {
                Err(AccessError::Transport(format!("upstream returned {status}")))
            }
            _ => Ok(response.error_for_status()?.json::<T>().await?),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    header: BlockHeader,
    #[serde(default)]
    payload: Option<BlockPayload>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    id: String,
    parent_id: String,
    height: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
struct BlockPayload {
    #[serde(default)]
    collection_guarantees: Vec<CollectionGuarantee>,
    #[serde(default)]
    block_seals: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CollectionGuarantee {
    collection_id: String,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    #[serde(default)]
    transaction_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    id: String,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    arguments: Vec<String>,
    proposal_key: ProposalKey,
    payer: String,
    #[serde(default)]
    authorizers: Vec<String>,
    #[serde(default)]
    gas_limit: Option<String>,
    #[serde(default)]
    result: Option<TransactionResult>,
}

#[derive(Debug, Deserialize)]
struct ProposalKey {
    address: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResult {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error_message: String,
    #[serde(default)]
    computation_used: Option<String>,
    #[serde(default)]
    events: Vec<EventResponse>,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    #[serde(rename = "type")]
    type_tag: String,
    transaction_id: String,
    transaction_index: String,
    event_index: String,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct BlockEventsResponse {
    block_height: String,
    block_timestamp: DateTime<Utc>,
    #[serde(default)]
    events: Vec<EventResponse>,
}

#[derive(Debug, Deserialize)]
struct ScriptResponse {
    value: String,
}

#[async_trait]
impl AccessApi for HttpAccessApi {
    async fn latest_sealed_height(&self) -> AccessResult<u64> {
        let url = self.url("/v1/blocks?height=sealed")?;
        let blocks: Vec<BlockResponse> = self.get_json(url).await?;
        let block = blocks
            .first()
            .ok_or_else(|| AccessError::Decode("empty sealed block response".to_owned()))?;
        parse_u64(&block.header.height)
    }

    async fn block_bundle_at(&self, height: u64) -> AccessResult<BlockBundle> {
        let url = self.url(&format!("/v1/blocks?height={height}&expand=payload"))?;
        let mut blocks: Vec<BlockResponse> = match self.get_json(url).await {
            Ok(blocks) => blocks,
            // A missing height right at the head just is not sealed yet;
            // the caller decides whether that is fatal.
            Err(AccessError::NotFound(_)) => {
                let latest = self.latest_sealed_height().await?;
                return if height > latest {
                    Err(AccessError::HeightNotSealed { height })
                } else {
                    Err(AccessError::NotFound(format!("sealed block at height {height}")))
                };
            }
            Err(err) => return Err(err),
        };
        let response = blocks
            .pop()
            .ok_or_else(|| AccessError::Decode(format!("no block at height {height}")))?;
        let payload = response.payload.unwrap_or_default();
        let timestamp = response.header.timestamp;

        let mut transactions = Vec::new();
        let mut transaction_index = 0u32;
        for guarantee in &payload.collection_guarantees {
            let tx_ids = self.collection(parse_b256(&guarantee.collection_id)?).await?;
            for tx_id in tx_ids {
                let bundle =
                    self.fetch_transaction(tx_id, height, transaction_index, timestamp).await?;
                transactions.push(bundle);
                transaction_index += 1;
            }
        }

        let block = Block {
            height,
            id: parse_b256(&response.header.id)?,
            parent_id: parse_b256(&response.header.parent_id)?,
            timestamp,
            is_sealed: true,
            tx_count: transactions.len() as u64,
            event_count: transactions.iter().map(|t| t.events.len() as u64).sum(),
            gas_used: transactions.iter().map(|t| t.transaction.gas_used).sum(),
            collection_guarantees: serde_json::json!(payload
                .collection_guarantees
                .iter()
                .map(|g| {
                    serde_json::json!({
                        "collection_id": g.collection_id,
                        "signature": g.signature,
                    })
                })
                .collect::<Vec<_>>()),
            block_seals: payload.block_seals,
            signatures: serde_json::Value::Null,
        };
        Ok(BlockBundle { block, transactions })
    }

    async fn transaction(&self, id: B256) -> AccessResult<TransactionBundle> {
        // Height and position are not known from this entry point; callers
        // that need them fetch through the block bundle instead.
        self.fetch_transaction(id, 0, 0, Utc::now()).await
    }

    async fn collection(&self, id: B256) -> AccessResult<Vec<B256>> {
        let url = self.url(&format!("/v1/collections/{:x}", id))?;
        let response: CollectionResponse = self.get_json(url).await?;
        response.transaction_ids.iter().map(|raw| parse_b256(raw)).collect()
    }

    async fn events_in_range(
        &self,
        event_type: Option<&str>,
        range: HeightRange,
    ) -> AccessResult<Vec<Event>> {
        let Some(end) = range.last() else { return Ok(Vec::new()) };
        let mut path = format!("/v1/events?start_height={}&end_height={}", range.start, end);
        if let Some(event_type) = event_type {
            path.push_str(&format!("&type={event_type}"));
        }
        let url = self.url(&path)?;
        let blocks: Vec<BlockEventsResponse> = self.get_json(url).await?;
        let mut out = Vec::new();
        for block in blocks {
            let height = parse_u64(&block.block_height)?;
            for event in &block.events {
                out.push(decode_event(event, height, block.block_timestamp)?);
            }
        }
        Ok(out)
    }

    async fn execute_script(
        &self,
        script: &str,
        arguments: &[serde_json::Value],
        height: Option<u64>,
    ) -> AccessResult<serde_json::Value> {
        use base64::Engine as _;
        let engine = base64::engine::general_purpose::STANDARD;
        let path = match height {
            Some(height) => format!("/v1/scripts?block_height={height}"),
            None => "/v1/scripts?block_height=sealed".to_owned(),
        };
        let url = self.url(&path)?;
        let body = serde_json::json!({
            "script": engine.encode(script.as_bytes()),
            "arguments": arguments
                .iter()
                .map(|arg| engine.encode(arg.to_string().as_bytes()))
                .collect::<Vec<_>>(),
        });
        let response = self.client.post(url).json(&body).send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(AccessError::ResourceExhausted);
        }
        let script_response: ScriptResponse = response.error_for_status()?.json().await?;
        let decoded = engine
            .decode(script_response.value.trim())
            .map_err(|e| AccessError::Decode(e.to_string()))?;
        serde_json::from_slice(&decoded).map_err(|e| AccessError::Decode(e.to_string()))
    }
}

impl HttpAccessApi {
    async fn fetch_transaction(
        &self,
        id: B256,
        height: u64,
        transaction_index: u32,
        timestamp: DateTime<Utc>,
    ) -> AccessResult<TransactionBundle> {
        let url = self.url(&format!("/v1/transactions/{:x}?expand=result", id))?;
        let response: TransactionResponse = self.get_json(url).await?;
        let result = response.result;

        let events = result
            .as_ref()
            .map(|r| {
                r.events
                    .iter()
                    .map(|e| decode_event(e, height, timestamp))
                    .collect::<AccessResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let is_evm = events.iter().any(|e| e.event_type.contract == "EVM");
        let status = match result.as_ref() {
            Some(r) if !r.error_message.is_empty() => TransactionStatus::Failed,
            Some(r) if r.status.eq_ignore_ascii_case("expired") => TransactionStatus::Expired,
            _ => TransactionStatus::Sealed,
        };
        let arguments = serde_json::Value::Array(
            response.arguments.iter().map(|a| serde_json::Value::String(a.clone())).collect(),
        );

        let transaction = Transaction {
            block_height: height,
            id: parse_b256(&response.id)?,
            transaction_index,
            proposer: parse_address(&response.proposal_key.address)?,
            payer: parse_address(&response.payer)?,
            authorizers: response
                .authorizers
                .iter()
                .map(|a| parse_address(a))
                .collect::<AccessResult<Vec<_>>>()?,
            script: response.script,
            script_hash: None,
            arguments,
            status,
            gas_limit: response.gas_limit.as_deref().map(parse_u64).transpose()?.unwrap_or(0),
            gas_used: result
                .as_ref()
                .and_then(|r| r.computation_used.as_deref())
                .map(parse_u64)
                .transpose()?
                .unwrap_or(0),
            event_count: events.len() as u64,
            is_evm,
            timestamp,
        };
        Ok(TransactionBundle { transaction, events })
    }
}

fn decode_event(
    event: &EventResponse,
    height: u64,
    timestamp: DateTime<Utc>,
) -> AccessResult<Event> {
    use base64::Engine as _;
    let payload_bytes = base64::engine::general_purpose::STANDARD
        .decode(event.payload.trim())
        .map_err(|e| AccessError::Decode(e.to_string()))?;
    let payload =
        serde_json::from_slice(&payload_bytes).map_err(|e| AccessError::Decode(e.to_string()))?;
    Ok(Event {
        block_height: height,
        transaction_id: parse_b256(&event.transaction_id)?,
        transaction_index: parse_u64(&event.transaction_index)? as u32,
        event_index: parse_u64(&event.event_index)? as u32,
        event_type: EventType::from_str(&event.type_tag)
            .map_err(|e| AccessError::Decode(e.to_string()))?,
        payload,
        timestamp,
    })
}

fn parse_u64(raw: &str) -> AccessResult<u64> {
    raw.parse::<u64>().map_err(|_| AccessError::Decode(format!("invalid number: {raw}")))
}

fn parse_b256(raw: &str) -> AccessResult<B256> {
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = flowidx_primitives::alloy_primitives::hex::decode(hex)
        .map_err(|e| AccessError::Decode(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(AccessError::Decode(format!("expected 32-byte id: {raw}")));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_address(raw: &str) -> AccessResult<Address> {
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = flowidx_primitives::alloy_primitives::hex::decode(hex)
        .map_err(|e| AccessError::Decode(e.to_string()))?;
    if bytes.len() > 8 {
        return Err(AccessError::Decode(format!("expected 8-byte address: {raw}")));
    }
    let mut out = [0u8; 8];
    out[8 - bytes.len()..].copy_from_slice(&bytes);
    Ok(Address::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_ids_with_and_without_prefix() {
        let raw = "aa".repeat(32);
        assert_eq!(parse_b256(&raw).unwrap(), B256::repeat_byte(0xaa));
        assert_eq!(parse_b256(&format!("0x{raw}")).unwrap(), B256::repeat_byte(0xaa));
        assert!(parse_b256("1234").is_err());
    }

    #[test]
    fn short_addresses_left_pad() {
        let addr = parse_address("0x01").unwrap();
        assert_eq!(addr, Address::from([0, 0, 0, 0, 0, 0, 0, 1]));
    }
}
