use crate::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A parsed Cadence event type tag.
///
/// Contract events look like `A.<address>.<contract>.<name>`; service events
/// emitted by the protocol itself look like `flow.<name>` and carry no
/// contract address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType {
    /// Address of the contract that declared the event, absent for `flow.*`
    /// service events.
    pub contract_address: Option<Address>,
    /// Contract name, or `"flow"` for service events.
    pub contract: String,
    /// Event name, e.g. `TokensDeposited`.
    pub name: String,
}

impl EventType {
    /// Returns `true` for `flow.*` service events.
    pub fn is_service_event(&self) -> bool {
        self.contract_address.is_none() && self.contract == "flow"
    }

    /// The fully qualified tag, e.g. `A.1654653399040a61.FlowToken.TokensDeposited`.
    pub fn qualified(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.contract_address {
            Some(addr) => {
                // The `A.` prefix uses bare hex without `0x`.
                write!(
                    f,
                    "A.{}.{}.{}",
                    alloy_primitives::hex::encode(addr),
                    self.contract,
                    self.name
                )
            }
            None => write!(f, "{}.{}", self.contract, self.name),
        }
    }
}

/// Error returned when an event type tag does not match either the contract
/// or the service event shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed event type tag: {0}")]
pub struct MalformedEventType(pub String);

impl FromStr for EventType {
    type Err = MalformedEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            ["A", addr, contract, name] => {
                let bytes = alloy_primitives::hex::decode(addr)
                    .map_err(|_| MalformedEventType(s.to_owned()))?;
                if bytes.len() != 8 {
                    return Err(MalformedEventType(s.to_owned()));
                }
                Ok(Self {
                    contract_address: Some(Address::from_slice(&bytes)),
                    contract: (*contract).to_owned(),
                    name: (*name).to_owned(),
                })
            }
            ["flow", name] => Ok(Self {
                contract_address: None,
                contract: "flow".to_owned(),
                name: (*name).to_owned(),
            }),
            _ => Err(MalformedEventType(s.to_owned())),
        }
    }
}

/// An event emitted by a transaction, as persisted into `raw.events`.
///
/// `event_index` is dense within the transaction; the triple
/// `(block_height, transaction_id, event_index)` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Height of the containing block.
    pub block_height: u64,
    /// Id of the emitting transaction.
    pub transaction_id: B256,
    /// Position of the emitting transaction within the block.
    pub transaction_index: u32,
    /// Position of the event within the transaction.
    pub event_index: u32,
    /// Parsed type tag.
    pub event_type: EventType,
    /// JSON-Cadence payload.
    pub payload: serde_json::Value,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Decodes the JSON-Cadence payload into a [`cadence::CadenceValue`](crate::cadence::CadenceValue).
    pub fn decode_payload(&self) -> Result<crate::cadence::CadenceValue, crate::cadence::CadenceError> {
        crate::cadence::decode(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_contract_event_tag() {
        let tag: EventType = "A.1654653399040a61.FlowToken.TokensDeposited".parse().unwrap();
        assert_eq!(tag.contract, "FlowToken");
        assert_eq!(tag.name, "TokensDeposited");
        assert!(!tag.is_service_event());
        assert_eq!(tag.to_string(), "A.1654653399040a61.FlowToken.TokensDeposited");
    }

    #[test]
    fn parses_service_event_tag() {
        let tag: EventType = "flow.AccountCreated".parse().unwrap();
        assert!(tag.is_service_event());
        assert_eq!(tag.to_string(), "flow.AccountCreated");
    }

    #[test]
    fn rejects_malformed_tags() {
        assert_matches!("A.xyz.Foo".parse::<EventType>(), Err(MalformedEventType(_)));
        assert_matches!("A.1234.Foo.Bar".parse::<EventType>(), Err(MalformedEventType(_)));
        assert_matches!("".parse::<EventType>(), Err(MalformedEventType(_)));
    }
}
