//! Recognition of fungible and non-fungible token events.

use bigdecimal::BigDecimal;
use flowidx_primitives::{cadence::CadenceValue, Address, Event};
use tracing::debug;

/// A recognized token movement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenEvent {
    /// `Tokens{Deposited,Minted}`: funds arrived at `to` (absent on odd
    /// mints into limbo vaults).
    FtIn { amount: BigDecimal, to: Option<Address> },
    /// `Tokens{Withdrawn,Burned}`: funds left `from`.
    FtOut { amount: BigDecimal, from: Option<Address> },
    /// NFT `Deposit`.
    NftIn { id: u64, to: Option<Address> },
    /// NFT `Withdraw`.
    NftOut { id: u64, from: Option<Address> },
}

impl TokenEvent {
    /// Returns `true` for the fungible variants.
    pub(crate) fn is_fungible(&self) -> bool {
        matches!(self, Self::FtIn { .. } | Self::FtOut { .. })
    }
}

/// Matches an event against the token vocabularies. Returns the emitting
/// contract and the movement, or `None` for unrelated or malformed events.
pub(crate) fn match_token_event(event: &Event) -> Option<(Address, String, TokenEvent)> {
    let contract_address = event.event_type.contract_address?;
    let name = event.event_type.name.as_str();
    if !matches!(
        name,
        "TokensDeposited" | "TokensWithdrawn" | "TokensMinted" | "TokensBurned" | "Deposit" |
            "Withdraw"
    ) {
        return None;
    }
    let payload = match event.decode_payload() {
        Ok(payload) => payload,
        Err(err) => {
            debug!(
                target: "workers::token",
                height = event.block_height, %err, "skipping undecodable token event"
            );
            return None;
        }
    };
    let movement = match name {
        "TokensDeposited" | "TokensMinted" => TokenEvent::FtIn {
            amount: payload.field_decimal("amount")?,
            to: optional_address(&payload, "to"),
        },
        "TokensWithdrawn" | "TokensBurned" => TokenEvent::FtOut {
            amount: payload.field_decimal("amount")?,
            from: optional_address(&payload, "from"),
        },
        "Deposit" => TokenEvent::NftIn {
            id: payload.field_u64("id")?,
            to: optional_address(&payload, "to"),
        },
        "Withdraw" => TokenEvent::NftOut {
            id: payload.field_u64("id")?,
            from: optional_address(&payload, "from"),
        },
        _ => unreachable!("filtered above"),
    };
    Some((contract_address, event.event_type.contract.clone(), movement))
}

fn optional_address(payload: &CadenceValue, field: &str) -> Option<Address> {
    payload.field_address(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowidx_access::mock::fixtures;
    use serde_json::json;

    fn deposit_payload(amount: &str, to: Option<&str>) -> serde_json::Value {
        let to_value = match to {
            Some(addr) => json!({"type": "Address", "value": addr}),
            None => serde_json::Value::Null,
        };
        json!({
            "type": "Event",
            "value": {
                "id": "A.1654653399040a61.FlowToken.TokensDeposited",
                "fields": [
                    {"name": "amount", "value": {"type": "UFix64", "value": amount}},
                    {"name": "to", "value": {"type": "Optional", "value": to_value}}
                ]
            }
        })
    }

    #[test]
    fn matches_ft_deposit() {
        let event = fixtures::event(
            10,
            0,
            0,
            "A.1654653399040a61.FlowToken.TokensDeposited",
            deposit_payload("12.5", Some("0xf233dcee88fe0abe")),
        );
        let (contract_address, contract, movement) = match_token_event(&event).unwrap();
        assert_eq!(contract, "FlowToken");
        assert_eq!(contract_address, event.event_type.contract_address.unwrap());
        assert!(movement.is_fungible());
        assert!(matches!(movement, TokenEvent::FtIn { to: Some(_), .. }));
    }

    #[test]
    fn burn_has_no_recipient() {
        let event = fixtures::event(
            10,
            0,
            0,
            "A.1654653399040a61.FlowToken.TokensDeposited",
            deposit_payload("1.0", None),
        );
        let (.., movement) = match_token_event(&event).unwrap();
        assert!(matches!(movement, TokenEvent::FtIn { to: None, .. }));
    }

    #[test]
    fn ignores_unrelated_and_service_events() {
        let event = fixtures::event(
            10,
            0,
            0,
            "A.1654653399040a61.FlowToken.Initialized",
            json!({"type": "Event", "value": {"id": "x", "fields": []}}),
        );
        assert!(match_token_event(&event).is_none());
        let service = fixtures::event(
            10,
            0,
            0,
            "flow.AccountCreated",
            json!({"type": "Event", "value": {"id": "flow.AccountCreated", "fields": []}}),
        );
        assert!(match_token_event(&service).is_none());
    }
}
