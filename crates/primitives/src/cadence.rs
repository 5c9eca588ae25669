//! Decoding of JSON-Cadence values.
//!
//! Event payloads and script execution results arrive as JSON-Cadence, a
//! tagged `{"type": ..., "value": ...}` encoding. This module decodes the
//! subset the derivation workers consume: primitives, optionals, arrays,
//! dictionaries and composites (events, structs, resources). Anything else
//! is preserved as [`CadenceValue::Raw`] so callers can still round-trip it.

use crate::Address;
use bigdecimal::BigDecimal;
use serde_json::Value;
use std::{collections::BTreeMap, str::FromStr};

/// Errors raised while decoding a JSON-Cadence document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CadenceError {
    /// The document does not follow the tagged `{type, value}` shape.
    #[error("unexpected JSON-Cadence shape: {0}")]
    UnexpectedShape(String),
    /// A numeric literal could not be parsed.
    #[error("invalid JSON-Cadence number: {0}")]
    InvalidNumber(String),
    /// An address literal could not be parsed.
    #[error("invalid JSON-Cadence address: {0}")]
    InvalidAddress(String),
}

/// A decoded JSON-Cadence value.
#[derive(Debug, Clone, PartialEq)]
pub enum CadenceValue {
    /// `Void`.
    Void,
    /// Any boolean.
    Bool(bool),
    /// `String` and `Character`.
    String(String),
    /// An 8-byte account address.
    Address(Address),
    /// Unsigned integers that fit 128 bits (`UInt8` .. `UInt128`, `Word*`).
    UInt(u128),
    /// Signed integers that fit 128 bits (`Int8` .. `Int128`).
    Int(i128),
    /// Fixed-point and oversized integer types (`UFix64`, `Fix64`, `UInt256`,
    /// `Int256`, `Int`, `UInt`). 78 decimal digits cover the full range.
    Decimal(BigDecimal),
    /// `Optional`, `nil` or a boxed inner value.
    Optional(Option<Box<CadenceValue>>),
    /// `Array`.
    Array(Vec<CadenceValue>),
    /// `Dictionary`, ordered as emitted.
    Dictionary(Vec<(CadenceValue, CadenceValue)>),
    /// `Event`, `Struct`, `Resource`, `Contract` or `Enum`: a qualified type
    /// id plus named fields.
    Composite {
        /// Fully qualified composite type id.
        id: String,
        /// Field name to decoded value.
        fields: BTreeMap<String, CadenceValue>,
    },
    /// Types the indexer does not interpret (`Path`, `Type`, `Capability`,
    /// `Function`), kept verbatim.
    Raw(Value),
}

impl CadenceValue {
    /// Unwraps one level of `Optional`, mapping `nil` to `None`.
    pub fn unwrap_optional(&self) -> Option<&CadenceValue> {
        match self {
            Self::Optional(inner) => inner.as_deref(),
            other => Some(other),
        }
    }

    /// String content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Address content, if this is an address.
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(a) => Some(*a),
            _ => None,
        }
    }

    /// Unsigned integer content, if it fits 64 bits.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => u64::try_from(*v).ok(),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Numeric content widened to a decimal.
    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            Self::Decimal(d) => Some(d.clone()),
            Self::UInt(v) => Some(BigDecimal::from(*v)),
            Self::Int(v) => Some(BigDecimal::from(*v)),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Named field of a composite.
    pub fn field(&self, name: &str) -> Option<&CadenceValue> {
        match self {
            Self::Composite { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    /// Named field, with one level of `Optional` unwrapped.
    pub fn field_flat(&self, name: &str) -> Option<&CadenceValue> {
        self.field(name).and_then(CadenceValue::unwrap_optional)
    }

    /// Convenience: an address-valued field, tolerating an `Optional` wrapper.
    pub fn field_address(&self, name: &str) -> Option<Address> {
        self.field_flat(name).and_then(CadenceValue::as_address)
    }

    /// Convenience: a decimal-valued field, tolerating an `Optional` wrapper.
    pub fn field_decimal(&self, name: &str) -> Option<BigDecimal> {
        self.field_flat(name).and_then(CadenceValue::as_decimal)
    }

    /// Convenience: an unsigned-integer field, tolerating an `Optional` wrapper.
    pub fn field_u64(&self, name: &str) -> Option<u64> {
        self.field_flat(name).and_then(CadenceValue::as_u64)
    }

    /// Convenience: a string field, tolerating an `Optional` wrapper.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field_flat(name).and_then(CadenceValue::as_str)
    }
}

/// Decodes a JSON-Cadence document.
pub fn decode(value: &Value) -> Result<CadenceValue, CadenceError> {
    let obj = value
        .as_object()
        .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string()))?;
    let type_tag = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string()))?;
    let inner = obj.get("value");

    match type_tag {
        "Void" => Ok(CadenceValue::Void),
        "Bool" => inner
            .and_then(Value::as_bool)
            .map(CadenceValue::Bool)
            .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string())),
        "String" | "Character" => inner
            .and_then(Value::as_str)
            .map(|s| CadenceValue::String(s.to_owned()))
            .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string())),
        "Address" => {
            let raw = inner
                .and_then(Value::as_str)
                .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string()))?;
            decode_address(raw).map(CadenceValue::Address)
        }
        "UInt8" | "UInt16" | "UInt32" | "UInt64" | "UInt128" | "Word8" | "Word16" | "Word32" |
        "Word64" => {
            let raw = number_str(inner, value)?;
            raw.parse::<u128>()
                .map(CadenceValue::UInt)
                .map_err(|_| CadenceError::InvalidNumber(raw.to_owned()))
        }
        "Int8" | "Int16" | "Int32" | "Int64" | "Int128" => {
            let raw = number_str(inner, value)?;
            raw.parse::<i128>()
                .map(CadenceValue::Int)
                .map_err(|_| CadenceError::InvalidNumber(raw.to_owned()))
        }
        "UFix64" | "Fix64" | "UInt256" | "Int256" | "UInt" | "Int" => {
            let raw = number_str(inner, value)?;
            BigDecimal::from_str(raw)
                .map(CadenceValue::Decimal)
                .map_err(|_| CadenceError::InvalidNumber(raw.to_owned()))
        }
        "Optional" => match inner {
            None | Some(Value::Null) => Ok(CadenceValue::Optional(None)),
            Some(v) => Ok(CadenceValue::Optional(Some(Box::new(decode(v)?)))),
        },
        "Array" => {
            let items = inner
                .and_then(Value::as_array)
                .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string()))?;
            items.iter().map(decode).collect::<Result<Vec<_>, _>>().map(CadenceValue::Array)
        }
        "Dictionary" => {
            let entries = inner
                .and_then(Value::as_array)
                .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string()))?;
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                let key = entry
                    .get("key")
                    .ok_or_else(|| CadenceError::UnexpectedShape(entry.to_string()))?;
                let val = entry
                    .get("value")
                    .ok_or_else(|| CadenceError::UnexpectedShape(entry.to_string()))?;
                out.push((decode(key)?, decode(val)?));
            }
            Ok(CadenceValue::Dictionary(out))
        }
        "Event" | "Struct" | "Resource" | "Contract" | "Enum" => {
            let inner = inner
                .and_then(Value::as_object)
                .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string()))?;
            let id = inner
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let field_list = inner
                .get("fields")
                .and_then(Value::as_array)
                .ok_or_else(|| CadenceError::UnexpectedShape(value.to_string()))?;
            let mut fields = BTreeMap::new();
            for field in field_list {
                let name = field
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CadenceError::UnexpectedShape(field.to_string()))?;
                let val = field
                    .get("value")
                    .ok_or_else(|| CadenceError::UnexpectedShape(field.to_string()))?;
                fields.insert(name.to_owned(), decode(val)?);
            }
            Ok(CadenceValue::Composite { id, fields })
        }
        _ => Ok(CadenceValue::Raw(value.clone())),
    }
}

fn number_str<'a>(inner: Option<&'a Value>, whole: &Value) -> Result<&'a str, CadenceError> {
    inner
        .and_then(Value::as_str)
        .ok_or_else(|| CadenceError::UnexpectedShape(whole.to_string()))
}

fn decode_address(raw: &str) -> Result<Address, CadenceError> {
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = alloy_primitives::hex::decode(hex)
        .map_err(|_| CadenceError::InvalidAddress(raw.to_owned()))?;
    if bytes.len() > 8 {
        return Err(CadenceError::InvalidAddress(raw.to_owned()));
    }
    // Short addresses are left-padded to 8 bytes.
    let mut out = [0u8; 8];
    out[8 - bytes.len()..].copy_from_slice(&bytes);
    Ok(Address::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deposit_event() -> Value {
        json!({
            "type": "Event",
            "value": {
                "id": "A.1654653399040a61.FlowToken.TokensDeposited",
                "fields": [
                    {"name": "amount", "value": {"type": "UFix64", "value": "10.00000000"}},
                    {"name": "to", "value": {"type": "Optional", "value": {
                        "type": "Address", "value": "0xf233dcee88fe0abe"
                    }}}
                ]
            }
        })
    }

    #[test]
    fn decodes_deposit_event() {
        let decoded = decode(&deposit_event()).unwrap();
        assert_eq!(
            decoded.field_decimal("amount"),
            Some(BigDecimal::from_str("10.00000000").unwrap())
        );
        let to = decoded.field_address("to").unwrap();
        assert_eq!(alloy_primitives::hex::encode(to), "f233dcee88fe0abe");
    }

    #[test]
    fn nil_optional_decodes_to_none() {
        let v = decode(&json!({"type": "Optional", "value": null})).unwrap();
        assert_eq!(v, CadenceValue::Optional(None));
        assert!(v.unwrap_optional().is_none());
    }

    #[test]
    fn uint256_widens_to_decimal() {
        let v = decode(&json!({
            "type": "UInt256",
            "value": "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        }))
        .unwrap();
        assert!(matches!(v, CadenceValue::Decimal(_)));
    }

    #[test]
    fn short_address_left_pads() {
        let v = decode(&json!({"type": "Address", "value": "0x01"})).unwrap();
        assert_eq!(
            v.as_address().map(|a| alloy_primitives::hex::encode(a)),
            Some("0000000000000001".to_owned())
        );
    }

    #[test]
    fn unknown_types_survive_as_raw() {
        let doc = json!({"type": "Path", "value": {"domain": "storage", "identifier": "vault"}});
        assert_eq!(decode(&doc).unwrap(), CadenceValue::Raw(doc.clone()));
    }
}
