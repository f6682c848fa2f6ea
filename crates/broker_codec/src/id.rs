//! Request identifiers that may be an integer, a string, or `null` on the
//! wire, with round-trip shape preservation.
//!
//! The JSON-RPC spec lets an `id` be a number, a string, or `null`, and
//! lets the field be absent entirely for notifications. This module keeps
//! those four possibilities distinct: [`MessageId`] covers the three
//! present shapes, and "absent" is modeled by the caller holding an
//! `Option<MessageId>` rather than folding it into the enum itself — that
//! keeps `is_set()` a one-line `Option::is_some` at the call site instead
//! of a fourth enum arm every match has to handle.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An LSP/JSON-RPC request id, preserving whichever of the three wire
/// shapes it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Int(i64),
    Str(String),
    Null,
}

impl MessageId {
    /// Build a broker-originated id. Outbound ids the broker allocates are
    /// always integers.
    pub fn from_i64(id: i64) -> Self {
        MessageId::Int(id)
    }

    /// The key used in the internal pending-request map. A string id that
    /// parses as a decimal integer is accepted as an alias for that
    /// integer key; a non-numeric string or a null id has no map entry.
    pub fn lookup_key(&self) -> Option<i64> {
        match self {
            MessageId::Int(i) => Some(*i),
            MessageId::Str(s) => s.parse::<i64>().ok(),
            MessageId::Null => None,
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MessageId::Int(i) => serializer.serialize_i64(*i),
            MessageId::Str(s) => serializer.serialize_str(s),
            MessageId::Null => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null => Ok(MessageId::Null),
            Value::String(s) => Ok(MessageId::Str(s)),
            Value::Number(n) => n
                .as_i64()
                .map(MessageId::Int)
                .ok_or_else(|| de::Error::custom(format!("id number out of i64 range: {n}"))),
            other => Err(de::Error::custom(format!("invalid id shape: {other}"))),
        }
    }
}

/// Extract the `id` field from a raw JSON-RPC message, distinguishing
/// "field absent" (a notification) from "field present and null" or any
/// other shape. Mirrors `IsSet()` from the reference protocol description:
/// `parse_id(msg).is_some()` is `IsSet()`.
pub fn parse_id(message: &Value) -> Option<MessageId> {
    let raw = message.get("id")?;
    Some(match raw {
        Value::Null => MessageId::Null,
        Value::String(s) => MessageId::Str(s.clone()),
        Value::Number(n) => MessageId::Int(n.as_i64().unwrap_or_default()),
        _ => MessageId::Null,
    })
}

/// Serialize a [`MessageId`] back to the `Value` shape it should appear
/// as on the wire.
pub fn id_to_value(id: &MessageId) -> Value {
    match id {
        MessageId::Int(i) => Value::from(*i),
        MessageId::Str(s) => Value::from(s.clone()),
        MessageId::Null => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip_int() {
        let id = MessageId::Int(42);
        let v = id_to_value(&id);
        assert_eq!(v, serde_json::json!(42));
        assert_eq!(parse_id(&serde_json::json!({"id": v})), Some(id));
    }

    #[test]
    fn round_trip_string_alias_parses_to_lookup_key() {
        let id = MessageId::Str("42".to_string());
        assert_eq!(id.lookup_key(), Some(42));
    }

    #[test]
    fn non_numeric_string_has_no_lookup_key() {
        let id = MessageId::Str("abc".to_string());
        assert_eq!(id.lookup_key(), None);
    }

    #[test]
    fn null_id_has_no_lookup_key_but_is_set() {
        let msg = serde_json::json!({"id": null, "method": "foo"});
        let id = parse_id(&msg).expect("id field is present");
        assert_eq!(id, MessageId::Null);
        assert_eq!(id.lookup_key(), None);
    }

    #[test]
    fn absent_id_is_none() {
        let msg = serde_json::json!({"method": "textDocument/didOpen"});
        assert_eq!(parse_id(&msg), None);
    }

    #[test]
    fn serde_round_trip_preserves_shape() {
        for id in [
            MessageId::Int(42),
            MessageId::Str("42".to_string()),
            MessageId::Str("abc".to_string()),
            MessageId::Null,
        ] {
            let json = serde_json::to_value(&id).unwrap();
            let parsed: MessageId = serde_json::from_value(json).unwrap();
            assert_eq!(parsed, id);
        }
    }
}
