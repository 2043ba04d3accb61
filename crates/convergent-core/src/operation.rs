//! The five primitive operations and the envelope that carries them.

use crate::horizon::{DeviceId, Horizon, LogicalClock};
use crate::value::Value;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Wire-format timestamps are RFC3339/ISO-8601 strings; internally we keep
/// milliseconds-since-epoch, which is what ordering and tie-breaks use.
mod wire_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(ms: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        let dt: DateTime<Utc> = Utc
            .timestamp_millis_opt(*ms as i64)
            .single()
            .unwrap_or_else(Utc::now);
        serializer.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        let dt = DateTime::parse_from_rfc3339(&s).map_err(DeError::custom)?;
        Ok(dt.timestamp_millis().max(0) as u64)
    }
}

/// Identity of a single operation. Produced by the author; globally unique
/// with overwhelming probability.
pub type OpId = Uuid;

/// Identity of an item within a document.
pub type ItemId = String;

/// An envelope variant tag the parser does not recognize.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown operation kind: {0}")]
pub struct UnknownOpKind(pub String);

/// The five primitive operations.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub enum Operation {
    AddItem {
        item_id: ItemId,
        item_type: String,
    },
    RemoveItem {
        item_id: ItemId,
    },
    SetField {
        item_id: ItemId,
        field: String,
        value: Value,
    },
    AddToSet {
        item_id: ItemId,
        set_name: String,
        element: Value,
    },
    RemoveFromSet {
        item_id: ItemId,
        set_name: String,
        element: Value,
        observed_add_ids: Vec<OpId>,
    },
}

impl Operation {
    pub fn item_id(&self) -> &ItemId {
        match self {
            Operation::AddItem { item_id, .. }
            | Operation::RemoveItem { item_id }
            | Operation::SetField { item_id, .. }
            | Operation::AddToSet { item_id, .. }
            | Operation::RemoveFromSet { item_id, .. } => item_id,
        }
    }

    pub fn add_item(item_id: impl Into<ItemId>, item_type: impl Into<String>) -> Self {
        Operation::AddItem {
            item_id: item_id.into(),
            item_type: item_type.into(),
        }
    }

    pub fn remove_item(item_id: impl Into<ItemId>) -> Self {
        Operation::RemoveItem {
            item_id: item_id.into(),
        }
    }

    pub fn set_field(item_id: impl Into<ItemId>, field: impl Into<String>, value: Value) -> Self {
        Operation::SetField {
            item_id: item_id.into(),
            field: field.into(),
            value,
        }
    }

    pub fn add_to_set(
        item_id: impl Into<ItemId>,
        set_name: impl Into<String>,
        element: Value,
    ) -> Self {
        Operation::AddToSet {
            item_id: item_id.into(),
            set_name: set_name.into(),
            element,
        }
    }

    pub fn remove_from_set(
        item_id: impl Into<ItemId>,
        set_name: impl Into<String>,
        element: Value,
        observed_add_ids: Vec<OpId>,
    ) -> Self {
        Operation::RemoveFromSet {
            item_id: item_id.into(),
            set_name: set_name.into(),
            element,
            observed_add_ids,
        }
    }
}

// Hand-rolled Deserialize (rather than #[derive]) so an unrecognized
// variant tag produces `UnknownOpKind` instead of serde's generic
// "unknown variant" message.
impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let obj = raw
            .as_object()
            .ok_or_else(|| DeError::custom("operation must be a JSON object"))?;
        if obj.len() != 1 {
            return Err(DeError::custom("operation must have exactly one variant key"));
        }
        let (kind, payload) = obj.iter().next().unwrap();
        let parse = |payload: &serde_json::Value| -> Result<Self, D::Error> {
            serde_json::from_value::<OperationPayload>(payload.clone())
                .map_err(|e| DeError::custom(e.to_string()))
                .and_then(|p| p.into_operation(kind))
        };
        parse(payload)
    }
}

/// Untagged union of every variant's fields, used only to drive the
/// hand-rolled `Deserialize` above.
#[derive(Deserialize)]
struct OperationPayload {
    item_id: ItemId,
    item_type: Option<String>,
    field: Option<String>,
    set_name: Option<String>,
    value: Option<Value>,
    element: Option<Value>,
    #[serde(default)]
    observed_add_ids: Vec<OpId>,
}

impl OperationPayload {
    fn into_operation<E: DeError>(self, kind: &str) -> Result<Operation, E> {
        match kind {
            "AddItem" => Ok(Operation::AddItem {
                item_id: self.item_id,
                item_type: self
                    .item_type
                    .ok_or_else(|| DeError::missing_field("item_type"))?,
            }),
            "RemoveItem" => Ok(Operation::RemoveItem {
                item_id: self.item_id,
            }),
            "SetField" => Ok(Operation::SetField {
                item_id: self.item_id,
                field: self.field.ok_or_else(|| DeError::missing_field("field"))?,
                value: self.value.ok_or_else(|| DeError::missing_field("value"))?,
            }),
            "AddToSet" => Ok(Operation::AddToSet {
                item_id: self.item_id,
                set_name: self
                    .set_name
                    .ok_or_else(|| DeError::missing_field("set_name"))?,
                element: self
                    .element
                    .ok_or_else(|| DeError::missing_field("element"))?,
            }),
            "RemoveFromSet" => Ok(Operation::RemoveFromSet {
                item_id: self.item_id,
                set_name: self
                    .set_name
                    .ok_or_else(|| DeError::missing_field("set_name"))?,
                element: self
                    .element
                    .ok_or_else(|| DeError::missing_field("element"))?,
                observed_add_ids: self.observed_add_ids,
            }),
            other => Err(DeError::custom(UnknownOpKind(other.to_string()))),
        }
    }
}

/// An operation stamped with author, logical clock, wall-clock timestamp
/// and causal horizon. Immutable once emitted; the unit of log, transport
/// and merge.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub op_id: OpId,
    pub author: DeviceId,
    pub clock: LogicalClock,
    #[serde(with = "wire_timestamp")]
    pub timestamp: u64,
    pub horizon: Horizon,
    pub op: Operation,
}

impl Envelope {
    /// Stamp a freshly-authored operation with this device's clock,
    /// timestamp and observed horizon.
    pub fn author_local(
        op: Operation,
        author: DeviceId,
        clock: LogicalClock,
        timestamp: u64,
        horizon: Horizon,
    ) -> Self {
        Self {
            op_id: Uuid::new_v4(),
            author,
            clock,
            timestamp,
            horizon,
            op,
        }
    }

    /// `observed_by(E, F)`: did `self` (the later envelope, F) have
    /// knowledge of `other` (E) at authorship time?
    pub fn observed_by(&self, other: &Envelope) -> bool {
        self.horizon.has_seen(&other.author, other.clock)
    }

    /// Canonical replay ordering key: `(timestamp, author, clock)`.
    pub fn order_key(&self) -> (u64, &DeviceId, LogicalClock) {
        (self.timestamp, &self.author, self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_extracted_for_every_variant() {
        assert_eq!(Operation::add_item("x", "T").item_id(), "x");
        assert_eq!(
            Operation::set_field("x", "f", Value::int(1)).item_id(),
            "x"
        );
        assert_eq!(
            Operation::remove_from_set("x", "s", Value::int(1), vec![]).item_id(),
            "x"
        );
    }

    #[test]
    fn wire_format_round_trips() {
        let op = Operation::set_field("task_1", "title", Value::string("Hello"));
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"SetField\""));
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let json = r#"{"FlyToMoon":{"item_id":"x"}}"#;
        let err = serde_json::from_str::<Operation>(json).unwrap_err();
        assert!(err.to_string().contains("unknown operation kind"));
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::author_local(
            Operation::add_item("x", "GianttItem"),
            "device-a".to_string(),
            1,
            1_000,
            Horizon::new(),
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn observed_by_reads_the_later_envelopes_horizon() {
        let mut h = Horizon::new();
        h.observe("A", 5);
        let e_later = Envelope::author_local(
            Operation::add_item("y", "T"),
            "B".to_string(),
            1,
            2,
            h,
        );
        let e_earlier = Envelope::author_local(
            Operation::add_item("x", "T"),
            "A".to_string(),
            3,
            1,
            Horizon::new(),
        );
        assert!(e_earlier.observed_by(&e_later));
    }
}
