use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Scalar payload of one indexed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(value) => f.write_str(value),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// One flattened (path, scalar) pair destined for the index.
///
/// On the wire each field is a single-entry JSON object, `{"title/$0": "x"}`,
/// so the struct carries custom serde implementations instead of derives.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexableField {
    pub path: String,
    pub value: FieldValue,
}

impl IndexableField {
    pub fn new(path: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

impl Serialize for IndexableField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.path, &self.value)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for IndexableField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldVisitor;

        impl<'de> Visitor<'de> for FieldVisitor {
            type Value = IndexableField;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-entry map of field path to scalar value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let (path, value): (String, FieldValue) = access
                    .next_entry()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                if access.next_entry::<String, FieldValue>()?.is_some() {
                    return Err(de::Error::custom("field object must hold exactly one entry"));
                }
                Ok(IndexableField { path, value })
            }
        }

        deserializer.deserialize_map(FieldVisitor)
    }
}

/// The flat field list of one document, ending with the synthetic `type`,
/// `_id` and `_db` entries appended by the announcer.
pub type DocumentFields = Vec<IndexableField>;

/// Bus payload, tagged the way consumers dispatch on it:
/// `{"type": "updated" | "deleted" | "deleted_db", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum UpdateMessage {
    Updated(Vec<DocumentFields>),
    Deleted(Vec<String>),
    DeletedDb(String),
}

/// Decode a raw bus payload.
///
/// Returns `Ok(None)` when the payload parses but carries an unrecognized or
/// missing `type`, so callers can warn and drop it without treating it as a
/// parse failure.
pub fn decode(payload: &[u8]) -> Result<Option<UpdateMessage>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    match value.get("type").and_then(serde_json::Value::as_str) {
        Some("updated" | "deleted" | "deleted_db") => serde_json::from_value(value).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn updated_message_wire_format() {
        let message = UpdateMessage::Updated(vec![vec![
            IndexableField::new("title", "Hello"),
            IndexableField::new("type", "Article"),
            IndexableField::new("_id", "d1"),
            IndexableField::new("_db", "mydb"),
        ]]);

        assert_json_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "updated",
                "data": [[
                    {"title": "Hello"},
                    {"type": "Article"},
                    {"_id": "d1"},
                    {"_db": "mydb"},
                ]],
            })
        );
    }

    #[test]
    fn deleted_messages_round_trip() {
        let deletes = UpdateMessage::Deleted(vec!["a".to_string(), "b".to_string()]);
        let raw = serde_json::to_string(&deletes).unwrap();
        assert_eq!(decode(raw.as_bytes()).unwrap(), Some(deletes));

        let dropped_db = UpdateMessage::DeletedDb("mydb".to_string());
        let raw = serde_json::to_string(&dropped_db).unwrap();
        assert!(raw.contains("\"deleted_db\""));
        assert_eq!(decode(raw.as_bytes()).unwrap(), Some(dropped_db));
    }

    #[test]
    fn scalar_values_round_trip() {
        let fields: DocumentFields = vec![
            IndexableField::new("count", 3i64),
            IndexableField::new("score", 0.5f64),
            IndexableField::new("name", "x"),
        ];
        let raw = serde_json::to_string(&fields).unwrap();
        let parsed: DocumentFields = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, fields);
    }

    #[test]
    fn field_object_must_hold_one_entry() {
        assert!(serde_json::from_str::<IndexableField>("{}").is_err());
        assert!(serde_json::from_str::<IndexableField>(r#"{"a": 1, "b": 2}"#).is_err());
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"type": "updated", "data": "oops"}"#).is_err());
    }

    #[test]
    fn decode_passes_unknown_types_through_as_none() {
        assert_eq!(decode(br#"{"type": "bogus", "data": []}"#).unwrap(), None);
        assert_eq!(decode(br#"{"data": []}"#).unwrap(), None);
    }
}
