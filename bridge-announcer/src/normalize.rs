use serde_json::Value;
use tracing::{debug, warn};

use bridge_common::messages::{FieldValue, IndexableField};

/// Flatten a document value into indexable (path, scalar) pairs.
///
/// Object keys extend the path with `/<key>`, list elements with
/// `/$<index>`. Nulls and unsupported shapes (booleans) contribute nothing;
/// the function never fails.
pub fn normalize(path: &str, value: &Value) -> Vec<IndexableField> {
    let mut fields = Vec::new();
    normalize_into(&mut fields, path, value);
    fields
}

fn normalize_into(fields: &mut Vec<IndexableField>, path: &str, value: &Value) {
    match value {
        Value::Null => debug!(path, "skipping null value"),
        Value::String(text) => fields.push(IndexableField::new(path, text.as_str())),
        Value::Number(number) => match scalar_of(number) {
            Some(scalar) => fields.push(IndexableField::new(path, scalar)),
            None => warn!(path, "skipping unrepresentable number"),
        },
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                normalize_into(fields, &extend_path(path, &format!("${index}")), item);
            }
        }
        Value::Object(entries) => {
            for (key, item) in entries {
                normalize_into(fields, &extend_path(path, key), item);
            }
        }
        Value::Bool(_) => warn!(path, "no indexable type matched"),
    }
}

fn scalar_of(number: &serde_json::Number) -> Option<FieldValue> {
    if let Some(value) = number.as_i64() {
        return Some(FieldValue::Int(value));
    }
    number.as_f64().map(FieldValue::Float)
}

fn extend_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_owned()
    } else {
        format!("{path}/{segment}")
    }
}
