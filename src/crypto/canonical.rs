use serde_json::{Map, Value};

/// Recursively sorts object keys at every nesting level.
///
/// Arrays keep their element order; only the objects inside them are normalized.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        scalar => scalar.clone(),
    }
}

/// Compact JSON of the canonical form. This is the exact byte string that gets signed.
pub fn to_canonical_string(value: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&canonicalize(value))
}
