use std::collections::HashMap;

use axum::http::StatusCode;
use serde_json::{json, Map, Value};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_JSONP: &str = "application/javascript";

/// Client-requested shaping of the response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Top-level keys to keep. Empty keeps everything.
    pub fields: Vec<String>,
    pub envelope: bool,
    /// Raw JSONP callback name, sanitized at encode time.
    pub callback: Option<String>,
}

impl EncodeOptions {
    /// Reads `fields`, `envelope` and `callback` from the query string.
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let fields = query
            .get("fields")
            .map(|f| {
                f.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let envelope = query
            .get("envelope")
            .map(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false);

        let callback = query.get("callback").filter(|c| !c.is_empty()).cloned();

        Self {
            fields,
            envelope,
            callback,
        }
    }
}

/// Final body plus the status the transport should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub status: StatusCode,
    pub body: String,
    pub content_type: &'static str,
}

/// `[A-Za-z0-9_]` only; everything else becomes `_`.
pub fn sanitize_callback(callback: &str) -> String {
    callback
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Keeps only the listed top-level keys, in the payload's own order.
pub fn project_fields(payload: &Value, fields: &[String]) -> Value {
    match payload {
        Value::Object(map) if !fields.is_empty() => {
            let kept: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(kept)
        }
        other => other.clone(),
    }
}

/// Shapes the final response body.
///
/// With an envelope or a callback the real status moves into the body as
/// `statusCode` and the transport status becomes 200, so clients that cannot
/// read HTTP status still see errors.
pub fn encode(payload: &Value, opts: &EncodeOptions, status: StatusCode) -> Encoded {
    let mut data = project_fields(payload, &opts.fields);
    let callback = opts
        .callback
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(sanitize_callback);

    let mut out_status = status;
    if opts.envelope || callback.is_some() {
        data = json!({
            "statusCode": status.as_u16(),
            "response": data,
        });
        out_status = StatusCode::OK;
    }

    // Value serialization only fails for non-string map keys, which Value cannot hold.
    let text = serde_json::to_string_pretty(&data).unwrap_or_else(|_| "null".to_string());

    match callback {
        Some(cb) => Encoded {
            status: out_status,
            body: format!("{}({});", cb, text),
            content_type: CONTENT_TYPE_JSONP,
        },
        None => Encoded {
            status: out_status,
            body: text,
            content_type: CONTENT_TYPE_JSON,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_options_from_query() {
        let opts = EncodeOptions::from_query(&query(&[
            ("fields", "id, name,,"),
            ("envelope", "TRUE"),
            ("callback", "cb"),
        ]));
        assert_eq!(opts.fields, vec!["id".to_string(), "name".to_string()]);
        assert!(opts.envelope);
        assert_eq!(opts.callback.as_deref(), Some("cb"));

        let opts = EncodeOptions::from_query(&query(&[("envelope", "0"), ("callback", "")]));
        assert!(!opts.envelope);
        assert!(opts.callback.is_none());
    }

    #[test]
    fn test_plain_pretty_json() {
        let out = encode(&json!({"a": 1}), &EncodeOptions::default(), StatusCode::CREATED);
        assert_eq!(out.status, StatusCode::CREATED);
        assert_eq!(out.body, "{\n  \"a\": 1\n}");
        assert_eq!(out.content_type, CONTENT_TYPE_JSON);
    }

    #[test]
    fn test_field_projection_keeps_payload_order() {
        let opts = EncodeOptions {
            fields: vec!["c".into(), "a".into(), "missing".into()],
            ..Default::default()
        };
        let out = encode(&json!({"a": 1, "b": 2, "c": 3}), &opts, StatusCode::OK);
        let keys: Vec<String> = serde_json::from_str::<Map<String, Value>>(&out.body)
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_projection_ignores_non_objects() {
        let payload = json!([1, 2, 3]);
        assert_eq!(project_fields(&payload, &["a".to_string()]), payload);
    }

    #[test]
    fn test_envelope_forces_200() {
        let opts = EncodeOptions {
            envelope: true,
            ..Default::default()
        };
        let out = encode(&json!({"a": 1}), &opts, StatusCode::FORBIDDEN);
        assert_eq!(out.status, StatusCode::OK);
        let body: Value = serde_json::from_str(&out.body).unwrap();
        assert_eq!(body, json!({"statusCode": 403, "response": {"a": 1}}));
    }

    #[test]
    fn test_jsonp_sanitizes_callback() {
        let opts = EncodeOptions {
            callback: Some("foo;bar".into()),
            ..Default::default()
        };
        let out = encode(&json!({"a": 1}), &opts, StatusCode::OK);
        assert!(out.body.starts_with("foo_bar({"));
        assert!(out.body.ends_with("});"));
        assert_eq!(out.content_type, CONTENT_TYPE_JSONP);

        let inner = &out.body["foo_bar(".len()..out.body.len() - 2];
        let body: Value = serde_json::from_str(inner).unwrap();
        assert_eq!(body, json!({"statusCode": 200, "response": {"a": 1}}));
    }

    #[test]
    fn test_sanitize_callback() {
        assert_eq!(sanitize_callback("jQuery_123"), "jQuery_123");
        assert_eq!(sanitize_callback("alert(1)//"), "alert_1___");
        assert_eq!(sanitize_callback("ä.b"), "__b");
    }

    #[test]
    fn test_padded_callback_is_sanitized_not_trimmed() {
        let opts = EncodeOptions::from_query(&query(&[("callback", " foo")]));
        assert_eq!(opts.callback.as_deref(), Some(" foo"));
        let out = encode(&json!({"a": 1}), &opts, StatusCode::OK);
        assert!(out.body.starts_with("_foo({"));

        let opts = EncodeOptions::from_query(&query(&[("callback", "foo\n")]));
        assert!(encode(&json!(null), &opts, StatusCode::OK)
            .body
            .starts_with("foo_("));
    }

    #[test]
    fn test_payload_not_mutated() {
        let payload = json!({"keep": 1, "drop": 2});
        let opts = EncodeOptions {
            fields: vec!["keep".into()],
            envelope: true,
            callback: None,
        };
        let _ = encode(&payload, &opts, StatusCode::OK);
        assert_eq!(payload, json!({"keep": 1, "drop": 2}));
    }
}
