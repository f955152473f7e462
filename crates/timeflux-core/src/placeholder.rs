//! `{{dotted.path}}` template substitution from webhook payloads.
//!
//! Used by `openapi_call` actions to splice event fields into request paths
//! and bodies. Missing paths resolve to the empty string, never an error.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::context::walk_path;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("valid placeholder pattern"))
}

/// Replaces every `{{path}}` in `template` with the payload value at that
/// dotted path.
pub fn resolve(template: &str, payload: &Value) -> String {
    replace(template, payload, |v| v.to_string())
}

/// Like [`resolve`], but percent-encodes each substituted value so payload
/// data cannot break a URL path apart or smuggle in extra segments.
pub fn resolve_for_path(template: &str, payload: &Value) -> String {
    replace(template, payload, encode_path_segment)
}

/// Recursively resolves placeholders in every string of a JSON template.
pub fn resolve_in_json(template: &Value, payload: &Value) -> Value {
    match template {
        Value::String(s) => Value::String(resolve(s, payload)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_in_json(v, payload)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_in_json(v, payload)).collect())
        }
        other => other.clone(),
    }
}

fn replace(template: &str, payload: &Value, transform: impl Fn(&str) -> String) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let value = extract_value(payload, caps[1].trim()).unwrap_or_default();
            transform(&value)
        })
        .into_owned()
}

fn extract_value(payload: &Value, path: &str) -> Option<String> {
    match walk_path(payload, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Complex values substitute as their JSON text.
        node @ (Value::Array(_) | Value::Object(_)) => Some(node.to_string()),
        Value::Null => None,
    }
}

fn encode_path_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
