//! Canonical JSON form for document digests.
//!
//! Companion documents are hashed over a canonical rendering: object keys
//! sorted, no insignificant whitespace. Two documents with the same content
//! always produce the same digest regardless of field order in the source
//! file.

use crate::hasher::hash_bytes;
use serde_json::Value;

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// SHA-256 hex digest of a document's canonical form.
pub fn hash_document(value: &Value) -> String {
    hash_bytes(canonical_json(value).as_bytes())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Display on Value::String produces the escaped JSON literal
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
