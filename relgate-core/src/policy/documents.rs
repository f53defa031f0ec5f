//! The two companion documents the policy gates inspect.
//!
//! Both are JSON produced by external tooling and treated as immutable
//! snapshots. Fields the gates probe are held as loose [`Value`]s on purpose:
//! one field of the wrong shape degrades one gate to `skip`, it does not sink
//! the whole evaluation. Only a document that fails to parse as a JSON object
//! at all is a precondition error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Compiled artifact descriptor: what is being verified and under which
/// authorization attributes. Unknown fields (build metadata, input/output
/// listings from the provenance generator) are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privilege_level: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalGrant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Value>,
}

/// Authorization validity window inside the descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<Value>,
}

/// Proof-of-authorization document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProofDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Value>,
}

/// Declared privilege level of the artifact.
///
/// `Undefined` is the documented permissive default: an absent level is
/// treated as least privilege rather than escalation. Strings outside this
/// enum do not parse and the gate skips instead of guessing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrivilegeLevel {
    Read,
    ReadOnly,
    Minimal,
    Admin,
    Root,
    WriteAll,
    #[default]
    Undefined,
}

impl PrivilegeLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" => Some(PrivilegeLevel::Read),
            "read-only" => Some(PrivilegeLevel::ReadOnly),
            "minimal" => Some(PrivilegeLevel::Minimal),
            "admin" => Some(PrivilegeLevel::Admin),
            "root" => Some(PrivilegeLevel::Root),
            "write-all" => Some(PrivilegeLevel::WriteAll),
            "undefined" => Some(PrivilegeLevel::Undefined),
            _ => None,
        }
    }

    /// True for levels that violate least privilege.
    pub fn is_escalation(self) -> bool {
        matches!(
            self,
            PrivilegeLevel::Admin | PrivilegeLevel::Root | PrivilegeLevel::WriteAll
        )
    }
}

/// JSON truthiness as the original tooling understood it: null, false, zero,
/// and empty containers are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// A field counts as present only when it exists and is not JSON null.
pub fn is_present(field: &Option<Value>) -> bool {
    matches!(field, Some(v) if !v.is_null())
}

/// Extract a non-empty string from a loose field.
pub fn as_nonempty_str(field: &Option<Value>) -> Option<&str> {
    match field {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}
