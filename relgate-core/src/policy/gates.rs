//! The five policy gates.
//!
//! Each gate is an independent pure function over the parsed documents,
//! producing one structured [`GateVerdict`]. Gates never abort each other;
//! the evaluator always runs all five and collects every verdict. Error
//! codes are part of the automation contract and must stay stable.

use super::documents::{
    as_nonempty_str, is_present, is_truthy, ArtifactDescriptor, PrivilegeLevel, ProofDocument,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gate names in evaluation (and report) order.
pub const GATE_CONSENT: &str = "consent.required";
pub const GATE_PRIVILEGE: &str = "least_privilege";
pub const GATE_TEMPORAL: &str = "temporal.validity";
pub const GATE_TENANT: &str = "tenant.isolation";
pub const GATE_PROOF: &str = "proof.integrity";

/// Stable error codes carried by failing gates.
pub const CODE_CONSENT_MISSING: &str = "consent.missing_scope";
pub const CODE_PRIVILEGE_ESCALATION: &str = "privilege.escalation";
pub const CODE_CONSENT_EXPIRED: &str = "consent.expired";
pub const CODE_TENANT_MISMATCH: &str = "consent.tenant_mismatch";
pub const CODE_PROOF_INTEGRITY: &str = "proof.integrity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Pass,
    Fail,
    /// The gate had nothing to evaluate; skipped verdicts do not count
    /// against the aggregate.
    Skip,
}

/// One gate's structured verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    pub gate: String,
    pub status: GateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl GateVerdict {
    fn pass(gate: &str) -> Self {
        GateVerdict {
            gate: gate.to_string(),
            status: GateStatus::Pass,
            error_code: None,
            note: None,
        }
    }

    fn pass_with_note(gate: &str, note: impl Into<String>) -> Self {
        GateVerdict {
            note: Some(note.into()),
            ..Self::pass(gate)
        }
    }

    fn fail(gate: &str, code: &str, note: impl Into<String>) -> Self {
        GateVerdict {
            gate: gate.to_string(),
            status: GateStatus::Fail,
            error_code: Some(code.to_string()),
            note: Some(note.into()),
        }
    }

    fn skip(gate: &str, note: impl Into<String>) -> Self {
        GateVerdict {
            gate: gate.to_string(),
            status: GateStatus::Skip,
            error_code: None,
            note: Some(note.into()),
        }
    }
}

/// consent.required: the descriptor must carry a truthy `consent`. Absence
/// is always a failure, never a skip.
pub fn consent_required(descriptor: &ArtifactDescriptor) -> GateVerdict {
    match &descriptor.consent {
        Some(value) if is_truthy(value) => GateVerdict::pass(GATE_CONSENT),
        Some(_) => GateVerdict::fail(
            GATE_CONSENT,
            CODE_CONSENT_MISSING,
            "consent field is present but empty or false",
        ),
        None => GateVerdict::fail(
            GATE_CONSENT,
            CODE_CONSENT_MISSING,
            "descriptor declares no consent",
        ),
    }
}

/// least_privilege: the declared level must not be an escalation. An absent
/// level defaults to least privilege and passes with a note.
pub fn least_privilege(descriptor: &ArtifactDescriptor) -> GateVerdict {
    let Some(raw) = as_nonempty_str(&descriptor.privilege_level) else {
        if is_present(&descriptor.privilege_level) {
            return GateVerdict::skip(
                GATE_PRIVILEGE,
                "privilege_level is not a string; cannot evaluate",
            );
        }
        return GateVerdict::pass_with_note(
            GATE_PRIVILEGE,
            "privilege_level absent; defaulting to least privilege",
        );
    };

    match PrivilegeLevel::parse(raw) {
        Some(level) if level.is_escalation() => GateVerdict::fail(
            GATE_PRIVILEGE,
            CODE_PRIVILEGE_ESCALATION,
            format!("privilege_level '{raw}' exceeds least privilege"),
        ),
        Some(PrivilegeLevel::Undefined) => GateVerdict::pass_with_note(
            GATE_PRIVILEGE,
            "privilege_level undefined; defaulting to least privilege",
        ),
        Some(_) => GateVerdict::pass(GATE_PRIVILEGE),
        None => GateVerdict::skip(
            GATE_PRIVILEGE,
            format!("unrecognized privilege_level '{raw}'"),
        ),
    }
}

/// temporal.validity: `now` must fall inside `[grant_time, expiry_time]`.
/// No temporal field, or timestamps that do not parse, skip the gate.
pub fn temporal_validity(descriptor: &ArtifactDescriptor, now: DateTime<Utc>) -> GateVerdict {
    let Some(temporal) = &descriptor.temporal else {
        return GateVerdict::skip(GATE_TEMPORAL, "no temporal grant declared");
    };

    let grant = match parse_timestamp(&temporal.grant_time) {
        Ok(ts) => ts,
        Err(reason) => return GateVerdict::skip(GATE_TEMPORAL, format!("grant_time {reason}")),
    };
    let expiry = match parse_timestamp(&temporal.expiry_time) {
        Ok(ts) => ts,
        Err(reason) => return GateVerdict::skip(GATE_TEMPORAL, format!("expiry_time {reason}")),
    };

    if now < grant {
        GateVerdict::fail(
            GATE_TEMPORAL,
            CODE_CONSENT_EXPIRED,
            format!("grant does not begin until {grant}"),
        )
    } else if now > expiry {
        GateVerdict::fail(
            GATE_TEMPORAL,
            CODE_CONSENT_EXPIRED,
            format!("grant expired at {expiry}"),
        )
    } else {
        GateVerdict::pass(GATE_TEMPORAL)
    }
}

/// tenant.isolation: when both documents declare a tenant, they must agree.
/// Either side omitting it skips the gate.
pub fn tenant_isolation(descriptor: &ArtifactDescriptor, proof: &ProofDocument) -> GateVerdict {
    match (
        as_nonempty_str(&descriptor.tenant_id),
        as_nonempty_str(&proof.tenant_id),
    ) {
        (Some(descriptor_tenant), Some(proof_tenant)) => {
            if descriptor_tenant == proof_tenant {
                GateVerdict::pass(GATE_TENANT)
            } else {
                GateVerdict::fail(
                    GATE_TENANT,
                    CODE_TENANT_MISMATCH,
                    format!(
                        "descriptor tenant '{descriptor_tenant}' does not match proof tenant '{proof_tenant}'"
                    ),
                )
            }
        }
        _ => GateVerdict::skip(GATE_TENANT, "tenant_id not declared by both documents"),
    }
}

/// proof.integrity: a proof that asserts a signature must also carry its
/// timestamp and hash. No signature at all means no proof was asserted and
/// the gate skips.
///
/// When the descriptor's canonical digest is known, a proof hash that does
/// not match it is noted for the operator; the distilled contract is
/// presence-only, so the mismatch never fails the gate.
pub fn proof_integrity(proof: &ProofDocument, descriptor_digest: Option<&str>) -> GateVerdict {
    if !is_present(&proof.signature) {
        return GateVerdict::skip(GATE_PROOF, "no proof asserted");
    }

    let mut missing = Vec::new();
    if !is_present(&proof.timestamp) {
        missing.push("timestamp");
    }
    if !is_present(&proof.hash) {
        missing.push("hash");
    }

    if !missing.is_empty() {
        return GateVerdict::fail(
            GATE_PROOF,
            CODE_PROOF_INTEGRITY,
            format!("proof is missing: {}", missing.join(", ")),
        );
    }

    if let (Some(expected), Some(Value::String(actual))) = (descriptor_digest, &proof.hash) {
        if !expected.eq_ignore_ascii_case(actual) {
            return GateVerdict::pass_with_note(
                GATE_PROOF,
                "proof hash does not match the canonical descriptor digest",
            );
        }
    }

    GateVerdict::pass(GATE_PROOF)
}

fn parse_timestamp(field: &Option<Value>) -> Result<DateTime<Utc>, String> {
    let Some(value) = field else {
        return Err("is missing".to_string());
    };
    let Some(raw) = value.as_str() else {
        return Err("is not a string".to_string());
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("'{raw}' does not parse: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn descriptor(value: Value) -> ArtifactDescriptor {
        serde_json::from_value(value).expect("descriptor")
    }

    fn proof(value: Value) -> ProofDocument {
        serde_json::from_value(value).expect("proof")
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().expect("timestamp")
    }

    #[test]
    fn test_consent_truthy_passes() {
        let verdict = consent_required(&descriptor(json!({"consent": true})));
        assert_eq!(verdict.status, GateStatus::Pass);

        let verdict = consent_required(&descriptor(json!({"consent": {"scope": "read"}})));
        assert_eq!(verdict.status, GateStatus::Pass);
    }

    #[test]
    fn test_consent_absent_or_falsy_fails() {
        for doc in [json!({}), json!({"consent": false}), json!({"consent": null}), json!({"consent": {}})] {
            let verdict = consent_required(&descriptor(doc));
            assert_eq!(verdict.status, GateStatus::Fail);
            assert_eq!(verdict.error_code.as_deref(), Some(CODE_CONSENT_MISSING));
        }
    }

    #[test]
    fn test_privilege_safe_levels_pass() {
        for level in ["read", "read-only", "minimal"] {
            let verdict = least_privilege(&descriptor(json!({"privilege_level": level})));
            assert_eq!(verdict.status, GateStatus::Pass, "level '{level}'");
            assert!(verdict.note.is_none());
        }
    }

    #[test]
    fn test_privilege_absent_passes_with_note() {
        let verdict = least_privilege(&descriptor(json!({})));
        assert_eq!(verdict.status, GateStatus::Pass);
        assert!(verdict.note.is_some());
    }

    #[test]
    fn test_privilege_escalation_fails() {
        for level in ["admin", "root", "write-all"] {
            let verdict = least_privilege(&descriptor(json!({"privilege_level": level})));
            assert_eq!(verdict.status, GateStatus::Fail, "level '{level}'");
            assert_eq!(
                verdict.error_code.as_deref(),
                Some(CODE_PRIVILEGE_ESCALATION)
            );
        }
    }

    #[test]
    fn test_privilege_unrecognized_skips() {
        let verdict = least_privilege(&descriptor(json!({"privilege_level": "sudo"})));
        assert_eq!(verdict.status, GateStatus::Skip);

        let verdict = least_privilege(&descriptor(json!({"privilege_level": 3})));
        assert_eq!(verdict.status, GateStatus::Skip);
    }

    #[test]
    fn test_temporal_inside_window_passes() {
        let doc = descriptor(json!({"temporal": {
            "grant_time": "2025-01-01T00:00:00Z",
            "expiry_time": "2025-12-31T23:59:59Z"
        }}));
        assert_eq!(temporal_validity(&doc, at(2025, 6, 1)).status, GateStatus::Pass);
    }

    #[test]
    fn test_temporal_outside_window_fails() {
        let doc = descriptor(json!({"temporal": {
            "grant_time": "2025-01-01T00:00:00Z",
            "expiry_time": "2025-12-31T23:59:59Z"
        }}));

        let expired = temporal_validity(&doc, at(2026, 1, 1));
        assert_eq!(expired.status, GateStatus::Fail);
        assert_eq!(expired.error_code.as_deref(), Some(CODE_CONSENT_EXPIRED));

        let early = temporal_validity(&doc, at(2024, 12, 31));
        assert_eq!(early.status, GateStatus::Fail);
    }

    #[test]
    fn test_temporal_missing_or_unparseable_skips() {
        let verdict = temporal_validity(&descriptor(json!({})), at(2025, 6, 1));
        assert_eq!(verdict.status, GateStatus::Skip);

        let doc = descriptor(json!({"temporal": {
            "grant_time": "not a timestamp",
            "expiry_time": "2025-12-31T23:59:59Z"
        }}));
        assert_eq!(temporal_validity(&doc, at(2025, 6, 1)).status, GateStatus::Skip);

        let doc = descriptor(json!({"temporal": {"grant_time": "2025-01-01T00:00:00Z"}}));
        assert_eq!(temporal_validity(&doc, at(2025, 6, 1)).status, GateStatus::Skip);
    }

    #[test]
    fn test_tenant_agreement() {
        let d = descriptor(json!({"tenant_id": "acme"}));

        let matching = tenant_isolation(&d, &proof(json!({"tenant_id": "acme"})));
        assert_eq!(matching.status, GateStatus::Pass);

        let mismatch = tenant_isolation(&d, &proof(json!({"tenant_id": "globex"})));
        assert_eq!(mismatch.status, GateStatus::Fail);
        assert_eq!(mismatch.error_code.as_deref(), Some(CODE_TENANT_MISMATCH));
    }

    #[test]
    fn test_tenant_absent_on_either_side_skips() {
        let with_tenant = descriptor(json!({"tenant_id": "acme"}));
        let without = descriptor(json!({}));

        assert_eq!(
            tenant_isolation(&with_tenant, &proof(json!({}))).status,
            GateStatus::Skip
        );
        assert_eq!(
            tenant_isolation(&without, &proof(json!({"tenant_id": "acme"}))).status,
            GateStatus::Skip
        );
    }

    #[test]
    fn test_proof_complete_passes() {
        let p = proof(json!({
            "signature": "x",
            "timestamp": "2025-01-01T00:00:00Z",
            "hash": "ab12"
        }));
        assert_eq!(proof_integrity(&p, None).status, GateStatus::Pass);
    }

    #[test]
    fn test_proof_missing_fields_fails() {
        let p = proof(json!({"signature": "x", "timestamp": "2025-01-01T00:00:00Z"}));
        let verdict = proof_integrity(&p, None);
        assert_eq!(verdict.status, GateStatus::Fail);
        assert_eq!(verdict.error_code.as_deref(), Some(CODE_PROOF_INTEGRITY));
        assert!(verdict.note.as_deref().is_some_and(|n| n.contains("hash")));

        let p = proof(json!({"signature": "x"}));
        let verdict = proof_integrity(&p, None);
        assert_eq!(verdict.status, GateStatus::Fail);
    }

    #[test]
    fn test_proof_without_signature_skips() {
        let p = proof(json!({"timestamp": "2025-01-01T00:00:00Z", "hash": "ab12"}));
        assert_eq!(proof_integrity(&p, None).status, GateStatus::Skip);

        let p = proof(json!({"signature": null, "hash": "ab12"}));
        assert_eq!(proof_integrity(&p, None).status, GateStatus::Skip);
    }

    #[test]
    fn test_proof_hash_divergence_is_noted_not_failed() {
        let p = proof(json!({
            "signature": "x",
            "timestamp": "2025-01-01T00:00:00Z",
            "hash": "deadbeef"
        }));

        let verdict = proof_integrity(&p, Some("cafebabe"));
        assert_eq!(verdict.status, GateStatus::Pass);
        assert!(verdict.note.is_some());

        let verdict = proof_integrity(&p, Some("deadbeef"));
        assert_eq!(verdict.status, GateStatus::Pass);
        assert!(verdict.note.is_none());
    }
}
