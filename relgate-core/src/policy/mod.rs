//! Policy gate evaluation over the two companion documents.
//!
//! Five independent gates, all of which always run; a failing gate never
//! stops the others (unlike the hash and signature stages, which
//! short-circuit the pipeline). Verdicts are merged in fixed gate order so
//! the report is deterministic regardless of evaluation scheduling.

pub mod documents;
pub mod gates;

pub use documents::{ArtifactDescriptor, PrivilegeLevel, ProofDocument, TemporalGrant};
pub use gates::{GateStatus, GateVerdict};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Error code emitted when strict mode rejects an all-skip evaluation.
pub const CODE_NO_EVALUABLE_GATES: &str = "policy.no_evaluable_gates";

/// Aggregate policy status for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Pass,
    Fail,
    /// The stage never ran (an earlier stage aborted the pipeline).
    Skip,
}

/// Strictness knobs for the evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyConfig {
    /// When set, an evaluation in which every gate skipped is a failure
    /// instead of the permissive default pass.
    pub require_evaluable_gates: bool,
}

/// The itemized outcome of the policy stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub status: PolicyStatus,
    pub gates: Vec<GateVerdict>,
    pub errors: Vec<String>,
}

impl PolicyVerdict {
    pub fn passed(&self) -> bool {
        self.status == PolicyStatus::Pass
    }

    /// Placeholder verdict for a stage that never ran.
    pub fn not_evaluated() -> Self {
        PolicyVerdict {
            status: PolicyStatus::Skip,
            gates: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Evaluate all five gates and aggregate their verdicts.
pub fn evaluate(
    descriptor: &ArtifactDescriptor,
    proof: &ProofDocument,
    descriptor_digest: Option<&str>,
    now: DateTime<Utc>,
    config: &PolicyConfig,
) -> PolicyVerdict {
    let gate_verdicts = vec![
        gates::consent_required(descriptor),
        gates::least_privilege(descriptor),
        gates::temporal_validity(descriptor, now),
        gates::tenant_isolation(descriptor, proof),
        gates::proof_integrity(proof, descriptor_digest),
    ];

    aggregate(gate_verdicts, config)
}

/// Aggregate: AND over every non-skip verdict.
///
/// Zero evaluable gates pass by default, since no assertion was made that
/// could be violated. That leniency is deliberate but configurable; callers
/// wanting stricter behavior set
/// [`require_evaluable_gates`](PolicyConfig::require_evaluable_gates).
pub fn aggregate(gate_verdicts: Vec<GateVerdict>, config: &PolicyConfig) -> PolicyVerdict {
    let mut errors = Vec::new();
    let mut evaluated = 0usize;
    let mut failed = false;

    for verdict in &gate_verdicts {
        match verdict.status {
            GateStatus::Pass => evaluated += 1,
            GateStatus::Fail => {
                evaluated += 1;
                failed = true;
                let code = verdict.error_code.as_deref().unwrap_or("unknown");
                errors.push(format!("{}: {}", verdict.gate, code));
            }
            GateStatus::Skip => {
                debug!(
                    "Gate '{}' skipped: {}",
                    verdict.gate,
                    verdict.note.as_deref().unwrap_or("")
                );
            }
        }
    }

    if evaluated == 0 && config.require_evaluable_gates {
        failed = true;
        errors.push(format!(
            "{CODE_NO_EVALUABLE_GATES}: every gate skipped and strict mode requires at least one evaluable gate"
        ));
    }

    PolicyVerdict {
        status: if failed {
            PolicyStatus::Fail
        } else {
            PolicyStatus::Pass
        },
        gates: gate_verdicts,
        errors,
    }
}
