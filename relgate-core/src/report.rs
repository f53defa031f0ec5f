//! The Verification Report, the single authoritative output of a run.
//!
//! Automation consumes this JSON object and the process exit code; nothing
//! printed to stderr is load-bearing. The report is emitted exactly once and
//! never mutated afterwards.

use crate::error::{exit, VerifyError};
use crate::manifest::FileCheck;
use crate::policy::PolicyVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-stage booleans. `None` means the stage never ran because an earlier
/// stage aborted the pipeline, which is distinct from a stage failing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageChecks {
    pub hash: Option<bool>,
    pub signature: Option<bool>,
    pub policy: Option<bool>,
}

/// The complete verification report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub passed: bool,
    pub checks: StageChecks,
    pub policy: PolicyVerdict,
    pub files: Vec<FileCheck>,
    pub signer: String,
}

impl VerificationReport {
    /// Assemble a report from stage outcomes.
    pub fn new(
        checks: StageChecks,
        policy: PolicyVerdict,
        files: Vec<FileCheck>,
        signer: String,
    ) -> Self {
        let passed = checks.hash == Some(true)
            && checks.signature == Some(true)
            && checks.policy == Some(true);

        VerificationReport {
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            passed,
            checks,
            policy,
            files,
            signer,
        }
    }

    /// Degenerate report for a run that died on a precondition or parse
    /// fault before any stage could produce a verdict.
    pub fn from_error(error: &VerifyError, signer: &str) -> Self {
        let mut policy = PolicyVerdict::not_evaluated();
        policy.errors.push(error.to_string());

        VerificationReport {
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            passed: false,
            checks: StageChecks::default(),
            policy,
            files: Vec::new(),
            signer: signer.to_string(),
        }
    }

    /// Exit code for a report whose stages ran: hash failures outrank
    /// signature failures outrank policy failures.
    pub fn exit_code(&self) -> i32 {
        if self.checks.hash == Some(false) {
            exit::HASH_MISMATCH
        } else if self.checks.signature == Some(false) {
            exit::SIGNATURE_INVALID
        } else if self.checks.policy == Some(false) {
            exit::POLICY_FAILED
        } else if self.passed {
            exit::SUCCESS
        } else {
            // No stage failed yet the report did not pass: a stage never
            // ran without a recorded precondition error.
            exit::UNEXPECTED
        }
    }

    /// Serialize for the stdout contract.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
