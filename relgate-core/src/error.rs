//! Verification error taxonomy with stable exit codes.
//!
//! Precondition faults (missing files, missing tools) carry their own exit
//! codes and stop the pipeline before any stage runs. Integrity and policy
//! failures are not errors in this sense: they travel inside the
//! [`VerificationReport`](crate::report::VerificationReport) so the full
//! diagnosis is preserved.

use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes forming the automation contract.
pub mod exit {
    /// All three stages passed.
    pub const SUCCESS: i32 = 0;
    /// One or more manifest digests did not match the file contents.
    pub const HASH_MISMATCH: i32 = 1;
    /// Detached signature verification failed.
    pub const SIGNATURE_INVALID: i32 = 2;
    /// At least one policy gate failed.
    pub const POLICY_FAILED: i32 = 3;
    /// A required input file is missing.
    pub const MISSING_FILE: i32 = 4;
    /// The external verification tool is missing or timed out.
    pub const TOOL_MISSING: i32 = 5;
    /// An input could not be parsed.
    pub const MALFORMED_INPUT: i32 = 6;
    /// Anything the taxonomy did not anticipate.
    pub const UNEXPECTED: i32 = 10;
}

/// Fatal faults raised by the verification pipeline.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// A required input file does not exist.
    #[error("Required input file is missing: {path}")]
    MissingFile { path: PathBuf },

    /// The external signature-verification tool could not be located.
    #[error("Required external tool is not available on this host: {tool}\n\nInstall OpenSSH (ssh-keygen) and ensure it is on PATH.")]
    ToolMissing { tool: String },

    /// The external tool did not finish within the configured deadline.
    #[error("External tool '{tool}' timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    /// A file could not be opened or read for hashing.
    #[error("Failed to read file for hashing: {path}")]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The hash manifest violates its format invariants.
    #[error("Malformed hash manifest {path}: {reason}")]
    MalformedManifest { path: PathBuf, reason: String },

    /// An allowed-signers registry line could not be parsed.
    #[error("Malformed allowed-signers registry {path} at line {line}: {reason}")]
    MalformedRegistry {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The signature blob does not declare itself as a detached SSH signature.
    #[error("Corrupt signature blob {path}: first line does not declare an SSH signature")]
    CorruptSignature { path: PathBuf },

    /// A required JSON document could not be parsed.
    #[error("Failed to parse JSON document {path}")]
    MalformedDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Catch-all for faults outside the taxonomy.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl VerifyError {
    /// Map this fault onto the exit-code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            VerifyError::MissingFile { .. } | VerifyError::FileUnreadable { .. } => {
                exit::MISSING_FILE
            }
            VerifyError::ToolMissing { .. } | VerifyError::ToolTimeout { .. } => exit::TOOL_MISSING,
            VerifyError::MalformedManifest { .. }
            | VerifyError::MalformedRegistry { .. }
            | VerifyError::CorruptSignature { .. }
            | VerifyError::MalformedDocument { .. } => exit::MALFORMED_INPUT,
            VerifyError::Unexpected(_) => exit::UNEXPECTED,
        }
    }
}
