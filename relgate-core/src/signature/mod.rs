//! Detached-signature verification over the manifest bytes.
//!
//! Cryptographic verification is delegated to an external primitive
//! (`ssh-keygen -Y verify`) behind the [`SignatureBackend`] trait, so a
//! native library implementation can be swapped in without touching pipeline
//! logic. The manifest bytes are read from disk verbatim and piped to the
//! primitive's stdin; the payload is never re-derived, which is what makes
//! post-signing tampering detectable.

pub mod allowed_signers;

pub use allowed_signers::{AllowedSigner, SignerRegistry, SignerRejection};

use crate::error::VerifyError;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Name of the external verification primitive.
pub const VERIFY_TOOL: &str = "ssh-keygen";

/// First line every acceptable signature blob must carry.
pub const SIGNATURE_ARMOR_BEGIN: &str = "-----BEGIN SSH SIGNATURE-----";

/// Everything a backend needs for one verification.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    /// The signed payload, read verbatim from this path.
    pub manifest_path: PathBuf,
    pub signature_path: PathBuf,
    pub signers_path: PathBuf,
    /// Claimed signing identity (a registry principal).
    pub identity: String,
    /// Verification namespace the signature is bound to.
    pub namespace: String,
}

/// Verdict from a backend. `detail` carries the primitive's diagnostics.
#[derive(Debug, Clone)]
pub struct SignatureOutcome {
    pub valid: bool,
    pub detail: String,
}

/// Trait for signature-verification backends.
///
/// The production implementation shells out to OpenSSH; tests substitute
/// their own. Implementations do not re-implement signature math.
#[async_trait]
pub trait SignatureBackend: Send + Sync {
    /// Verify a detached signature over the manifest bytes.
    async fn verify(&self, request: &SignatureRequest) -> Result<SignatureOutcome, VerifyError>;

    /// Backend identifier for logging.
    fn name(&self) -> &'static str;
}

/// Backend invoking `ssh-keygen -Y verify` as a subprocess.
pub struct SshKeygenBackend {
    program: PathBuf,
    timeout: Duration,
}

impl SshKeygenBackend {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        SshKeygenBackend { program, timeout }
    }

    /// Locate the primitive on PATH, or fail the precondition.
    pub fn locate(timeout: Duration) -> Result<Self, VerifyError> {
        let program = locate_tool(VERIFY_TOOL).ok_or_else(|| VerifyError::ToolMissing {
            tool: VERIFY_TOOL.to_string(),
        })?;
        debug!("Using {} at {}", VERIFY_TOOL, program.display());
        Ok(SshKeygenBackend::new(program, timeout))
    }
}

#[async_trait]
impl SignatureBackend for SshKeygenBackend {
    async fn verify(&self, request: &SignatureRequest) -> Result<SignatureOutcome, VerifyError> {
        let payload = tokio::fs::read(&request.manifest_path).await.map_err(|e| {
            VerifyError::FileUnreadable {
                path: request.manifest_path.clone(),
                source: e,
            }
        })?;

        let mut child = Command::new(&self.program)
            .arg("-Y")
            .arg("verify")
            .arg("-f")
            .arg(&request.signers_path)
            .arg("-I")
            .arg(&request.identity)
            .arg("-n")
            .arg(&request.namespace)
            .arg("-s")
            .arg(&request.signature_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => VerifyError::ToolMissing {
                    tool: VERIFY_TOOL.to_string(),
                },
                _ => VerifyError::Unexpected(
                    anyhow::Error::from(e).context(format!("failed to spawn {VERIFY_TOOL}")),
                ),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A fast-failing verifier may close the pipe before the payload
            // is fully written; the exit status is still the verdict.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("Short write of payload to {}: {}", VERIFY_TOOL, e);
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VerifyError::ToolTimeout {
                tool: VERIFY_TOOL.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .context("failed to collect ssh-keygen output")?;

        let mut detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            if !detail.is_empty() {
                detail.push('\n');
            }
            detail.push_str(&stderr);
        }

        if !output.status.success() {
            warn!("{} rejected the signature: {}", VERIFY_TOOL, detail);
        }

        Ok(SignatureOutcome {
            valid: output.status.success(),
            detail,
        })
    }

    fn name(&self) -> &'static str {
        "ssh-keygen"
    }
}

/// Check the armor declaration on a signature blob without verifying it.
///
/// The blob is opaque beyond its first line; anything that does not declare
/// itself as a detached SSH signature is corrupt input.
pub fn sniff_armor(path: &Path) -> Result<(), VerifyError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => VerifyError::MissingFile {
            path: path.to_path_buf(),
        },
        _ => VerifyError::FileUnreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    match content.lines().next() {
        Some(first) if first.trim_end() == SIGNATURE_ARMOR_BEGIN => Ok(()),
        _ => Err(VerifyError::CorruptSignature {
            path: path.to_path_buf(),
        }),
    }
}

/// Resolve a tool name against PATH.
pub fn locate_tool(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{name}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

/// Mock backend for unit tests.
#[cfg(test)]
pub struct MockBackend {
    pub outcome: SignatureOutcome,
}

#[cfg(test)]
#[async_trait]
impl SignatureBackend for MockBackend {
    async fn verify(&self, _request: &SignatureRequest) -> Result<SignatureOutcome, VerifyError> {
        Ok(self.outcome.clone())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
