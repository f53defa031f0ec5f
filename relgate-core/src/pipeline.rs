//! The three-stage verification pipeline.
//!
//! Strictly sequential with short-circuit aborts between stages: manifest
//! digests must all match before the signature is checked, and the signature
//! must verify before the policy gates run. Data only flows forward; every
//! input is an immutable snapshot for the duration of one invocation, so
//! concurrent runs against the same bundle are safe.
//!
//! Preconditions (missing inputs, missing tool, unparseable documents) are
//! surfaced as [`VerifyError`] before stage 1 starts. Integrity and policy
//! failures are fully diagnosed and travel inside the returned report.

use crate::canon;
use crate::error::VerifyError;
use crate::manifest::Manifest;
use crate::policy::{self, ArtifactDescriptor, PolicyConfig, PolicyVerdict, ProofDocument};
use crate::report::{StageChecks, VerificationReport};
use crate::signature::{
    sniff_armor, SignatureBackend, SignatureRequest, SignerRegistry, SshKeygenBackend,
};
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Manifest file name expected inside the manifest directory.
pub const MANIFEST_FILE: &str = "sha256sums.txt";
/// Detached signature over the manifest, alongside it.
pub const SIGNATURE_FILE: &str = "sha256sums.txt.sig";
/// Protocol tag used as the verification namespace unless overridden.
pub const DEFAULT_NAMESPACE: &str = "release";
/// Deadline for the external verification subprocess.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub descriptor_path: PathBuf,
    pub proof_path: PathBuf,
    pub signers_path: PathBuf,
    /// Claimed signing identity, matched against registry principals.
    pub identity: String,
    pub namespace: String,
    pub manifest_dir: PathBuf,
    /// Subset of bundle paths to verify; empty means every manifest entry.
    pub files: Vec<String>,
    /// Treat files absent from the manifest as stage-1 failures.
    pub strict_manifest: bool,
    /// Fail the policy stage when every gate skipped.
    pub require_evaluable_gates: bool,
    pub tool_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(
        descriptor_path: impl Into<PathBuf>,
        proof_path: impl Into<PathBuf>,
        signers_path: impl Into<PathBuf>,
        identity: impl Into<String>,
    ) -> Self {
        PipelineConfig {
            descriptor_path: descriptor_path.into(),
            proof_path: proof_path.into(),
            signers_path: signers_path.into(),
            identity: identity.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            manifest_dir: PathBuf::from("./manifests"),
            files: Vec::new(),
            strict_manifest: false,
            require_evaluable_gates: false,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_dir.join(MANIFEST_FILE)
    }

    pub fn signature_path(&self) -> PathBuf {
        self.manifest_dir.join(SIGNATURE_FILE)
    }

    /// Bundle files are listed relative to the manifest directory's parent.
    fn bundle_root(&self) -> PathBuf {
        match self.manifest_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// The verification pipeline. Construct once per invocation.
pub struct Pipeline {
    config: PipelineConfig,
    backend: Option<Box<dyn SignatureBackend>>,
}

impl Pipeline {
    /// Pipeline using the host's `ssh-keygen`, located during preflight.
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline {
            config,
            backend: None,
        }
    }

    /// Pipeline with an injected signature backend.
    pub fn with_backend(config: PipelineConfig, backend: Box<dyn SignatureBackend>) -> Self {
        Pipeline {
            config,
            backend: Some(backend),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run preflight and the three stages.
    ///
    /// `Ok` means the pipeline produced a verdict, passing or not; the exit
    /// code comes from [`VerificationReport::exit_code`]. `Err` means a
    /// precondition or parse fault stopped the pipeline before a verdict
    /// existed.
    pub async fn run(&self) -> Result<VerificationReport, VerifyError> {
        let manifest_path = self.config.manifest_path();
        let signature_path = self.config.signature_path();

        // Preflight: every required input, before any work. Checked in a
        // fixed order so the exit code is deterministic when several inputs
        // are missing at once.
        for path in [
            &self.config.descriptor_path,
            &self.config.proof_path,
            &self.config.signers_path,
            &manifest_path,
            &signature_path,
        ] {
            if !path.exists() {
                return Err(VerifyError::MissingFile { path: path.clone() });
            }
        }

        let located;
        let backend: &dyn SignatureBackend = match &self.backend {
            Some(backend) => backend.as_ref(),
            None => {
                located = SshKeygenBackend::locate(self.config.tool_timeout)?;
                &located
            }
        };

        let descriptor_raw = load_json(&self.config.descriptor_path)?;
        let proof_raw = load_json(&self.config.proof_path)?;
        let descriptor: ArtifactDescriptor = parse_document(&self.config.descriptor_path, &descriptor_raw)?;
        let proof: ProofDocument = parse_document(&self.config.proof_path, &proof_raw)?;

        sniff_armor(&signature_path)?;
        let registry = SignerRegistry::load(&self.config.signers_path)?;
        let manifest = Manifest::load(&manifest_path)?;

        // Stage 1: content hashes.
        info!(
            "Verifying {} file(s) against {}",
            if self.config.files.is_empty() {
                manifest.entries().len()
            } else {
                self.config.files.len()
            },
            manifest_path.display()
        );

        let verification = manifest
            .verify_files(
                &self.config.bundle_root(),
                &self.config.files,
                self.config.strict_manifest,
            )
            .await;

        let mut checks = StageChecks {
            hash: Some(verification.passed),
            signature: None,
            policy: None,
        };

        if !verification.passed {
            warn!("Hash verification failed; aborting before signature check");
            return Ok(VerificationReport::new(
                checks,
                PolicyVerdict::not_evaluated(),
                verification.checks,
                self.config.identity.clone(),
            ));
        }
        info!("Hash verification passed");

        // Stage 2: detached signature over the manifest bytes.
        let today = Utc::now().date_naive();
        let signature_ok = match registry.find_entry(
            &self.config.identity,
            &self.config.namespace,
            today,
        ) {
            Err(rejection) => {
                warn!("Signer lookup rejected: {}", rejection);
                false
            }
            Ok(entry) => {
                info!(
                    "Signer '{}' accepted for namespace '{}' ({})",
                    entry.principal, self.config.namespace, entry.key_type
                );
                let outcome = backend
                    .verify(&SignatureRequest {
                        manifest_path: manifest_path.clone(),
                        signature_path,
                        signers_path: self.config.signers_path.clone(),
                        identity: self.config.identity.clone(),
                        namespace: self.config.namespace.clone(),
                    })
                    .await?;
                if !outcome.valid {
                    warn!("Signature verification failed: {}", outcome.detail);
                }
                outcome.valid
            }
        };

        checks.signature = Some(signature_ok);
        if !signature_ok {
            return Ok(VerificationReport::new(
                checks,
                PolicyVerdict::not_evaluated(),
                verification.checks,
                self.config.identity.clone(),
            ));
        }
        info!("Signature verification passed");

        // Stage 3: policy gates.
        let descriptor_digest = canon::hash_document(&descriptor_raw);
        let verdict = policy::evaluate(
            &descriptor,
            &proof,
            Some(&descriptor_digest),
            Utc::now(),
            &PolicyConfig {
                require_evaluable_gates: self.config.require_evaluable_gates,
            },
        );

        checks.policy = Some(verdict.passed());
        if verdict.passed() {
            info!("Policy evaluation passed");
        } else {
            warn!("Policy evaluation failed: {}", verdict.errors.join("; "));
        }

        Ok(VerificationReport::new(
            checks,
            verdict,
            verification.checks,
            self.config.identity.clone(),
        ))
    }
}

fn load_json(path: &Path) -> Result<Value, VerifyError> {
    let content = std::fs::read_to_string(path).map_err(|e| VerifyError::FileUnreadable {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| VerifyError::MalformedDocument {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_document<T: serde::de::DeserializeOwned>(
    path: &Path,
    raw: &Value,
) -> Result<T, VerifyError> {
    serde_json::from_value(raw.clone()).map_err(|e| VerifyError::MalformedDocument {
        path: path.to_path_buf(),
        source: e,
    })
}
