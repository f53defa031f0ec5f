//! Relgate - verify a release bundle before trusting it.
//!
//! Runs the three-stage pipeline and emits the Verification Report as the
//! last line on stdout. Everything on stderr is progress for humans; only
//! the report and the exit code are authoritative.

use clap::{Parser, ValueEnum};
use relgate_core::error::exit;
use relgate_core::pipeline::{DEFAULT_NAMESPACE, DEFAULT_TOOL_TIMEOUT};
use relgate_core::{Pipeline, PipelineConfig, VerificationReport};
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "relgate",
    about = "Verify the integrity, authenticity, and policy compliance of a release bundle",
    version
)]
struct Cli {
    /// Compiled artifact descriptor (JSON)
    descriptor: PathBuf,

    /// Proof-of-authorization document (JSON)
    proof: PathBuf,

    /// Allowed-signers registry
    allowed_signers: PathBuf,

    /// Claimed signer identity (a registry principal)
    signer: String,

    /// Verification namespace the signature is bound to
    #[clap(long, default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Directory containing sha256sums.txt and sha256sums.txt.sig
    #[clap(long, default_value = "./manifests")]
    manifest_dir: PathBuf,

    /// Verify only this bundle file (repeatable); default is every manifest entry
    #[clap(long = "file")]
    files: Vec<String>,

    /// Treat files absent from the manifest as hash failures
    #[clap(long)]
    strict_manifest: bool,

    /// Fail policy evaluation when every gate skipped
    #[clap(long)]
    require_gates: bool,

    /// Deadline in seconds for the external signature tool
    #[clap(long, default_value_t = DEFAULT_TOOL_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Set log level for stderr diagnostics
    #[clap(long, default_value = "warn")]
    log_level: LogLevel,
}

impl Cli {
    fn into_config(self) -> PipelineConfig {
        let mut config = PipelineConfig::new(
            self.descriptor,
            self.proof,
            self.allowed_signers,
            self.signer,
        );
        config.namespace = self.namespace;
        config.manifest_dir = self.manifest_dir;
        config.files = self.files;
        config.strict_manifest = self.strict_manifest;
        config.require_evaluable_gates = self.require_gates;
        config.tool_timeout = Duration::from_secs(self.timeout_secs);
        config
    }
}

/// Initialize tracing for stderr diagnostics.
///
/// RELGATE_LOG overrides the --log-level flag; NO_COLOR disables ANSI.
/// Neither affects the report or the exit code.
fn initialize_tracing(log_level: &LogLevel) {
    let filter = EnvFilter::try_from_env("RELGATE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::env::var_os("NO_COLOR").is_none())
        .with_writer(std::io::stderr)
        .init();
}

/// Human-readable stage summary on stderr. Never authoritative.
fn summarize(report: &VerificationReport) {
    let stage = |name: &str, value: Option<bool>| match value {
        Some(true) => eprintln!("  ✓ {name}"),
        Some(false) => eprintln!("  ✗ {name}"),
        None => eprintln!("  - {name} (not run)"),
    };

    stage("hash verification", report.checks.hash);
    stage("signature verification", report.checks.signature);
    stage("policy gates", report.checks.policy);

    for err in &report.policy.errors {
        eprintln!("    {err}");
    }
    eprintln!(
        "{}",
        if report.passed {
            "Verification passed"
        } else {
            "Verification FAILED"
        }
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let config = cli.into_config();
    let identity = config.identity.clone();
    let pipeline = Pipeline::new(config);

    let (report, code) = match pipeline.run().await {
        Ok(report) => {
            let code = report.exit_code();
            (report, code)
        }
        Err(e) => {
            error!("Fatal: {}", e);
            let report = VerificationReport::from_error(&e, &identity);
            (report, e.exit_code())
        }
    };

    summarize(&report);

    // The report is the single source of truth for automation and must be
    // the last line on stdout.
    match report.to_json() {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!("Failed to serialize report: {e}");
            std::process::exit(exit::UNEXPECTED);
        }
    }

    std::process::exit(code);
}
