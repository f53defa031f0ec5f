//! Allowed-signers registry parsing and lookup.
//!
//! The registry is the OpenSSH allowed-signers format, one entry per line:
//!
//! ```text
//! releases@example.com namespaces="release" valid-after="20240101" valid-before="20261231" ssh-ed25519 AAAA...
//! ```
//!
//! Lines starting with `#` are comments. The options are individually
//! optional; an absent option places no constraint on the entry. The registry
//! is maintained externally and read-only here, but its temporal fields are
//! honored during lookup so an expired entry rejects deterministically even
//! before the external tool is consulted.

use crate::error::VerifyError;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// One parsed registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AllowedSigner {
    pub principal: String,
    /// Namespaces this key may sign for. `None` means unconstrained.
    pub namespaces: Option<Vec<String>>,
    pub valid_after: Option<NaiveDate>,
    pub valid_before: Option<NaiveDate>,
    pub key_type: String,
    pub key_data: String,
}

/// Why no registry entry was acceptable for a lookup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignerRejection {
    #[error("no registry entry for principal '{principal}'")]
    UnknownPrincipal { principal: String },

    #[error("principal '{principal}' is not permitted to sign namespace '{namespace}'")]
    NamespaceNotPermitted { principal: String, namespace: String },

    #[error("registry entry for '{principal}' is not valid until {valid_after}")]
    NotYetValid {
        principal: String,
        valid_after: NaiveDate,
    },

    #[error("registry entry for '{principal}' expired on {valid_before}")]
    Expired {
        principal: String,
        valid_before: NaiveDate,
    },
}

/// A loaded allowed-signers registry.
#[derive(Debug, Clone)]
pub struct SignerRegistry {
    path: PathBuf,
    entries: Vec<AllowedSigner>,
}

impl SignerRegistry {
    /// Load and parse a registry file.
    pub fn load(path: &Path) -> Result<Self, VerifyError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VerifyError::MissingFile {
                path: path.to_path_buf(),
            },
            _ => VerifyError::FileUnreadable {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            entries.push(parse_entry(trimmed, path, index + 1)?);
        }

        debug!(
            "Loaded allowed-signers registry {} with {} entries",
            path.display(),
            entries.len()
        );

        Ok(SignerRegistry {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Where this registry was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[AllowedSigner] {
        &self.entries
    }

    /// Find an entry acceptable for `principal` signing `namespace` on `today`.
    ///
    /// The first entry passing all three constraints wins. The returned
    /// rejection describes the closest miss: a principal match that fails on
    /// namespace or validity is more informative than "unknown principal".
    pub fn find_entry(
        &self,
        principal: &str,
        namespace: &str,
        today: NaiveDate,
    ) -> Result<&AllowedSigner, SignerRejection> {
        let mut rejection = SignerRejection::UnknownPrincipal {
            principal: principal.to_string(),
        };

        for entry in &self.entries {
            if entry.principal != principal {
                continue;
            }

            if let Some(namespaces) = &entry.namespaces {
                if !namespaces.iter().any(|ns| ns == namespace) {
                    rejection = SignerRejection::NamespaceNotPermitted {
                        principal: principal.to_string(),
                        namespace: namespace.to_string(),
                    };
                    continue;
                }
            }

            if let Some(valid_after) = entry.valid_after {
                if today < valid_after {
                    rejection = SignerRejection::NotYetValid {
                        principal: principal.to_string(),
                        valid_after,
                    };
                    continue;
                }
            }

            if let Some(valid_before) = entry.valid_before {
                if today > valid_before {
                    rejection = SignerRejection::Expired {
                        principal: principal.to_string(),
                        valid_before,
                    };
                    continue;
                }
            }

            return Ok(entry);
        }

        Err(rejection)
    }
}

fn parse_entry(line: &str, path: &Path, line_no: usize) -> Result<AllowedSigner, VerifyError> {
    let malformed = |reason: String| VerifyError::MalformedRegistry {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };

    let mut tokens = line.split_whitespace().peekable();

    let principal = tokens
        .next()
        .ok_or_else(|| malformed("missing principal".to_string()))?
        .to_string();

    let mut namespaces = None;
    let mut valid_after = None;
    let mut valid_before = None;

    // Options sit between the principal and the key type.
    while let Some(token) = tokens.peek() {
        let Some((key, value)) = token.split_once('=') else {
            break;
        };
        let value = value.trim_matches('"').to_string();
        match key {
            "namespaces" => {
                namespaces = Some(
                    value
                        .split(',')
                        .map(|ns| ns.trim().to_string())
                        .filter(|ns| !ns.is_empty())
                        .collect(),
                );
            }
            "valid-after" => {
                valid_after = Some(parse_window_date(&value).map_err(&malformed)?);
            }
            "valid-before" => {
                valid_before = Some(parse_window_date(&value).map_err(&malformed)?);
            }
            other => {
                return Err(malformed(format!("unknown option '{other}'")));
            }
        }
        tokens.next();
    }

    let key_type = tokens
        .next()
        .ok_or_else(|| malformed("missing key type".to_string()))?
        .to_string();
    let key_data = tokens.collect::<Vec<_>>().join(" ");
    if key_data.is_empty() {
        return Err(malformed("missing key data".to_string()));
    }

    Ok(AllowedSigner {
        principal,
        namespaces,
        valid_after,
        valid_before,
        key_type,
        key_data,
    })
}

fn parse_window_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map_err(|_| format!("invalid date '{value}', expected YYYYMMDD"))
}
