//! Hash-manifest parsing and content verification.
//!
//! The manifest is produced by an external generator: one line per file,
//! `<hex-digest><space><space><relative-path>`. It is the source of truth for
//! what the bundle's files are supposed to contain. Verification compares
//! recorded digests against freshly computed ones and collects every
//! divergence before the stage verdict is decided.

use crate::error::VerifyError;
use crate::hasher::hash_file;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One recorded digest in manifest order.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    /// Path relative to the bundle root, as written by the generator.
    pub path: String,
    /// Lowercase hex SHA-256 digest.
    pub digest: String,
}

/// A parsed hash manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
    by_path: HashMap<String, String>,
}

/// Outcome for a single requested file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Computed digest equals the recorded digest.
    Match,
    /// Digests differ. Hard failure for the stage.
    Mismatch,
    /// The requested file has no manifest entry.
    Unlisted,
    /// The requested file could not be read from disk.
    Unreadable,
}

/// Per-file verification detail, reported in manifest order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheck {
    pub path: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

/// Aggregate result of the manifest stage.
#[derive(Debug, Clone)]
pub struct ManifestVerification {
    /// True when every listed file matched and nothing was unreadable.
    pub passed: bool,
    pub checks: Vec<FileCheck>,
}

impl Manifest {
    /// Parse a manifest file, enforcing its format invariants.
    pub fn load(path: &Path) -> Result<Self, VerifyError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => VerifyError::MissingFile {
                    path: path.to_path_buf(),
                },
                _ => VerifyError::FileUnreadable {
                    path: path.to_path_buf(),
                    source: e,
                },
            })?;

        let mut entries = Vec::new();
        let mut by_path = HashMap::new();

        for (index, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }

            let malformed = |reason: String| VerifyError::MalformedManifest {
                path: path.to_path_buf(),
                reason: format!("line {}: {}", index + 1, reason),
            };

            let (digest, file_path) = line
                .split_once("  ")
                .ok_or_else(|| malformed("expected '<digest>  <path>'".to_string()))?;

            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(malformed("digest is not 64 hex characters".to_string()));
            }
            if file_path.is_empty() {
                return Err(malformed("empty file path".to_string()));
            }

            let normalized = normalize_relative(file_path);
            let digest = digest.to_ascii_lowercase();

            if by_path
                .insert(normalized.clone(), digest.clone())
                .is_some()
            {
                return Err(malformed(format!("duplicate path '{normalized}'")));
            }

            entries.push(ManifestEntry {
                path: normalized,
                digest,
            });
        }

        debug!("Loaded manifest {} with {} entries", path.display(), entries.len());

        Ok(Manifest {
            path: path.to_path_buf(),
            entries,
            by_path,
        })
    }

    /// Where this manifest was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in manifest order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Recorded digest for a relative path, if listed.
    pub fn digest_for(&self, relative_path: &str) -> Option<&str> {
        self.by_path
            .get(&normalize_relative(relative_path))
            .map(String::as_str)
    }

    /// Verify a requested set of files against this manifest.
    ///
    /// `requested` paths are relative to `bundle_root`; an empty set means
    /// every manifest entry. Digests are computed concurrently but the check
    /// list is stabilized to manifest order (unlisted requests last, in
    /// request order) so the report is reproducible.
    ///
    /// A digest mismatch never aborts the remaining comparisons. Unlisted
    /// files warn and only fail the stage under `strict_unlisted`.
    pub async fn verify_files(
        &self,
        bundle_root: &Path,
        requested: &[String],
        strict_unlisted: bool,
    ) -> ManifestVerification {
        let selected: Vec<(String, Option<String>)> = if requested.is_empty() {
            self.entries
                .iter()
                .map(|e| (e.path.clone(), Some(e.digest.clone())))
                .collect()
        } else {
            let normalized: Vec<String> =
                requested.iter().map(|p| normalize_relative(p)).collect();

            // Manifest order first, then unlisted requests in request order.
            let mut selected: Vec<(String, Option<String>)> = self
                .entries
                .iter()
                .filter(|e| normalized.contains(&e.path))
                .map(|e| (e.path.clone(), Some(e.digest.clone())))
                .collect();
            for p in normalized {
                if self.by_path.get(&p).is_none() {
                    selected.push((p, None));
                }
            }
            selected
        };

        let resolved: Vec<PathBuf> = selected
            .iter()
            .map(|(path, _)| bundle_root.join(path))
            .collect();
        let digests = join_all(resolved.iter().map(|path| hash_file(path))).await;

        let mut checks = Vec::with_capacity(selected.len());
        let mut failed = false;
        let mut unlisted = false;

        for ((path, expected), computed) in selected.into_iter().zip(digests) {
            let check = match (expected, computed) {
                (Some(expected), Ok(actual)) => {
                    if expected.eq_ignore_ascii_case(&actual) {
                        FileCheck {
                            path,
                            status: FileStatus::Match,
                            expected: Some(expected),
                            actual: Some(actual),
                        }
                    } else {
                        failed = true;
                        FileCheck {
                            path,
                            status: FileStatus::Mismatch,
                            expected: Some(expected),
                            actual: Some(actual),
                        }
                    }
                }
                (Some(expected), Err(e)) => {
                    warn!("Could not read '{}' for verification: {}", path, e);
                    failed = true;
                    FileCheck {
                        path,
                        status: FileStatus::Unreadable,
                        expected: Some(expected),
                        actual: None,
                    }
                }
                (None, computed) => {
                    warn!("File '{}' is not listed in the manifest", path);
                    unlisted = true;
                    FileCheck {
                        path,
                        status: FileStatus::Unlisted,
                        expected: None,
                        actual: computed.ok(),
                    }
                }
            };
            checks.push(check);
        }

        ManifestVerification {
            passed: !failed && !(strict_unlisted && unlisted),
            checks,
        }
    }
}

/// Resolve a path string to the canonical relative form used as the lookup
/// key: forward slashes, no leading `./`.
fn normalize_relative(path: &str) -> String {
    let forward = path.replace('\\', "/");
    forward
        .strip_prefix("./")
        .unwrap_or(&forward)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_bytes;
    use std::fs;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, lines: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("sha256sums.txt");
        let content: String = lines
            .iter()
            .map(|(digest, file)| format!("{digest}  {file}\n"))
            .collect();
        fs::write(&path, content).expect("write manifest");
        path
    }

    #[test]
    fn test_load_preserves_manifest_order() {
        let dir = TempDir::new().expect("tempdir");
        let d1 = hash_bytes(b"one");
        let d2 = hash_bytes(b"two");
        let path = write_manifest(dir.path(), &[(&d1, "b.txt"), (&d2, "a.txt")]);

        let manifest = Manifest::load(&path).expect("load");
        let paths: Vec<&str> = manifest.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["b.txt", "a.txt"]);
        assert_eq!(manifest.digest_for("a.txt"), Some(d2.as_str()));
    }

    #[test]
    fn test_load_rejects_bad_digest_length() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_manifest(dir.path(), &[("abc123", "file1")]);

        let result = Manifest::load(&path);
        assert!(matches!(result, Err(VerifyError::MalformedManifest { .. })));
    }

    #[test]
    fn test_load_rejects_duplicate_paths() {
        let dir = TempDir::new().expect("tempdir");
        let digest = hash_bytes(b"content");
        let path = write_manifest(dir.path(), &[(&digest, "file1"), (&digest, "./file1")]);

        let result = Manifest::load(&path);
        match result {
            Err(VerifyError::MalformedManifest { reason, .. }) => {
                assert!(reason.contains("duplicate"));
            }
            other => panic!("expected malformed manifest, got {other:?}"),
        }
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = TempDir::new().expect("tempdir");
        let result = Manifest::load(&dir.path().join("sha256sums.txt"));
        assert!(matches!(result, Err(VerifyError::MissingFile { .. })));
    }

    #[tokio::test]
    async fn test_verify_all_match() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("file1"), b"alpha").expect("write");
        fs::write(dir.path().join("file2"), b"beta").expect("write");
        let path = write_manifest(
            dir.path(),
            &[(&hash_bytes(b"alpha"), "file1"), (&hash_bytes(b"beta"), "file2")],
        );

        let manifest = Manifest::load(&path).expect("load");
        let result = manifest.verify_files(dir.path(), &[], false).await;

        assert!(result.passed);
        assert_eq!(result.checks.len(), 2);
        assert!(result.checks.iter().all(|c| c.status == FileStatus::Match));
    }

    #[tokio::test]
    async fn test_verify_collects_all_mismatches() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("file1"), b"tampered").expect("write");
        fs::write(dir.path().join("file2"), b"also tampered").expect("write");
        let path = write_manifest(
            dir.path(),
            &[(&hash_bytes(b"alpha"), "file1"), (&hash_bytes(b"beta"), "file2")],
        );

        let manifest = Manifest::load(&path).expect("load");
        let result = manifest.verify_files(dir.path(), &[], false).await;

        assert!(!result.passed);
        let mismatches: Vec<&FileCheck> = result
            .checks
            .iter()
            .filter(|c| c.status == FileStatus::Mismatch)
            .collect();
        assert_eq!(mismatches.len(), 2, "both divergences must be reported");
        assert_eq!(mismatches[0].expected.as_deref(), Some(hash_bytes(b"alpha").as_str()));
        assert_eq!(mismatches[0].actual.as_deref(), Some(hash_bytes(b"tampered").as_str()));
    }

    #[tokio::test]
    async fn test_single_bit_flip_is_detected() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("file1"), [0b0000_0000u8]).expect("write");
        let path = write_manifest(dir.path(), &[(&hash_bytes(&[0b0000_0000u8]), "file1")]);
        let manifest = Manifest::load(&path).expect("load");

        fs::write(dir.path().join("file1"), [0b0000_0001u8]).expect("flip");
        let result = manifest.verify_files(dir.path(), &[], false).await;

        assert!(!result.passed);
        assert_eq!(result.checks[0].path, "file1");
        assert_eq!(result.checks[0].status, FileStatus::Mismatch);
    }

    #[tokio::test]
    async fn test_unlisted_file_warns_by_default() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("file1"), b"alpha").expect("write");
        fs::write(dir.path().join("extra"), b"not listed").expect("write");
        let path = write_manifest(dir.path(), &[(&hash_bytes(b"alpha"), "file1")]);

        let manifest = Manifest::load(&path).expect("load");
        let requested = vec!["file1".to_string(), "extra".to_string()];

        let lenient = manifest.verify_files(dir.path(), &requested, false).await;
        assert!(lenient.passed);
        assert_eq!(lenient.checks[1].status, FileStatus::Unlisted);

        let strict = manifest.verify_files(dir.path(), &requested, true).await;
        assert!(!strict.passed);
    }

    #[tokio::test]
    async fn test_missing_file_on_disk_fails_stage() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_manifest(dir.path(), &[(&hash_bytes(b"alpha"), "file1")]);

        let manifest = Manifest::load(&path).expect("load");
        let result = manifest.verify_files(dir.path(), &[], false).await;

        assert!(!result.passed);
        assert_eq!(result.checks[0].status, FileStatus::Unreadable);
    }

    #[tokio::test]
    async fn test_comparison_is_case_insensitive() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("file1"), b"alpha").expect("write");
        let upper = hash_bytes(b"alpha").to_ascii_uppercase();
        let path = write_manifest(dir.path(), &[(&upper, "file1")]);

        let manifest = Manifest::load(&path).expect("load");
        let result = manifest.verify_files(dir.path(), &[], false).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_subset_request_keeps_manifest_order() {
        let dir = TempDir::new().expect("tempdir");
        for (name, contents) in [("a", "1"), ("b", "2"), ("c", "3")] {
            fs::write(dir.path().join(name), contents).expect("write");
        }
        let path = write_manifest(
            dir.path(),
            &[
                (&hash_bytes(b"1"), "a"),
                (&hash_bytes(b"2"), "b"),
                (&hash_bytes(b"3"), "c"),
            ],
        );

        let manifest = Manifest::load(&path).expect("load");
        // Requested out of manifest order.
        let requested = vec!["c".to_string(), "a".to_string()];
        let result = manifest.verify_files(dir.path(), &requested, false).await;

        let paths: Vec<&str> = result.checks.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "c"]);
    }
}
