//! Content digests for bundle files.
//!
//! SHA-256 throughout, encoded as bare lowercase hex to match the manifest
//! format produced by the external hash generator.

use crate::error::VerifyError;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hash a file's contents using SHA-256.
pub async fn hash_file(path: &Path) -> Result<String, VerifyError> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|e| VerifyError::FileUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(hash_bytes(&contents))
}

/// Hash a file's contents synchronously (for non-async contexts).
pub fn hash_file_sync(path: &Path) -> Result<String, VerifyError> {
    let mut file = std::fs::File::open(path).map_err(|e| VerifyError::FileUnreadable {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192]; // 8KB buffer for streaming

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| VerifyError::FileUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash a byte slice using SHA-256.
pub fn hash_bytes(contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    hex::encode(hasher.finalize())
}
