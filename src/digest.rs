//! Content addressing
//!
//! Every upload is fingerprinted with SHA-256. The hex digest is the
//! deduplication key and the directory component of the blob path.

use sha2::{Digest, Sha256};

/// SHA-256 of `bytes` as 64 lowercase hex characters
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content-addressed blob path: `documents/<digest>/<filename>`
///
/// Only the final path component of `filename` is kept so a client cannot
/// escape the digest directory.
pub fn storage_path(digest: &str, filename: &str) -> String {
    format!("documents/{}/{}", digest, sanitize_filename(filename))
}

fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    match name {
        "" | "." | ".." => "upload".to_string(),
        other => other.to_string(),
    }
}
