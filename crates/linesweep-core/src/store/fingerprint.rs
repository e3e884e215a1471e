//! File identity helpers: content hash, modification time, line count.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::epoch_millis;

/// Snapshot of a file's identity at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: String,
    pub modified_ms: i64,
    pub total_lines: u32,
}

/// SHA-256 hex digest of the file's full bytes.
pub fn compute_content_hash(path: &Path) -> std::io::Result<String> {
    let data = std::fs::read(path)?;
    Ok(hash_bytes(&data))
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
    let data = std::fs::read(path)?;
    let modified_ms = std::fs::metadata(path)?
        .modified()
        .map(epoch_millis)
        .unwrap_or(0);
    let total_lines = String::from_utf8_lossy(&data).lines().count() as u32;
    Ok(Fingerprint {
        hash: hash_bytes(&data),
        modified_ms,
        total_lines,
    })
}

/// Absolute, normalized form of `path` used as the ledger key.
///
/// Canonicalizes when the file exists so symlinked spellings share one
/// entry; otherwise joins onto the current directory.
pub fn resolve_path(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(_) => {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(path)
            }
        }
    }
}

pub fn ledger_key(path: &Path) -> String {
    resolve_path(path).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_matches_known_digest() {
        assert_eq!(
            hash_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn fingerprint_counts_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a = 1\nb = 2\nc = 3").unwrap();
        let fp = fingerprint(file.path()).unwrap();
        assert_eq!(fp.total_lines, 3);
        assert_eq!(fp.hash, compute_content_hash(file.path()).unwrap());
        assert!(fp.modified_ms > 0);
    }

    #[test]
    fn resolve_path_is_absolute() {
        assert!(resolve_path(Path::new("relative/thing.py")).is_absolute());
    }
}
