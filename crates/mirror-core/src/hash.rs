//! Streaming content hashes for file leaves.
//!
//! Files are fed through SHA-256 in fixed-size blocks so arbitrarily large
//! files never have to be held in memory. Folders and containers are not
//! hashed; their changes surface through their children.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default read block size (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read stream: {0}")]
    Read(#[from] io::Error),

    #[error("Block size must be greater than zero")]
    ZeroBlockSize,
}

/// Hex-encoded SHA-256 digest of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute hash from an in-memory buffer.
    pub fn from_bytes(content: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(content)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash everything `reader` yields, `block_size` bytes at a time.
pub fn hash_reader<R: Read>(mut reader: R, block_size: usize) -> Result<ContentHash, HashError> {
    if block_size == 0 {
        return Err(HashError::ZeroBlockSize);
    }

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; block_size];
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(HashError::Read(e)),
        };
        hasher.update(&buf[..read]);
    }

    Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash the file at `path`, `block_size` bytes at a time.
pub fn hash_file(path: &Path, block_size: usize) -> Result<ContentHash, HashError> {
    let file = File::open(path).map_err(|source| HashError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    hash_reader(file, block_size).map_err(|e| match e {
        HashError::Read(source) => HashError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_same_content_any_block_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();

        let small = hash_file(&path, 7).unwrap();
        let large = hash_file(&path, DEFAULT_BLOCK_SIZE).unwrap();

        assert_eq!(small, large);
        assert_eq!(small, ContentHash::from_bytes(&content));
    }

    #[test]
    fn test_different_content_different_hash() {
        let hash1 = ContentHash::from_bytes(b"hello");
        let hash2 = ContentHash::from_bytes(b"world");
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        let hash = hash_file(&path, 16).unwrap();

        // SHA-256 of the empty string
        assert_eq!(
            hash.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_missing_file_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nope.txt");

        match hash_file(&path, DEFAULT_BLOCK_SIZE) {
            Err(HashError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let result = hash_reader(&b"abc"[..], 0);
        assert!(matches!(result, Err(HashError::ZeroBlockSize)));
    }
}
