//! Hashing utilities for content-addressed storage and verification.
//!
//! This module provides:
//! - `ContentHash`: A full 64-character SHA-256 of file contents
//! - `hash_file()`: Single file hashing, returning the size as well
//! - `hash_reader()`: Streaming hash of any reader
//! - `hash_bytes()`: Arbitrary byte hashing

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::HASH_BUF_SIZE;

/// A full 64-character SHA256 hash identifying file contents.
///
/// Two files with the same `ContentHash` are treated as interchangeable by
/// the backup store and the differ.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// First 12 characters, for log lines.
  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing a file.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to read file {path}: {source}")]
  ReadFile {
    path: String,
    #[source]
    source: io::Error,
  },
}

/// Incremental hasher that also counts bytes.
#[derive(Default)]
pub struct ContentHasher {
  hasher: Sha256,
  len: u64,
}

impl ContentHasher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn update(&mut self, data: &[u8]) {
    self.hasher.update(data);
    self.len += data.len() as u64;
  }

  pub fn finish(self) -> (ContentHash, u64) {
    (ContentHash(format!("{:x}", self.hasher.finalize())), self.len)
  }
}

/// Hash everything a reader yields, returning the hash and byte count.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(ContentHash, u64)> {
  let mut hasher = ContentHasher::new();
  let mut buffer = vec![0u8; HASH_BUF_SIZE];

  loop {
    let bytes_read = reader.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hasher.finish())
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file and its size.
pub fn hash_file(path: &Path) -> Result<(ContentHash, u64), HashError> {
  let to_error = |source| HashError::ReadFile {
    path: path.display().to_string(),
    source,
  };

  let file = fs::File::open(path).map_err(to_error)?;
  hash_reader(file).map_err(to_error)
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = ContentHasher::new();
  hasher.update(data);
  hasher.finish().0
}
