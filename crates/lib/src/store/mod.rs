//! Content-addressable backup store.
//!
//! Every file the synchronizer deletes or overwrites is first archived here,
//! keyed by its [`ContentHash`]. Storing the same bytes twice is a no-op, so
//! vendor files, mod files and external edits all share one pool of blobs.
//!
//! # Layout
//!
//! ```text
//! store/
//! ├── blobs/
//! │   └── <hash[0..2]>/
//! │       └── <hash>          # zstd-compressed file contents
//! └── tmp/                    # staging area for atomic renames
//! ```

mod file;
mod memory;

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

pub use file::{FileBackupStore, StoreStats};
pub use memory::MemoryBackupStore;

use crate::consts::HASH_BUF_SIZE;
use crate::util::hash::{ContentHash, ContentHasher};

/// Errors from the backup store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("blob {0} is not in the backup store")]
  MissingBlob(ContentHash),

  #[error("content written to {path} hashed to {actual}, expected {expected}")]
  ArchiveIntegrity {
    path: String,
    expected: ContentHash,
    actual: ContentHash,
  },

  #[error("I/O error at {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },
}

impl StoreError {
  pub(crate) fn io(path: &Path, source: io::Error) -> Self {
    StoreError::Io {
      path: path.display().to_string(),
      source,
    }
  }

  /// Whether retrying the same operation could succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, StoreError::Io { .. })
  }
}

/// A content-addressed blob store.
///
/// Implementations must be safe to share across worker tasks.
pub trait BackupStore: Send + Sync {
  /// Whether a blob with this hash is archived.
  fn have_file(&self, hash: &ContentHash) -> bool;

  /// Archive a file from disk, returning its hash and size.
  fn archive(&self, path: &Path) -> Result<(ContentHash, u64), StoreError>;

  /// Archive in-memory bytes, returning their hash and size.
  fn archive_bytes(&self, bytes: &[u8]) -> Result<(ContentHash, u64), StoreError>;

  /// Write the blob to `destination` atomically, verifying its hash.
  /// Parent directories are created on demand.
  fn extract(&self, hash: &ContentHash, destination: &Path) -> Result<u64, StoreError>;

  /// Read a blob fully into memory, verifying its hash.
  fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError>;

  /// Every archived blob with the bytes it occupies in the store.
  fn blobs(&self) -> Result<Vec<(ContentHash, u64)>, StoreError>;

  /// Delete a blob. Deleting a blob that is not archived succeeds.
  fn remove(&self, hash: &ContentHash) -> Result<(), StoreError>;
}

/// Stream `reader` into a temp file next to `destination`, then rename it into
/// place. Fails with `ArchiveIntegrity` (leaving `destination` untouched) when
/// `expected` is given and the streamed bytes hash differently.
pub(crate) fn write_verified<R: Read>(
  mut reader: R,
  destination: &Path,
  expected: Option<&ContentHash>,
) -> Result<(ContentHash, u64), StoreError> {
  let parent = destination.parent().unwrap_or_else(|| Path::new("."));
  fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

  let mut tmp = NamedTempFile::new_in(parent).map_err(|e| StoreError::io(parent, e))?;
  let mut hasher = ContentHasher::new();
  let mut buffer = vec![0u8; HASH_BUF_SIZE];
  loop {
    let read = reader.read(&mut buffer).map_err(|e| StoreError::io(destination, e))?;
    if read == 0 {
      break;
    }
    hasher.update(&buffer[..read]);
    tmp.write_all(&buffer[..read]).map_err(|e| StoreError::io(tmp.path(), e))?;
  }
  tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;

  let (actual, size) = hasher.finish();
  if let Some(expected) = expected.filter(|expected| **expected != actual) {
    return Err(StoreError::ArchiveIntegrity {
      path: destination.display().to_string(),
      expected: expected.clone(),
      actual,
    });
  }

  tmp.persist(destination).map_err(|e| StoreError::io(destination, e.error))?;
  Ok((actual, size))
}
