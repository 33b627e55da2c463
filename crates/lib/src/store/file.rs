//! On-disk backup store with zstd-compressed blobs.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::consts::{BLOB_SHARD_LEN, HASH_BUF_SIZE};
use crate::util::hash::{ContentHash, ContentHasher};

use super::{BackupStore, StoreError, write_verified};

const BLOBS_DIR: &str = "blobs";
const TMP_DIR: &str = "tmp";
const COMPRESSION_LEVEL: i32 = 3;

type BlobReader = zstd::stream::read::Decoder<'static, io::BufReader<fs::File>>;

/// Blob count and compressed size of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
  pub blobs: usize,
  pub bytes: u64,
}

/// Backup store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
  root: PathBuf,
}

impl FileBackupStore {
  /// Open (creating if necessary) a store at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    for dir in [root.join(BLOBS_DIR), root.join(TMP_DIR)] {
      fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
    }
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn blob_path(&self, hash: &ContentHash) -> PathBuf {
    let shard = &hash.0[..hash.0.len().min(BLOB_SHARD_LEN)];
    self.root.join(BLOBS_DIR).join(shard).join(&hash.0)
  }

  /// Compress `reader` into a staged blob, then move it into place unless a
  /// blob with the same hash already exists.
  fn write_blob<R: Read>(&self, mut reader: R, source: &Path) -> Result<(ContentHash, u64), StoreError> {
    let tmp_dir = self.root.join(TMP_DIR);
    let tmp = NamedTempFile::new_in(&tmp_dir).map_err(|e| StoreError::io(&tmp_dir, e))?;

    let mut hasher = ContentHasher::new();
    let mut encoder =
      zstd::stream::write::Encoder::new(tmp.as_file(), COMPRESSION_LEVEL).map_err(|e| StoreError::io(tmp.path(), e))?;
    let mut buffer = vec![0u8; HASH_BUF_SIZE];
    loop {
      let read = reader.read(&mut buffer).map_err(|e| StoreError::io(source, e))?;
      if read == 0 {
        break;
      }
      hasher.update(&buffer[..read]);
      encoder.write_all(&buffer[..read]).map_err(|e| StoreError::io(tmp.path(), e))?;
    }
    encoder.finish().map_err(|e| StoreError::io(tmp.path(), e))?;

    let (hash, size) = hasher.finish();
    let blob = self.blob_path(&hash);
    if blob.is_file() {
      trace!(hash = hash.short(), "blob already archived");
      return Ok((hash, size));
    }

    if let Some(shard) = blob.parent() {
      fs::create_dir_all(shard).map_err(|e| StoreError::io(shard, e))?;
    }
    if let Err(e) = tmp.persist(&blob) {
      // Another worker may have stored the same content first.
      if !blob.is_file() {
        return Err(StoreError::io(&blob, e.error));
      }
    }
    debug!(hash = hash.short(), size, "archived blob");
    Ok((hash, size))
  }

  fn open_blob(&self, hash: &ContentHash) -> Result<BlobReader, StoreError> {
    let blob = self.blob_path(hash);
    let file = match fs::File::open(&blob) {
      Ok(file) => file,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::MissingBlob(hash.clone())),
      Err(e) => return Err(StoreError::io(&blob, e)),
    };
    zstd::stream::read::Decoder::new(file).map_err(|e| StoreError::io(&blob, e))
  }

  /// Count blobs and their compressed size.
  pub fn stats(&self) -> StoreStats {
    WalkDir::new(self.root.join(BLOBS_DIR))
      .into_iter()
      .filter_map(Result::ok)
      .filter(|e| e.file_type().is_file())
      .fold(StoreStats::default(), |acc, e| StoreStats {
        blobs: acc.blobs + 1,
        bytes: acc.bytes + e.metadata().map(|m| m.len()).unwrap_or(0),
      })
  }
}

impl BackupStore for FileBackupStore {
  fn have_file(&self, hash: &ContentHash) -> bool {
    self.blob_path(hash).is_file()
  }

  fn archive(&self, path: &Path) -> Result<(ContentHash, u64), StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    self.write_blob(file, path)
  }

  fn archive_bytes(&self, bytes: &[u8]) -> Result<(ContentHash, u64), StoreError> {
    self.write_blob(bytes, Path::new("<memory>"))
  }

  fn extract(&self, hash: &ContentHash, destination: &Path) -> Result<u64, StoreError> {
    let reader = self.open_blob(hash)?;
    let (_, size) = write_verified(reader, destination, Some(hash))?;
    Ok(size)
  }

  fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
    let blob = self.blob_path(hash);
    let mut bytes = Vec::new();
    self
      .open_blob(hash)?
      .read_to_end(&mut bytes)
      .map_err(|e| StoreError::io(&blob, e))?;

    let mut hasher = ContentHasher::new();
    hasher.update(&bytes);
    let (actual, _) = hasher.finish();
    if actual != *hash {
      return Err(StoreError::ArchiveIntegrity {
        path: blob.display().to_string(),
        expected: hash.clone(),
        actual,
      });
    }
    Ok(bytes)
  }

  fn blobs(&self) -> Result<Vec<(ContentHash, u64)>, StoreError> {
    let root = self.root.join(BLOBS_DIR);
    let mut blobs = Vec::new();
    for entry in WalkDir::new(&root).min_depth(2).max_depth(2) {
      let entry = entry.map_err(|e| StoreError::io(&root, e.into()))?;
      if !entry.file_type().is_file() {
        continue;
      }
      let Some(name) = entry.file_name().to_str() else {
        continue;
      };
      let size = entry.metadata().map_err(|e| StoreError::io(entry.path(), e.into()))?.len();
      blobs.push((ContentHash(name.to_string()), size));
    }
    Ok(blobs)
  }

  fn remove(&self, hash: &ContentHash) -> Result<(), StoreError> {
    let blob = self.blob_path(hash);
    match fs::remove_file(&blob) {
      Ok(()) => {
        trace!(hash = hash.short(), "removed blob");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StoreError::io(&blob, e)),
    }
  }
}
