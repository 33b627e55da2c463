//! In-memory backup store, used by tests and dry runs.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::util::hash::{ContentHash, hash_bytes};

use super::{BackupStore, StoreError, write_verified};

#[derive(Debug, Default)]
pub struct MemoryBackupStore {
  blobs: RwLock<HashMap<ContentHash, Arc<[u8]>>>,
}

impl MemoryBackupStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.blobs.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn get(&self, hash: &ContentHash) -> Result<Arc<[u8]>, StoreError> {
    self
      .blobs
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(hash)
      .cloned()
      .ok_or_else(|| StoreError::MissingBlob(hash.clone()))
  }
}

impl BackupStore for MemoryBackupStore {
  fn have_file(&self, hash: &ContentHash) -> bool {
    self.blobs.read().unwrap_or_else(|e| e.into_inner()).contains_key(hash)
  }

  fn archive(&self, path: &Path) -> Result<(ContentHash, u64), StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    self.archive_bytes(&bytes)
  }

  fn archive_bytes(&self, bytes: &[u8]) -> Result<(ContentHash, u64), StoreError> {
    let hash = hash_bytes(bytes);
    self
      .blobs
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .entry(hash.clone())
      .or_insert_with(|| Arc::from(bytes));
    Ok((hash, bytes.len() as u64))
  }

  fn extract(&self, hash: &ContentHash, destination: &Path) -> Result<u64, StoreError> {
    let bytes = self.get(hash)?;
    let (_, size) = write_verified(&bytes[..], destination, Some(hash))?;
    Ok(size)
  }

  fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
    Ok(self.get(hash)?.to_vec())
  }

  fn blobs(&self) -> Result<Vec<(ContentHash, u64)>, StoreError> {
    let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
    Ok(blobs.iter().map(|(hash, bytes)| (hash.clone(), bytes.len() as u64)).collect())
  }

  fn remove(&self, hash: &ContentHash) -> Result<(), StoreError> {
    self.blobs.write().unwrap_or_else(|e| e.into_inner()).remove(hash);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn memory_store_round_trips_through_disk() {
    let temp = TempDir::new().unwrap();
    let store = MemoryBackupStore::new();
    let (hash, size) = store.archive_bytes(b"texture").unwrap();
    store.archive_bytes(b"texture").unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(size, 7);

    let dest = temp.path().join("mods/texture.dds");
    store.extract(&hash, &dest).unwrap();
    assert_eq!(fs::read(&dest).unwrap(), b"texture");
    assert!(matches!(
      store.read(&hash_bytes(b"other")),
      Err(StoreError::MissingBlob(_))
    ));
  }
}
