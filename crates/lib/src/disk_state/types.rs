//! Disk state types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paths::GamePath;
use crate::types::TxId;
use crate::util::hash::ContentHash;

use super::scanner::ScannedFile;

/// One observed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStateEntry {
  pub path: GamePath,
  pub hash: ContentHash,
  pub size: u64,
  pub last_modified: DateTime<Utc>,
  /// Transaction at which this exact content was first observed at this path.
  pub origin_tx: TxId,
}

impl DiskStateEntry {
  /// True when hash, size and timestamp all match.
  pub fn same_content(&self, other: &ScannedFile) -> bool {
    self.hash == other.hash && self.size == other.size && self.last_modified == other.last_modified
  }

  pub fn to_scanned(&self) -> ScannedFile {
    ScannedFile {
      path: self.path.clone(),
      hash: self.hash.clone(),
      size: self.size,
      last_modified: self.last_modified,
    }
  }
}

/// An immutable snapshot of the files in an installation's locations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "DiskStateRepr", into = "DiskStateRepr")]
pub struct DiskState {
  tx: TxId,
  entries: BTreeMap<GamePath, DiskStateEntry>,
}

#[derive(Serialize, Deserialize)]
struct DiskStateRepr {
  tx: TxId,
  entries: Vec<DiskStateEntry>,
}

impl From<DiskStateRepr> for DiskState {
  fn from(repr: DiskStateRepr) -> Self {
    Self::from_entries(repr.tx, repr.entries)
  }
}

impl From<DiskState> for DiskStateRepr {
  fn from(state: DiskState) -> Self {
    Self {
      tx: state.tx,
      entries: state.entries.into_values().collect(),
    }
  }
}

impl DiskState {
  pub fn from_entries(tx: TxId, entries: impl IntoIterator<Item = DiskStateEntry>) -> Self {
    Self {
      tx,
      entries: entries.into_iter().map(|e| (e.path.clone(), e)).collect(),
    }
  }

  /// Build the state committed at `tx` from a scan. Entries whose content is
  /// unchanged since `previous` keep their original `origin_tx`.
  pub fn from_scan(tx: TxId, files: &[ScannedFile], previous: Option<&DiskState>) -> Self {
    let entries = files.iter().map(|file| {
      let origin_tx = previous
        .and_then(|prev| prev.get(&file.path))
        .filter(|prev| prev.same_content(file))
        .map_or(tx, |prev| prev.origin_tx);
      DiskStateEntry {
        path: file.path.clone(),
        hash: file.hash.clone(),
        size: file.size,
        last_modified: file.last_modified,
        origin_tx,
      }
    });
    Self::from_entries(tx, entries)
  }

  pub fn tx(&self) -> TxId {
    self.tx
  }

  pub fn get(&self, path: &GamePath) -> Option<&DiskStateEntry> {
    self.entries.get(path)
  }

  pub fn hash_of(&self, path: &GamePath) -> Option<&ContentHash> {
    self.entries.get(path).map(|e| &e.hash)
  }

  pub fn contains(&self, path: &GamePath) -> bool {
    self.entries.contains_key(path)
  }

  pub fn iter(&self) -> impl Iterator<Item = &DiskStateEntry> {
    self.entries.values()
  }

  pub fn paths(&self) -> impl Iterator<Item = &GamePath> {
    self.entries.keys()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// True when both states describe the same files with the same content,
  /// ignoring transaction tags.
  pub fn same_files(&self, files: &[ScannedFile]) -> bool {
    self.entries.len() == files.len()
      && files
        .iter()
        .all(|file| self.entries.get(&file.path).is_some_and(|e| e.same_content(file)))
  }

  /// Total size of all tracked files.
  pub fn total_size(&self) -> u64 {
    self.entries.values().map(|e| e.size).sum()
  }
}
