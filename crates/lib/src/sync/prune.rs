//! Empty directory cleanup after deletions.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Remove directories left empty by deleting `deleted_files`, deepest first.
///
/// Only ancestors of deleted files strictly below `root` are considered; the
/// root itself is never removed. Returns the removed directories.
pub fn prune_empty_dirs(root: &Path, deleted_files: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
  let mut candidates: BTreeSet<(usize, PathBuf)> = BTreeSet::new();
  for file in deleted_files {
    for dir in file.ancestors().skip(1) {
      if dir == root || !dir.starts_with(root) {
        break;
      }
      candidates.insert((dir.components().count(), dir.to_path_buf()));
    }
  }

  let mut removed = Vec::new();
  for (_, dir) in candidates.into_iter().rev() {
    let mut entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
      Err(e) => return Err(e),
    };
    if entries.next().is_some() {
      continue;
    }
    match fs::remove_dir(&dir) {
      Ok(()) => {
        debug!(dir = %dir.display(), "removed empty directory");
        removed.push(dir);
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove empty directory"),
    }
  }
  Ok(removed)
}
