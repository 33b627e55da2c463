//! Test utilities for loadsync-lib.
//!
//! Helpers for laying out small game folders on disk and reading them back.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) {
  let path = root.join(relative);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, contents).unwrap();
}

/// Read every regular file under `root` into a map keyed by slash-separated
/// relative path.
pub fn read_tree(root: &Path) -> BTreeMap<String, String> {
  WalkDir::new(root)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .map(|e| {
      let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
      (rel, fs::read_to_string(e.path()).unwrap())
    })
    .collect()
}
