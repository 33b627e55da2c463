//! Disk state scanner.
//!
//! Walks every location root of an installation and hashes the regular files
//! it finds. The scanner never writes; unreadable files are reported as
//! warnings and treated as absent.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::paths::{GameLocations, GamePath};
use crate::util::hash::{ContentHash, hash_file};

use super::types::DiskState;

/// Errors that stop a scan entirely.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
  #[error("failed to build hashing pool: {0}")]
  ThreadPool(String),
}

/// Options controlling a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
  /// Number of hashing threads.
  pub parallelism: usize,
  /// Rehash every file even if size and mtime match the previous state.
  pub force_rehash: bool,
  /// Path prefixes that are never indexed.
  pub ignored: Vec<GamePath>,
}

impl Default for ScanOptions {
  fn default() -> Self {
    Self {
      parallelism: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4),
      force_rehash: false,
      ignored: Vec::new(),
    }
  }
}

impl ScanOptions {
  pub fn is_ignored(&self, path: &GamePath) -> bool {
    self.ignored.iter().any(|prefix| path.starts_with(prefix))
  }
}

/// A file observed by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
  pub path: GamePath,
  pub hash: ContentHash,
  pub size: u64,
  pub last_modified: DateTime<Utc>,
}

/// A file that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanWarning {
  pub path: PathBuf,
  pub message: String,
}

/// Result of a scan: files sorted by path, plus advisory warnings.
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
  pub files: Vec<ScannedFile>,
  pub warnings: Vec<ScanWarning>,
}

/// Scan every location root.
///
/// When `previous` has an entry with identical size and mtime, its hash is
/// reused instead of rehashing, unless `options.force_rehash` is set.
pub fn scan_locations(
  locations: &GameLocations,
  previous: Option<&DiskState>,
  options: &ScanOptions,
) -> Result<ScanOutput, ScanError> {
  let mut warnings = Vec::new();
  let mut candidates: Vec<(PathBuf, GamePath)> = Vec::new();

  for (location, root) in locations.iter() {
    if !root.is_dir() {
      debug!(location = %location, root = %root.display(), "location root missing, skipping");
      continue;
    }

    for entry in WalkDir::new(root).follow_links(false) {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          let path = e.path().map(|p| p.to_path_buf()).unwrap_or_else(|| root.to_path_buf());
          warnings.push(ScanWarning {
            path,
            message: e.to_string(),
          });
          continue;
        }
      };

      if !entry.file_type().is_file() {
        continue;
      }

      // Nested roots: a file belongs to the most specific location only.
      let Some(game_path) = locations.to_game_path(entry.path()) else {
        warnings.push(ScanWarning {
          path: entry.path().to_path_buf(),
          message: "path cannot be expressed relative to its root".to_string(),
        });
        continue;
      };
      if &game_path.location != location || options.is_ignored(&game_path) {
        continue;
      }

      candidates.push((entry.into_path(), game_path));
    }
  }

  let pool = rayon::ThreadPoolBuilder::new()
    .num_threads(options.parallelism.max(1))
    .build()
    .map_err(|e| ScanError::ThreadPool(e.to_string()))?;

  let results: Vec<Result<(ScannedFile, bool), ScanWarning>> = pool.install(|| {
    candidates
      .par_iter()
      .map(|(absolute, game_path)| scan_file(absolute, game_path, previous, options.force_rehash))
      .collect()
  });

  let mut files = Vec::with_capacity(results.len());
  let mut rehashed = 0usize;
  for result in results {
    match result {
      Ok((file, was_hashed)) => {
        rehashed += usize::from(was_hashed);
        files.push(file);
      }
      Err(warning) => warnings.push(warning),
    }
  }
  files.sort_by(|a, b| a.path.cmp(&b.path));

  for warning in &warnings {
    warn!(path = %warning.path.display(), "skipping unreadable file: {}", warning.message);
  }
  info!(files = files.len(), rehashed, warnings = warnings.len(), "scan complete");

  Ok(ScanOutput { files, warnings })
}

fn scan_file(
  absolute: &std::path::Path,
  game_path: &GamePath,
  previous: Option<&DiskState>,
  force_rehash: bool,
) -> Result<(ScannedFile, bool), ScanWarning> {
  let to_warning = |message: String| ScanWarning {
    path: absolute.to_path_buf(),
    message,
  };

  let metadata = std::fs::metadata(absolute).map_err(|e| to_warning(e.to_string()))?;
  let modified = metadata.modified().map_err(|e| to_warning(e.to_string()))?;
  let last_modified: DateTime<Utc> = modified.into();
  let size = metadata.len();

  let reusable = previous
    .and_then(|prev| prev.get(game_path))
    .filter(|entry| !force_rehash && entry.size == size && entry.last_modified == last_modified);
  if let Some(entry) = reusable {
    let file = ScannedFile {
      path: game_path.clone(),
      hash: entry.hash.clone(),
      size,
      last_modified,
    };
    return Ok((file, false));
  }

  let (hash, size) = hash_file(absolute).map_err(|e| to_warning(e.to_string()))?;
  debug!(path = %game_path, hash = hash.short(), "hashed");
  let file = ScannedFile {
    path: game_path.clone(),
    hash,
    size,
    last_modified,
  };
  Ok((file, true))
}
