//! Garbage collection of the backup store.
//!
//! A blob is live while any loadout revision or recorded disk state names its
//! hash. Deleting a loadout or unmanaging an installation drops those
//! references; everything else in the store can then be swept.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::store::{BackupStore, StoreError};
use crate::util::hash::ContentHash;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to list backup store: {0}")]
  ListStore(#[source] StoreError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct GcStats {
  pub blobs_scanned: usize,
  pub blobs_live: usize,
  pub blobs_deleted: usize,
  pub bytes_freed: u64,
}

#[derive(Debug, Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted: Vec<ContentHash>,
}

fn collect_live_hashes(db: &Database) -> HashSet<ContentHash> {
  let live = db.referenced_hashes();
  debug!(count = live.len(), "collected live hashes");
  live
}

/// Delete every blob no loadout revision or disk state refers to. With
/// `dry_run` the store is left untouched and the result lists what would go.
pub fn collect_garbage(db: &Database, store: &dyn BackupStore, dry_run: bool) -> Result<GcResult, GcError> {
  let live = collect_live_hashes(db);
  let blobs = store.blobs().map_err(GcError::ListStore)?;

  let mut stats = GcStats {
    blobs_scanned: blobs.len(),
    ..GcStats::default()
  };
  let mut deleted = Vec::new();

  for (hash, size) in blobs {
    if live.contains(&hash) {
      stats.blobs_live += 1;
      continue;
    }

    debug!(hash = hash.short(), size, "removing unreferenced blob");
    if !dry_run {
      if let Err(e) = store.remove(&hash) {
        warn!(hash = hash.short(), error = %e, "failed to delete blob");
        continue;
      }
    }
    stats.blobs_deleted += 1;
    stats.bytes_freed += size;
    deleted.push(hash);
  }

  info!(
    scanned = stats.blobs_scanned,
    deleted = stats.blobs_deleted,
    bytes_freed = stats.bytes_freed,
    dry_run,
    "garbage collection complete"
  );
  Ok(GcResult { stats, deleted })
}
