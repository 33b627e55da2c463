//! Game version detection.
//!
//! The synchronizer records a version string per installation on every
//! rescan. A changed version means the game itself was updated outside the
//! mod manager.

use sha2::{Digest, Sha256};

use crate::disk_state::DiskState;
use crate::paths::LocationId;

/// Derives a version string from observed disk state.
pub trait VersionDetector: Send + Sync {
  fn detect(&self, initial: Option<&DiskState>, current: &DiskState) -> Option<String>;
}

/// Fingerprints the vendor files of the game location.
///
/// Vendor files are the game-location paths of the initial state, or every
/// game-location file when no initial state exists yet. The version is a
/// short digest of their paths and current hashes, so replacing any vendor
/// file changes it while adding mod files does not.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintVersionDetector;

const FINGERPRINT_LEN: usize = 12;

impl VersionDetector for FingerprintVersionDetector {
  fn detect(&self, initial: Option<&DiskState>, current: &DiskState) -> Option<String> {
    let mut hasher = Sha256::new();
    let mut count = 0usize;

    let vendor = current
      .iter()
      .filter(|e| e.path.location.as_str() == LocationId::GAME)
      .filter(|e| initial.is_none_or(|initial| initial.contains(&e.path)));

    for entry in vendor {
      hasher.update(entry.path.to_string().as_bytes());
      hasher.update(b":");
      hasher.update(entry.hash.0.as_bytes());
      hasher.update(b"\n");
      count += 1;
    }

    if count == 0 {
      return None;
    }
    let digest = format!("{:x}", hasher.finalize());
    Some(format!("fp-{}", &digest[..FINGERPRINT_LEN]))
  }
}
