//! Records and errors for the loadout database.

use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::disk_state::ScannedFile;
use crate::loadout::Loadout;
use crate::paths::GameLocations;
use crate::types::{InstallationId, LoadoutId, TxId};

/// Current version of the on-disk database format.
pub const DB_FORMAT_VERSION: u32 = 1;

/// A game installation registered for management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInstallation {
  pub id: InstallationId,
  pub game: String,
  pub locations: GameLocations,
  /// Where the game came from (`steam`, `gog`, ...). Informational only.
  pub store: String,
}

impl GameInstallation {
  pub fn new(game: impl Into<String>, locations: GameLocations) -> Self {
    Self {
      id: InstallationId::new(),
      game: game.into(),
      locations,
      store: "unknown".to_string(),
    }
  }
}

/// Which loadout revision was last written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPointer {
  pub loadout: LoadoutId,
  pub revision: u64,
}

/// Tracking data for one installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationMetadata {
  /// Disk state recorded before anything was changed.
  pub initial_state_tx: Option<TxId>,
  /// Most recent disk state observed by a scan or written by an apply.
  pub last_scanned_tx: Option<TxId>,
  /// Disk state as left by the last successful apply.
  pub last_synced_state_tx: Option<TxId>,
  /// The active loadout, if any.
  pub last_synced: Option<SyncPointer>,
  pub game_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRecord {
  pub installation: GameInstallation,
  pub metadata: InstallationMetadata,
}

/// One entry of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
  pub tx: TxId,
  pub at: DateTime<Utc>,
  pub summary: String,
}

/// A single write inside a [`Transaction`].
#[derive(Debug, Clone)]
pub(crate) enum Op {
  PutInstallation(GameInstallation),
  RemoveInstallation(InstallationId),
  RecordDiskState {
    installation: InstallationId,
    files: Vec<ScannedFile>,
  },
  MarkInitialState(InstallationId),
  ReplaceInitialState {
    installation: InstallationId,
    files: Vec<ScannedFile>,
  },
  SetLastSynced {
    installation: InstallationId,
    loadout: Option<LoadoutId>,
  },
  SetGameVersion {
    installation: InstallationId,
    version: Option<String>,
  },
  PutLoadout(Loadout),
  DeleteLoadout(LoadoutId),
}

/// A batch of writes applied atomically by [`super::Database::commit`].
///
/// Operations apply in the order they were added, so an operation may rely
/// on the effect of an earlier one in the same transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
  pub(crate) summary: String,
  pub(crate) ops: Vec<Op>,
}

impl Transaction {
  pub fn new(summary: impl Into<String>) -> Self {
    Self {
      summary: summary.into(),
      ops: Vec::new(),
    }
  }

  pub fn put_installation(&mut self, installation: GameInstallation) -> &mut Self {
    self.ops.push(Op::PutInstallation(installation));
    self
  }

  /// Forget an installation and every disk state recorded for it.
  pub fn remove_installation(&mut self, id: InstallationId) -> &mut Self {
    self.ops.push(Op::RemoveInstallation(id));
    self
  }

  /// Record a new disk state at this transaction.
  pub fn record_disk_state(&mut self, installation: InstallationId, files: Vec<ScannedFile>) -> &mut Self {
    self.ops.push(Op::RecordDiskState { installation, files });
    self
  }

  /// Mark the latest recorded disk state as the initial state.
  pub fn mark_initial_state(&mut self, installation: InstallationId) -> &mut Self {
    self.ops.push(Op::MarkInitialState(installation));
    self
  }

  /// Swap the initial state for `files`, e.g. after a game update replaced
  /// vendor files. Disk states already recorded are left alone.
  pub fn replace_initial_state(&mut self, installation: InstallationId, files: Vec<ScannedFile>) -> &mut Self {
    self.ops.push(Op::ReplaceInitialState { installation, files });
    self
  }

  /// Point the installation's last-synced state at the latest recorded disk
  /// state, and its active loadout at the latest revision of `loadout`.
  pub fn set_last_synced(&mut self, installation: InstallationId, loadout: Option<LoadoutId>) -> &mut Self {
    self.ops.push(Op::SetLastSynced { installation, loadout });
    self
  }

  pub fn set_game_version(&mut self, installation: InstallationId, version: Option<String>) -> &mut Self {
    self.ops.push(Op::SetGameVersion { installation, version });
    self
  }

  /// Commit `loadout` as the next revision of its id.
  pub fn put_loadout(&mut self, loadout: Loadout) -> &mut Self {
    self.ops.push(Op::PutLoadout(loadout));
    self
  }

  pub fn delete_loadout(&mut self, id: LoadoutId) -> &mut Self {
    self.ops.push(Op::DeleteLoadout(id));
    self
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }
}

/// Errors that can occur when working with the loadout database.
#[derive(Debug, Error)]
pub enum DbError {
  #[error("installation not found: {0}")]
  InstallationNotFound(InstallationId),

  #[error("installation already managed: {0}")]
  InstallationExists(InstallationId),

  #[error("loadout not found: {0}")]
  LoadoutNotFound(LoadoutId),

  #[error("loadout {id} has no revision {revision}")]
  RevisionNotFound { id: LoadoutId, revision: u64 },

  #[error("loadout {loadout} belongs to installation {expected}, not {actual}")]
  WrongInstallation {
    loadout: LoadoutId,
    expected: InstallationId,
    actual: InstallationId,
  },

  #[error("no disk state recorded for installation {0}")]
  NoDiskState(InstallationId),

  /// Failed to create the database directory.
  #[error("failed to create database directory: {0}")]
  CreateDir(#[source] io::Error),

  /// Failed to read the database file.
  #[error("failed to read database: {0}")]
  Read(#[source] io::Error),

  /// Failed to write the database file.
  #[error("failed to write database: {0}")]
  Write(#[source] io::Error),

  /// Failed to parse the database JSON.
  #[error("failed to parse database: {0}")]
  Parse(#[source] serde_json::Error),

  /// Failed to serialize the database.
  #[error("failed to serialize database: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported database format version: {0}")]
  UnsupportedVersion(u32),

  #[error("database is open read-only")]
  ReadOnly,
}
