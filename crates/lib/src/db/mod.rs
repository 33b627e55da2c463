//! Loadout database.
//!
//! An append-only store of installations, loadout revisions and disk states,
//! addressed by transaction id. Writes are batched in a [`Transaction`] and
//! applied atomically by [`Database::commit`]; reads return shared immutable
//! values.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/db/
//! └── db.json          # Entire database, rewritten atomically per commit
//! ```

mod types;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use types::{
  DB_FORMAT_VERSION, DbError, GameInstallation, InstallationMetadata, InstallationRecord, SyncPointer, Transaction,
  TxRecord,
};

use crate::disk_state::DiskState;
use crate::loadout::{Loadout, ModFile};
use crate::lock::{DataLock, LockMode};
use crate::types::{InstallationId, LoadoutId, TxId};
use crate::util::hash::ContentHash;

use types::Op;

/// Database file name.
const DB_FILENAME: &str = "db.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbState {
  version: u32,
  last_tx: TxId,
  installations: BTreeMap<InstallationId, InstallationRecord>,
  /// All revisions of each loadout, oldest first.
  loadouts: BTreeMap<LoadoutId, Vec<Arc<Loadout>>>,
  /// All disk states of each installation, oldest first.
  disk_states: BTreeMap<InstallationId, Vec<Arc<DiskState>>>,
  /// The state each installation reverts to.
  #[serde(default)]
  initial_states: BTreeMap<InstallationId, Arc<DiskState>>,
  log: Vec<TxRecord>,
}

impl Default for DbState {
  fn default() -> Self {
    Self {
      version: DB_FORMAT_VERSION,
      last_tx: TxId::default(),
      installations: BTreeMap::new(),
      loadouts: BTreeMap::new(),
      disk_states: BTreeMap::new(),
      initial_states: BTreeMap::new(),
      log: Vec::new(),
    }
  }
}

impl DbState {
  fn record_mut(&mut self, id: InstallationId) -> Result<&mut InstallationRecord, DbError> {
    self.installations.get_mut(&id).ok_or(DbError::InstallationNotFound(id))
  }

  fn latest_state(&self, id: InstallationId) -> Option<&Arc<DiskState>> {
    self.disk_states.get(&id).and_then(|states| states.last())
  }

  fn apply(&mut self, tx: TxId, op: Op) -> Result<(), DbError> {
    match op {
      Op::PutInstallation(installation) => {
        let id = installation.id;
        match self.installations.get_mut(&id) {
          Some(record) => record.installation = installation,
          None => {
            self.installations.insert(
              id,
              InstallationRecord {
                installation,
                metadata: InstallationMetadata::default(),
              },
            );
          }
        }
      }
      Op::RemoveInstallation(id) => {
        self.installations.remove(&id).ok_or(DbError::InstallationNotFound(id))?;
        self.disk_states.remove(&id);
        self.initial_states.remove(&id);
      }
      Op::RecordDiskState { installation, files } => {
        self.record_mut(installation)?;
        let previous = self.latest_state(installation).cloned();
        let state = DiskState::from_scan(tx, &files, previous.as_deref());
        self.disk_states.entry(installation).or_default().push(Arc::new(state));
        self.record_mut(installation)?.metadata.last_scanned_tx = Some(tx);
      }
      Op::MarkInitialState(installation) => {
        let latest = self
          .latest_state(installation)
          .cloned()
          .ok_or(DbError::NoDiskState(installation))?;
        self.record_mut(installation)?.metadata.initial_state_tx = Some(latest.tx());
        self.initial_states.insert(installation, latest);
      }
      Op::ReplaceInitialState { installation, files } => {
        self.record_mut(installation)?;
        let previous = self.initial_states.get(&installation).cloned();
        let state = DiskState::from_scan(tx, &files, previous.as_deref());
        self.initial_states.insert(installation, Arc::new(state));
        self.record_mut(installation)?.metadata.initial_state_tx = Some(tx);
      }
      Op::SetLastSynced { installation, loadout } => {
        let state_tx = self
          .latest_state(installation)
          .map(|s| s.tx())
          .ok_or(DbError::NoDiskState(installation))?;
        let pointer = match loadout {
          Some(id) => {
            let latest = self
              .loadouts
              .get(&id)
              .and_then(|revisions| revisions.last())
              .ok_or(DbError::LoadoutNotFound(id))?;
            Some(SyncPointer {
              loadout: id,
              revision: latest.revision,
            })
          }
          None => None,
        };
        let metadata = &mut self.record_mut(installation)?.metadata;
        metadata.last_synced_state_tx = Some(state_tx);
        metadata.last_synced = pointer;
      }
      Op::SetGameVersion { installation, version } => {
        self.record_mut(installation)?.metadata.game_version = version;
      }
      Op::PutLoadout(mut loadout) => {
        if !self.installations.contains_key(&loadout.installation) {
          return Err(DbError::InstallationNotFound(loadout.installation));
        }
        let revisions = self.loadouts.entry(loadout.id).or_default();
        if let Some(existing) = revisions.last().filter(|l| l.installation != loadout.installation) {
          return Err(DbError::WrongInstallation {
            loadout: loadout.id,
            expected: existing.installation,
            actual: loadout.installation,
          });
        }
        loadout.revision = revisions.last().map_or(0, |l| l.revision + 1);
        loadout.tx = tx;
        revisions.push(Arc::new(loadout));
      }
      Op::DeleteLoadout(id) => {
        self.loadouts.remove(&id).ok_or(DbError::LoadoutNotFound(id))?;
      }
    }
    Ok(())
  }
}

/// The loadout database, optionally persisted to a directory.
#[derive(Debug)]
pub struct Database {
  state: Mutex<DbState>,
  /// Directory holding `db.json`; `None` for an in-memory database.
  base_path: Option<PathBuf>,
  /// Held for the database's lifetime. A shared lock makes it read-only.
  data_lock: Option<DataLock>,
}

impl Database {
  /// A database that lives only as long as this value.
  pub fn in_memory() -> Self {
    Self {
      state: Mutex::new(DbState::default()),
      base_path: None,
      data_lock: None,
    }
  }

  /// Open the database stored in `base_path`, creating an empty one if none
  /// exists yet.
  pub fn open(base_path: impl Into<PathBuf>) -> Result<Self, DbError> {
    let base_path = base_path.into();
    let path = base_path.join(DB_FILENAME);

    let state = match fs::read_to_string(&path) {
      Ok(content) => {
        let state: DbState = serde_json::from_str(&content).map_err(DbError::Parse)?;
        if state.version != DB_FORMAT_VERSION {
          return Err(DbError::UnsupportedVersion(state.version));
        }
        state
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => DbState::default(),
      Err(e) => return Err(DbError::Read(e)),
    };

    info!(path = %path.display(), last_tx = %state.last_tx, "opened loadout database");
    Ok(Self {
      state: Mutex::new(state),
      base_path: Some(base_path),
      data_lock: None,
    })
  }

  /// Open the database while holding `lock` over its data directory. The
  /// lock is released when the database is dropped.
  pub fn open_locked(base_path: impl Into<PathBuf>, lock: DataLock) -> Result<Self, DbError> {
    let mut db = Self::open(base_path)?;
    db.data_lock = Some(lock);
    Ok(db)
  }

  /// False when opened under a shared lock.
  pub fn is_writable(&self) -> bool {
    self.data_lock.as_ref().is_none_or(|lock| lock.mode() == LockMode::Exclusive)
  }

  fn lock(&self) -> MutexGuard<'_, DbState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Start a new transaction. Nothing is written until [`Self::commit`].
  pub fn begin(&self, summary: impl Into<String>) -> Transaction {
    Transaction::new(summary)
  }

  /// Apply every operation of `transaction` under the next transaction id.
  ///
  /// Either all operations take effect (and are persisted) or none do.
  pub fn commit(&self, transaction: Transaction) -> Result<TxId, DbError> {
    if !self.is_writable() {
      return Err(DbError::ReadOnly);
    }
    let mut guard = self.lock();
    let tx = guard.last_tx.next();

    let mut next = guard.clone();
    let op_count = transaction.ops.len();
    for op in transaction.ops {
      next.apply(tx, op)?;
    }
    next.last_tx = tx;
    next.log.push(TxRecord {
      tx,
      at: Utc::now(),
      summary: transaction.summary.clone(),
    });

    self.persist(&next)?;
    *guard = next;

    debug!(tx = %tx, ops = op_count, summary = %transaction.summary, "committed transaction");
    Ok(tx)
  }

  /// Write the whole state atomically (temp file, then rename).
  fn persist(&self, state: &DbState) -> Result<(), DbError> {
    let Some(base_path) = &self.base_path else {
      return Ok(());
    };
    fs::create_dir_all(base_path).map_err(DbError::CreateDir)?;

    let path = base_path.join(DB_FILENAME);
    let temp_path = base_path.join(format!("{}.tmp", DB_FILENAME));
    let content = serde_json::to_string(state).map_err(DbError::Serialize)?;
    fs::write(&temp_path, &content).map_err(DbError::Write)?;
    fs::rename(&temp_path, &path).map_err(DbError::Write)?;
    Ok(())
  }

  pub fn last_tx(&self) -> TxId {
    self.lock().last_tx
  }

  pub fn log(&self) -> Vec<TxRecord> {
    self.lock().log.clone()
  }

  pub fn installation(&self, id: InstallationId) -> Result<InstallationRecord, DbError> {
    self.lock().installations.get(&id).cloned().ok_or(DbError::InstallationNotFound(id))
  }

  pub fn installations(&self) -> Vec<InstallationRecord> {
    self.lock().installations.values().cloned().collect()
  }

  /// Latest revision of a loadout.
  pub fn loadout(&self, id: LoadoutId) -> Result<Arc<Loadout>, DbError> {
    self
      .lock()
      .loadouts
      .get(&id)
      .and_then(|revisions| revisions.last())
      .cloned()
      .ok_or(DbError::LoadoutNotFound(id))
  }

  /// Re-read the latest committed revision of `loadout`.
  pub fn rebase(&self, loadout: &Loadout) -> Result<Arc<Loadout>, DbError> {
    self.loadout(loadout.id)
  }

  /// A specific revision of a loadout.
  pub fn loadout_revision(&self, id: LoadoutId, revision: u64) -> Result<Arc<Loadout>, DbError> {
    let guard = self.lock();
    let revisions = guard.loadouts.get(&id).ok_or(DbError::LoadoutNotFound(id))?;
    revisions
      .iter()
      .find(|l| l.revision == revision)
      .cloned()
      .ok_or(DbError::RevisionNotFound { id, revision })
  }

  /// Latest revision of every loadout of an installation, in creation order.
  pub fn loadouts_for(&self, installation: InstallationId) -> Vec<Arc<Loadout>> {
    let guard = self.lock();
    let mut loadouts: Vec<(TxId, Arc<Loadout>)> = guard
      .loadouts
      .values()
      .filter_map(|revisions| Some((revisions.first()?.tx, revisions.last()?.clone())))
      .filter(|(_, l)| l.installation == installation)
      .collect();
    loadouts.sort_by_key(|(created, _)| *created);
    loadouts.into_iter().map(|(_, l)| l).collect()
  }

  /// The disk state that was current at `tx`.
  pub fn disk_state_at(&self, installation: InstallationId, tx: TxId) -> Option<Arc<DiskState>> {
    self
      .lock()
      .disk_states
      .get(&installation)?
      .iter()
      .rev()
      .find(|state| state.tx() <= tx)
      .cloned()
  }

  /// The state the installation reverts to when no loadout is active.
  ///
  /// Databases written before initial states were kept separately fall back
  /// to the disk state recorded at `initial_state_tx`.
  pub fn initial_state(&self, installation: InstallationId) -> Option<Arc<DiskState>> {
    let guard = self.lock();
    if let Some(state) = guard.initial_states.get(&installation) {
      return Some(state.clone());
    }
    let tx = guard.installations.get(&installation)?.metadata.initial_state_tx?;
    guard
      .disk_states
      .get(&installation)?
      .iter()
      .rev()
      .find(|state| state.tx() <= tx)
      .cloned()
  }

  /// Every content hash a loadout revision or disk state still refers to.
  pub fn referenced_hashes(&self) -> HashSet<ContentHash> {
    let guard = self.lock();
    let loadout_hashes = guard
      .loadouts
      .values()
      .flatten()
      .flat_map(|loadout| loadout.mods.iter())
      .flat_map(|m| m.files.iter())
      .filter_map(|file| match file {
        ModFile::Static(file) => Some(file.hash.clone()),
        ModFile::Generated(_) => None,
      });
    let disk_hashes = guard
      .disk_states
      .values()
      .flatten()
      .chain(guard.initial_states.values())
      .flat_map(|state| state.iter().map(|e| e.hash.clone()));
    loadout_hashes.chain(disk_hashes).collect()
  }

  /// The most recently recorded disk state.
  pub fn latest_disk_state(&self, installation: InstallationId) -> Option<Arc<DiskState>> {
    self.lock().latest_state(installation).cloned()
  }

  /// Number of disk states recorded for an installation.
  pub fn disk_state_count(&self, installation: InstallationId) -> usize {
    self.lock().disk_states.get(&installation).map_or(0, Vec::len)
  }
}
