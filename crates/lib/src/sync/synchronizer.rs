//! The synchronizer façade.
//!
//! Ties the scanner, differ, planner, executor, backup store and loadout
//! database together. Every public operation takes the façade's operation
//! lock, so at most one of them mutates disk or database at a time.
//!
//! An installation is in one of three states:
//!
//! ```text
//! Unmanaged --manage--> Managed <--deactivate-- Active
//!                          |                      ^
//!                          +--activate/synchronize+
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db::{Database, DbError, GameInstallation, InstallationRecord, SyncPointer};
use crate::disk_state::{DiskState, ScanError, ScanOptions, ScanOutput, ScannedFile, scan_locations};
use crate::gc::{GcError, GcResult, collect_garbage};
use crate::generated::{GenerateError, GeneratorRegistry};
use crate::loadout::{FlattenedLoadout, Loadout, LoadoutError, Mod, ModFile, ModKind, StaticModFile, flatten};
use crate::paths::{GameLocations, GamePath, LocationId, PathError, RelativePath};
use crate::store::{BackupStore, StoreError};
use crate::types::{InstallationId, LoadoutId, ModId, TxId};
use crate::util::hash::ContentHash;
use crate::version::{FingerprintVersionDetector, VersionDetector};

use super::differ::TargetState;
use super::execute::{ExecuteConfig, ExecuteError, ExecutionReport, execute_plan};
use super::ingest::{IngestContext, IngestResolver, OwnerResolver, apply_loadout_steps};
use super::plan::{ApplyPlan, ApplyStep, PlanError, PlanInput, PlanMode, build_plan};

/// Name of the mod holding the files found when the installation was managed.
pub const GAME_FILES_MOD_NAME: &str = "Game Files";

/// Errors surfaced by [`Synchronizer`] operations.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Db(#[from] DbError),

  #[error(transparent)]
  Scan(#[from] ScanError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),

  #[error(transparent)]
  Generate(#[from] GenerateError),

  #[error(transparent)]
  Loadout(#[from] LoadoutError),

  #[error(transparent)]
  Path(#[from] PathError),

  #[error(transparent)]
  Gc(#[from] GcError),

  #[error("game folder is already managed by installation {0}")]
  AlreadyManaged(InstallationId),

  #[error("installation {0} has no active loadout")]
  NoActiveLoadout(InstallationId),

  #[error("installation {0} has no initial state")]
  NoInitialState(InstallationId),

  #[error("I/O error at {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("background task failed: {0}")]
  TaskFailed(String),
}

/// Where an installation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallationState {
  Unmanaged,
  Managed,
  Active(SyncPointer),
}

/// Result of one apply pass.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
  pub plan: ApplyPlan,
  pub report: ExecutionReport,
  /// The committing transaction; `None` when everything was already in sync.
  pub tx: Option<TxId>,
  /// The active loadout afterwards, at its latest revision.
  pub loadout: Option<Arc<Loadout>>,
}

/// Tuning for scans and plan execution.
#[derive(Debug, Clone, Default)]
pub struct SynchronizerOptions {
  pub scan: ScanOptions,
  pub execute: ExecuteConfig,
}

/// Reconciles loadouts with game folders.
pub struct Synchronizer {
  db: Arc<Database>,
  store: Arc<dyn BackupStore>,
  generators: GeneratorRegistry,
  version_detector: Arc<dyn VersionDetector>,
  resolver: Arc<dyn IngestResolver>,
  options: SynchronizerOptions,
  cancel: CancellationToken,
  ops: Mutex<()>,
}

impl std::fmt::Debug for Synchronizer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Synchronizer")
      .field("generators", &self.generators)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

impl Synchronizer {
  pub fn new(db: Arc<Database>, store: Arc<dyn BackupStore>) -> Self {
    Self {
      db,
      store,
      generators: GeneratorRegistry::new(),
      version_detector: Arc::new(FingerprintVersionDetector),
      resolver: Arc::new(OwnerResolver),
      options: SynchronizerOptions::default(),
      cancel: CancellationToken::new(),
      ops: Mutex::new(()),
    }
  }

  pub fn with_generators(mut self, generators: GeneratorRegistry) -> Self {
    self.generators = generators;
    self
  }

  pub fn with_version_detector(mut self, detector: Arc<dyn VersionDetector>) -> Self {
    self.version_detector = detector;
    self
  }

  pub fn with_resolver(mut self, resolver: Arc<dyn IngestResolver>) -> Self {
    self.resolver = resolver;
    self
  }

  pub fn with_options(mut self, options: SynchronizerOptions) -> Self {
    self.options = options;
    self
  }

  /// Cancelling this token stops a running apply between files.
  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn db(&self) -> &Arc<Database> {
    &self.db
  }

  pub fn store(&self) -> &Arc<dyn BackupStore> {
    &self.store
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn state(&self, installation: InstallationId) -> InstallationState {
    match self.db.installation(installation) {
      Err(_) => InstallationState::Unmanaged,
      Ok(record) => record
        .metadata
        .last_synced
        .map_or(InstallationState::Managed, InstallationState::Active),
    }
  }

  /// Start managing a game folder: record its initial state and archive
  /// every file in it.
  pub async fn manage(&self, game: &str, locations: GameLocations) -> Result<InstallationId, SyncError> {
    let _guard = self.ops.lock().await;

    let locations = locations.canonicalized();
    let game_root = locations.get(&LocationId::game()).map(Path::to_path_buf);
    let existing = self
      .db
      .installations()
      .into_iter()
      .filter(|_| game_root.is_some())
      .find(|r| r.installation.locations.get(&LocationId::game()).map(Path::to_path_buf) == game_root);
    if let Some(existing) = existing {
      return Err(SyncError::AlreadyManaged(existing.installation.id));
    }

    let installation = GameInstallation::new(game, locations);
    let id = installation.id;
    let output = self.scan(&installation.locations, None).await?;
    let archived = self.backup_scanned(&installation.locations, &output.files).await?;

    let snapshot = DiskState::from_scan(TxId::default(), &output.files, None);
    let version = self.version_detector.detect(None, &snapshot);
    let file_count = output.files.len();

    let mut tx = self.db.begin(format!("manage {}", game));
    tx.put_installation(installation)
      .record_disk_state(id, output.files)
      .mark_initial_state(id)
      .set_game_version(id, version.clone());
    self.db.commit(tx)?;

    info!(installation = %id, game, files = file_count, archived, version = ?version, "installation managed");
    Ok(id)
  }

  /// Refresh the current disk state and game version.
  pub async fn rescan_files(&self, installation: InstallationId) -> Result<Arc<DiskState>, SyncError> {
    let _guard = self.ops.lock().await;
    let record = self.db.installation(installation)?;
    self.refresh(&record).await
  }

  /// Create a loadout holding the initial game files. The first loadout of an
  /// installation is activated right away.
  pub async fn create_loadout(&self, installation: InstallationId, name: &str) -> Result<Arc<Loadout>, SyncError> {
    let _guard = self.ops.lock().await;
    let record = self.db.installation(installation)?;
    let initial = self
      .db
      .initial_state(installation)
      .ok_or(SyncError::NoInitialState(installation))?;

    let existing = self.db.loadouts_for(installation);
    let short_name = next_short_name(existing.iter().map(|l| l.short_name.as_str()));

    let mut game_files = Mod::new(GAME_FILES_MOD_NAME, ModKind::GameFiles);
    game_files.files = initial
      .iter()
      .map(|e| {
        ModFile::Static(StaticModFile {
          to: e.path.clone(),
          hash: e.hash.clone(),
          size: e.size,
        })
      })
      .collect();
    let unarchived = initial.iter().filter(|e| !self.store.have_file(&e.hash)).count();
    if unarchived > 0 {
      warn!(installation = %installation, unarchived, "initial files missing from the backup store");
    }

    let mut loadout = Loadout::new(installation, name, short_name).with_mod(game_files);
    loadout.game_version = record.metadata.game_version.clone();
    let id = loadout.id;

    let mut tx = self.db.begin(format!("create loadout {}", name));
    tx.put_loadout(loadout);
    self.db.commit(tx)?;
    info!(loadout = %id, name, "created loadout");

    if existing.is_empty() && record.metadata.last_synced.is_none() {
      self.activate_locked(id).await?;
    }
    Ok(self.db.loadout(id)?)
  }

  /// Bring disk and loadout into agreement: external changes are folded into
  /// the loadout, then the loadout is applied. Switches loadouts when a
  /// different one is active.
  pub async fn synchronize(&self, loadout: LoadoutId) -> Result<SyncOutcome, SyncError> {
    let _guard = self.ops.lock().await;
    let target = self.db.loadout(loadout)?;
    let installation = target.installation;
    let record = self.db.installation(installation)?;

    match record.metadata.last_synced {
      Some(active) if active.loadout != loadout => self.switch(installation, active.loadout, loadout).await,
      _ => self.apply(installation, Some(target), PlanMode::Ingest).await,
    }
  }

  /// Make `loadout` the active one and apply it fully. External edits to
  /// its files are overwritten.
  pub async fn activate_loadout(&self, loadout: LoadoutId) -> Result<SyncOutcome, SyncError> {
    let _guard = self.ops.lock().await;
    self.activate_locked(loadout).await
  }

  /// Synchronize the active loadout, then restore the initial state.
  pub async fn deactivate_current_loadout(&self, installation: InstallationId) -> Result<SyncOutcome, SyncError> {
    let _guard = self.ops.lock().await;
    self.deactivate_locked(installation).await
  }

  /// Clone a loadout under a new id and short name.
  pub async fn copy_loadout(&self, loadout: LoadoutId) -> Result<Arc<Loadout>, SyncError> {
    let _guard = self.ops.lock().await;
    let source = self.db.loadout(loadout)?;
    let existing = self.db.loadouts_for(source.installation);

    let mut copy = (*source).clone();
    copy.id = LoadoutId::new();
    copy.name = format!("{} Copy", source.name);
    copy.short_name = next_short_name(existing.iter().map(|l| l.short_name.as_str()));
    copy.last_applied_at = None;
    let id = copy.id;

    let mut tx = self.db.begin(format!("copy loadout {}", source.name));
    tx.put_loadout(copy);
    self.db.commit(tx)?;
    info!(source = %loadout, copy = %id, "copied loadout");
    Ok(self.db.loadout(id)?)
  }

  /// Delete a loadout, deactivating it first when it is active.
  pub async fn delete_loadout(&self, loadout: LoadoutId) -> Result<(), SyncError> {
    let _guard = self.ops.lock().await;
    let existing = self.db.loadout(loadout)?;
    let record = self.db.installation(existing.installation)?;
    if record.metadata.last_synced.is_some_and(|p| p.loadout == loadout) {
      self.deactivate_locked(existing.installation).await?;
    }

    let mut tx = self.db.begin(format!("delete loadout {}", existing.name));
    tx.delete_loadout(loadout);
    self.db.commit(tx)?;
    info!(loadout = %loadout, "deleted loadout");
    Ok(())
  }

  /// Revert the game folder, then forget the installation and its loadouts.
  /// Archived content stays in the backup store.
  pub async fn unmanage(&self, installation: InstallationId) -> Result<(), SyncError> {
    let _guard = self.ops.lock().await;
    let record = self.db.installation(installation)?;
    if record.metadata.last_synced.is_some() {
      self.deactivate_locked(installation).await?;
    }

    let mut tx = self.db.begin(format!("unmanage {}", record.installation.game));
    for loadout in self.db.loadouts_for(installation) {
      tx.delete_loadout(loadout.id);
    }
    tx.remove_installation(installation);
    self.db.commit(tx)?;
    info!(installation = %installation, "installation unmanaged");
    Ok(())
  }

  /// Compute what synchronizing `loadout` would do, without touching disk or
  /// database.
  pub async fn plan(&self, loadout: LoadoutId) -> Result<ApplyPlan, SyncError> {
    let _guard = self.ops.lock().await;
    let target = self.db.loadout(loadout)?;
    let record = self.db.installation(target.installation)?;

    let previous = self.db.latest_disk_state(target.installation);
    let output = self.scan(&record.installation.locations, previous).await?;
    let vendor = self.inspect_vendor(&record, &output.files)?;
    let current = DiskState::from_scan(self.db.last_tx(), &output.files, None);

    let initial = if vendor.replaces_initial(&record) {
      Some(Arc::new(DiskState::from_scan(self.db.last_tx(), &vendor.initial, None)))
    } else {
      self.db.initial_state(target.installation)
    };
    let rebased = match initial.as_deref() {
      Some(initial) if target.game_version != vendor.version => rebase_game_files(&target, initial),
      _ => None,
    };

    let mode = match record.metadata.last_synced {
      Some(active) if active.loadout != loadout => PlanMode::Apply,
      _ => PlanMode::Ingest,
    };
    let owned = self.owned_paths(&record)?;
    let base = rebased.as_ref().unwrap_or(target.as_ref());
    let (plan, _) = self.build(&record, initial.as_deref(), &current, Some(base), mode, &owned)?;
    Ok(plan)
  }

  /// Archive every file under `source` and add them as a new mod, placed
  /// under `prefix` in `location`.
  pub async fn install_mod(
    &self,
    loadout: LoadoutId,
    name: &str,
    source: &Path,
    location: LocationId,
    prefix: Option<RelativePath>,
  ) -> Result<(Arc<Loadout>, ModId), SyncError> {
    let _guard = self.ops.lock().await;
    let existing = self.db.loadout(loadout)?;

    let store = self.store.clone();
    let root = source.to_path_buf();
    let archived = tokio::task::spawn_blocking(move || archive_tree(store.as_ref(), &root))
      .await
      .map_err(|e| SyncError::TaskFailed(e.to_string()))??;

    let mut new_mod = Mod::new(name, ModKind::Normal);
    for (relative, hash, size) in archived {
      let path = match &prefix {
        Some(prefix) => prefix.join(relative.as_str())?,
        None => relative,
      };
      new_mod.set_file(ModFile::Static(StaticModFile {
        to: GamePath::new(location.clone(), path),
        hash,
        size,
      }));
    }
    let mod_id = new_mod.id;
    let file_count = new_mod.files.len();

    let mut tx = self.db.begin(format!("install mod {}", name));
    tx.put_loadout(existing.with_mod(new_mod));
    self.db.commit(tx)?;
    info!(loadout = %loadout, mod_id = %mod_id, files = file_count, "installed mod");
    Ok((self.db.loadout(loadout)?, mod_id))
  }

  /// Add a prepared mod, for example one holding generated files.
  pub async fn add_mod(&self, loadout: LoadoutId, new_mod: Mod) -> Result<Arc<Loadout>, SyncError> {
    let _guard = self.ops.lock().await;
    let existing = self.db.loadout(loadout)?;
    let name = new_mod.name.clone();
    self.commit_loadout(existing.with_mod(new_mod), format!("add mod {}", name))
  }

  pub async fn set_mod_enabled(&self, loadout: LoadoutId, mod_id: ModId, enabled: bool) -> Result<Arc<Loadout>, SyncError> {
    let _guard = self.ops.lock().await;
    let next = self.db.loadout(loadout)?.with_mod_enabled(mod_id, enabled)?;
    let verb = if enabled { "enable" } else { "disable" };
    self.commit_loadout(next, format!("{} mod {}", verb, mod_id))
  }

  pub async fn remove_mod(&self, loadout: LoadoutId, mod_id: ModId) -> Result<Arc<Loadout>, SyncError> {
    let _guard = self.ops.lock().await;
    let next = self.db.loadout(loadout)?.without_mod(mod_id)?;
    self.commit_loadout(next, format!("remove mod {}", mod_id))
  }

  /// Delete backup store blobs that no loadout revision or disk state
  /// refers to.
  pub async fn collect_garbage(&self, dry_run: bool) -> Result<GcResult, SyncError> {
    let _guard = self.ops.lock().await;
    if !dry_run && !self.db.is_writable() {
      return Err(SyncError::Db(DbError::ReadOnly));
    }
    let db = self.db.clone();
    let store = self.store.clone();
    tokio::task::spawn_blocking(move || collect_garbage(&db, store.as_ref(), dry_run))
      .await
      .map_err(|e| SyncError::TaskFailed(e.to_string()))?
      .map_err(SyncError::from)
  }

  fn commit_loadout(&self, loadout: Loadout, summary: String) -> Result<Arc<Loadout>, SyncError> {
    let id = loadout.id;
    let mut tx = self.db.begin(summary);
    tx.put_loadout(loadout);
    self.db.commit(tx)?;
    Ok(self.db.loadout(id)?)
  }

  async fn activate_locked(&self, loadout: LoadoutId) -> Result<SyncOutcome, SyncError> {
    let target = self.db.loadout(loadout)?;
    let installation = target.installation;
    let record = self.db.installation(installation)?;
    match record.metadata.last_synced {
      Some(active) if active.loadout != loadout => self.switch(installation, active.loadout, loadout).await,
      _ => self.apply(installation, Some(target), PlanMode::Apply).await,
    }
  }

  async fn deactivate_locked(&self, installation: InstallationId) -> Result<SyncOutcome, SyncError> {
    let record = self.db.installation(installation)?;
    let active = record
      .metadata
      .last_synced
      .ok_or(SyncError::NoActiveLoadout(installation))?;

    info!(installation = %installation, loadout = %active.loadout, "deactivating loadout");
    self
      .apply(installation, Some(self.db.loadout(active.loadout)?), PlanMode::Ingest)
      .await?;
    self.apply(installation, None, PlanMode::Apply).await
  }

  async fn switch(&self, installation: InstallationId, from: LoadoutId, to: LoadoutId) -> Result<SyncOutcome, SyncError> {
    info!(installation = %installation, from = %from, to = %to, "switching loadouts");
    self.deactivate_locked(installation).await?;
    self.apply(installation, Some(self.db.loadout(to)?), PlanMode::Apply).await
  }

  /// Converge the disk on `target` (a loadout, or the initial state when
  /// `None`) and record the outcome.
  async fn apply(
    &self,
    installation: InstallationId,
    target: Option<Arc<Loadout>>,
    mode: PlanMode,
  ) -> Result<SyncOutcome, SyncError> {
    let record = self.db.installation(installation)?;
    let current = self.refresh(&record).await?;
    let record = self.db.installation(installation)?;
    let initial = self.db.initial_state(installation);

    // A loadout last applied under another game version still names the old
    // vendor files.
    let rebased = match (target.as_deref(), initial.as_deref()) {
      (Some(loadout), Some(initial)) if loadout.game_version != record.metadata.game_version => {
        rebase_game_files(loadout, initial)
      }
      _ => None,
    };
    let base = rebased.as_ref().or(target.as_deref());

    let owned = self.owned_paths(&record)?;
    let (plan, overrides_mod) = self.build(&record, initial.as_deref(), &current, base, mode, &owned)?;

    let report = if plan.disk_steps().next().is_some() {
      execute_plan(
        &plan,
        &record.installation.locations,
        self.store.clone(),
        &self.options.execute,
        &self.cancel,
      )
      .await?
    } else {
      ExecutionReport::default()
    };

    let edited = match base {
      Some(loadout) if plan.has_loadout_steps() => Some(apply_loadout_steps(loadout, &plan.steps, overrides_mod)?),
      _ => None,
    };
    let edited = edited.or(rebased);

    let files = report.resulting_files(&current);
    let disk_changed = !current.same_files(&files);
    let pointer = target.as_ref().map(|l| SyncPointer {
      loadout: l.id,
      revision: l.revision,
    });
    let in_sync = record.metadata.last_synced == pointer && record.metadata.last_synced_state_tx == Some(current.tx());

    if plan.is_noop() && !disk_changed && in_sync && edited.is_none() {
      debug!(installation = %installation, "already in sync");
      return Ok(SyncOutcome {
        plan,
        report,
        tx: None,
        loadout: target,
      });
    }

    let summary = match target.as_deref() {
      Some(loadout) => format!("apply loadout {}", loadout.name),
      None => "revert to initial state".to_string(),
    };
    let mut tx = self.db.begin(summary);
    if disk_changed {
      tx.record_disk_state(installation, files);
    }
    if let Some(loadout) = target.as_deref() {
      if edited.is_some() || !plan.is_noop() || loadout.last_applied_at.is_none() {
        let mut next = edited.unwrap_or_else(|| loadout.clone());
        next.last_applied_at = Some(Utc::now());
        next.game_version = record.metadata.game_version.clone();
        tx.put_loadout(next);
      }
    }
    tx.set_last_synced(installation, target.as_ref().map(|l| l.id));
    let committed = self.db.commit(tx)?;

    let loadout = match target.as_deref() {
      Some(l) => Some(self.db.loadout(l.id)?),
      None => None,
    };
    let summary = plan.summary();
    info!(
      installation = %installation,
      tx = %committed,
      backups = summary.backups,
      deletes = summary.deletes,
      copies = summary.copies + summary.generated,
      ingested = summary.loadout_edits,
      "synchronized"
    );
    Ok(SyncOutcome {
      plan,
      report,
      tx: Some(committed),
      loadout,
    })
  }

  fn build(
    &self,
    record: &InstallationRecord,
    initial: Option<&DiskState>,
    current: &DiskState,
    target_loadout: Option<&Loadout>,
    mode: PlanMode,
    owned: &BTreeSet<GamePath>,
  ) -> Result<(ApplyPlan, ModId), SyncError> {
    let id = record.installation.id;
    let last_synced = record
      .metadata
      .last_synced_state_tx
      .and_then(|tx| self.db.disk_state_at(id, tx));

    let (files, generated, target) = match target_loadout {
      Some(loadout) => {
        let files = flatten(loadout, &self.options.scan.ignored);
        let generated = self.generators.regenerate_all(loadout, &files)?;
        let target = TargetState::from_flattened(&files, &generated)?;
        (files, generated, target)
      }
      None => {
        let initial = initial.ok_or(SyncError::NoInitialState(id))?;
        (FlattenedLoadout::default(), BTreeMap::new(), TargetState::from_disk_state(initial))
      }
    };

    let archived = self.archived_hashes(current, &target);
    let overrides_mod = target_loadout
      .and_then(|l| l.overrides_mod())
      .map_or_else(ModId::new, |m| m.id);
    let ingest = match (mode, target_loadout) {
      (PlanMode::Ingest, Some(loadout)) => Some(IngestContext {
        loadout,
        files: &files,
        resolver: self.resolver.as_ref(),
        overrides_mod,
      }),
      _ => None,
    };

    let plan = build_plan(PlanInput {
      mode,
      initial,
      last_synced: last_synced.as_deref(),
      current,
      target: &target,
      generated: &generated,
      files: &files,
      previously_owned: owned,
      archived: &archived,
      ingest,
    })?;

    for diagnostic in &plan.diagnostics {
      warn!(installation = %id, "{}", diagnostic);
    }
    debug!(installation = %id, steps = plan.steps.len(), mode = ?mode, "built plan");
    Ok((plan, overrides_mod))
  }

  /// Scan, and record a new disk state when anything changed.
  ///
  /// When the game version changed, the vendor files the update replaced
  /// are archived and become part of the initial state.
  async fn refresh(&self, record: &InstallationRecord) -> Result<Arc<DiskState>, SyncError> {
    let id = record.installation.id;
    let previous = self.db.latest_disk_state(id);
    let output = self.scan(&record.installation.locations, previous.clone()).await?;

    if let Some(previous) = previous.filter(|p| p.same_files(&output.files)) {
      return Ok(previous);
    }

    let vendor = self.inspect_vendor(record, &output.files)?;
    let rebase = vendor.replaces_initial(record);
    if rebase {
      let archived = self.backup_scanned(&record.installation.locations, &vendor.updated).await?;
      info!(installation = %id, files = vendor.updated.len(), archived, "vendor files updated");
    }

    let mut tx = self.db.begin("rescan");
    tx.record_disk_state(id, output.files);
    if vendor.version != record.metadata.game_version {
      info!(
        installation = %id,
        old = ?record.metadata.game_version,
        new = ?vendor.version,
        "game version changed"
      );
      if rebase {
        tx.replace_initial_state(id, vendor.initial);
      }
      tx.set_game_version(id, vendor.version);
    }
    self.db.commit(tx)?;
    self.db.latest_disk_state(id).ok_or(SyncError::Db(DbError::NoDiskState(id)))
  }

  async fn scan(&self, locations: &GameLocations, previous: Option<Arc<DiskState>>) -> Result<ScanOutput, SyncError> {
    let locations = locations.clone();
    let options = self.options.scan.clone();
    let output = tokio::task::spawn_blocking(move || scan_locations(&locations, previous.as_deref(), &options))
      .await
      .map_err(|e| SyncError::TaskFailed(e.to_string()))??;
    Ok(output)
  }

  /// Archive scanned files the store does not have yet. Returns how many
  /// distinct blobs were added.
  async fn backup_scanned(&self, locations: &GameLocations, files: &[ScannedFile]) -> Result<usize, SyncError> {
    let mut seen = HashSet::new();
    let steps: Vec<ApplyStep> = files
      .iter()
      .filter(|f| !self.store.have_file(&f.hash) && seen.insert(f.hash.clone()))
      .map(|f| ApplyStep::BackupFile {
        path: f.path.clone(),
        hash: f.hash.clone(),
        size: f.size,
      })
      .collect();
    if steps.is_empty() {
      return Ok(0);
    }

    let count = steps.len();
    let plan = ApplyPlan {
      steps,
      ..ApplyPlan::default()
    };
    execute_plan(&plan, locations, self.store.clone(), &self.options.execute, &self.cancel).await?;
    Ok(count)
  }

  /// Compare scanned files against the initial state to find what the game
  /// vendor changed, and the version that implies.
  fn inspect_vendor(&self, record: &InstallationRecord, files: &[ScannedFile]) -> Result<VendorScan, SyncError> {
    let id = record.installation.id;
    let Some(initial) = self.db.initial_state(id) else {
      let snapshot = DiskState::from_scan(TxId::default(), files, None);
      return Ok(VendorScan {
        version: self.version_detector.detect(None, &snapshot),
        updated: Vec::new(),
        initial: Vec::new(),
      });
    };

    let last_synced = record
      .metadata
      .last_synced_state_tx
      .and_then(|tx| self.db.disk_state_at(id, tx));
    let mod_owned = self.mod_owned_paths(record)?;
    let updated = vendor_updates(&initial, last_synced.as_deref(), &mod_owned, files);
    let view = vendor_view(&initial, &updated);
    let version = self
      .version_detector
      .detect(Some(&*initial), &DiskState::from_scan(TxId::default(), &view, None));
    Ok(VendorScan {
      version,
      updated,
      initial: view,
    })
  }

  /// Paths of the loadout revision last written to disk.
  fn owned_paths(&self, record: &InstallationRecord) -> Result<BTreeSet<GamePath>, SyncError> {
    let Some(pointer) = record.metadata.last_synced else {
      return Ok(BTreeSet::new());
    };
    let loadout = self.db.loadout_revision(pointer.loadout, pointer.revision)?;
    Ok(flatten(&loadout, &self.options.scan.ignored).paths().cloned().collect())
  }

  /// Paths a non-game-files mod of the last applied revision wrote.
  fn mod_owned_paths(&self, record: &InstallationRecord) -> Result<BTreeSet<GamePath>, SyncError> {
    let Some(pointer) = record.metadata.last_synced else {
      return Ok(BTreeSet::new());
    };
    let loadout = self.db.loadout_revision(pointer.loadout, pointer.revision)?;
    let files = flatten(&loadout, &self.options.scan.ignored);
    Ok(
      files
        .iter()
        .filter(|(_, f)| loadout.mod_by_id(f.mod_id).is_some_and(|m| m.kind != ModKind::GameFiles))
        .map(|(path, _)| path.clone())
        .collect(),
    )
  }

  fn archived_hashes(&self, current: &DiskState, target: &TargetState) -> HashSet<ContentHash> {
    current
      .iter()
      .map(|e| &e.hash)
      .chain(target.iter().map(|(_, t)| &t.hash))
      .filter(|hash| self.store.have_file(hash))
      .cloned()
      .collect()
  }
}

/// What a scan says about the game itself.
struct VendorScan {
  version: Option<String>,
  /// Vendor files replaced since the initial state.
  updated: Vec<ScannedFile>,
  /// The initial state with `updated` substituted.
  initial: Vec<ScannedFile>,
}

impl VendorScan {
  fn replaces_initial(&self, record: &InstallationRecord) -> bool {
    self.version != record.metadata.game_version && !self.updated.is_empty()
  }
}

/// Game-location files of the initial state whose content changed without
/// this manager or a mod writing it.
fn vendor_updates(
  initial: &DiskState,
  last_synced: Option<&DiskState>,
  mod_owned: &BTreeSet<GamePath>,
  files: &[ScannedFile],
) -> Vec<ScannedFile> {
  files
    .iter()
    .filter(|file| file.path.location.as_str() == LocationId::GAME)
    .filter(|file| initial.hash_of(&file.path).is_some_and(|hash| *hash != file.hash))
    .filter(|file| last_synced.and_then(|s| s.hash_of(&file.path)) != Some(&file.hash))
    .filter(|file| !mod_owned.contains(&file.path))
    .cloned()
    .collect()
}

/// The disk as the game vendor left it. Deleted vendor files keep their
/// initial content.
fn vendor_view(initial: &DiskState, updated: &[ScannedFile]) -> Vec<ScannedFile> {
  let updated: BTreeMap<&GamePath, &ScannedFile> = updated.iter().map(|f| (&f.path, f)).collect();
  initial
    .iter()
    .map(|entry| match updated.get(&entry.path) {
      Some(file) => (*file).clone(),
      None => entry.to_scanned(),
    })
    .collect()
}

/// Point the game files mod at the current initial state. Paths are never
/// added or dropped, only their content follows the vendor.
fn rebase_game_files(loadout: &Loadout, initial: &DiskState) -> Option<Loadout> {
  let game_files = loadout.game_files_mod()?;
  let stale = game_files.files.iter().any(|file| match file {
    ModFile::Static(file) => initial.hash_of(&file.to).is_some_and(|hash| *hash != file.hash),
    ModFile::Generated(_) => false,
  });
  if !stale {
    return None;
  }
  loadout
    .with_mod_edited(game_files.id, |m| {
      for file in &mut m.files {
        if let ModFile::Static(file) = file {
          if let Some(entry) = initial.get(&file.to) {
            file.hash = entry.hash.clone();
            file.size = entry.size;
          }
        }
      }
    })
    .ok()
}

/// Archive every regular file below `root`, returning paths relative to it.
fn archive_tree(store: &dyn BackupStore, root: &Path) -> Result<Vec<(RelativePath, ContentHash, u64)>, SyncError> {
  let mut archived = Vec::new();
  for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
    let entry = entry.map_err(|e| SyncError::Io {
      path: root.display().to_string(),
      source: e.into(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    let relative: PathBuf = entry.path().strip_prefix(root).map(Path::to_path_buf).unwrap_or_default();
    let relative = RelativePath::from_path(&relative)?;
    let (hash, size) = store.archive(entry.path())?;
    debug!(path = %relative, hash = hash.short(), "archived mod file");
    archived.push((relative, hash, size));
  }
  Ok(archived)
}

/// Short names run `A`..`Z`, `AA`, `AB`, ... like spreadsheet columns.
fn short_name(index: usize) -> String {
  let mut n = index + 1;
  let mut letters = Vec::new();
  while n > 0 {
    n -= 1;
    letters.push(char::from(b'A' + (n % 26) as u8));
    n /= 26;
  }
  letters.iter().rev().collect()
}

fn next_short_name<'a>(used: impl Iterator<Item = &'a str>) -> String {
  let used: HashSet<&str> = used.collect();
  (0..)
    .map(short_name)
    .find(|name| !used.contains(name.as_str()))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryBackupStore;
  use crate::util::hash::hash_bytes;
  use crate::util::testutil::{read_tree, write_file};
  use tempfile::TempDir;
  use tracing_test::traced_test;

  struct Harness {
    temp: TempDir,
    sync: Synchronizer,
  }

  impl Harness {
    fn new() -> Self {
      let temp = TempDir::new().unwrap();
      write_file(&temp.path().join("game"), "bin/originalGameFile.txt", "Hello World!");
      let sync = Synchronizer::new(Arc::new(Database::in_memory()), Arc::new(MemoryBackupStore::new()));
      Self { temp, sync }
    }

    fn game(&self) -> PathBuf {
      self.temp.path().join("game")
    }

    fn locations(&self) -> GameLocations {
      GameLocations::new().with(LocationId::game(), self.game())
    }
  }

  #[test]
  fn short_names_follow_column_order() {
    assert_eq!(short_name(0), "A");
    assert_eq!(short_name(25), "Z");
    assert_eq!(short_name(26), "AA");
    assert_eq!(next_short_name(["A", "C"].into_iter()), "B");
  }

  fn scanned(path: &str, content: &str) -> ScannedFile {
    ScannedFile {
      path: GamePath::game(path).unwrap(),
      hash: hash_bytes(content.as_bytes()),
      size: content.len() as u64,
      last_modified: chrono::DateTime::from_timestamp(100, 0).unwrap(),
    }
  }

  #[test]
  fn vendor_updates_skip_files_written_by_the_manager_or_a_mod() {
    let initial = DiskState::from_scan(
      TxId(1),
      &[scanned("a.dds", "a v1"), scanned("b.dds", "b v1"), scanned("c.dds", "c v1")],
      None,
    );
    let last_synced = DiskState::from_scan(
      TxId(2),
      &[scanned("a.dds", "a v1"), scanned("b.dds", "b patched"), scanned("c.dds", "c v1")],
      None,
    );
    let mod_owned: BTreeSet<GamePath> = [GamePath::game("c.dds").unwrap()].into();
    let files = [
      scanned("a.dds", "a v2"),
      scanned("b.dds", "b patched"),
      scanned("c.dds", "c v2"),
      scanned("new.dds", "new"),
    ];

    let updated = vendor_updates(&initial, Some(&last_synced), &mod_owned, &files);
    assert_eq!(updated, vec![scanned("a.dds", "a v2")]);

    let view = vendor_view(&initial, &updated);
    assert_eq!(view.len(), 3);
    assert!(view.contains(&scanned("a.dds", "a v2")));
    assert!(view.iter().any(|f| f.path == GamePath::game("c.dds").unwrap() && f.hash == hash_bytes(b"c v1")));
  }

  #[test]
  fn rebase_game_files_keeps_paths_and_follows_initial_content() {
    let game = Mod::new(GAME_FILES_MOD_NAME, ModKind::GameFiles)
      .with_file(ModFile::Static(StaticModFile {
        to: GamePath::game("a.dds").unwrap(),
        hash: hash_bytes(b"a v1"),
        size: 4,
      }))
      .with_file(ModFile::Static(StaticModFile {
        to: GamePath::game("gone.dds").unwrap(),
        hash: hash_bytes(b"gone"),
        size: 4,
      }));
    let loadout = Loadout::new(InstallationId::new(), "A", "A").with_mod(game);
    let initial = DiskState::from_scan(TxId(3), &[scanned("a.dds", "a v2")], None);

    let rebased = rebase_game_files(&loadout, &initial).unwrap();
    let files = &rebased.game_files_mod().unwrap().files;
    assert_eq!(files.len(), 2);
    assert!(files.iter().any(|f| matches!(f, ModFile::Static(f) if f.hash == hash_bytes(b"a v2") && f.size == 4)));
    assert!(rebase_game_files(&rebased, &initial).is_none());
  }

  #[tokio::test]
  async fn manage_archives_initial_files_and_rejects_duplicates() {
    let h = Harness::new();
    let id = h.sync.manage("Test Game", h.locations()).await.unwrap();

    assert_eq!(h.sync.state(id), InstallationState::Managed);
    assert!(h.sync.store().have_file(&hash_bytes(b"Hello World!")));
    let record = h.sync.db().installation(id).unwrap();
    assert!(record.metadata.initial_state_tx.is_some());
    assert!(record.metadata.game_version.is_some());

    let err = h.sync.manage("Test Game", h.locations()).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyManaged(existing) if existing == id));
  }

  #[tokio::test]
  async fn first_loadout_is_activated() {
    let h = Harness::new();
    let id = h.sync.manage("Test Game", h.locations()).await.unwrap();
    let a = h.sync.create_loadout(id, "Loadout A").await.unwrap();
    let b = h.sync.create_loadout(id, "Loadout B").await.unwrap();

    assert_eq!(a.short_name, "A");
    assert_eq!(b.short_name, "B");
    assert!(matches!(h.sync.state(id), InstallationState::Active(p) if p.loadout == a.id));
    assert_eq!(a.game_files_mod().unwrap().files.len(), 1);
  }

  #[tokio::test]
  #[traced_test]
  async fn synchronizing_twice_is_a_noop() {
    let h = Harness::new();
    let id = h.sync.manage("Test Game", h.locations()).await.unwrap();
    let a = h.sync.create_loadout(id, "Loadout A").await.unwrap();

    let first = h.sync.synchronize(a.id).await.unwrap();
    assert!(first.plan.is_noop());
    let last_tx = h.sync.db().last_tx();

    let second = h.sync.synchronize(a.id).await.unwrap();
    assert!(second.plan.is_noop());
    assert_eq!(second.tx, None);
    assert_eq!(h.sync.db().last_tx(), last_tx);
    assert!(logs_contain("already in sync"));
  }

  #[tokio::test]
  async fn install_mod_and_disable_it() {
    let h = Harness::new();
    write_file(&h.temp.path().join("download"), "textureA.txt", "texture");
    let id = h.sync.manage("Test Game", h.locations()).await.unwrap();
    let a = h.sync.create_loadout(id, "Loadout A").await.unwrap();

    let prefix = RelativePath::new("bin/mods/modA").unwrap();
    let (_, mod_id) = h
      .sync
      .install_mod(a.id, "ModA", &h.temp.path().join("download"), LocationId::game(), Some(prefix))
      .await
      .unwrap();
    h.sync.synchronize(a.id).await.unwrap();
    assert_eq!(read_tree(&h.game()).get("bin/mods/modA/textureA.txt").map(String::as_str), Some("texture"));

    h.sync.set_mod_enabled(a.id, mod_id, false).await.unwrap();
    h.sync.synchronize(a.id).await.unwrap();
    assert!(!h.game().join("bin/mods").exists());
    assert!(h.game().join("bin/originalGameFile.txt").exists());
  }

  #[tokio::test]
  async fn plan_is_a_dry_run() {
    let h = Harness::new();
    let id = h.sync.manage("Test Game", h.locations()).await.unwrap();
    let a = h.sync.create_loadout(id, "Loadout A").await.unwrap();
    write_file(&h.game(), "bin/user.txt", "mine");
    let last_tx = h.sync.db().last_tx();

    let plan = h.sync.plan(a.id).await.unwrap();
    assert_eq!(plan.summary().loadout_edits, 1);
    assert_eq!(h.sync.db().last_tx(), last_tx);
  }

  #[tokio::test]
  async fn deactivate_without_active_loadout_fails() {
    let h = Harness::new();
    let id = h.sync.manage("Test Game", h.locations()).await.unwrap();
    let err = h.sync.deactivate_current_loadout(id).await.unwrap_err();
    assert!(matches!(err, SyncError::NoActiveLoadout(_)));
  }
}
