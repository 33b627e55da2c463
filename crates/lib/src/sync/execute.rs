//! Plan execution.
//!
//! Disk steps run in four phases: backups, deletes, static copies, then
//! generated writes. Each phase finishes before the next starts, so nothing
//! is removed or overwritten before its content is archived. Within a phase
//! steps touch distinct paths and run concurrently, bounded by a semaphore.
//!
//! The first failing step cancels the remaining steps of its phase and no
//! later phase starts. Transient I/O errors are retried with a linear backoff;
//! integrity failures never are.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::disk_state::{DiskState, ScannedFile};
use crate::paths::{GameLocations, GamePath, PathError};
use crate::store::{BackupStore, StoreError, write_verified};
use crate::util::hash::{ContentHash, hash_reader};

use super::plan::{ApplyPlan, ApplyStep, CopySource};
use super::prune::prune_empty_dirs;

/// Extensions that get the executable bit on Unix.
const EXECUTABLE_EXTENSIONS: &[&str] = &["sh", "bin", "run", "py", "pl", "php", "rb", "out", "elf"];

/// Errors that abort plan execution.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// Archived or extracted content did not hash to what the plan expected.
  #[error("content at {path} hashed to {actual}, expected {expected}")]
  ArchiveIntegrity {
    path: String,
    expected: ContentHash,
    actual: ContentHash,
  },

  /// The backup store could not serve a request.
  #[error("backup store error: {0}")]
  Store(#[source] StoreError),

  /// Filesystem operation failed after all retries.
  #[error("I/O error at {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Path(#[from] PathError),

  /// The caller cancelled execution.
  #[error("execution cancelled")]
  Cancelled,

  /// A worker task panicked or could not be scheduled.
  #[error("worker task failed: {0}")]
  TaskFailed(String),
}

impl ExecuteError {
  fn io(path: &Path, source: io::Error) -> Self {
    ExecuteError::Io {
      path: path.display().to_string(),
      source,
    }
  }

  fn is_retryable(&self) -> bool {
    matches!(self, ExecuteError::Io { .. })
  }
}

impl From<StoreError> for ExecuteError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::ArchiveIntegrity { path, expected, actual } => ExecuteError::ArchiveIntegrity { path, expected, actual },
      StoreError::Io { path, source } => ExecuteError::Io { path, source },
      other => ExecuteError::Store(other),
    }
  }
}

/// Configuration for plan execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of steps running at once.
  pub parallelism: usize,
  /// Extra attempts for a step failing with a transient I/O error.
  pub io_retries: u32,
  /// Delay before the first retry; later retries wait proportionally longer.
  pub retry_delay: Duration,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4),
      io_retries: 3,
      retry_delay: Duration::from_millis(50),
    }
  }
}

/// A file written by execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFile {
  pub path: GamePath,
  pub hash: ContentHash,
  pub size: u64,
  pub last_modified: DateTime<Utc>,
}

/// What execution did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
  pub backed_up: Vec<ContentHash>,
  pub deleted: Vec<GamePath>,
  pub written: Vec<WrittenFile>,
  pub pruned_dirs: Vec<PathBuf>,
}

impl ExecutionReport {
  /// The files on disk after execution, given the state the plan was built
  /// from. Sorted by path.
  pub fn resulting_files(&self, before: &DiskState) -> Vec<ScannedFile> {
    let replaced: HashSet<&GamePath> = self.deleted.iter().chain(self.written.iter().map(|w| &w.path)).collect();

    let mut files: Vec<ScannedFile> = before
      .iter()
      .filter(|e| !replaced.contains(&e.path))
      .map(|e| ScannedFile {
        path: e.path.clone(),
        hash: e.hash.clone(),
        size: e.size,
        last_modified: e.last_modified,
      })
      .chain(self.written.iter().map(|w| ScannedFile {
        path: w.path.clone(),
        hash: w.hash.clone(),
        size: w.size,
        last_modified: w.last_modified,
      }))
      .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
  }
}

/// One disk step, resolved to an absolute path.
#[derive(Debug, Clone)]
struct FileJob {
  path: GamePath,
  absolute: PathBuf,
  hash: ContentHash,
  /// Content for generated writes.
  bytes: Option<Arc<[u8]>>,
}

#[derive(Default)]
struct Phases {
  backups: Vec<FileJob>,
  deletes: Vec<FileJob>,
  copies: Vec<FileJob>,
  generated: Vec<FileJob>,
}

impl Phases {
  fn from_plan(plan: &ApplyPlan, locations: &GameLocations) -> Result<Self, ExecuteError> {
    let mut phases = Phases::default();
    for step in plan.disk_steps() {
      let absolute = locations.resolve(step.path())?;
      match step {
        ApplyStep::BackupFile { path, hash, .. } => phases.backups.push(FileJob {
          path: path.clone(),
          absolute,
          hash: hash.clone(),
          bytes: None,
        }),
        ApplyStep::DeleteFile { path, hash, .. } => phases.deletes.push(FileJob {
          path: path.clone(),
          absolute,
          hash: hash.clone(),
          bytes: None,
        }),
        ApplyStep::CopyFile { to, source } => {
          let job = FileJob {
            path: to.clone(),
            absolute,
            hash: source.hash().clone(),
            bytes: None,
          };
          match source {
            CopySource::Static { .. } => phases.copies.push(job),
            CopySource::Generated { content, .. } => phases.generated.push(FileJob {
              bytes: Some(content.bytes.clone()),
              ..job
            }),
          }
        }
        _ => {}
      }
    }
    Ok(phases)
  }
}

struct PhaseContext {
  semaphore: Arc<Semaphore>,
  store: Arc<dyn BackupStore>,
  cancel: CancellationToken,
  retries: u32,
  retry_delay: Duration,
}

/// Execute the disk steps of `plan`.
///
/// Loadout steps are ignored; the caller commits them. Cancelling `cancel`
/// stops execution between steps with [`ExecuteError::Cancelled`].
pub async fn execute_plan(
  plan: &ApplyPlan,
  locations: &GameLocations,
  store: Arc<dyn BackupStore>,
  config: &ExecuteConfig,
  cancel: &CancellationToken,
) -> Result<ExecutionReport, ExecuteError> {
  let phases = Phases::from_plan(plan, locations)?;
  info!(
    backups = phases.backups.len(),
    deletes = phases.deletes.len(),
    copies = phases.copies.len(),
    generated = phases.generated.len(),
    "executing plan"
  );

  let ctx = PhaseContext {
    semaphore: Arc::new(Semaphore::new(config.parallelism.max(1))),
    store,
    cancel: cancel.clone(),
    retries: config.io_retries,
    retry_delay: config.retry_delay,
  };

  let mut report = ExecutionReport {
    backed_up: run_phase("backup", phases.backups, &ctx, backup_file).await?,
    ..ExecutionReport::default()
  };

  let deleted = run_phase("delete", phases.deletes, &ctx, delete_file).await?;
  for (location, root) in locations.iter() {
    let files: Vec<PathBuf> = deleted
      .iter()
      .filter(|(path, _)| &path.location == location)
      .map(|(_, absolute)| absolute.clone())
      .collect();
    if files.is_empty() {
      continue;
    }
    let pruned = prune_empty_dirs(root, &files).map_err(|e| ExecuteError::io(root, e))?;
    report.pruned_dirs.extend(pruned);
  }
  report.deleted = deleted.into_iter().map(|(path, _)| path).collect();

  report.written = run_phase("copy", phases.copies, &ctx, copy_from_store).await?;
  report
    .written
    .extend(run_phase("generate", phases.generated, &ctx, write_generated).await?);

  report.deleted.sort();
  report.written.sort_by(|a, b| a.path.cmp(&b.path));
  info!(
    backed_up = report.backed_up.len(),
    deleted = report.deleted.len(),
    written = report.written.len(),
    pruned = report.pruned_dirs.len(),
    "plan executed"
  );
  Ok(report)
}

/// Run one phase to completion, concurrently.
async fn run_phase<R, F>(phase: &'static str, jobs: Vec<FileJob>, ctx: &PhaseContext, work: F) -> Result<Vec<R>, ExecuteError>
where
  R: Send + 'static,
  F: Fn(&dyn BackupStore, &FileJob) -> Result<R, ExecuteError> + Copy + Send + Sync + 'static,
{
  if ctx.cancel.is_cancelled() {
    return Err(ExecuteError::Cancelled);
  }
  if jobs.is_empty() {
    return Ok(Vec::new());
  }
  debug!(phase, steps = jobs.len(), "starting phase");

  let abort = ctx.cancel.child_token();
  let mut join_set = JoinSet::new();
  for job in jobs {
    let semaphore = ctx.semaphore.clone();
    let store = ctx.store.clone();
    let abort = abort.clone();
    let (retries, delay) = (ctx.retries, ctx.retry_delay);

    join_set.spawn(async move {
      let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| ExecuteError::TaskFailed(e.to_string()))?;
      if abort.is_cancelled() {
        return Err(ExecuteError::Cancelled);
      }
      tokio::task::spawn_blocking(move || with_retries(&job, retries, delay, || work(store.as_ref(), &job)))
        .await
        .map_err(|e| ExecuteError::TaskFailed(e.to_string()))?
    });
  }

  let mut results = Vec::new();
  let mut failure: Option<ExecuteError> = None;
  while let Some(join_result) = join_set.join_next().await {
    let outcome = join_result.unwrap_or_else(|e| Err(ExecuteError::TaskFailed(e.to_string())));
    match outcome {
      Ok(result) => results.push(result),
      Err(e) => {
        // Keep the root cause rather than the cancellations it triggered.
        let replace = match &failure {
          None => true,
          Some(ExecuteError::Cancelled) => !matches!(e, ExecuteError::Cancelled),
          Some(_) => false,
        };
        if replace {
          if !matches!(e, ExecuteError::Cancelled) {
            error!(phase, error = %e, "step failed, aborting remaining steps");
          }
          abort.cancel();
          failure = Some(e);
        }
      }
    }
  }

  match failure {
    Some(e) => Err(e),
    None => Ok(results),
  }
}

fn with_retries<R>(
  job: &FileJob,
  retries: u32,
  delay: Duration,
  mut op: impl FnMut() -> Result<R, ExecuteError>,
) -> Result<R, ExecuteError> {
  let mut attempt = 0u32;
  loop {
    match op() {
      Err(e) if e.is_retryable() && attempt < retries => {
        attempt += 1;
        warn!(path = %job.path, attempt, error = %e, "transient I/O failure, retrying");
        std::thread::sleep(delay * attempt);
      }
      outcome => return outcome,
    }
  }
}

fn backup_file(store: &dyn BackupStore, job: &FileJob) -> Result<ContentHash, ExecuteError> {
  if store.have_file(&job.hash) {
    return Ok(job.hash.clone());
  }
  let (actual, size) = store.archive(&job.absolute)?;
  if actual != job.hash {
    return Err(ExecuteError::ArchiveIntegrity {
      path: job.path.to_string(),
      expected: job.hash.clone(),
      actual,
    });
  }
  debug!(path = %job.path, hash = job.hash.short(), size, "backed up");
  Ok(actual)
}

fn delete_file(store: &dyn BackupStore, job: &FileJob) -> Result<(GamePath, PathBuf), ExecuteError> {
  if preserve_existing(store, job)?.is_some() {
    match fs::remove_file(&job.absolute) {
      Ok(()) => debug!(path = %job.path, "deleted"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(ExecuteError::io(&job.absolute, e)),
    }
  }
  Ok((job.path.clone(), job.absolute.clone()))
}

fn copy_from_store(store: &dyn BackupStore, job: &FileJob) -> Result<WrittenFile, ExecuteError> {
  if preserve_existing(store, job)?.as_ref() != Some(&job.hash) {
    store.extract(&job.hash, &job.absolute)?;
    set_permissions(job)?;
    debug!(path = %job.path, hash = job.hash.short(), "extracted");
  }
  written_file(job)
}

fn write_generated(store: &dyn BackupStore, job: &FileJob) -> Result<WrittenFile, ExecuteError> {
  let bytes = job.bytes.as_deref().unwrap_or_default();
  if preserve_existing(store, job)?.as_ref() != Some(&job.hash) {
    write_verified(bytes, &job.absolute, Some(&job.hash))?;
    set_permissions(job)?;
    debug!(path = %job.path, hash = job.hash.short(), "generated");
  }
  written_file(job)
}

/// Archive whatever is at the job's path if the store does not have it yet.
/// Returns the hash of the existing file, or `None` when there is none.
fn preserve_existing(store: &dyn BackupStore, job: &FileJob) -> Result<Option<ContentHash>, ExecuteError> {
  let file = match fs::File::open(&job.absolute) {
    Ok(file) => file,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(ExecuteError::io(&job.absolute, e)),
  };
  let (hash, _) = hash_reader(io::BufReader::new(file)).map_err(|e| ExecuteError::io(&job.absolute, e))?;

  if !store.have_file(&hash) {
    warn!(path = %job.path, hash = hash.short(), "archiving unplanned content before replacing it");
    let (archived, _) = store.archive(&job.absolute)?;
    if archived != hash {
      return Err(ExecuteError::ArchiveIntegrity {
        path: job.path.to_string(),
        expected: hash,
        actual: archived,
      });
    }
  }
  Ok(Some(hash))
}

fn written_file(job: &FileJob) -> Result<WrittenFile, ExecuteError> {
  let metadata = fs::metadata(&job.absolute).map_err(|e| ExecuteError::io(&job.absolute, e))?;
  let modified = metadata.modified().map_err(|e| ExecuteError::io(&job.absolute, e))?;
  Ok(WrittenFile {
    path: job.path.clone(),
    hash: job.hash.clone(),
    size: metadata.len(),
    last_modified: modified.into(),
  })
}

fn is_executable_name(path: &GamePath) -> bool {
  match path.extension() {
    None => true,
    Some(ext) => EXECUTABLE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)),
  }
}

#[cfg(unix)]
fn set_permissions(job: &FileJob) -> Result<(), ExecuteError> {
  use std::os::unix::fs::PermissionsExt;

  let mode = if is_executable_name(&job.path) { 0o755 } else { 0o644 };
  fs::set_permissions(&job.absolute, fs::Permissions::from_mode(mode)).map_err(|e| ExecuteError::io(&job.absolute, e))
}

#[cfg(not(unix))]
fn set_permissions(_job: &FileJob) -> Result<(), ExecuteError> {
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::generated::GeneratedContent;
  use crate::loadout::GeneratorId;
  use crate::paths::LocationId;
  use crate::store::MemoryBackupStore;
  use crate::util::hash::hash_bytes;
  use crate::util::testutil::{read_tree, write_file};
  use std::sync::atomic::{AtomicU32, Ordering};
  use tempfile::TempDir;

  fn gp(path: &str) -> GamePath {
    GamePath::game(path).unwrap()
  }

  fn setup() -> (TempDir, GameLocations, Arc<MemoryBackupStore>) {
    let temp = TempDir::new().unwrap();
    let game = temp.path().join("game");
    fs::create_dir_all(&game).unwrap();
    let locations = GameLocations::new().with(LocationId::game(), game);
    (temp, locations, Arc::new(MemoryBackupStore::new()))
  }

  fn plan(steps: Vec<ApplyStep>) -> ApplyPlan {
    ApplyPlan {
      steps,
      ..ApplyPlan::default()
    }
  }

  #[tokio::test]
  async fn backs_up_then_replaces_and_deletes() {
    let (temp, locations, store) = setup();
    let game = temp.path().join("game");
    write_file(&game, "bin/a.txt", "old");
    write_file(&game, "bin/mods/gone.txt", "gone");
    store.archive_bytes(b"new").unwrap();

    let steps = vec![
      ApplyStep::BackupFile {
        path: gp("bin/a.txt"),
        hash: hash_bytes(b"old"),
        size: 3,
      },
      ApplyStep::BackupFile {
        path: gp("bin/mods/gone.txt"),
        hash: hash_bytes(b"gone"),
        size: 4,
      },
      ApplyStep::DeleteFile {
        path: gp("bin/mods/gone.txt"),
        hash: hash_bytes(b"gone"),
        size: 4,
      },
      ApplyStep::CopyFile {
        to: gp("bin/a.txt"),
        source: CopySource::Static {
          hash: hash_bytes(b"new"),
          size: 3,
        },
      },
    ];

    let store_dyn: Arc<dyn BackupStore> = store.clone();
    let report = execute_plan(
      &plan(steps),
      &locations,
      store_dyn,
      &ExecuteConfig::default(),
      &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(read_tree(&game).into_iter().collect::<Vec<_>>(), vec![(
      "bin/a.txt".to_string(),
      "new".to_string()
    )]);
    assert!(store.have_file(&hash_bytes(b"old")));
    assert!(store.have_file(&hash_bytes(b"gone")));
    assert_eq!(report.deleted, vec![gp("bin/mods/gone.txt")]);
    assert_eq!(report.pruned_dirs, vec![game.join("bin/mods")]);
    assert_eq!(report.written[0].hash, hash_bytes(b"new"));
  }

  #[tokio::test]
  async fn stale_backup_fails_with_integrity_error() {
    let (temp, locations, store) = setup();
    write_file(&temp.path().join("game"), "a.txt", "changed since scan");

    let steps = vec![ApplyStep::BackupFile {
      path: gp("a.txt"),
      hash: hash_bytes(b"scanned"),
      size: 7,
    }];
    let err = execute_plan(
      &plan(steps),
      &locations,
      store,
      &ExecuteConfig::default(),
      &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExecuteError::ArchiveIntegrity { .. }));
  }

  #[tokio::test]
  async fn overwrite_archives_unplanned_content() {
    let (temp, locations, store) = setup();
    let game = temp.path().join("game");
    write_file(&game, "Data/plugins.txt", "hand edited");

    let content = GeneratedContent::new(b"*a.esp\n".to_vec());
    let steps = vec![ApplyStep::CopyFile {
      to: gp("Data/plugins.txt"),
      source: CopySource::Generated {
        generator: GeneratorId::new("plugins-txt"),
        content,
      },
    }];
    let store_dyn: Arc<dyn BackupStore> = store.clone();
    execute_plan(
      &plan(steps),
      &locations,
      store_dyn,
      &ExecuteConfig::default(),
      &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(fs::read_to_string(game.join("Data/plugins.txt")).unwrap(), "*a.esp\n");
    assert!(store.have_file(&hash_bytes(b"hand edited")));
  }

  #[tokio::test]
  async fn missing_blob_aborts_copy_phase() {
    let (_temp, locations, store) = setup();
    let steps = vec![ApplyStep::CopyFile {
      to: gp("a.txt"),
      source: CopySource::Static {
        hash: hash_bytes(b"never archived"),
        size: 1,
      },
    }];
    let err = execute_plan(
      &plan(steps),
      &locations,
      store,
      &ExecuteConfig::default(),
      &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExecuteError::Store(StoreError::MissingBlob(_))));
  }

  #[tokio::test]
  async fn cancelled_token_stops_before_any_step() {
    let (temp, locations, store) = setup();
    write_file(&temp.path().join("game"), "a.txt", "keep");
    let steps = vec![ApplyStep::DeleteFile {
      path: gp("a.txt"),
      hash: hash_bytes(b"keep"),
      size: 4,
    }];
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = execute_plan(&plan(steps), &locations, store, &ExecuteConfig::default(), &cancel)
      .await
      .unwrap_err();
    assert!(matches!(err, ExecuteError::Cancelled));
    assert!(temp.path().join("game/a.txt").exists());
  }

  /// A memory store whose `extract` misbehaves on request.
  #[derive(Default)]
  struct FaultyStore {
    inner: MemoryBackupStore,
    /// Extracts that fail with a transient I/O error before one succeeds.
    transient_failures: AtomicU32,
    /// Every extract fails its integrity check.
    corrupt: bool,
    /// Cancelled as soon as the first extract starts.
    cancel_on_extract: Option<CancellationToken>,
    extract_calls: AtomicU32,
  }

  impl BackupStore for FaultyStore {
    fn have_file(&self, hash: &ContentHash) -> bool {
      self.inner.have_file(hash)
    }

    fn archive(&self, path: &Path) -> Result<(ContentHash, u64), StoreError> {
      self.inner.archive(path)
    }

    fn archive_bytes(&self, bytes: &[u8]) -> Result<(ContentHash, u64), StoreError> {
      self.inner.archive_bytes(bytes)
    }

    fn extract(&self, hash: &ContentHash, destination: &Path) -> Result<u64, StoreError> {
      self.extract_calls.fetch_add(1, Ordering::SeqCst);
      if let Some(cancel) = &self.cancel_on_extract {
        cancel.cancel();
      }
      if self.corrupt {
        return Err(StoreError::ArchiveIntegrity {
          path: destination.display().to_string(),
          expected: hash.clone(),
          actual: hash_bytes(b"bit rot"),
        });
      }
      let failing = self
        .transient_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if failing {
        return Err(StoreError::io(
          destination,
          io::Error::new(io::ErrorKind::Interrupted, "flaky disk"),
        ));
      }
      self.inner.extract(hash, destination)
    }

    fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, StoreError> {
      self.inner.read(hash)
    }

    fn blobs(&self) -> Result<Vec<(ContentHash, u64)>, StoreError> {
      self.inner.blobs()
    }

    fn remove(&self, hash: &ContentHash) -> Result<(), StoreError> {
      self.inner.remove(hash)
    }
  }

  fn copy_step(path: &str, content: &str) -> ApplyStep {
    ApplyStep::CopyFile {
      to: gp(path),
      source: CopySource::Static {
        hash: hash_bytes(content.as_bytes()),
        size: content.len() as u64,
      },
    }
  }

  fn fast_retries(io_retries: u32) -> ExecuteConfig {
    ExecuteConfig {
      parallelism: 1,
      io_retries,
      retry_delay: Duration::from_millis(1),
    }
  }

  #[tokio::test]
  async fn transient_io_failures_are_retried() {
    let (temp, locations, _) = setup();
    let store = Arc::new(FaultyStore {
      transient_failures: AtomicU32::new(2),
      ..FaultyStore::default()
    });
    store.archive_bytes(b"texture").unwrap();

    let store_dyn: Arc<dyn BackupStore> = store.clone();
    let report = execute_plan(
      &plan(vec![copy_step("a.txt", "texture")]),
      &locations,
      store_dyn,
      &fast_retries(3),
      &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(store.extract_calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.written.len(), 1);
    assert_eq!(fs::read_to_string(temp.path().join("game/a.txt")).unwrap(), "texture");
  }

  #[tokio::test]
  async fn io_failure_surfaces_once_retries_run_out() {
    let (temp, locations, _) = setup();
    let store = Arc::new(FaultyStore {
      transient_failures: AtomicU32::new(5),
      ..FaultyStore::default()
    });
    store.archive_bytes(b"texture").unwrap();

    let store_dyn: Arc<dyn BackupStore> = store.clone();
    let err = execute_plan(
      &plan(vec![copy_step("a.txt", "texture")]),
      &locations,
      store_dyn,
      &fast_retries(1),
      &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExecuteError::Io { .. }));
    assert_eq!(store.extract_calls.load(Ordering::SeqCst), 2);
    assert!(!temp.path().join("game/a.txt").exists());
  }

  #[tokio::test]
  async fn integrity_failures_are_not_retried() {
    let (temp, locations, _) = setup();
    let store = Arc::new(FaultyStore {
      corrupt: true,
      ..FaultyStore::default()
    });
    store.archive_bytes(b"texture").unwrap();

    let store_dyn: Arc<dyn BackupStore> = store.clone();
    let err = execute_plan(
      &plan(vec![copy_step("a.txt", "texture")]),
      &locations,
      store_dyn,
      &fast_retries(3),
      &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExecuteError::ArchiveIntegrity { .. }));
    assert_eq!(store.extract_calls.load(Ordering::SeqCst), 1);
    assert!(!temp.path().join("game/a.txt").exists());
  }

  #[tokio::test]
  async fn cancelling_mid_phase_leaves_later_files_untouched() {
    let (temp, locations, _) = setup();
    let game = temp.path().join("game");
    let cancel = CancellationToken::new();
    let store = Arc::new(FaultyStore {
      cancel_on_extract: Some(cancel.clone()),
      ..FaultyStore::default()
    });
    for content in ["a", "b", "c"] {
      store.archive_bytes(content.as_bytes()).unwrap();
    }

    let steps = vec![
      copy_step("mods/a.txt", "a"),
      copy_step("mods/b.txt", "b"),
      copy_step("mods/c.txt", "c"),
      ApplyStep::CopyFile {
        to: gp("Data/plugins.txt"),
        source: CopySource::Generated {
          generator: GeneratorId::new("plugins-txt"),
          content: GeneratedContent::new(b"*a.esp\n".to_vec()),
        },
      },
    ];
    let store_dyn: Arc<dyn BackupStore> = store.clone();
    let err = execute_plan(&plan(steps), &locations, store_dyn, &fast_retries(3), &cancel)
      .await
      .unwrap_err();

    assert!(matches!(err, ExecuteError::Cancelled));
    assert_eq!(store.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(read_tree(&game).len(), 1);
    assert!(!game.join("Data/plugins.txt").exists());
  }

  #[test]
  fn resulting_files_replace_written_and_drop_deleted() {
    use crate::types::TxId;
    let t = DateTime::from_timestamp(1, 0).unwrap();
    let scanned = |path: &str, content: &str| ScannedFile {
      path: gp(path),
      hash: hash_bytes(content.as_bytes()),
      size: content.len() as u64,
      last_modified: t,
    };
    let before = DiskState::from_scan(TxId(1), &[scanned("a.txt", "old"), scanned("b.txt", "b")], None);
    let report = ExecutionReport {
      deleted: vec![gp("b.txt")],
      written: vec![WrittenFile {
        path: gp("a.txt"),
        hash: hash_bytes(b"new"),
        size: 3,
        last_modified: t,
      }],
      ..ExecutionReport::default()
    };
    assert_eq!(report.resulting_files(&before), vec![scanned("a.txt", "new")]);
  }

  #[cfg(unix)]
  #[test]
  fn executable_names() {
    assert!(is_executable_name(&gp("bin/run.sh")));
    assert!(is_executable_name(&gp("bin/game")));
    assert!(!is_executable_name(&gp("bin/readme.txt")));
  }
}
