//! Apply plans.
//!
//! The plan builder is pure: it turns a [`PathDiff`] list into an ordered list
//! of [`ApplyStep`]s without touching the disk or the store. Steps are
//! ordered so that nothing is deleted or overwritten before its content is
//! archived:
//!
//! 1. `BackupFile` for every hash that is about to disappear and is not yet
//!    in the backup store
//! 2. `DeleteFile`
//! 3. `CopyFile` from the backup store
//! 4. `CopyFile` of generated content
//! 5. loadout edits (`IntegrateFile`, `AddToLoadout`, `RemoveFromLoadout`)

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::Serialize;

use crate::disk_state::DiskState;
use crate::generated::GeneratedContent;
use crate::loadout::{FlattenedLoadout, GeneratorId, ModFile};
use crate::paths::GamePath;
use crate::types::ModId;
use crate::util::hash::ContentHash;

use super::differ::{Classification, DiffInput, PathDiff, TargetState, diff_states};
use super::ingest::{IngestContext, make_ingestion_plan};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
  #[error("no generated content for {0}")]
  MissingGeneratedContent(GamePath),

  #[error("ingest mode requires an ingest context")]
  MissingIngestContext,
}

/// Where the bytes of a `CopyFile` come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
  /// A blob in the backup store.
  Static { hash: ContentHash, size: u64 },
  /// Freshly generated content.
  Generated {
    generator: GeneratorId,
    content: GeneratedContent,
  },
}

impl CopySource {
  pub fn hash(&self) -> &ContentHash {
    match self {
      CopySource::Static { hash, .. } => hash,
      CopySource::Generated { content, .. } => &content.hash,
    }
  }

  pub fn size(&self) -> u64 {
    match self {
      CopySource::Static { size, .. } => *size,
      CopySource::Generated { content, .. } => content.size,
    }
  }
}

/// One primitive action of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyStep {
  /// Archive the content currently at `path` under `hash`.
  BackupFile { path: GamePath, hash: ContentHash, size: u64 },
  /// Write `source` to `to`, replacing whatever is there.
  CopyFile { to: GamePath, source: CopySource },
  /// Remove the file at `path`; `hash` is what the plan expects to delete.
  DeleteFile { path: GamePath, hash: ContentHash, size: u64 },
  /// Replace the content of an existing loadout file with the disk content.
  IntegrateFile {
    mod_id: ModId,
    path: GamePath,
    hash: ContentHash,
    size: u64,
  },
  /// Add a new static file to a mod.
  AddToLoadout {
    mod_id: ModId,
    path: GamePath,
    hash: ContentHash,
    size: u64,
  },
  /// Drop every enabled static file mapped to `path`.
  RemoveFromLoadout { path: GamePath },
}

impl ApplyStep {
  pub fn path(&self) -> &GamePath {
    match self {
      ApplyStep::BackupFile { path, .. }
      | ApplyStep::DeleteFile { path, .. }
      | ApplyStep::IntegrateFile { path, .. }
      | ApplyStep::AddToLoadout { path, .. }
      | ApplyStep::RemoveFromLoadout { path } => path,
      ApplyStep::CopyFile { to, .. } => to,
    }
  }

  /// Whether the step touches the disk (as opposed to the loadout).
  pub fn is_disk_step(&self) -> bool {
    matches!(
      self,
      ApplyStep::BackupFile { .. } | ApplyStep::CopyFile { .. } | ApplyStep::DeleteFile { .. }
    )
  }

  /// Short lowercase name, used in logs and reports.
  pub fn kind(&self) -> &'static str {
    match self {
      ApplyStep::BackupFile { .. } => "backup",
      ApplyStep::CopyFile {
        source: CopySource::Generated { .. },
        ..
      } => "generate",
      ApplyStep::CopyFile { .. } => "copy",
      ApplyStep::DeleteFile { .. } => "delete",
      ApplyStep::IntegrateFile { .. } => "integrate",
      ApplyStep::AddToLoadout { .. } => "add",
      ApplyStep::RemoveFromLoadout { .. } => "remove",
    }
  }
}

/// Advisory findings of the planner. They never abort a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
  /// Disk content was never synced and differs from the target; the loadout
  /// wins after the disk content is archived.
  Conflict {
    path: GamePath,
    disk: ContentHash,
    target: ContentHash,
  },
  /// The target content is not in the backup store, so the path is left
  /// alone.
  UnableToExtract { path: GamePath, hash: ContentHash },
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Diagnostic::Conflict { path, disk, target } => write!(
        f,
        "conflict at {}: disk has {}, loadout wants {}; the loadout wins",
        path,
        disk.short(),
        target.short()
      ),
      Diagnostic::UnableToExtract { path, hash } => {
        write!(f, "cannot restore {}: content {} is not archived", path, hash.short())
      }
    }
  }
}

/// Whether external changes flow back into the loadout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
  /// Make the disk match the target; never edit the loadout.
  #[default]
  Apply,
  /// Fold external edits into the loadout before applying.
  Ingest,
}

/// Everything the plan builder reads.
pub struct PlanInput<'a> {
  pub mode: PlanMode,
  pub initial: Option<&'a DiskState>,
  pub last_synced: Option<&'a DiskState>,
  pub current: &'a DiskState,
  pub target: &'a TargetState,
  pub generated: &'a BTreeMap<GamePath, GeneratedContent>,
  pub files: &'a FlattenedLoadout,
  /// Paths the previously synced target contained.
  pub previously_owned: &'a BTreeSet<GamePath>,
  /// Hashes already present in the backup store.
  pub archived: &'a HashSet<ContentHash>,
  /// Required in [`PlanMode::Ingest`].
  pub ingest: Option<IngestContext<'a>>,
}

/// Step counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
  pub backups: usize,
  pub deletes: usize,
  pub copies: usize,
  pub generated: usize,
  pub loadout_edits: usize,
}

/// An ordered, validated list of steps plus what the planner saw.
#[derive(Debug, Clone, Default)]
pub struct ApplyPlan {
  pub mode: PlanMode,
  pub steps: Vec<ApplyStep>,
  pub diagnostics: Vec<Diagnostic>,
  pub classifications: Vec<PathDiff>,
}

impl ApplyPlan {
  /// A plan with no steps leaves both disk and loadout untouched.
  pub fn is_noop(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn disk_steps(&self) -> impl Iterator<Item = &ApplyStep> {
    self.steps.iter().filter(|s| s.is_disk_step())
  }

  pub fn loadout_steps(&self) -> impl Iterator<Item = &ApplyStep> {
    self.steps.iter().filter(|s| !s.is_disk_step())
  }

  pub fn has_loadout_steps(&self) -> bool {
    self.loadout_steps().next().is_some()
  }

  /// Paths whose classification is anything but `Unchanged` or `Absent`.
  pub fn changes(&self) -> impl Iterator<Item = &PathDiff> {
    self
      .classifications
      .iter()
      .filter(|d| !matches!(d.classification, Classification::Unchanged | Classification::Absent))
  }

  pub fn summary(&self) -> PlanSummary {
    let mut summary = PlanSummary::default();
    for step in &self.steps {
      match step {
        ApplyStep::BackupFile { .. } => summary.backups += 1,
        ApplyStep::DeleteFile { .. } => summary.deletes += 1,
        ApplyStep::CopyFile {
          source: CopySource::Static { .. },
          ..
        } => summary.copies += 1,
        ApplyStep::CopyFile {
          source: CopySource::Generated { .. },
          ..
        } => summary.generated += 1,
        _ => summary.loadout_edits += 1,
      }
    }
    summary
  }
}

/// Disk action decided for one path.
enum Action<'a> {
  Copy(&'a PathDiff),
  Delete(&'a PathDiff),
}

/// Build the plan for `input`.
pub fn build_plan(input: PlanInput<'_>) -> Result<ApplyPlan, PlanError> {
  if input.mode == PlanMode::Ingest && input.ingest.is_none() {
    return Err(PlanError::MissingIngestContext);
  }

  let diffs = diff_states(&DiffInput {
    initial: input.initial,
    last_synced: input.last_synced,
    current: input.current,
    target: input.target,
    previously_owned: input.previously_owned,
  });

  let mut backups: BTreeMap<ContentHash, (GamePath, u64)> = BTreeMap::new();
  let mut actions = Vec::new();
  let mut diagnostics = Vec::new();

  for diff in &diffs {
    let ingest = input.mode == PlanMode::Ingest;
    let (backup, action) = match diff.classification {
      Classification::Unchanged | Classification::Absent => (false, None),
      Classification::Missing => (false, Some(Action::Copy(diff))),
      Classification::ExternallyDeleted if ingest => (false, None),
      Classification::ExternallyDeleted => (false, Some(Action::Copy(diff))),
      Classification::LoadoutChanged => (true, Some(Action::Copy(diff))),
      Classification::ExternallyModified if ingest => (true, None),
      Classification::ExternallyModified => (true, Some(Action::Copy(diff))),
      Classification::Conflict => {
        if let (Some(current), Some(target)) = (&diff.current, &diff.target) {
          diagnostics.push(Diagnostic::Conflict {
            path: diff.path.clone(),
            disk: current.hash.clone(),
            target: target.hash.clone(),
          });
        }
        (true, Some(Action::Copy(diff)))
      }
      Classification::RemovedFromLoadout => (true, Some(Action::Delete(diff))),
      Classification::Untracked => (ingest, None),
    };

    if backup {
      if let Some(current) = diff.current.as_ref().filter(|c| !input.archived.contains(&c.hash)) {
        backups
          .entry(current.hash.clone())
          .or_insert_with(|| (diff.path.clone(), current.size));
      }
    }
    if let Some(action) = action {
      actions.push(action);
    }
  }

  let available = |hash: &ContentHash| input.archived.contains(hash) || backups.contains_key(hash);

  let mut deletes = Vec::new();
  let mut copies = Vec::new();
  let mut generated = Vec::new();
  for action in actions {
    match action {
      Action::Delete(diff) => {
        if let Some(current) = &diff.current {
          deletes.push(ApplyStep::DeleteFile {
            path: diff.path.clone(),
            hash: current.hash.clone(),
            size: current.size,
          });
        }
      }
      Action::Copy(diff) => {
        let Some(target) = &diff.target else {
          continue;
        };
        if target.generated {
          let content = input
            .generated
            .get(&diff.path)
            .ok_or_else(|| PlanError::MissingGeneratedContent(diff.path.clone()))?;
          let generator = match input.files.get(&diff.path).map(|f| &f.file) {
            Some(ModFile::Generated(file)) => file.generator.clone(),
            _ => return Err(PlanError::MissingGeneratedContent(diff.path.clone())),
          };
          generated.push(ApplyStep::CopyFile {
            to: diff.path.clone(),
            source: CopySource::Generated {
              generator,
              content: content.clone(),
            },
          });
        } else if available(&target.hash) {
          copies.push(ApplyStep::CopyFile {
            to: diff.path.clone(),
            source: CopySource::Static {
              hash: target.hash.clone(),
              size: target.size,
            },
          });
        } else {
          diagnostics.push(Diagnostic::UnableToExtract {
            path: diff.path.clone(),
            hash: target.hash.clone(),
          });
        }
      }
    }
  }

  let mut steps: Vec<ApplyStep> = backups
    .into_iter()
    .map(|(hash, (path, size))| ApplyStep::BackupFile { path, hash, size })
    .collect();
  steps.extend(deletes);
  steps.extend(copies);
  steps.extend(generated);

  if input.mode == PlanMode::Ingest {
    if let Some(ctx) = &input.ingest {
      steps.extend(make_ingestion_plan(&diffs, ctx));
    }
  }

  Ok(ApplyPlan {
    mode: input.mode,
    steps,
    diagnostics,
    classifications: diffs,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::disk_state::ScannedFile;
  use crate::loadout::{GeneratedFile, Loadout, Mod, ModKind, StaticModFile, flatten};
  use crate::sync::ingest::OwnerResolver;
  use crate::types::{InstallationId, TxId};
  use crate::util::hash::hash_bytes;
  use chrono::DateTime;

  fn gp(path: &str) -> GamePath {
    GamePath::game(path).unwrap()
  }

  fn h(content: &str) -> ContentHash {
    hash_bytes(content.as_bytes())
  }

  fn state(tx: u64, files: &[(&str, &str)]) -> DiskState {
    let scanned: Vec<ScannedFile> = files
      .iter()
      .map(|(path, content)| ScannedFile {
        path: gp(path),
        hash: h(content),
        size: content.len() as u64,
        last_modified: DateTime::from_timestamp(1, 0).unwrap(),
      })
      .collect();
    DiskState::from_scan(TxId(tx), &scanned, None)
  }

  fn static_file(path: &str, content: &str) -> ModFile {
    ModFile::Static(StaticModFile {
      to: gp(path),
      hash: h(content),
      size: content.len() as u64,
    })
  }

  struct Fixture {
    loadout: Loadout,
    files: FlattenedLoadout,
    target: TargetState,
    generated: BTreeMap<GamePath, GeneratedContent>,
  }

  impl Fixture {
    fn new(loadout: Loadout, generated: BTreeMap<GamePath, GeneratedContent>) -> Self {
      let files = flatten(&loadout, &[]);
      let target = TargetState::from_flattened(&files, &generated).unwrap();
      Self {
        loadout,
        files,
        target,
        generated,
      }
    }

    fn plan(
      &self,
      mode: PlanMode,
      last: Option<&DiskState>,
      current: &DiskState,
      owned: &BTreeSet<GamePath>,
      archived: &HashSet<ContentHash>,
    ) -> ApplyPlan {
      let resolver = OwnerResolver;
      let overrides = ModId::new();
      build_plan(PlanInput {
        mode,
        initial: None,
        last_synced: last,
        current,
        target: &self.target,
        generated: &self.generated,
        files: &self.files,
        previously_owned: owned,
        archived,
        ingest: Some(IngestContext {
          loadout: &self.loadout,
          files: &self.files,
          resolver: &resolver,
          overrides_mod: overrides,
        }),
      })
      .unwrap()
    }
  }

  fn kinds(plan: &ApplyPlan) -> Vec<(&'static str, String)> {
    plan.steps.iter().map(|s| (s.kind(), s.path().path.to_string())).collect()
  }

  #[test]
  fn steps_are_ordered_backup_delete_copy() {
    let loadout = Loadout::new(InstallationId::new(), "A", "A").with_mod(
      Mod::new("ModA", ModKind::Normal)
        .with_file(static_file("a.txt", "new"))
        .with_file(static_file("b.txt", "b")),
    );
    let fixture = Fixture::new(loadout, BTreeMap::new());
    let last = state(1, &[("a.txt", "old"), ("gone.txt", "gone")]);
    let current = state(2, &[("a.txt", "old"), ("gone.txt", "gone")]);
    let owned: BTreeSet<GamePath> = [gp("a.txt"), gp("gone.txt")].into_iter().collect();
    let archived: HashSet<ContentHash> = [h("new"), h("b")].into_iter().collect();

    let plan = fixture.plan(PlanMode::Apply, Some(&last), &current, &owned, &archived);
    let steps = kinds(&plan);
    assert_eq!(steps.iter().filter(|(k, _)| *k == "backup").count(), 2);
    assert_eq!(&steps[2..], &[
      ("delete", "gone.txt".to_string()),
      ("copy", "a.txt".to_string()),
      ("copy", "b.txt".to_string()),
    ]);
    assert!(plan.diagnostics.is_empty());
  }

  #[test]
  fn archived_content_is_not_backed_up_again() {
    let loadout = Loadout::new(InstallationId::new(), "A", "A")
      .with_mod(Mod::new("ModA", ModKind::Normal).with_file(static_file("a.txt", "new")));
    let fixture = Fixture::new(loadout, BTreeMap::new());
    let last = state(1, &[("a.txt", "old")]);
    let archived: HashSet<ContentHash> = [h("new"), h("old")].into_iter().collect();
    let owned = [gp("a.txt")].into_iter().collect();

    let plan = fixture.plan(PlanMode::Apply, Some(&last), &last, &owned, &archived);
    assert_eq!(kinds(&plan), vec![("copy", "a.txt".to_string())]);
  }

  #[test]
  fn conflict_backs_up_disk_and_applies_loadout() {
    let loadout = Loadout::new(InstallationId::new(), "A", "A")
      .with_mod(Mod::new("ModA", ModKind::Normal).with_file(static_file("a.txt", "mod")));
    let fixture = Fixture::new(loadout, BTreeMap::new());
    let current = state(1, &[("a.txt", "user")]);
    let archived: HashSet<ContentHash> = [h("mod")].into_iter().collect();

    let plan = fixture.plan(PlanMode::Apply, None, &current, &BTreeSet::new(), &archived);
    assert_eq!(kinds(&plan), vec![
      ("backup", "a.txt".to_string()),
      ("copy", "a.txt".to_string())
    ]);
    assert!(matches!(plan.diagnostics[0], Diagnostic::Conflict { .. }));
  }

  #[test]
  fn unarchived_target_is_a_diagnostic_not_a_step() {
    let loadout = Loadout::new(InstallationId::new(), "A", "A")
      .with_mod(Mod::new("ModA", ModKind::Normal).with_file(static_file("a.txt", "lost")));
    let fixture = Fixture::new(loadout, BTreeMap::new());

    let plan = fixture.plan(
      PlanMode::Apply,
      None,
      &DiskState::default(),
      &BTreeSet::new(),
      &HashSet::new(),
    );
    assert!(plan.is_noop());
    assert_eq!(plan.diagnostics, vec![Diagnostic::UnableToExtract {
      path: gp("a.txt"),
      hash: h("lost"),
    }]);
  }

  #[test]
  fn apply_mode_leaves_untracked_files_alone() {
    let fixture = Fixture::new(Loadout::new(InstallationId::new(), "A", "A"), BTreeMap::new());
    let current = state(1, &[("user.txt", "mine")]);

    let apply = fixture.plan(PlanMode::Apply, None, &current, &BTreeSet::new(), &HashSet::new());
    assert!(apply.is_noop());

    let ingest = fixture.plan(PlanMode::Ingest, None, &current, &BTreeSet::new(), &HashSet::new());
    assert_eq!(kinds(&ingest), vec![
      ("backup", "user.txt".to_string()),
      ("add", "user.txt".to_string())
    ]);
  }

  #[test]
  fn generated_files_are_written_after_static_copies() {
    let generated_path = gp("Data/plugins.txt");
    let loadout = Loadout::new(InstallationId::new(), "A", "A").with_mod(
      Mod::new("ModA", ModKind::Normal)
        .with_file(static_file("Data/a.esp", "a"))
        .with_file(ModFile::Generated(GeneratedFile {
          to: generated_path.clone(),
          generator: GeneratorId::new("plugins-txt"),
        })),
    );
    let content = GeneratedContent::new(b"*a.esp\n".to_vec());
    let fixture = Fixture::new(loadout, [(generated_path.clone(), content.clone())].into_iter().collect());
    let archived: HashSet<ContentHash> = [h("a")].into_iter().collect();

    let plan = fixture.plan(PlanMode::Apply, None, &DiskState::default(), &BTreeSet::new(), &archived);
    assert_eq!(kinds(&plan), vec![
      ("copy", "Data/a.esp".to_string()),
      ("generate", "Data/plugins.txt".to_string())
    ]);
    assert_eq!(plan.summary().generated, 1);
    assert_eq!(plan.summary().copies, 1);

    // Once written, the same generated content is unchanged.
    let current = state(2, &[("Data/a.esp", "a"), ("Data/plugins.txt", "*a.esp\n")]);
    let plan = fixture.plan(PlanMode::Apply, Some(&current), &current, &BTreeSet::new(), &archived);
    assert!(plan.is_noop());
  }

  #[test]
  fn ingest_without_context_is_rejected() {
    let target = TargetState::default();
    let err = build_plan(PlanInput {
      mode: PlanMode::Ingest,
      initial: None,
      last_synced: None,
      current: &DiskState::default(),
      target: &target,
      generated: &BTreeMap::new(),
      files: &FlattenedLoadout::default(),
      previously_owned: &BTreeSet::new(),
      archived: &HashSet::new(),
      ingest: None,
    })
    .unwrap_err();
    assert_eq!(err, PlanError::MissingIngestContext);
  }
}
