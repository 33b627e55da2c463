//! Folding external disk changes back into a loadout.

use crate::loadout::{FlattenedLoadout, Loadout, LoadoutError, Mod, ModFile, ModKind, StaticModFile};
use crate::paths::GamePath;
use crate::types::ModId;

use super::differ::{Classification, PathDiff};
use super::plan::ApplyStep;

/// Name given to the overrides mod when ingestion has to create it.
pub const OVERRIDES_MOD_NAME: &str = "Overrides";

/// Chooses the mod that receives a file found on disk.
pub trait IngestResolver: Send + Sync {
  /// `None` defers to the overrides mod.
  fn resolve(&self, path: &GamePath, loadout: &Loadout, files: &FlattenedLoadout) -> Option<ModId>;
}

/// Sends an edited file back to the mod that provides it. Edits to game files
/// and brand new files go to the overrides mod.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerResolver;

impl IngestResolver for OwnerResolver {
  fn resolve(&self, path: &GamePath, loadout: &Loadout, files: &FlattenedLoadout) -> Option<ModId> {
    let owner = files.owner_of(path)?;
    loadout
      .mod_by_id(owner)
      .filter(|m| m.kind != ModKind::GameFiles)
      .map(|m| m.id)
  }
}

impl<F> IngestResolver for F
where
  F: Fn(&GamePath) -> Option<ModId> + Send + Sync,
{
  fn resolve(&self, path: &GamePath, _loadout: &Loadout, _files: &FlattenedLoadout) -> Option<ModId> {
    self(path)
  }
}

/// What ingestion needs beyond the diff.
#[derive(Clone, Copy)]
pub struct IngestContext<'a> {
  pub loadout: &'a Loadout,
  pub files: &'a FlattenedLoadout,
  pub resolver: &'a dyn IngestResolver,
  /// Receives files the resolver does not place. Created on demand.
  pub overrides_mod: ModId,
}

impl IngestContext<'_> {
  fn destination(&self, path: &GamePath) -> ModId {
    self
      .resolver
      .resolve(path, self.loadout, self.files)
      .filter(|id| self.loadout.mod_by_id(*id).is_some())
      .unwrap_or(self.overrides_mod)
  }
}

/// Loadout edits that make the target agree with external changes on disk.
pub fn make_ingestion_plan(diffs: &[PathDiff], ctx: &IngestContext<'_>) -> Vec<ApplyStep> {
  let mut steps = Vec::new();
  for diff in diffs {
    match diff.classification {
      Classification::ExternallyDeleted => {
        steps.push(ApplyStep::RemoveFromLoadout { path: diff.path.clone() });
      }
      Classification::ExternallyModified | Classification::Untracked => {
        let Some(current) = &diff.current else {
          continue;
        };
        let mod_id = ctx.destination(&diff.path);
        let existing = ctx
          .loadout
          .mod_by_id(mod_id)
          .and_then(|m| m.file_at(&diff.path))
          .is_some_and(|f| !f.is_generated());
        let (path, hash, size) = (diff.path.clone(), current.hash.clone(), current.size);
        steps.push(if existing {
          ApplyStep::IntegrateFile {
            mod_id,
            path,
            hash,
            size,
          }
        } else {
          ApplyStep::AddToLoadout {
            mod_id,
            path,
            hash,
            size,
          }
        });
      }
      _ => {}
    }
  }
  steps
}

/// Apply the loadout edits of a plan, returning the edited loadout.
///
/// Disk steps are skipped. `AddToLoadout` creates the overrides mod when
/// `overrides_mod` is not yet part of the loadout.
pub fn apply_loadout_steps(
  loadout: &Loadout,
  steps: &[ApplyStep],
  overrides_mod: ModId,
) -> Result<Loadout, LoadoutError> {
  let mut next = loadout.clone();
  for step in steps {
    match step {
      ApplyStep::IntegrateFile {
        mod_id,
        path,
        hash,
        size,
      }
      | ApplyStep::AddToLoadout {
        mod_id,
        path,
        hash,
        size,
      } => {
        if *mod_id == overrides_mod && next.mod_by_id(overrides_mod).is_none() {
          let mut overrides = Mod::new(OVERRIDES_MOD_NAME, ModKind::Overrides);
          overrides.id = overrides_mod;
          next.mods.push(overrides);
        }
        let file = ModFile::Static(StaticModFile {
          to: path.clone(),
          hash: hash.clone(),
          size: *size,
        });
        next = next.with_mod_edited(*mod_id, |m| m.set_file(file))?;
      }
      ApplyStep::RemoveFromLoadout { path } => {
        for m in next.mods.iter_mut().filter(|m| m.enabled) {
          m.files.retain(|f| f.is_generated() || f.to() != path);
        }
      }
      ApplyStep::BackupFile { .. } | ApplyStep::CopyFile { .. } | ApplyStep::DeleteFile { .. } => {}
    }
  }
  Ok(next)
}
