//! State differ.
//!
//! Classifies every path seen in any of the four states (initial,
//! last-synced, current, target) by comparing their content hashes. The
//! classification alone decides what the plan builder does with a path.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::disk_state::DiskState;
use crate::generated::GeneratedContent;
use crate::loadout::{FlattenedLoadout, ModFile};
use crate::paths::GamePath;
use crate::types::ModId;
use crate::util::hash::ContentHash;

use super::plan::PlanError;

/// What the target wants at one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetEntry {
  pub hash: ContentHash,
  pub size: u64,
  pub generated: bool,
  /// Providing mod; `None` when the target is a recorded disk state.
  pub mod_id: Option<ModId>,
}

/// The desired disk content, one entry per path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetState {
  entries: BTreeMap<GamePath, TargetEntry>,
}

impl TargetState {
  /// Target of a loadout. Generated files take their hash from the freshly
  /// regenerated content.
  pub fn from_flattened(
    files: &FlattenedLoadout,
    generated: &BTreeMap<GamePath, GeneratedContent>,
  ) -> Result<Self, PlanError> {
    let mut entries = BTreeMap::new();
    for (path, flat) in files.iter() {
      let entry = match &flat.file {
        ModFile::Static(file) => TargetEntry {
          hash: file.hash.clone(),
          size: file.size,
          generated: false,
          mod_id: Some(flat.mod_id),
        },
        ModFile::Generated(_) => {
          let content = generated
            .get(path)
            .ok_or_else(|| PlanError::MissingGeneratedContent(path.clone()))?;
          TargetEntry {
            hash: content.hash.clone(),
            size: content.size,
            generated: true,
            mod_id: Some(flat.mod_id),
          }
        }
      };
      entries.insert(path.clone(), entry);
    }
    Ok(Self { entries })
  }

  /// Target that restores a recorded disk state exactly.
  pub fn from_disk_state(state: &DiskState) -> Self {
    let entries = state
      .iter()
      .map(|e| {
        let entry = TargetEntry {
          hash: e.hash.clone(),
          size: e.size,
          generated: false,
          mod_id: None,
        };
        (e.path.clone(), entry)
      })
      .collect();
    Self { entries }
  }

  pub fn get(&self, path: &GamePath) -> Option<&TargetEntry> {
    self.entries.get(path)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&GamePath, &TargetEntry)> {
    self.entries.iter()
  }

  pub fn paths(&self) -> impl Iterator<Item = &GamePath> {
    self.entries.keys()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// How one path relates across the four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
  /// Disk already matches the target.
  Unchanged,
  /// Target wants a file that is not on disk.
  Missing,
  /// A file written by the last sync was deleted outside the manager.
  ExternallyDeleted,
  /// Disk is as last synced; the loadout now wants different content.
  LoadoutChanged,
  /// The loadout is unchanged; the file was edited outside the manager.
  ExternallyModified,
  /// Both disk and loadout changed, or disk holds content never synced.
  Conflict,
  /// A file the previous target owned is no longer in the loadout.
  RemovedFromLoadout,
  /// A file on disk the loadout knows nothing about.
  Untracked,
  /// Neither on disk nor wanted.
  Absent,
}

impl fmt::Display for Classification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Classification::Unchanged => "unchanged",
      Classification::Missing => "missing",
      Classification::ExternallyDeleted => "externally deleted",
      Classification::LoadoutChanged => "loadout changed",
      Classification::ExternallyModified => "externally modified",
      Classification::Conflict => "conflict",
      Classification::RemovedFromLoadout => "removed from loadout",
      Classification::Untracked => "untracked",
      Classification::Absent => "absent",
    };
    f.write_str(name)
  }
}

/// Observed content of a file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskFile {
  pub hash: ContentHash,
  pub size: u64,
}

/// Everything known about one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathDiff {
  pub path: GamePath,
  pub initial: Option<ContentHash>,
  pub last_synced: Option<ContentHash>,
  pub current: Option<DiskFile>,
  pub target: Option<TargetEntry>,
  /// Whether the previously synced target contained this path.
  pub owned: bool,
  pub classification: Classification,
}

/// The states to compare.
#[derive(Debug, Clone, Copy)]
pub struct DiffInput<'a> {
  pub initial: Option<&'a DiskState>,
  pub last_synced: Option<&'a DiskState>,
  pub current: &'a DiskState,
  pub target: &'a TargetState,
  pub previously_owned: &'a BTreeSet<GamePath>,
}

/// Classify one path from its hashes. Absence is `None`.
///
/// A generated target never counts as externally modified or deleted: its
/// content is always regenerated, so any divergence is resolved in favour of
/// the loadout.
pub fn classify(
  last_synced: Option<&ContentHash>,
  current: Option<&ContentHash>,
  target: Option<&ContentHash>,
  target_generated: bool,
  owned: bool,
) -> Classification {
  match (current, target) {
    (None, None) => Classification::Absent,
    (Some(c), Some(t)) if c == t => Classification::Unchanged,
    (None, Some(t)) => {
      if !target_generated && last_synced == Some(t) {
        Classification::ExternallyDeleted
      } else {
        Classification::Missing
      }
    }
    (Some(c), Some(t)) => {
      if last_synced == Some(c) {
        Classification::LoadoutChanged
      } else if !target_generated && last_synced == Some(t) {
        Classification::ExternallyModified
      } else {
        Classification::Conflict
      }
    }
    (Some(_), None) => {
      if owned {
        Classification::RemovedFromLoadout
      } else {
        Classification::Untracked
      }
    }
  }
}

/// Classify every path that appears in any state, in path order.
pub fn diff_states(input: &DiffInput<'_>) -> Vec<PathDiff> {
  let mut paths: BTreeSet<&GamePath> = BTreeSet::new();
  paths.extend(input.current.paths());
  paths.extend(input.target.paths());
  if let Some(initial) = input.initial {
    paths.extend(initial.paths());
  }
  if let Some(last) = input.last_synced {
    paths.extend(last.paths());
  }

  paths
    .into_iter()
    .map(|path| {
      let initial = input.initial.and_then(|s| s.hash_of(path)).cloned();
      let last_synced = input.last_synced.and_then(|s| s.hash_of(path)).cloned();
      let current = input.current.get(path).map(|e| DiskFile {
        hash: e.hash.clone(),
        size: e.size,
      });
      let target = input.target.get(path).cloned();
      let owned = input.previously_owned.contains(path);

      let classification = classify(
        last_synced.as_ref(),
        current.as_ref().map(|c| &c.hash),
        target.as_ref().map(|t| &t.hash),
        target.as_ref().is_some_and(|t| t.generated),
        owned,
      );

      PathDiff {
        path: path.clone(),
        initial,
        last_synced,
        current,
        target,
        owned,
        classification,
      }
    })
    .collect()
}
