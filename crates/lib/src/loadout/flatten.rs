//! Priority resolution of a loadout into one file per game path.

use std::collections::BTreeMap;

use crate::paths::GamePath;
use crate::types::ModId;

use super::types::{Loadout, Mod, ModFile};

/// The winning file for one path and the mod that provided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedFile {
  pub file: ModFile,
  pub mod_id: ModId,
  /// Position of the providing mod in resolution order; higher wins.
  pub rank: usize,
}

/// A loadout reduced to what should be on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenedLoadout {
  files: BTreeMap<GamePath, FlattenedFile>,
}

impl FlattenedLoadout {
  pub fn get(&self, path: &GamePath) -> Option<&FlattenedFile> {
    self.files.get(path)
  }

  pub fn owner_of(&self, path: &GamePath) -> Option<ModId> {
    self.files.get(path).map(|f| f.mod_id)
  }

  pub fn contains(&self, path: &GamePath) -> bool {
    self.files.contains_key(path)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&GamePath, &FlattenedFile)> {
    self.files.iter()
  }

  pub fn paths(&self) -> impl Iterator<Item = &GamePath> {
    self.files.keys()
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

/// Flatten the enabled mods of `loadout`.
///
/// Mods are ordered by kind (game files, then normal mods, then overrides),
/// then by priority, then by their position in the loadout. Later mods
/// overwrite earlier ones. Paths under an `ignored` prefix are dropped.
pub fn flatten(loadout: &Loadout, ignored: &[GamePath]) -> FlattenedLoadout {
  let mut ordered: Vec<(usize, &Mod)> = loadout.mods.iter().enumerate().filter(|(_, m)| m.enabled).collect();
  ordered.sort_by_key(|(index, m)| (m.kind.rank(), m.priority, *index));

  let mut files = BTreeMap::new();
  for (rank, (_, m)) in ordered.into_iter().enumerate() {
    for file in &m.files {
      let path = file.to();
      if ignored.iter().any(|prefix| path.starts_with(prefix)) {
        continue;
      }
      files.insert(
        path.clone(),
        FlattenedFile {
          file: file.clone(),
          mod_id: m.id,
          rank,
        },
      );
    }
  }

  FlattenedLoadout { files }
}
