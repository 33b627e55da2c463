use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paths::GamePath;
use crate::types::{InstallationId, LoadoutId, ModId, TxId};
use crate::util::hash::ContentHash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadoutError {
  #[error("mod not found in loadout: {0}")]
  ModNotFound(ModId),

  #[error("the game files group cannot be removed")]
  CannotRemoveGameFiles,
}

/// What a mod represents within its loadout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModKind {
  /// The files that were in the installation before it was managed.
  GameFiles,
  /// A user-installed mod.
  Normal,
  /// Files picked up from disk that no other mod claimed.
  Overrides,
}

impl ModKind {
  /// Flattening order: higher ranks win conflicts.
  pub(crate) fn rank(self) -> u8 {
    match self {
      ModKind::GameFiles => 0,
      ModKind::Normal => 1,
      ModKind::Overrides => 2,
    }
  }
}

/// Names a registered generated-file provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratorId(pub String);

impl GeneratorId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }
}

impl std::fmt::Display for GeneratorId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// A file with fixed content stored in the backup store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticModFile {
  pub to: GamePath,
  pub hash: ContentHash,
  pub size: u64,
}

/// A file whose content is produced at apply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
  pub to: GamePath,
  pub generator: GeneratorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModFile {
  Static(StaticModFile),
  Generated(GeneratedFile),
}

impl ModFile {
  pub fn to(&self) -> &GamePath {
    match self {
      ModFile::Static(file) => &file.to,
      ModFile::Generated(file) => &file.to,
    }
  }

  pub fn is_generated(&self) -> bool {
    matches!(self, ModFile::Generated(_))
  }
}

/// A group of files inside a loadout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mod {
  pub id: ModId,
  pub name: String,
  pub kind: ModKind,
  pub enabled: bool,
  /// Higher priorities win among mods of the same kind.
  pub priority: i32,
  pub files: Vec<ModFile>,
}

impl Mod {
  pub fn new(name: impl Into<String>, kind: ModKind) -> Self {
    Self {
      id: ModId::new(),
      name: name.into(),
      kind,
      enabled: true,
      priority: 0,
      files: Vec::new(),
    }
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  pub fn with_file(mut self, file: ModFile) -> Self {
    self.set_file(file);
    self
  }

  pub fn file_at(&self, path: &GamePath) -> Option<&ModFile> {
    self.files.iter().find(|f| f.to() == path)
  }

  /// Insert a file, replacing any file already mapped to the same path.
  pub fn set_file(&mut self, file: ModFile) {
    match self.files.iter_mut().find(|f| f.to() == file.to()) {
      Some(existing) => *existing = file,
      None => self.files.push(file),
    }
  }

  /// Remove the file mapped to `path`. Returns whether one was removed.
  pub fn remove_file(&mut self, path: &GamePath) -> bool {
    let before = self.files.len();
    self.files.retain(|f| f.to() != path);
    self.files.len() != before
  }
}

/// One revision of a loadout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loadout {
  pub id: LoadoutId,
  pub installation: InstallationId,
  pub name: String,
  pub short_name: String,
  /// Assigned on commit; zero for the first revision.
  pub revision: u64,
  /// Transaction that committed this revision.
  pub tx: TxId,
  pub mods: Vec<Mod>,
  pub game_version: Option<String>,
  pub last_applied_at: Option<DateTime<Utc>>,
}

impl Loadout {
  pub fn new(installation: InstallationId, name: impl Into<String>, short_name: impl Into<String>) -> Self {
    Self {
      id: LoadoutId::new(),
      installation,
      name: name.into(),
      short_name: short_name.into(),
      revision: 0,
      tx: TxId::default(),
      mods: Vec::new(),
      game_version: None,
      last_applied_at: None,
    }
  }

  pub fn mod_by_id(&self, id: ModId) -> Option<&Mod> {
    self.mods.iter().find(|m| m.id == id)
  }

  pub fn game_files_mod(&self) -> Option<&Mod> {
    self.mods.iter().find(|m| m.kind == ModKind::GameFiles)
  }

  pub fn overrides_mod(&self) -> Option<&Mod> {
    self.mods.iter().find(|m| m.kind == ModKind::Overrides)
  }

  /// A copy of this loadout with `new_mod` appended.
  pub fn with_mod(&self, new_mod: Mod) -> Loadout {
    let mut next = self.clone();
    next.mods.push(new_mod);
    next
  }

  /// A copy of this loadout with `edit` applied to one mod.
  pub fn with_mod_edited(&self, id: ModId, edit: impl FnOnce(&mut Mod)) -> Result<Loadout, LoadoutError> {
    let mut next = self.clone();
    let target = next
      .mods
      .iter_mut()
      .find(|m| m.id == id)
      .ok_or(LoadoutError::ModNotFound(id))?;
    edit(target);
    Ok(next)
  }

  pub fn with_mod_enabled(&self, id: ModId, enabled: bool) -> Result<Loadout, LoadoutError> {
    self.with_mod_edited(id, |m| m.enabled = enabled)
  }

  pub fn without_mod(&self, id: ModId) -> Result<Loadout, LoadoutError> {
    let existing = self.mod_by_id(id).ok_or(LoadoutError::ModNotFound(id))?;
    if existing.kind == ModKind::GameFiles {
      return Err(LoadoutError::CannotRemoveGameFiles);
    }
    let mut next = self.clone();
    next.mods.retain(|m| m.id != id);
    Ok(next)
  }
}
