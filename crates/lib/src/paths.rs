//! Game-relative paths.
//!
//! Every file the synchronizer knows about is addressed by a [`GamePath`]: a
//! named location root (`Game`, `Saves`, ...) plus a normalized path relative to
//! that root. Absolute filesystem paths only appear at the edges, when a
//! [`GameLocations`] map resolves a `GamePath` for I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors produced while building or resolving paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
  #[error("path is empty")]
  Empty,

  #[error("path escapes its root: {0}")]
  EscapesRoot(String),

  #[error("path is not valid UTF-8: {0}")]
  InvalidUtf8(String),

  #[error("unknown location: {0}")]
  UnknownLocation(LocationId),

  #[error("malformed game path (expected {{Location}}/relative/path): {0}")]
  Malformed(String),
}

/// Names a location root such as the game folder or the saves folder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
  pub const GAME: &'static str = "Game";
  pub const SAVES: &'static str = "Saves";
  pub const APP_DATA: &'static str = "AppData";

  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn game() -> Self {
    Self::new(Self::GAME)
  }

  pub fn saves() -> Self {
    Self::new(Self::SAVES)
  }

  pub fn app_data() -> Self {
    Self::new(Self::APP_DATA)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for LocationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A normalized, slash-separated path relative to a location root.
///
/// Never empty, never absolute, never contains `.` or `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
  pub fn new(raw: &str) -> Result<Self, PathError> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in raw.split(['/', '\\']) {
      match segment {
        "" | "." => continue,
        ".." => {
          if parts.pop().is_none() {
            return Err(PathError::EscapesRoot(raw.to_string()));
          }
        }
        other => parts.push(other),
      }
    }

    if parts.is_empty() {
      return Err(PathError::Empty);
    }

    Ok(Self(parts.join("/")))
  }

  /// Build a relative path from the components of a filesystem path.
  pub fn from_path(path: &Path) -> Result<Self, PathError> {
    let mut parts = Vec::new();
    for component in path.components() {
      match component {
        Component::Normal(part) => {
          let part = part
            .to_str()
            .ok_or_else(|| PathError::InvalidUtf8(path.display().to_string()))?;
          parts.push(part);
        }
        Component::CurDir => {}
        _ => return Err(PathError::EscapesRoot(path.display().to_string())),
      }
    }
    Self::new(&parts.join("/"))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn segments(&self) -> impl Iterator<Item = &str> {
    self.0.split('/')
  }

  pub fn parent(&self) -> Option<RelativePath> {
    self.0.rsplit_once('/').map(|(parent, _)| Self(parent.to_string()))
  }

  pub fn file_name(&self) -> &str {
    self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, name)| name)
  }

  pub fn extension(&self) -> Option<&str> {
    let name = self.file_name();
    match name.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
      _ => None,
    }
  }

  pub fn join(&self, child: &str) -> Result<RelativePath, PathError> {
    Self::new(&format!("{}/{}", self.0, child))
  }

  /// Component-wise prefix check: `a/b` starts with `a` but not with `a/b2`.
  pub fn starts_with(&self, prefix: &RelativePath) -> bool {
    self.0 == prefix.0 || (self.0.starts_with(&prefix.0) && self.0.as_bytes().get(prefix.0.len()) == Some(&b'/'))
  }
}

impl TryFrom<String> for RelativePath {
  type Error = PathError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::new(&value)
  }
}

impl From<RelativePath> for String {
  fn from(value: RelativePath) -> Self {
    value.0
  }
}

impl fmt::Display for RelativePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A file location independent of where the game is installed.
///
/// Ordered by location first, then by relative path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GamePath {
  pub location: LocationId,
  pub path: RelativePath,
}

impl GamePath {
  pub fn new(location: LocationId, path: RelativePath) -> Self {
    Self { location, path }
  }

  pub fn parse(location: &str, path: &str) -> Result<Self, PathError> {
    Ok(Self::new(LocationId::new(location), RelativePath::new(path)?))
  }

  /// Shorthand for a path in the `Game` location.
  pub fn game(path: &str) -> Result<Self, PathError> {
    Self::parse(LocationId::GAME, path)
  }

  pub fn parent(&self) -> Option<GamePath> {
    self.path.parent().map(|path| Self::new(self.location.clone(), path))
  }

  /// Ancestors of this path, nearest first, excluding the location root.
  pub fn ancestors(&self) -> impl Iterator<Item = GamePath> + '_ {
    std::iter::successors(self.parent(), |p| p.parent())
  }

  pub fn file_name(&self) -> &str {
    self.path.file_name()
  }

  pub fn extension(&self) -> Option<&str> {
    self.path.extension()
  }

  pub fn join(&self, child: &str) -> Result<GamePath, PathError> {
    Ok(Self::new(self.location.clone(), self.path.join(child)?))
  }

  pub fn starts_with(&self, prefix: &GamePath) -> bool {
    self.location == prefix.location && self.path.starts_with(&prefix.path)
  }
}

impl fmt::Display for GamePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{{}}}/{}", self.location, self.path)
  }
}

impl FromStr for GamePath {
  type Err = PathError;

  /// Parses the display form, `{Game}/bin/file.txt`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let rest = s.strip_prefix('{').ok_or_else(|| PathError::Malformed(s.to_string()))?;
    let (location, path) = rest.split_once('}').ok_or_else(|| PathError::Malformed(s.to_string()))?;
    if location.is_empty() {
      return Err(PathError::Malformed(s.to_string()));
    }
    Self::parse(location, path)
  }
}

/// Maps location ids to absolute directories for one installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameLocations(BTreeMap<LocationId, PathBuf>);

impl GameLocations {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, location: LocationId, root: impl Into<PathBuf>) -> Self {
    self.insert(location, root);
    self
  }

  pub fn insert(&mut self, location: LocationId, root: impl Into<PathBuf>) {
    self.0.insert(location, root.into());
  }

  pub fn get(&self, location: &LocationId) -> Option<&Path> {
    self.0.get(location).map(PathBuf::as_path)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&LocationId, &Path)> {
    self.0.iter().map(|(id, root)| (id, root.as_path()))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Canonicalize every root that exists, leaving missing roots untouched.
  pub fn canonicalized(&self) -> Self {
    Self(
      self
        .0
        .iter()
        .map(|(id, root)| {
          let root = dunce::canonicalize(root).unwrap_or_else(|_| root.clone());
          (id.clone(), root)
        })
        .collect(),
    )
  }

  /// Resolve a game path to an absolute filesystem path.
  pub fn resolve(&self, path: &GamePath) -> Result<PathBuf, PathError> {
    let root = self
      .0
      .get(&path.location)
      .ok_or_else(|| PathError::UnknownLocation(path.location.clone()))?;
    Ok(path.path.segments().fold(root.clone(), |acc, segment| acc.join(segment)))
  }

  /// Convert an absolute path back into a game path, choosing the most
  /// specific root when roots are nested.
  pub fn to_game_path(&self, absolute: &Path) -> Option<GamePath> {
    self
      .0
      .iter()
      .filter_map(|(id, root)| {
        let relative = absolute.strip_prefix(root).ok()?;
        let relative = RelativePath::from_path(relative).ok()?;
        Some((root.components().count(), GamePath::new(id.clone(), relative)))
      })
      .max_by_key(|(depth, _)| *depth)
      .map(|(_, path)| path)
  }
}
