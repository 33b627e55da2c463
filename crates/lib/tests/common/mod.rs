//! Shared helpers for loadsync-lib integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use walkdir::WalkDir;

use loadsync_lib::db::Database;
use loadsync_lib::generated::GeneratorRegistry;
use loadsync_lib::paths::{GameLocations, LocationId};
use loadsync_lib::store::{BackupStore, FileBackupStore, MemoryBackupStore};
use loadsync_lib::sync::Synchronizer;
use loadsync_lib::types::InstallationId;

pub const ORIGINAL_FILE: &str = "bin/originalGameFile.txt";
pub const ORIGINAL_CONTENT: &str = "Hello World!";

/// An isolated game folder plus a synchronizer managing nothing yet.
///
/// Layout under the temp dir: `game/` is the game location, `downloads/`
/// holds extracted mod archives, `data/` holds the database and store for
/// persistent environments.
pub struct TestEnv {
  pub temp: TempDir,
  pub sync: Synchronizer,
}

impl TestEnv {
  /// In-memory database and store; the game folder holds one vendor file.
  pub fn new() -> Self {
    Self::with_store(Arc::new(MemoryBackupStore::new()), GeneratorRegistry::new())
  }

  pub fn with_generators(generators: GeneratorRegistry) -> Self {
    Self::with_store(Arc::new(MemoryBackupStore::new()), generators)
  }

  /// Database and store on disk under `data/`.
  pub fn persistent() -> Self {
    let temp = TempDir::new().unwrap();
    let sync = open_persistent(temp.path());
    let env = Self { temp, sync };
    env.write(ORIGINAL_FILE, ORIGINAL_CONTENT);
    env
  }

  fn with_store(store: Arc<dyn BackupStore>, generators: GeneratorRegistry) -> Self {
    let temp = TempDir::new().unwrap();
    let sync = Synchronizer::new(Arc::new(Database::in_memory()), store).with_generators(generators);
    let env = Self { temp, sync };
    env.write(ORIGINAL_FILE, ORIGINAL_CONTENT);
    env
  }

  /// Reopen the on-disk database and store, as a new process would.
  pub fn reopen(self) -> Self {
    let sync = open_persistent(self.temp.path());
    Self { temp: self.temp, sync }
  }

  pub fn game(&self) -> PathBuf {
    self.temp.path().join("game")
  }

  pub fn data(&self) -> PathBuf {
    self.temp.path().join("data")
  }

  pub fn locations(&self) -> GameLocations {
    GameLocations::new().with(LocationId::game(), self.game())
  }

  pub async fn manage(&self) -> InstallationId {
    self.sync.manage("Test Game", self.locations()).await.unwrap()
  }

  /// Write a file into the game folder.
  pub fn write(&self, relative: &str, contents: &str) {
    write_file(&self.game(), relative, contents);
  }

  pub fn remove(&self, relative: &str) {
    fs::remove_file(self.game().join(relative)).unwrap();
  }

  pub fn read(&self, relative: &str) -> Option<String> {
    fs::read_to_string(self.game().join(relative)).ok()
  }

  /// Lay out an extracted mod archive and return its root.
  pub fn download(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let root = self.temp.path().join("downloads").join(name);
    for (relative, contents) in files {
      write_file(&root, relative, contents);
    }
    root
  }

  /// Every file in the game folder, keyed by slash-separated relative path.
  pub fn tree(&self) -> BTreeMap<String, String> {
    read_tree(&self.game())
  }
}

fn open_persistent(root: &Path) -> Synchronizer {
  let data = root.join("data");
  let db = Database::open(data.join("db")).unwrap();
  let store = FileBackupStore::open(data.join("store")).unwrap();
  Synchronizer::new(Arc::new(db), Arc::new(store))
}

pub fn write_file(root: &Path, relative: &str, contents: &str) {
  let path = root.join(relative);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(path, contents).unwrap();
}

pub fn read_tree(root: &Path) -> BTreeMap<String, String> {
  WalkDir::new(root)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .map(|e| {
      let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
      (rel, fs::read_to_string(e.path()).unwrap())
    })
    .collect()
}

/// Expected game folder contents from `(path, contents)` pairs.
pub fn tree_of(files: &[(&str, &str)]) -> BTreeMap<String, String> {
  files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect()
}
