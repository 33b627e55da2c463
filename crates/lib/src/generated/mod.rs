//! Generated file providers.
//!
//! A generated file has no stored content: its bytes are produced from the
//! flattened loadout each time the loadout is applied. Providers are looked
//! up by [`GeneratorId`] in a [`GeneratorRegistry`].

mod plugins;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

pub use plugins::{LoadOrderConfig, PLUGINS_TXT_GENERATOR, PluginsTxtProvider};

use crate::loadout::{FlattenedLoadout, GeneratorId, Loadout, ModFile};
use crate::paths::GamePath;
use crate::util::hash::{ContentHash, hash_bytes};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
  #[error("no generator registered with id {0}")]
  UnknownGenerator(GeneratorId),

  #[error("generator {generator} failed for {path}: {message}")]
  Failed {
    generator: GeneratorId,
    path: GamePath,
    message: String,
  },
}

/// Everything a provider may read while generating one file.
pub struct GenerateContext<'a> {
  pub loadout: &'a Loadout,
  pub files: &'a FlattenedLoadout,
  pub path: &'a GamePath,
}

/// Regenerated bytes plus their hash and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
  pub bytes: Arc<[u8]>,
  pub hash: ContentHash,
  pub size: u64,
}

impl GeneratedContent {
  pub fn new(bytes: Vec<u8>) -> Self {
    let hash = hash_bytes(&bytes);
    let size = bytes.len() as u64;
    Self {
      bytes: Arc::from(bytes),
      hash,
      size,
    }
  }
}

/// Produces the content of generated files.
pub trait GeneratedFileProvider: Send + Sync {
  fn id(&self) -> GeneratorId;

  fn generate(&self, ctx: &GenerateContext<'_>) -> Result<Vec<u8>, GenerateError>;
}

/// Providers by id.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
  providers: HashMap<GeneratorId, Arc<dyn GeneratedFileProvider>>,
}

impl GeneratorRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, provider: Arc<dyn GeneratedFileProvider>) {
    self.providers.insert(provider.id(), provider);
  }

  pub fn get(&self, id: &GeneratorId) -> Option<&Arc<dyn GeneratedFileProvider>> {
    self.providers.get(id)
  }

  pub fn len(&self) -> usize {
    self.providers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.providers.is_empty()
  }

  /// Generate every generated file of the flattened loadout, once each.
  /// Size and hash are taken from the generated bytes.
  pub fn regenerate_all(
    &self,
    loadout: &Loadout,
    files: &FlattenedLoadout,
  ) -> Result<BTreeMap<GamePath, GeneratedContent>, GenerateError> {
    let mut generated = BTreeMap::new();
    for (path, flat) in files.iter() {
      let ModFile::Generated(file) = &flat.file else {
        continue;
      };
      let provider = self
        .get(&file.generator)
        .ok_or_else(|| GenerateError::UnknownGenerator(file.generator.clone()))?;
      let ctx = GenerateContext { loadout, files, path };
      let content = GeneratedContent::new(provider.generate(&ctx)?);
      debug!(path = %path, generator = %file.generator, hash = content.hash.short(), "regenerated file");
      generated.insert(path.clone(), content);
    }
    Ok(generated)
  }
}

impl std::fmt::Debug for GeneratorRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut ids: Vec<&GeneratorId> = self.providers.keys().collect();
    ids.sort();
    f.debug_struct("GeneratorRegistry").field("providers", &ids).finish()
  }
}
