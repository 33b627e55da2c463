//! `plugins.txt` generation.

use serde::{Deserialize, Serialize};

use crate::loadout::GeneratorId;
use crate::paths::{LocationId, RelativePath};

use super::{GenerateContext, GenerateError, GeneratedFileProvider};

pub const PLUGINS_TXT_GENERATOR: &str = "plugins-txt";

const HEADER: &str = "# This file was automatically generated. Edits will be overwritten.\n";

/// Load order data for [`PluginsTxtProvider`], supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOrderConfig {
  /// Folder in the game location whose plugins are listed.
  pub data_dir: String,
  /// Plugins listed first, in this order, whenever they are present.
  pub pinned: Vec<String>,
  /// Plugin extensions; earlier extensions load first.
  pub extensions: Vec<String>,
}

impl Default for LoadOrderConfig {
  fn default() -> Self {
    Self {
      data_dir: "Data".to_string(),
      pinned: Vec::new(),
      extensions: vec!["esm".to_string(), "esl".to_string(), "esp".to_string()],
    }
  }
}

/// Lists the enabled plugins of a loadout in load order.
///
/// Pinned plugins come first; the rest are ordered by extension, then by the
/// priority of the mod providing them, then by name.
#[derive(Debug, Clone, Default)]
pub struct PluginsTxtProvider {
  config: LoadOrderConfig,
}

impl PluginsTxtProvider {
  pub fn new(config: LoadOrderConfig) -> Self {
    Self { config }
  }

  fn extension_rank(&self, ext: &str) -> Option<usize> {
    self.config.extensions.iter().position(|e| e.eq_ignore_ascii_case(ext))
  }
}

impl GeneratedFileProvider for PluginsTxtProvider {
  fn id(&self) -> GeneratorId {
    GeneratorId::new(PLUGINS_TXT_GENERATOR)
  }

  fn generate(&self, ctx: &GenerateContext<'_>) -> Result<Vec<u8>, GenerateError> {
    let data_dir = RelativePath::new(&self.config.data_dir).map_err(|e| GenerateError::Failed {
      generator: self.id(),
      path: ctx.path.clone(),
      message: e.to_string(),
    })?;

    let mut plugins: Vec<(usize, usize, String)> = ctx
      .files
      .iter()
      .filter(|(path, _)| path.location.as_str() == LocationId::GAME && path.path.parent().as_ref() == Some(&data_dir))
      .filter(|(path, _)| *path != ctx.path)
      .filter_map(|(path, flat)| {
        let ext_rank = self.extension_rank(path.extension()?)?;
        Some((ext_rank, flat.rank, path.file_name().to_string()))
      })
      .collect();

    let pinned_position = |name: &str| self.config.pinned.iter().position(|p| p.eq_ignore_ascii_case(name));
    plugins.sort_by(|a, b| {
      let pa = pinned_position(&a.2).unwrap_or(usize::MAX);
      let pb = pinned_position(&b.2).unwrap_or(usize::MAX);
      (pa, a.0, a.1, a.2.to_lowercase()).cmp(&(pb, b.0, b.1, b.2.to_lowercase()))
    });

    let mut out = String::from(HEADER);
    for (_, _, name) in plugins {
      out.push('*');
      out.push_str(&name);
      out.push('\n');
    }
    Ok(out.into_bytes())
  }
}
