//! `loadsync mod` subcommands.
//!
//! These edit the loadout only; run `loadsync sync` to write the result to
//! the game folder.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use clap::Subcommand;
use serde::Serialize;

use loadsync_lib::loadout::{Mod, ModFile, ModKind};
use loadsync_lib::paths::{LocationId, RelativePath};

use super::{Context, find_mod};
use crate::output::{format_bytes, print_info, print_json, print_stat, print_success};

#[derive(Subcommand, Debug)]
pub enum ModCommand {
  /// Archive a directory of extracted mod files and add it to a loadout
  Install {
    /// Loadout id, id prefix or name
    loadout: String,

    /// Display name of the mod
    name: String,

    /// Directory holding the extracted mod files
    source: PathBuf,

    /// Location the files are installed into
    #[arg(long, default_value = LocationId::GAME)]
    location: String,

    /// Directory inside the location to place the files under
    #[arg(long)]
    prefix: Option<String>,
  },

  /// List the mods of a loadout
  List {
    /// Loadout id, id prefix or name
    loadout: String,
  },

  /// Enable a mod
  Enable {
    /// Loadout id, id prefix or name
    loadout: String,

    /// Mod id, id prefix or name
    name: String,
  },

  /// Disable a mod without removing it
  Disable {
    /// Loadout id, id prefix or name
    loadout: String,

    /// Mod id, id prefix or name
    name: String,
  },

  /// Remove a mod from a loadout
  Remove {
    /// Loadout id, id prefix or name
    loadout: String,

    /// Mod id, id prefix or name
    name: String,
  },
}

#[derive(Debug, Serialize)]
struct ModItem {
  id: String,
  name: String,
  kind: ModKind,
  enabled: bool,
  priority: i32,
  files: usize,
  generated: usize,
  bytes: u64,
}

impl From<&Mod> for ModItem {
  fn from(m: &Mod) -> Self {
    let bytes = m
      .files
      .iter()
      .map(|f| match f {
        ModFile::Static(s) => s.size,
        ModFile::Generated(_) => 0,
      })
      .sum();
    Self {
      id: m.id.to_string(),
      name: m.name.clone(),
      kind: m.kind,
      enabled: m.enabled,
      priority: m.priority,
      files: m.files.len(),
      generated: m.files.iter().filter(|f| f.is_generated()).count(),
      bytes,
    }
  }
}

pub async fn cmd_mod(ctx: &Context, command: ModCommand) -> Result<()> {
  match command {
    ModCommand::Install {
      loadout,
      name,
      source,
      location,
      prefix,
    } => cmd_install(ctx, &loadout, &name, &source, location, prefix.as_deref()).await,
    ModCommand::List { loadout } => cmd_list(ctx, &loadout),
    ModCommand::Enable { loadout, name } => cmd_set_enabled(ctx, &loadout, &name, true).await,
    ModCommand::Disable { loadout, name } => cmd_set_enabled(ctx, &loadout, &name, false).await,
    ModCommand::Remove { loadout, name } => cmd_remove(ctx, &loadout, &name).await,
  }
}

async fn cmd_install(
  ctx: &Context,
  loadout: &str,
  name: &str,
  source: &Path,
  location: String,
  prefix: Option<&str>,
) -> Result<()> {
  if !source.is_dir() {
    bail!("Not a directory: {}", source.display());
  }
  let target = ctx.loadout(loadout)?;
  let prefix = prefix
    .map(RelativePath::new)
    .transpose()
    .context("Invalid --prefix")?;

  let (updated, mod_id) = ctx
    .sync
    .install_mod(target.id, name, source, LocationId::new(location), prefix)
    .await
    .context("Failed to install mod")?;
  let installed = updated
    .mod_by_id(mod_id)
    .map(ModItem::from)
    .context("Installed mod missing from loadout")?;

  if ctx.output.is_json() {
    print_json(&installed)?;
  } else {
    print_success(&format!("Installed {} into {}", installed.name, updated.name));
    print_stat("Id", &installed.id);
    print_stat("Files", &installed.files.to_string());
    print_stat("Size", &format_bytes(installed.bytes));
    print_info("Run 'loadsync sync' to apply it.");
  }
  Ok(())
}

fn cmd_list(ctx: &Context, loadout: &str) -> Result<()> {
  let loadout = ctx.loadout(loadout)?;
  let items: Vec<ModItem> = loadout.mods.iter().map(ModItem::from).collect();

  if ctx.output.is_json() {
    return print_json(&items);
  }
  for item in &items {
    let state = if item.enabled { "" } else { " (disabled)" };
    println!(
      "{}{} - {} file(s), {} [{}]",
      item.name,
      state,
      item.files,
      format_bytes(item.bytes),
      item.id
    );
  }
  print_info(&format!("{} mod(s) in {}", items.len(), loadout.name));
  Ok(())
}

async fn cmd_set_enabled(ctx: &Context, loadout: &str, name: &str, enabled: bool) -> Result<()> {
  let target = ctx.loadout(loadout)?;
  let existing = find_mod(&target, name)?;
  ctx
    .sync
    .set_mod_enabled(target.id, existing.id, enabled)
    .await
    .context("Failed to update mod")?;

  let verb = if enabled { "Enabled" } else { "Disabled" };
  if ctx.output.is_json() {
    print_json(&serde_json::json!({ "mod": existing.id.to_string(), "enabled": enabled }))?;
  } else {
    print_success(&format!("{} {} in {}", verb, existing.name, target.name));
  }
  Ok(())
}

async fn cmd_remove(ctx: &Context, loadout: &str, name: &str) -> Result<()> {
  let target = ctx.loadout(loadout)?;
  let existing = find_mod(&target, name)?;
  ctx
    .sync
    .remove_mod(target.id, existing.id)
    .await
    .context("Failed to remove mod")?;

  if ctx.output.is_json() {
    print_json(&serde_json::json!({ "removed": existing.id.to_string() }))?;
  } else {
    print_success(&format!("Removed {} from {}", existing.name, target.name));
  }
  Ok(())
}
