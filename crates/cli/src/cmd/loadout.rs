//! `loadsync loadout` subcommands.

use anyhow::{Context as _, Result};
use clap::Subcommand;
use serde::Serialize;

use loadsync_lib::loadout::Loadout;
use loadsync_lib::sync::InstallationState;

use super::Context;
use crate::output::{print_info, print_json, print_stat, print_success};
use crate::prompts::confirm;

#[derive(Subcommand, Debug)]
pub enum LoadoutCommand {
  /// Create a loadout holding the installation's initial files
  Create {
    /// Installation id, id prefix or game name
    installation: String,

    /// Display name of the new loadout
    name: String,
  },

  /// List loadouts
  List {
    /// Only list loadouts of this installation
    installation: Option<String>,
  },

  /// Duplicate a loadout
  Copy {
    /// Loadout id, id prefix or name
    loadout: String,
  },

  /// Delete a loadout, reverting the game folder first if it is active
  Delete {
    /// Loadout id, id prefix or name
    loadout: String,

    /// Skip confirmation prompt
    #[arg(long)]
    force: bool,
  },
}

#[derive(Debug, Serialize)]
struct LoadoutItem {
  id: String,
  installation: String,
  name: String,
  short_name: String,
  revision: u64,
  mods: usize,
  active: bool,
  game_version: Option<String>,
}

pub async fn cmd_loadout(ctx: &Context, command: LoadoutCommand) -> Result<()> {
  match command {
    LoadoutCommand::Create { installation, name } => cmd_create(ctx, &installation, &name).await,
    LoadoutCommand::List { installation } => cmd_list(ctx, installation.as_deref()),
    LoadoutCommand::Copy { loadout } => cmd_copy(ctx, &loadout).await,
    LoadoutCommand::Delete { loadout, force } => cmd_delete(ctx, &loadout, force).await,
  }
}

fn loadout_item(ctx: &Context, loadout: &Loadout) -> LoadoutItem {
  let active = matches!(ctx.sync.state(loadout.installation), InstallationState::Active(p) if p.loadout == loadout.id);
  LoadoutItem {
    id: loadout.id.to_string(),
    installation: loadout.installation.to_string(),
    name: loadout.name.clone(),
    short_name: loadout.short_name.clone(),
    revision: loadout.revision,
    mods: loadout.mods.len(),
    active,
    game_version: loadout.game_version.clone(),
  }
}

async fn cmd_create(ctx: &Context, installation: &str, name: &str) -> Result<()> {
  let record = ctx.installation(installation)?;
  let loadout = ctx
    .sync
    .create_loadout(record.installation.id, name)
    .await
    .context("Failed to create loadout")?;
  let item = loadout_item(ctx, &loadout);

  if ctx.output.is_json() {
    print_json(&item)?;
  } else {
    print_success(&format!("Created loadout {} ({})", loadout.name, loadout.short_name));
    print_stat("Id", &item.id);
    if item.active {
      print_info("Activated as the installation's first loadout");
    }
  }
  Ok(())
}

fn cmd_list(ctx: &Context, installation: Option<&str>) -> Result<()> {
  let installations = match installation {
    Some(query) => vec![ctx.installation(query)?],
    None => ctx.sync.db().installations(),
  };
  let items: Vec<LoadoutItem> = installations
    .iter()
    .flat_map(|r| ctx.sync.db().loadouts_for(r.installation.id))
    .map(|l| loadout_item(ctx, &l))
    .collect();

  if ctx.output.is_json() {
    return print_json(&items);
  }
  if items.is_empty() {
    print_info("No loadouts found");
    return Ok(());
  }
  for item in &items {
    let marker = if item.active { " (active)" } else { "" };
    println!(
      "{:<3} {}{} - {} mod(s), revision {} [{}]",
      item.short_name, item.name, marker, item.mods, item.revision, item.id
    );
  }
  print_info(&format!("{} loadout(s) total", items.len()));
  Ok(())
}

async fn cmd_copy(ctx: &Context, loadout: &str) -> Result<()> {
  let source = ctx.loadout(loadout)?;
  let copy = ctx.sync.copy_loadout(source.id).await.context("Failed to copy loadout")?;

  if ctx.output.is_json() {
    print_json(&loadout_item(ctx, &copy))?;
  } else {
    print_success(&format!("Copied {} to {} ({})", source.name, copy.name, copy.short_name));
    print_stat("Id", &copy.id.to_string());
  }
  Ok(())
}

async fn cmd_delete(ctx: &Context, loadout: &str, force: bool) -> Result<()> {
  let existing = ctx.loadout(loadout)?;
  if !confirm(&format!("Delete loadout {}?", existing.name), force)? {
    print_info("Aborted");
    return Ok(());
  }

  ctx
    .sync
    .delete_loadout(existing.id)
    .await
    .context("Failed to delete loadout")?;

  if ctx.output.is_json() {
    print_json(&serde_json::json!({ "deleted": existing.id.to_string() }))?;
  } else {
    print_success(&format!("Deleted loadout {}", existing.name));
  }
  Ok(())
}
