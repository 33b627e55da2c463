//! `loadsync manage`, `unmanage` and `rescan`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context as _, Result, bail};
use serde::Serialize;

use loadsync_lib::paths::{GameLocations, LocationId};

use super::Context;
use crate::output::{format_bytes, format_duration, print_info, print_json, print_stat, print_success};
use crate::prompts::confirm;

/// Parse an extra location given as `NAME=PATH`.
pub fn parse_location(raw: &str) -> Result<(String, PathBuf), String> {
  let (name, path) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected NAME=PATH, got '{}'", raw))?;
  if name.is_empty() || path.is_empty() {
    return Err(format!("expected NAME=PATH, got '{}'", raw));
  }
  if name.eq_ignore_ascii_case(LocationId::GAME) {
    return Err("the game location is the positional GAME_DIR argument".to_string());
  }
  Ok((name.to_string(), PathBuf::from(path)))
}

fn existing_dir(path: &Path) -> Result<PathBuf> {
  if !path.is_dir() {
    bail!("Not a directory: {}", path.display());
  }
  dunce::canonicalize(path).with_context(|| format!("Failed to resolve {}", path.display()))
}

/// Start managing a game folder.
///
/// Scans every location, archives every file found into the backup store and
/// records the result as the installation's initial state.
pub async fn cmd_manage(ctx: &Context, game_dir: &Path, game: &str, extra: Vec<(String, PathBuf)>) -> Result<()> {
  let start = Instant::now();
  let mut locations = GameLocations::new().with(LocationId::game(), existing_dir(game_dir)?);
  for (name, path) in extra {
    locations.insert(LocationId::new(name), existing_dir(&path)?);
  }

  let id = ctx.sync.manage(game, locations).await.context("Failed to manage game folder")?;
  let record = ctx.sync.db().installation(id)?;
  let state = ctx.sync.db().latest_disk_state(id);
  let files = state.as_ref().map_or(0, |s| s.len());
  let bytes = state.as_ref().map_or(0, |s| s.total_size());

  if ctx.output.is_json() {
    #[derive(Serialize)]
    struct ManageOutput<'a> {
      installation: String,
      game: &'a str,
      game_version: Option<String>,
      files: usize,
      bytes: u64,
    }
    print_json(&ManageOutput {
      installation: id.to_string(),
      game,
      game_version: record.metadata.game_version,
      files,
      bytes,
    })?;
  } else {
    print_success(&format!("Managing {} as installation {}", game, id));
    for (location, root) in record.installation.locations.iter() {
      print_stat(location.as_str(), &root.display().to_string());
    }
    print_stat("Files archived", &files.to_string());
    print_stat("Size", &format_bytes(bytes));
    if let Some(version) = &record.metadata.game_version {
      print_stat("Game version", version);
    }
    print_stat("Duration", &format_duration(start.elapsed()));
    print_info("Run 'loadsync loadout create' to make the first loadout.");
  }
  Ok(())
}

/// Revert the game folder and forget the installation.
pub async fn cmd_unmanage(ctx: &Context, installation: &str, force: bool) -> Result<()> {
  let record = ctx.installation(installation)?;
  let prompt = format!(
    "Restore {} to its initial state and delete all of its loadouts?",
    record.installation.game
  );
  if !confirm(&prompt, force)? {
    print_info("Aborted");
    return Ok(());
  }

  ctx
    .sync
    .unmanage(record.installation.id)
    .await
    .context("Failed to unmanage installation")?;

  if ctx.output.is_json() {
    print_json(&serde_json::json!({ "unmanaged": record.installation.id.to_string() }))?;
  } else {
    print_success(&format!("Stopped managing {}", record.installation.game));
  }
  Ok(())
}

/// Rescan an installation's files and report the game version.
pub async fn cmd_rescan(ctx: &Context, installation: &str) -> Result<()> {
  let record = ctx.installation(installation)?;
  let before = record.metadata.game_version.clone();
  let state = ctx
    .sync
    .rescan_files(record.installation.id)
    .await
    .context("Failed to rescan installation")?;
  let after = ctx.sync.db().installation(record.installation.id)?.metadata.game_version;

  if ctx.output.is_json() {
    print_json(&serde_json::json!({
      "installation": record.installation.id.to_string(),
      "tx": state.tx().to_string(),
      "files": state.len(),
      "bytes": state.total_size(),
      "game_version": after,
      "version_changed": before != after,
    }))?;
  } else {
    print_success(&format!("Rescanned {}", record.installation.game));
    print_stat("Files", &state.len().to_string());
    print_stat("Size", &format_bytes(state.total_size()));
    print_stat("Game version", after.as_deref().unwrap_or("unknown"));
    if before != after {
      print_info(&format!(
        "Game version changed from {}",
        before.as_deref().unwrap_or("unknown")
      ));
    }
  }
  Ok(())
}
