//! Status command implementation.
//!
//! Displays every managed installation with its active loadout, disk state
//! and backup store usage.

use anyhow::Result;
use serde::Serialize;

use loadsync_lib::db::InstallationRecord;
use loadsync_lib::sync::InstallationState;

use super::Context;
use crate::output::{format_bytes, format_timestamp, print_info, print_json, print_stat, print_success, symbols};

#[derive(Debug, Serialize)]
struct InstallationStatus {
  id: String,
  game: String,
  state: InstallationState,
  active_loadout: Option<String>,
  game_version: Option<String>,
  files: usize,
  bytes: u64,
  loadouts: usize,
  last_applied_at: Option<i64>,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
  data_dir: String,
  installations: Vec<InstallationStatus>,
  store_blobs: usize,
  store_bytes: u64,
}

fn status_of(ctx: &Context, record: &InstallationRecord) -> InstallationStatus {
  let id = record.installation.id;
  let state = ctx.sync.state(id);
  let disk = ctx.sync.db().latest_disk_state(id);
  let loadouts = ctx.sync.db().loadouts_for(id);
  let active = match state {
    InstallationState::Active(pointer) => loadouts.iter().find(|l| l.id == pointer.loadout),
    _ => None,
  };

  InstallationStatus {
    id: id.to_string(),
    game: record.installation.game.clone(),
    state,
    active_loadout: active.map(|l| l.name.clone()),
    game_version: record.metadata.game_version.clone(),
    files: disk.as_ref().map_or(0, |d| d.len()),
    bytes: disk.as_ref().map_or(0, |d| d.total_size()),
    loadouts: loadouts.len(),
    last_applied_at: active.and_then(|l| l.last_applied_at).map(|t| t.timestamp()),
  }
}

pub fn cmd_status(ctx: &Context, installation: Option<&str>) -> Result<()> {
  let records = match installation {
    Some(query) => vec![ctx.installation(query)?],
    None => ctx.sync.db().installations(),
  };
  let installations: Vec<InstallationStatus> = records.iter().map(|r| status_of(ctx, r)).collect();
  let stats = ctx.store.stats();

  if ctx.output.is_json() {
    return print_json(&StatusOutput {
      data_dir: ctx.config.data_dir().display().to_string(),
      installations,
      store_blobs: stats.blobs,
      store_bytes: stats.bytes,
    });
  }

  if installations.is_empty() {
    print_info("No managed installations. Run 'loadsync manage <GAME_DIR>' to start.");
  }
  for (record, status) in records.iter().zip(&installations) {
    print_success(&format!("{} [{}]", status.game, status.id));
    match &status.active_loadout {
      Some(name) => print_stat("Active loadout", name),
      None => print_stat("Active loadout", "none (initial files)"),
    }
    print_stat("Game version", status.game_version.as_deref().unwrap_or("unknown"));
    print_stat("Files", &format!("{} ({})", status.files, format_bytes(status.bytes)));
    print_stat("Loadouts", &status.loadouts.to_string());
    if let Some(at) = status.last_applied_at {
      print_stat("Last applied", &format_timestamp(at));
    }
    if ctx.verbose {
      for loadout in ctx.sync.db().loadouts_for(record.installation.id) {
        println!("    {} {} ({})", symbols::INFO, loadout.name, loadout.short_name);
      }
    }
    println!();
  }

  print_stat("Data dir", &ctx.config.data_dir().display().to_string());
  print_stat("Store usage", &format!("{} blob(s), {}", stats.blobs, format_bytes(stats.bytes)));
  Ok(())
}
