//! `loadsync sync`, `activate` and `deactivate`.

use std::time::Instant;

use anyhow::{Context as _, Result};
use serde::Serialize;

use loadsync_lib::sync::{ExecutionReport, SyncOutcome};

use super::Context;
use crate::output::{
  PlanView, format_duration, print_info, print_json, print_plan, print_stat, print_success, print_summary,
};

#[derive(Serialize)]
struct OutcomeView<'a> {
  tx: Option<String>,
  loadout: Option<String>,
  revision: Option<u64>,
  plan: PlanView<'a>,
  report: &'a ExecutionReport,
}

fn print_outcome(ctx: &Context, verb: &str, target: &str, outcome: &SyncOutcome, start: Instant) -> Result<()> {
  if ctx.output.is_json() {
    return print_json(&OutcomeView {
      tx: outcome.tx.map(|tx| tx.to_string()),
      loadout: outcome.loadout.as_ref().map(|l| l.id.to_string()),
      revision: outcome.loadout.as_ref().map(|l| l.revision),
      plan: PlanView::from(&outcome.plan),
      report: &outcome.report,
    });
  }

  if outcome.tx.is_none() {
    print_info(&format!("{} is already in sync", target));
    return Ok(());
  }

  print_plan(&outcome.plan, ctx.verbose);
  println!();
  print_success(&format!("{} {}", verb, target));
  print_summary(&outcome.plan.summary());
  print_stat("Directories pruned", &outcome.report.pruned_dirs.len().to_string());
  if let Some(loadout) = &outcome.loadout {
    print_stat("Revision", &loadout.revision.to_string());
  }
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}

/// Fold external changes into a loadout and apply it, switching to it when
/// another loadout is active.
pub async fn cmd_sync(ctx: &Context, loadout: &str) -> Result<()> {
  let start = Instant::now();
  let target = ctx.loadout(loadout)?;
  let outcome = ctx
    .sync
    .synchronize(target.id)
    .await
    .context("Failed to synchronize loadout")?;
  print_outcome(ctx, "Synchronized", &target.name, &outcome, start)
}

/// Apply a loadout exactly, overwriting external edits to its files.
pub async fn cmd_activate(ctx: &Context, loadout: &str) -> Result<()> {
  let start = Instant::now();
  let target = ctx.loadout(loadout)?;
  let outcome = ctx
    .sync
    .activate_loadout(target.id)
    .await
    .context("Failed to activate loadout")?;
  print_outcome(ctx, "Activated", &target.name, &outcome, start)
}

/// Synchronize the active loadout, then restore the initial game files.
pub async fn cmd_deactivate(ctx: &Context, installation: &str) -> Result<()> {
  let start = Instant::now();
  let record = ctx.installation(installation)?;
  let outcome = ctx
    .sync
    .deactivate_current_loadout(record.installation.id)
    .await
    .context("Failed to deactivate loadout")?;
  print_outcome(ctx, "Restored initial files of", &record.installation.game, &outcome, start)
}
