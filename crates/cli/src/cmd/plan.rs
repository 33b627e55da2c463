//! `loadsync plan`: what `sync` would do, without doing it.

use anyhow::{Context as _, Result};

use super::Context;
use crate::output::{PlanView, print_info, print_json, print_plan, print_summary};

pub async fn cmd_plan(ctx: &Context, loadout: &str) -> Result<()> {
  let target = ctx.loadout(loadout)?;
  let plan = ctx.sync.plan(target.id).await.context("Failed to compute plan")?;

  if ctx.output.is_json() {
    return print_json(&PlanView::from(&plan));
  }
  if plan.is_noop() {
    print_info(&format!("{} is in sync; nothing to do", target.name));
    return Ok(());
  }

  print_plan(&plan, ctx.verbose);
  println!();
  print_info(&format!("Synchronizing {} would:", target.name));
  print_summary(&plan.summary());
  Ok(())
}
