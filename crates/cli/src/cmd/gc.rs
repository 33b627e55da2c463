//! `loadsync gc`: drop backup store blobs nothing refers to.

use std::time::Instant;

use anyhow::{Context as _, Result};

use super::Context;
use crate::output::{format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub async fn cmd_gc(ctx: &Context, dry_run: bool) -> Result<()> {
  let start = Instant::now();
  let result = ctx
    .sync
    .collect_garbage(dry_run)
    .await
    .context("Failed to collect garbage")?;

  if ctx.output.is_json() {
    return print_json(&result);
  }

  println!();
  if dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Garbage collection complete!");
  }
  print_stat("Blobs scanned", &result.stats.blobs_scanned.to_string());
  print_stat("Blobs removed", &result.stats.blobs_deleted.to_string());
  print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}
