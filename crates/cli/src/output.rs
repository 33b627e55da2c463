//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, human-readable byte/time formatting, and plan rendering.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use loadsync_lib::sync::{ApplyPlan, ApplyStep, Classification, Diagnostic, PathDiff, PlanSummary};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
  pub const INGEST: &str = "←";
}

pub fn format_bytes(bytes: u64) -> String {
  const KB: u64 = 1024;
  const MB: u64 = KB * 1024;
  const GB: u64 = MB * 1024;

  if bytes >= GB {
    format!("{:.1} GB", bytes as f64 / GB as f64)
  } else if bytes >= MB {
    format!("{:.1} MB", bytes as f64 / MB as f64)
  } else if bytes >= KB {
    format!("{:.1} KB", bytes as f64 / KB as f64)
  } else {
    format!("{} B", bytes)
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

/// Absolute time plus a coarse "how long ago", for a unix timestamp.
pub fn format_timestamp(timestamp: i64) -> String {
  let Ok(secs) = u64::try_from(timestamp) else {
    return format!("timestamp: {}", timestamp);
  };
  let at = UNIX_EPOCH + Duration::from_secs(secs);
  let absolute = humantime::format_rfc3339_seconds(at);
  match SystemTime::now().duration_since(at) {
    Ok(elapsed) => {
      let secs = elapsed.as_secs();
      let ago = if secs < 60 {
        format!("{} seconds ago", secs)
      } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
      } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
      } else {
        format!("{} days ago", secs / 86400)
      };
      format!("{} ({})", absolute, ago)
    }
    Err(_) => absolute.to_string(),
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Symbol shown next to a changed path.
pub fn classification_symbol(classification: Classification) -> &'static str {
  match classification {
    Classification::Missing => symbols::ADD,
    Classification::RemovedFromLoadout | Classification::ExternallyDeleted => symbols::REMOVE,
    Classification::Untracked => symbols::INGEST,
    _ => symbols::MODIFY,
  }
}

/// One step of a plan, for JSON output.
#[derive(Debug, Serialize)]
pub struct StepView {
  pub kind: &'static str,
  pub path: String,
}

impl From<&ApplyStep> for StepView {
  fn from(step: &ApplyStep) -> Self {
    Self {
      kind: step.kind(),
      path: step.path().to_string(),
    }
  }
}

/// JSON shape of a plan.
#[derive(Debug, Serialize)]
pub struct PlanView<'a> {
  pub summary: PlanSummary,
  pub changes: Vec<&'a PathDiff>,
  pub diagnostics: &'a [Diagnostic],
  pub steps: Vec<StepView>,
}

impl<'a> From<&'a ApplyPlan> for PlanView<'a> {
  fn from(plan: &'a ApplyPlan) -> Self {
    Self {
      summary: plan.summary(),
      changes: plan.changes().collect(),
      diagnostics: &plan.diagnostics,
      steps: plan.steps.iter().map(StepView::from).collect(),
    }
  }
}

/// Print changed paths, then the steps when `verbose`, then diagnostics.
pub fn print_plan(plan: &ApplyPlan, verbose: bool) {
  for diff in plan.changes() {
    let symbol = classification_symbol(diff.classification);
    println!(
      "  {} {} {}",
      symbol.if_supports_color(Stream::Stdout, |s| s.bold()),
      diff.path,
      format!("({})", diff.classification).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }

  if verbose && !plan.steps.is_empty() {
    println!();
    println!("Steps:");
    for step in &plan.steps {
      println!("  {} {:<9} {}", symbols::INFO, step.kind(), step.path());
    }
  }

  for diagnostic in &plan.diagnostics {
    print_warning(&diagnostic.to_string());
  }
}

pub fn print_summary(summary: &PlanSummary) {
  print_stat("Backups", &summary.backups.to_string());
  print_stat("Deletes", &summary.deletes.to_string());
  print_stat("Copies", &summary.copies.to_string());
  print_stat("Generated", &summary.generated.to_string());
  print_stat("Loadout edits", &summary.loadout_edits.to_string());
}
