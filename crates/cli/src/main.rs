mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cmd::{
  Context, LoadoutCommand, ModCommand, cmd_activate, cmd_deactivate, cmd_gc, cmd_loadout, cmd_manage, cmd_mod,
  cmd_plan, cmd_rescan, cmd_status, cmd_sync, cmd_unmanage, parse_location,
};
use loadsync_lib::lock::LockMode;
use output::{OutputFormat, print_error};

/// loadsync - Keep game folders in sync with mod loadouts
#[derive(Parser)]
#[command(name = "loadsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Directory holding the database and backup store
  #[arg(long, global = true, value_name = "DIR")]
  data_dir: Option<PathBuf>,

  /// Config file (default: config.json in the user config dir)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Output format
  #[arg(short = 'o', long, global = true, value_enum, default_value = "text")]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Start managing a game folder, archiving its current files
  Manage {
    /// The game's install directory
    game_dir: PathBuf,

    /// Display name of the game
    #[arg(long, default_value = "Game")]
    game: String,

    /// Additional location as NAME=PATH (e.g. Saves=~/Documents/MyGame)
    #[arg(long = "location", value_name = "NAME=PATH", value_parser = parse_location)]
    locations: Vec<(String, PathBuf)>,
  },

  /// Restore a game folder's initial files and stop managing it
  Unmanage {
    /// Installation id, id prefix or game name
    installation: String,

    /// Skip confirmation prompt
    #[arg(long)]
    force: bool,
  },

  /// Show managed installations
  Status {
    /// Installation id, id prefix or game name
    installation: Option<String>,
  },

  /// Rescan an installation's files
  Rescan {
    /// Installation id, id prefix or game name
    installation: String,
  },

  /// Manage loadouts
  #[command(subcommand)]
  Loadout(LoadoutCommand),

  /// Manage the mods of a loadout
  #[command(subcommand)]
  Mod(ModCommand),

  /// Fold external changes into a loadout and apply it
  Sync {
    /// Loadout id, id prefix or name
    loadout: String,
  },

  /// Show what sync would change (dry-run)
  Plan {
    /// Loadout id, id prefix or name
    loadout: String,
  },

  /// Apply a loadout exactly, overwriting external edits to its files
  Activate {
    /// Loadout id, id prefix or name
    loadout: String,
  },

  /// Restore the initial files of an installation
  Deactivate {
    /// Installation id, id prefix or game name
    installation: String,
  },

  /// Remove backed-up files no loadout or disk state refers to
  Gc {
    /// Show what would be removed without removing it
    #[arg(long)]
    dry_run: bool,
  },
}

impl Commands {
  fn name(&self) -> &'static str {
    match self {
      Commands::Manage { .. } => "manage",
      Commands::Unmanage { .. } => "unmanage",
      Commands::Status { .. } => "status",
      Commands::Rescan { .. } => "rescan",
      Commands::Loadout(_) => "loadout",
      Commands::Mod(_) => "mod",
      Commands::Sync { .. } => "sync",
      Commands::Plan { .. } => "plan",
      Commands::Activate { .. } => "activate",
      Commands::Deactivate { .. } => "deactivate",
      Commands::Gc { .. } => "gc",
    }
  }

  /// Read-only commands share the data dir; the rest hold it alone.
  fn lock_mode(&self) -> LockMode {
    match self {
      Commands::Status { .. }
      | Commands::Plan { .. }
      | Commands::Gc { dry_run: true }
      | Commands::Loadout(LoadoutCommand::List { .. })
      | Commands::Mod(ModCommand::List { .. }) => LockMode::Shared,
      _ => LockMode::Exclusive,
    }
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async move {
    let ctx = Context::load(
      cli.config,
      cli.data_dir,
      cli.output,
      cli.verbose,
      cli.command.lock_mode(),
      cli.command.name(),
    )?;

    // Stop between files on Ctrl-C; finished files stay consistent.
    let cancel = ctx.sync.cancellation().clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, stopping after files in flight");
        cancel.cancel();
      }
    });

    match cli.command {
      Commands::Manage {
        game_dir,
        game,
        locations,
      } => cmd_manage(&ctx, &game_dir, &game, locations).await,
      Commands::Unmanage { installation, force } => cmd_unmanage(&ctx, &installation, force).await,
      Commands::Status { installation } => cmd_status(&ctx, installation.as_deref()),
      Commands::Rescan { installation } => cmd_rescan(&ctx, &installation).await,
      Commands::Loadout(command) => cmd_loadout(&ctx, command).await,
      Commands::Mod(command) => cmd_mod(&ctx, command).await,
      Commands::Sync { loadout } => cmd_sync(&ctx, &loadout).await,
      Commands::Plan { loadout } => cmd_plan(&ctx, &loadout).await,
      Commands::Activate { loadout } => cmd_activate(&ctx, &loadout).await,
      Commands::Deactivate { installation } => cmd_deactivate(&ctx, &installation).await,
      Commands::Gc { dry_run } => cmd_gc(&ctx, dry_run).await,
    }
  })
}
