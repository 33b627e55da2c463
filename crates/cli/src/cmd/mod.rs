mod gc;
mod loadout;
mod manage;
mod mods;
mod plan;
mod status;
mod sync;

pub use gc::cmd_gc;
pub use loadout::{LoadoutCommand, cmd_loadout};
pub use manage::{cmd_manage, cmd_rescan, cmd_unmanage, parse_location};
pub use mods::{ModCommand, cmd_mod};
pub use plan::cmd_plan;
pub use status::cmd_status;
pub use sync::{cmd_activate, cmd_deactivate, cmd_sync};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tracing::debug;

use loadsync_lib::config::SyncConfig;
use loadsync_lib::db::{Database, InstallationRecord};
use loadsync_lib::generated::{GeneratorRegistry, PluginsTxtProvider};
use loadsync_lib::loadout::{Loadout, Mod};
use loadsync_lib::lock::{DataLock, LockMode};
use loadsync_lib::store::FileBackupStore;
use loadsync_lib::sync::Synchronizer;

use crate::output::OutputFormat;

/// Everything a command needs: the synchronizer over the on-disk database
/// and store, plus output settings.
pub struct Context {
  pub sync: Synchronizer,
  pub config: SyncConfig,
  pub store: Arc<FileBackupStore>,
  pub output: OutputFormat,
  pub verbose: bool,
}

impl Context {
  /// Load config (file, then environment, then `data_dir`), lock the data
  /// dir for `command`, then open the database and backup store under it.
  pub fn load(
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    output: OutputFormat,
    verbose: bool,
    lock_mode: LockMode,
    command: &str,
  ) -> Result<Self> {
    let mut config = SyncConfig::load(config_path.as_deref())
      .context("Failed to load config")?
      .with_env_overrides()
      .context("Invalid environment override")?;
    if let Some(dir) = data_dir {
      config.data_dir = Some(dir);
    }

    let data_lock = DataLock::acquire(&config.data_dir(), lock_mode, command).context("Failed to lock data directory")?;
    let db_dir = config.db_dir();
    let db = Database::open_locked(&db_dir, data_lock)
      .with_context(|| format!("Failed to open database at {}", db_dir.display()))?;
    let store_dir = config.store_dir();
    let store = Arc::new(
      FileBackupStore::open(&store_dir)
        .with_context(|| format!("Failed to open backup store at {}", store_dir.display()))?,
    );

    let mut generators = GeneratorRegistry::new();
    generators.register(Arc::new(PluginsTxtProvider::new(config.load_order.clone())));
    let options = config.synchronizer_options().context("Invalid config")?;
    debug!(data_dir = %config.data_dir().display(), generators = ?generators, "loaded context");

    let sync = Synchronizer::new(Arc::new(db), store.clone())
      .with_generators(generators)
      .with_options(options);

    Ok(Self {
      sync,
      config,
      store,
      output,
      verbose,
    })
  }

  /// Find an installation by id, id prefix or game name.
  pub fn installation(&self, query: &str) -> Result<InstallationRecord> {
    let candidates = self.sync.db().installations();
    pick_one("installation", query, candidates, |r| {
      r.installation.id.to_string().starts_with(query) || r.installation.game.eq_ignore_ascii_case(query)
    })
  }

  /// Find a loadout by id, id prefix or name, across all installations.
  pub fn loadout(&self, query: &str) -> Result<Arc<Loadout>> {
    let candidates: Vec<Arc<Loadout>> = self
      .sync
      .db()
      .installations()
      .iter()
      .flat_map(|r| self.sync.db().loadouts_for(r.installation.id))
      .collect();
    pick_one("loadout", query, candidates, |l| {
      l.id.to_string().starts_with(query) || l.name.eq_ignore_ascii_case(query)
    })
  }
}

/// Find a mod of `loadout` by id, id prefix or name.
pub fn find_mod<'a>(loadout: &'a Loadout, query: &str) -> Result<&'a Mod> {
  let candidates: Vec<&Mod> = loadout.mods.iter().collect();
  pick_one("mod", query, candidates, |m| {
    m.id.to_string().starts_with(query) || m.name.eq_ignore_ascii_case(query)
  })
}

fn pick_one<T>(kind: &str, query: &str, candidates: Vec<T>, matches: impl Fn(&T) -> bool) -> Result<T> {
  if query.is_empty() {
    bail!("Empty {} name", kind);
  }
  let mut found: Vec<T> = candidates.into_iter().filter(|c| matches(c)).collect();
  match found.len() {
    0 => bail!("No {} matches '{}'", kind, query),
    1 => Ok(found.remove(0)),
    n => bail!("'{}' matches {} {}s; use a longer id", query, n, kind),
  }
}
