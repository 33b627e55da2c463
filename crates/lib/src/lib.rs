//! loadsync-lib: loadout synchronization for managed game installations
//!
//! This crate reconciles what a loadout says should be in a game folder with
//! what is actually there:
//! - `DiskState`: hashed snapshot of every file under an installation's locations
//! - `Loadout`: versioned, prioritized collection of mods
//! - `BackupStore`: content-addressed archive for every file the tool may overwrite
//! - `Synchronizer`: diff, plan, execute and commit, one installation at a time

pub mod config;
pub mod consts;
pub mod db;
pub mod disk_state;
pub mod gc;
pub mod generated;
pub mod loadout;
pub mod lock;
pub mod paths;
pub mod platform;
pub mod store;
pub mod sync;
pub mod types;
pub mod util;
pub mod version;
