//! Synchronizer configuration.
//!
//! Loaded from a JSON file, with environment overrides applied on top:
//!
//! ```json
//! {
//!   "parallelism": 8,
//!   "io_retries": 3,
//!   "retry_delay_ms": 50,
//!   "force_rehash": false,
//!   "ignored_paths": ["{Game}/logs"],
//!   "data_dir": "/var/lib/loadsync",
//!   "load_order": { "pinned": ["Skyrim.esm"] }
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{CONFIG_FILE, DATA_DIR_ENV, DB_DIR, PARALLELISM_ENV, STORE_DIR};
use crate::disk_state::ScanOptions;
use crate::generated::LoadOrderConfig;
use crate::paths::{GamePath, PathError};
use crate::platform::paths::{config_dir, data_dir};
use crate::sync::{ExecuteConfig, SynchronizerOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid ignored path {path:?}: {source}")]
  IgnoredPath {
    path: String,
    #[source]
    source: PathError,
  },

  #[error("invalid value for {var}: {value:?}")]
  InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Worker count for hashing and plan execution.
  pub parallelism: usize,
  pub io_retries: u32,
  pub retry_delay_ms: u64,
  /// Rehash every file on each scan.
  pub force_rehash: bool,
  /// Path prefixes in `{Location}/relative` form that are never scanned or
  /// touched.
  pub ignored_paths: Vec<String>,
  /// Root for the database and backup store; the platform data dir if unset.
  pub data_dir: Option<PathBuf>,
  pub load_order: LoadOrderConfig,
}

impl Default for SyncConfig {
  fn default() -> Self {
    let execute = ExecuteConfig::default();
    Self {
      parallelism: execute.parallelism,
      io_retries: execute.io_retries,
      retry_delay_ms: execute.retry_delay.as_millis() as u64,
      force_rehash: false,
      ignored_paths: Vec::new(),
      data_dir: None,
      load_order: LoadOrderConfig::default(),
    }
  }
}

impl SyncConfig {
  /// Load `path`, or the default config file when `None`. A missing default
  /// file yields the defaults; a missing explicit file is an error.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let (path, explicit) = match path {
      Some(path) => (path.to_path_buf(), true),
      None => (config_dir().join(CONFIG_FILE), false),
    };

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Self::default());
      }
      Err(source) => return Err(ConfigError::Read { path, source }),
    };
    let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  /// Apply `LOADSYNC_DATA_DIR` and `LOADSYNC_PARALLELISM`.
  pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
      self.data_dir = Some(PathBuf::from(dir));
    }
    if let Ok(value) = std::env::var(PARALLELISM_ENV) {
      self.parallelism = value
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or(ConfigError::InvalidEnv {
          var: PARALLELISM_ENV,
          value,
        })?;
    }
    Ok(self)
  }

  pub fn data_dir(&self) -> PathBuf {
    self.data_dir.clone().unwrap_or_else(data_dir)
  }

  pub fn store_dir(&self) -> PathBuf {
    self.data_dir().join(STORE_DIR)
  }

  pub fn db_dir(&self) -> PathBuf {
    self.data_dir().join(DB_DIR)
  }

  pub fn ignored(&self) -> Result<Vec<GamePath>, ConfigError> {
    self
      .ignored_paths
      .iter()
      .map(|raw| {
        raw.parse::<GamePath>().map_err(|source| ConfigError::IgnoredPath {
          path: raw.clone(),
          source,
        })
      })
      .collect()
  }

  pub fn scan_options(&self) -> Result<ScanOptions, ConfigError> {
    Ok(ScanOptions {
      parallelism: self.parallelism.max(1),
      force_rehash: self.force_rehash,
      ignored: self.ignored()?,
    })
  }

  pub fn execute_config(&self) -> ExecuteConfig {
    ExecuteConfig {
      parallelism: self.parallelism.max(1),
      io_retries: self.io_retries,
      retry_delay: Duration::from_millis(self.retry_delay_ms),
    }
  }

  pub fn synchronizer_options(&self) -> Result<SynchronizerOptions, ConfigError> {
    Ok(SynchronizerOptions {
      scan: self.scan_options()?,
      execute: self.execute_config(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  #[test]
  fn partial_file_keeps_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.json");
    fs::write(&path, r#"{ "io_retries": 7, "ignored_paths": ["{Game}/logs"] }"#).unwrap();

    let config = SyncConfig::load(Some(&path)).unwrap();
    assert_eq!(config.io_retries, 7);
    assert_eq!(config.retry_delay_ms, SyncConfig::default().retry_delay_ms);
    assert_eq!(config.ignored().unwrap(), vec![GamePath::game("logs").unwrap()]);
  }

  #[test]
  fn explicit_missing_file_is_an_error() {
    let temp = TempDir::new().unwrap();
    let err = SyncConfig::load(Some(&temp.path().join("nope.json"))).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }

  #[test]
  fn escaping_ignored_path_is_rejected() {
    let config = SyncConfig {
      ignored_paths: vec!["{Game}/../outside".to_string()],
      ..SyncConfig::default()
    };
    assert!(matches!(config.ignored(), Err(ConfigError::IgnoredPath { .. })));
  }

  #[test]
  #[serial]
  fn env_overrides_data_dir_and_parallelism() {
    temp_env::with_vars(
      [(DATA_DIR_ENV, Some("/tmp/loadsync-data")), (PARALLELISM_ENV, Some("3"))],
      || {
        let config = SyncConfig::default().with_env_overrides().unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/loadsync-data"));
        assert_eq!(config.store_dir(), PathBuf::from("/tmp/loadsync-data/store"));
        assert_eq!(config.execute_config().parallelism, 3);
      },
    );
  }

  #[test]
  #[serial]
  fn invalid_parallelism_is_rejected() {
    temp_env::with_var(PARALLELISM_ENV, Some("zero"), || {
      let err = SyncConfig::default().with_env_overrides().unwrap_err();
      assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    });
  }

  #[test]
  #[serial]
  #[cfg(not(windows))]
  fn default_data_dir_follows_xdg() {
    temp_env::with_vars(
      [(DATA_DIR_ENV, None), ("XDG_DATA_HOME", Some("/tmp/xdg-data"))],
      || {
        let config = SyncConfig::default().with_env_overrides().unwrap();
        assert_eq!(config.db_dir(), PathBuf::from("/tmp/xdg-data/loadsync/db"));
      },
    );
  }
}
