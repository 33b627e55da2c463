/// Application name, used for platform data directories.
pub const APP_NAME: &str = "loadsync";

/// Directory under the data dir holding the backup store.
pub const STORE_DIR: &str = "store";

/// Directory under the data dir holding the loadout database.
pub const DB_DIR: &str = "db";

/// Number of leading hash characters used to shard blob directories.
pub const BLOB_SHARD_LEN: usize = 2;

/// Chunk size used when streaming file contents through a hasher.
pub const HASH_BUF_SIZE: usize = 64 * 1024;

/// Default configuration file name inside the config dir.
pub const CONFIG_FILE: &str = "config.json";

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "LOADSYNC_DATA_DIR";

/// Overrides worker parallelism.
pub const PARALLELISM_ENV: &str = "LOADSYNC_PARALLELISM";
