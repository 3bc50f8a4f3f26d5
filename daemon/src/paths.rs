/// Canonical file paths for lowmemd data files.
///
/// Both files live under the data directory (default /var/lib/lowmemd,
/// overridable via $LOWMEMD_DIR for unprivileged runs):
///   - config.toml  Written by the operator, read by the daemon.
///   - status.toml  Written by the daemon, read by external observers.
use std::path::PathBuf;

const DATA_DIR_ENV: &str = "LOWMEMD_DIR";
const DEFAULT_DATA_DIR: &str = "/var/lib/lowmemd";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the daemon data directory: $LOWMEMD_DIR, or /var/lib/lowmemd.
pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Returns the full path to the config file: <data dir>/config.toml.
pub fn config_file_path() -> PathBuf {
    data_dir().join(CONFIG_FILE_NAME)
}

/// Returns the full path to the status file: <data dir>/status.toml.
pub fn status_file_path() -> PathBuf {
    data_dir().join(STATUS_FILE_NAME)
}
