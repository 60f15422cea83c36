use std::path::PathBuf;

use crate::logging::LogFormat;

/// Default directory for `<name>.pid` lock files, relative to the launch
/// directory.
pub const DEFAULT_PID_DIR: &str = "./.pids";

/// Default directory for `<name>.log` files, relative to the launch directory.
pub const DEFAULT_LOG_DIR: &str = "./logs";

/// Default umask applied by the detached daemon, in octal notation.
pub const DEFAULT_UMASK: &str = "077";

/// Default log filter expression written to the daemon log.
pub const DEFAULT_LOG_FILTER: &str = "debug";

/// Default PID directory.
pub fn default_pid_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PID_DIR)
}

/// Default log directory.
pub fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

/// Default working directory for the daemon: wherever it was launched from.
pub fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

/// Owned umask value used where allocation is required (e.g. serde).
pub fn default_umask_string() -> String {
    DEFAULT_UMASK.to_owned()
}

/// Default log filter expression used by the daemon log.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default log file format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
