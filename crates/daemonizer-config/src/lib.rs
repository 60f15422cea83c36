//! Layered configuration for daemons managed by `daemonizer`.
//!
//! Values are merged from built-in defaults, an optional configuration file
//! (`--config-path` or `DAEMONIZER_CONFIG_PATH`), `DAEMONIZER_*` environment
//! variables and command-line flags, in increasing order of precedence. The
//! crate also derives the absolute PID and log file locations for a named
//! daemon so the foreground CLI and the detached process agree on them.

mod defaults;
mod logging;
mod paths;
mod umask;

use std::path::{Path, PathBuf};

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_DIR, DEFAULT_LOG_FILTER, DEFAULT_PID_DIR, DEFAULT_UMASK, default_log_dir,
    default_log_filter, default_log_filter_string, default_log_format, default_pid_dir,
    default_umask_string, default_working_directory,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use paths::{DaemonPaths, PathsError};
pub use umask::{MAX_UMASK, UmaskError, parse_umask};

/// Settings shared by every lifecycle command of a managed daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "DAEMONIZER")]
pub struct Config {
    /// Directory holding `<name>.pid` lock files.
    #[ortho_config(default = default_pid_dir())]
    pub pid_dir: PathBuf,
    /// Directory holding `<name>.log` files.
    #[ortho_config(default = default_log_dir())]
    pub log_dir: PathBuf,
    /// Directory the detached daemon changes into.
    #[ortho_config(default = default_working_directory())]
    pub working_directory: PathBuf,
    /// Umask applied by the detached daemon, in octal notation.
    #[ortho_config(default = default_umask_string())]
    pub umask: String,
    /// Tracing filter expression for the daemon log.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the daemon log.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pid_dir: default_pid_dir(),
            log_dir: default_log_dir(),
            working_directory: default_working_directory(),
            umask: default_umask_string(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Directory holding lock files, as configured.
    pub fn pid_dir(&self) -> &Path {
        self.pid_dir.as_path()
    }

    /// Directory holding log files, as configured.
    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_path()
    }

    /// Working directory of the detached daemon, as configured.
    pub fn working_directory(&self) -> &Path {
        self.working_directory.as_path()
    }

    /// Parses the configured umask into permission bits.
    pub fn umask_bits(&self) -> Result<u32, UmaskError> {
        parse_umask(&self.umask)
    }

    /// Tracing filter expression for the daemon log.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format of the daemon log.
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Derives the artefact paths for the daemon called `name`.
    pub fn paths_for(&self, name: &str) -> Result<DaemonPaths, PathsError> {
        DaemonPaths::from_config(self, name)
    }
}
