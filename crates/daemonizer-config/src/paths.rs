//! Derives the per-daemon artefact paths shared by every lifecycle command.
//!
//! Lifecycle commands run from arbitrary directories and the detached daemon
//! changes its working directory before it releases its lock, so every path is
//! resolved to an absolute location up front.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Canonical paths for the artefacts of one named daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    name: String,
    pid_dir: PathBuf,
    log_dir: PathBuf,
    working_directory: PathBuf,
    pid_path: PathBuf,
    log_path: PathBuf,
}

impl DaemonPaths {
    /// Derives the paths for `name`, creating the PID and log directories on
    /// demand.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, PathsError> {
        validate_name(name)?;
        let pid_dir = prepare_directory(&config.pid_dir)?;
        let log_dir = prepare_directory(&config.log_dir)?;
        let working_directory = config.working_directory.canonicalize().map_err(|source| {
            PathsError::WorkingDirectory {
                path: config.working_directory.clone(),
                source,
            }
        })?;
        Ok(Self {
            name: name.to_owned(),
            pid_path: pid_dir.join(format!("{name}.pid")),
            log_path: log_dir.join(format!("{name}.log")),
            pid_dir,
            log_dir,
            working_directory,
        })
    }

    /// Name of the daemon the paths belong to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding lock files.
    pub fn pid_dir(&self) -> &Path {
        self.pid_dir.as_path()
    }

    /// Directory holding log files.
    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_path()
    }

    /// Directory the daemon changes into after detaching.
    pub fn working_directory(&self) -> &Path {
        self.working_directory.as_path()
    }

    /// Path to the `<name>.pid` lock file.
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the default `<name>.log` file.
    pub fn log_path(&self) -> &Path {
        self.log_path.as_path()
    }
}

fn validate_name(name: &str) -> Result<(), PathsError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(PathsError::InvalidName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

fn prepare_directory(path: &Path) -> Result<PathBuf, PathsError> {
    fs::create_dir_all(path).map_err(|source| PathsError::Directory {
        path: path.to_path_buf(),
        source,
    })?;
    path.canonicalize().map_err(|source| PathsError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

/// Errors raised while deriving daemon paths.
#[derive(Debug, Error)]
pub enum PathsError {
    /// The daemon name cannot be used as a file stem.
    #[error("daemon name '{name}' must be a non-empty file name without separators")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// Creating or resolving a PID or log directory failed.
    #[error("failed to prepare directory '{path}': {source}")]
    Directory {
        /// Directory that could not be prepared.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The configured working directory does not resolve.
    #[error("working directory '{path}' is not accessible: {source}")]
    WorkingDirectory {
        /// Configured working directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn config_in_temp() -> (TempDir, Config) {
        let dir = TempDir::new().expect("create temp dir");
        let mut config = Config::default();
        config.pid_dir = dir.path().join("run").join("pids");
        config.log_dir = dir.path().join("logs");
        config.working_directory = dir.path().to_path_buf();
        (dir, config)
    }

    #[rstest]
    fn derives_named_artefacts(config_in_temp: (TempDir, Config)) {
        let (_dir, config) = config_in_temp;
        let paths = DaemonPaths::from_config(&config, "demo").expect("paths should derive");
        assert!(paths.pid_dir().is_dir(), "pid dir should be created");
        assert!(paths.log_dir().is_dir(), "log dir should be created");
        assert!(paths.pid_path().ends_with("pids/demo.pid"));
        assert!(paths.log_path().ends_with("logs/demo.log"));
        assert!(paths.pid_path().is_absolute());
        assert_eq!(paths.name(), "demo");
    }

    #[rstest]
    #[case("")]
    #[case("..")]
    #[case("a/b")]
    fn rejects_unusable_names(config_in_temp: (TempDir, Config), #[case] name: &str) {
        let (_dir, config) = config_in_temp;
        let error = DaemonPaths::from_config(&config, name).expect_err("name should be rejected");
        assert!(matches!(error, PathsError::InvalidName { .. }), "{error}");
    }

    #[rstest]
    fn rejects_missing_working_directory(config_in_temp: (TempDir, Config)) {
        let (dir, mut config) = config_in_temp;
        config.working_directory = dir.path().join("absent");
        let error =
            DaemonPaths::from_config(&config, "demo").expect_err("missing workdir should fail");
        assert!(
            matches!(error, PathsError::WorkingDirectory { .. }),
            "{error}"
        );
    }
}
