//! File-backed PID lock marking a named daemon as running.
//!
//! The lock file holds the decimal pid of the daemon followed by a newline.
//! Acquisition stages the pid in a private temporary file and hard-links it
//! into place: `link(2)` refuses to replace an existing entry, so exactly one
//! of several racing processes wins and readers never observe a half-written
//! lock.
//!
//! Every mutation runs under an exclusive `flock(2)` on the lock directory.
//! Checking which pid a file records and removing it is therefore a single
//! step with respect to other lifecycles, so a launcher breaking a stale lock
//! or a daemon winding down never deletes a lock written in between.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tempfile::Builder;
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const LOCK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lock");

/// Observed state of a lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No lock file exists.
    Unlocked,
    /// The lock file names a live process.
    Held {
        /// Recorded daemon pid.
        pid: u32,
    },
    /// The lock file names a process that no longer exists.
    Stale {
        /// Recorded pid of the vanished daemon.
        pid: u32,
    },
}

/// Errors raised while inspecting or mutating a lock file.
#[derive(Debug, Error)]
pub enum PidLockError {
    /// Another lock already exists at the path.
    #[error("lock file '{path}' is already held{}", describe_holder(.pid))]
    AlreadyLocked {
        /// Lock file path.
        path: PathBuf,
        /// Pid recorded by the existing lock, when readable.
        pid: Option<u32>,
    },
    /// The lock file does not contain a usable pid.
    #[error("lock file '{path}' is corrupt: expected a process id, found {content:?}")]
    Corrupt {
        /// Lock file path.
        path: PathBuf,
        /// Raw file content.
        content: String,
    },
    /// Reading the lock file failed.
    #[error("failed to read lock file '{path}': {source}")]
    Read {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Creating the lock file failed for a reason other than contention.
    #[error("failed to create lock file '{path}': {source}")]
    Create {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing the lock file failed.
    #[error("failed to remove lock file '{path}': {source}")]
    Release {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serialising access through the lock directory failed.
    #[error("failed to lock directory '{path}': {source}")]
    Guard {
        /// Directory holding the lock file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Probing the recorded process failed.
    #[error("failed to check process {pid}: {source}")]
    Probe {
        /// Pid that failed to probe.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

fn describe_holder(pid: &Option<u32>) -> String {
    pid.map(|pid| format!(" by pid {pid}")).unwrap_or_default()
}

/// Exclusive lock recording which process runs a named daemon.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    acquired: Option<u32>,
}

impl PidLock {
    /// Creates a handle for the lock file at `path`. Nothing is touched on
    /// disk until [`PidLock::acquire`] is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            acquired: None,
        }
    }

    /// Path to the lock file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Pid written by this handle, if it acquired the lock.
    pub const fn acquired_pid(&self) -> Option<u32> {
        self.acquired
    }

    /// Returns the pid recorded in the lock file, or `None` when no lock
    /// exists.
    pub fn read_pid(&self) -> Result<Option<u32>, PidLockError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PidLockError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        parse_pid(&content)
            .map(Some)
            .ok_or_else(|| PidLockError::Corrupt {
                path: self.path.clone(),
                content,
            })
    }

    /// Classifies the lock as unlocked, held by a live process, or stale.
    pub fn state(&self) -> Result<LockState, PidLockError> {
        let Some(pid) = self.read_pid()? else {
            return Ok(LockState::Unlocked);
        };
        if process_alive(pid)? {
            Ok(LockState::Held { pid })
        } else {
            Ok(LockState::Stale { pid })
        }
    }

    /// Returns true when the lock file names a live process.
    pub fn is_locked(&self) -> Result<bool, PidLockError> {
        Ok(matches!(self.state()?, LockState::Held { .. }))
    }

    /// Atomically creates the lock file recording `pid`.
    ///
    /// Fails with [`PidLockError::AlreadyLocked`] whenever a lock file exists,
    /// stale or not; stale entries must be cleared with
    /// [`PidLock::break_stale`] first.
    pub fn acquire(&mut self, pid: u32) -> Result<(), PidLockError> {
        let create_error = |source| PidLockError::Create {
            path: self.path.clone(),
            source,
        };
        let prefix = format!(
            ".{}.",
            self.path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("daemon")
        );

        let mut builder = Builder::new();
        builder.prefix(&prefix).suffix(".tmp");
        #[cfg(unix)]
        {
            builder.permissions(fs::Permissions::from_mode(0o600));
        }
        let mut staged = builder.tempfile_in(self.directory()).map_err(create_error)?;
        writeln!(staged, "{pid}").map_err(create_error)?;
        staged.as_file().sync_all().map_err(create_error)?;

        let _guard = self.guard()?;
        match fs::hard_link(staged.path(), &self.path) {
            Ok(()) => {
                self.acquired = Some(pid);
                info!(
                    target: LOCK_TARGET,
                    pid,
                    file = %self.path.display(),
                    "acquired pid lock"
                );
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                let holder = self.read_pid().ok().flatten();
                debug!(
                    target: LOCK_TARGET,
                    pid,
                    holder,
                    file = %self.path.display(),
                    "pid lock contended"
                );
                Err(PidLockError::AlreadyLocked {
                    path: self.path.clone(),
                    pid: holder,
                })
            }
            Err(source) => Err(create_error(source)),
        }
    }

    /// Removes the lock file whoever holds it. Succeeds when it is already
    /// gone.
    pub fn release(&mut self) -> Result<(), PidLockError> {
        self.acquired = None;
        let _guard = match self.guard() {
            Ok(guard) => guard,
            Err(PidLockError::Guard { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        self.remove()
    }

    /// Removes the lock file only while it still records the pid this handle
    /// acquired. Returns whether a file was removed.
    pub fn release_owned(&mut self) -> Result<bool, PidLockError> {
        let Some(owned) = self.acquired else {
            return Ok(false);
        };
        let _guard = self.guard()?;
        match self.read_pid() {
            Ok(Some(pid)) if pid == owned => {
                self.acquired = None;
                self.remove()?;
                Ok(true)
            }
            Ok(recorded) => {
                self.acquired = None;
                debug!(
                    target: LOCK_TARGET,
                    owned,
                    recorded,
                    "pid lock no longer ours; leaving it in place"
                );
                Ok(false)
            }
            Err(PidLockError::Corrupt { .. }) => {
                self.acquired = None;
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Removes the lock file if it still names `pid` and that process is gone.
    /// Returns whether a file was removed.
    pub fn break_stale(&mut self, pid: u32) -> Result<bool, PidLockError> {
        let _guard = self.guard()?;
        if self.read_pid()? != Some(pid) || process_alive(pid)? {
            return Ok(false);
        }
        warn!(
            target: LOCK_TARGET,
            pid,
            file = %self.path.display(),
            "removing stale pid lock"
        );
        self.remove()?;
        Ok(true)
    }

    /// Unlinks the lock file. Callers hold the directory guard.
    fn remove(&self) -> Result<(), PidLockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(
                    target: LOCK_TARGET,
                    file = %self.path.display(),
                    "released pid lock"
                );
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PidLockError::Release {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Takes the exclusive directory lock, released when the guard drops.
    fn guard(&self) -> Result<Flock<File>, PidLockError> {
        let directory = self.directory();
        let guard_error = |source| PidLockError::Guard {
            path: directory.to_path_buf(),
            source,
        };
        let handle = File::open(directory).map_err(guard_error)?;
        Flock::lock(handle, FlockArg::LockExclusive)
            .map_err(|(_, errno)| guard_error(io::Error::from(errno)))
    }
}

/// Parses lock file content into a pid usable with `kill(2)`. Only plain
/// decimal digits are accepted.
fn parse_pid(content: &str) -> Option<u32> {
    let digits = content.trim();
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let pid = digits.parse::<u32>().ok()?;
    to_os_pid(pid).map(|_| pid)
}

/// Converts a recorded pid into a positive OS pid; zero and values beyond
/// `i32::MAX` would address process groups.
pub(crate) fn to_os_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

/// Probes whether `pid` names a live process.
pub fn process_alive(pid: u32) -> Result<bool, PidLockError> {
    let Some(os_pid) = to_os_pid(pid) else {
        return Ok(false);
    };
    match kill(os_pid, None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(PidLockError::Probe { pid, source }),
    }
}
