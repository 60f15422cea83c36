//! Errors surfaced while detaching a daemon from its launching process.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::lock::PidLockError;

/// Errors raised by a [`Detacher`](super::Detacher).
#[derive(Debug, Error)]
pub enum DetachError {
    /// Creating the handoff pipe failed.
    #[error("failed to create handoff pipe: {source}")]
    Pipe {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `fork(2)` failed.
    #[error("failed to fork: {source}")]
    Fork {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// `setsid(2)` failed in the intermediate child.
    #[error("failed to start a new session: {source}")]
    Session {
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Changing into the configured working directory failed.
    #[error("failed to change into working directory '{path}': {source}")]
    WorkingDirectory {
        /// Target directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Redirecting the standard streams to `/dev/null` failed.
    #[error("failed to redirect standard streams: {source}")]
    Redirect {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading or writing the handoff report failed.
    #[error("failed to exchange handoff report: {source}")]
    Handoff {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The handoff report could not be decoded.
    #[error("failed to decode handoff report: {source}")]
    HandoffDecode {
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The daemon exited before reporting back.
    #[error("daemon exited before reporting its startup outcome")]
    HandoffLost,
    /// The detached daemon reported a startup failure.
    #[error("daemon failed to start: {message}")]
    Daemon {
        /// Failure reported by the daemon.
        message: String,
    },
    /// Acquiring the lock in the current process failed.
    #[error(transparent)]
    Lock(#[from] PidLockError),
}
