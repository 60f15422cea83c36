//! Error types for daemon lifecycle operations.

use std::io;

use thiserror::Error;

use daemonizer_config::{PathsError, UmaskError};

use super::types::WorkloadError;
use crate::lock::PidLockError;
use crate::log_stream::LogStreamError;
use crate::process::{DetachError, ShutdownError};
use crate::telemetry::TelemetryError;

/// Errors raised while executing lifecycle commands.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `start` needed a workload but none was registered.
    #[error("no workload registered; call register_func before start")]
    MissingWorkload,
    /// Inspecting or updating the PID lock failed.
    #[error(transparent)]
    Lock(#[from] PidLockError),
    /// Detaching the daemon failed.
    #[error("failed to detach daemon: {source}")]
    Detach {
        /// Underlying detachment error.
        #[from]
        source: DetachError,
    },
    /// Installing stop handlers in the daemon failed.
    #[error("failed to install stop handlers: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[from]
        source: ShutdownError,
    },
    /// The workload returned an error.
    #[error("workload failed: {source}")]
    Workload {
        /// Error reported by the workload.
        #[source]
        source: WorkloadError,
    },
    /// The workload panicked.
    #[error("workload panicked: {message}")]
    WorkloadPanic {
        /// Panic payload rendered as text.
        message: String,
    },
    /// Writing operator output failed.
    #[error("failed to write lifecycle output: {0}")]
    Output(#[source] io::Error),
    /// Building the log dispatcher failed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// Opening the log file failed.
    #[error(transparent)]
    LogStream(#[from] LogStreamError),
    /// Deriving the daemon paths failed.
    #[error(transparent)]
    Paths(#[from] PathsError),
    /// The configured umask is unusable.
    #[error("invalid umask: {source}")]
    Umask {
        /// Underlying parse error.
        #[from]
        source: UmaskError,
    },
}
