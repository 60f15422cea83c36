//! Lifecycle command models, outcomes and IO helpers.
//!
//! Keeps the controller agnostic of concrete writers and of how outcomes are
//! worded for operators.

use std::fmt;
use std::io::Write;

use daemonizer_config::{Config, DaemonPaths, LogFormat};
use strum::{Display, EnumString};

use super::LifecycleError;
use crate::process::{LaunchMode, StopToken};

/// Supported lifecycle commands. Parsing ignores ASCII case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LifecycleCommand {
    /// Detach and run the workload unless already running.
    Start,
    /// Signal the running daemon and release its lock.
    Stop,
    /// Stop, then start in the same invocation.
    Restart,
    /// Report whether the daemon is running.
    Status,
}

/// Result of a lifecycle command, reported to the operator by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// A daemon was launched.
    Started {
        /// Pid of the new daemon.
        pid: u32,
    },
    /// A live daemon already holds the lock.
    AlreadyRunning {
        /// Pid of the running daemon, when readable.
        pid: Option<u32>,
    },
    /// The termination signal was sent and the lock released.
    Stopped {
        /// Pid that was signalled.
        pid: u32,
        /// Whether the signal reached a process.
        delivered: bool,
    },
    /// `stop` found no lock.
    NotStarted,
    /// `status` found a live daemon.
    Running {
        /// Pid of the running daemon.
        pid: u32,
    },
    /// `status` found no live daemon.
    NotRunning {
        /// Pid named by a leftover lock file, if any.
        stale: Option<u32>,
    },
    /// The workload returned inside the daemon process.
    Finished,
}

impl fmt::Display for LifecycleOutcome {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { pid } => write!(formatter, "started (pid={pid})"),
            Self::AlreadyRunning { pid: Some(pid) } => {
                write!(formatter, "already running (pid={pid})")
            }
            Self::AlreadyRunning { pid: None } => formatter.write_str("already running"),
            Self::Stopped { pid, .. } => write!(formatter, "stopped (pid={pid})"),
            Self::NotStarted => formatter.write_str("not started"),
            Self::Running { pid } => write!(formatter, "running (pid={pid})"),
            Self::NotRunning { stale: Some(pid) } => {
                write!(formatter, "not running (stale pid={pid})")
            }
            Self::NotRunning { stale: None } => formatter.write_str("not running"),
            Self::Finished => formatter.write_str("finished"),
        }
    }
}

/// Error type workloads report when they give up.
pub type WorkloadError = Box<dyn std::error::Error + Send + Sync>;

type WorkloadFn = Box<dyn FnOnce(&[String], &StopToken) -> Result<(), WorkloadError>>;

/// Registered callback plus its positional arguments.
pub(crate) struct Workload {
    pub(crate) func: WorkloadFn,
    pub(crate) args: Vec<String>,
}

impl fmt::Debug for Workload {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Workload")
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Per-daemon settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    paths: DaemonPaths,
    umask: u32,
    log_format: LogFormat,
    log_filter: String,
    mode: LaunchMode,
}

impl LifecycleSettings {
    /// Resolves the settings for the daemon called `name`, creating its PID and
    /// log directories.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, LifecycleError> {
        Ok(Self {
            paths: config.paths_for(name)?,
            umask: config.umask_bits()?,
            log_format: config.log_format(),
            log_filter: config.log_filter().to_owned(),
            mode: LaunchMode::Background,
        })
    }

    /// Selects how `start` runs the workload.
    #[must_use]
    pub fn with_mode(mut self, mode: LaunchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Name of the managed daemon.
    pub fn name(&self) -> &str {
        self.paths.name()
    }

    /// Resolved artefact paths.
    pub const fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    /// Umask applied by the daemon.
    pub const fn umask(&self) -> u32 {
        self.umask
    }

    /// Log record format.
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Log filter expression.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// How `start` runs the workload.
    pub const fn mode(&self) -> LaunchMode {
        self.mode
    }
}

/// Output handle abstracting over stdout/stderr writers.
pub struct LifecycleOutput<W: Write, E: Write> {
    /// Destination for outcome lines.
    pub stdout: W,
    /// Destination for error lines.
    pub stderr: E,
}

impl<W: Write, E: Write> LifecycleOutput<W, E> {
    /// Wraps the given writers.
    pub const fn new(stdout: W, stderr: E) -> Self {
        Self { stdout, stderr }
    }

    /// Writes one line to stdout and flushes it.
    pub fn stdout_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stdout.write_fmt(args).map_err(LifecycleError::Output)?;
        self.stdout.write_all(b"\n").map_err(LifecycleError::Output)?;
        self.stdout.flush().map_err(LifecycleError::Output)
    }

    /// Writes one line to stderr and flushes it.
    pub fn stderr_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stderr.write_fmt(args).map_err(LifecycleError::Output)?;
        self.stderr.write_all(b"\n").map_err(LifecycleError::Output)?;
        self.stderr.flush().map_err(LifecycleError::Output)
    }
}
