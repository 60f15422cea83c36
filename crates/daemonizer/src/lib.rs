//! Lifecycle management for single-instance background daemons.
//!
//! A [`DaemonLifecycle`] binds a daemon name to a PID lock file, a working
//! directory, a umask and a log stream. Callers register the workload to run
//! and dispatch one of `start`, `stop`, `restart` or `status`:
//!
//! - `start` detaches with a double fork; the final daemon process acquires
//!   the lock with its own pid and reports back to the launcher before it runs
//!   the workload.
//! - `stop` sends `SIGQUIT` to the recorded pid and releases the lock without
//!   waiting for the process to exit.
//! - `restart` stops and starts in one call.
//! - `status` reports whether the recorded process is alive.
//!
//! Lifecycle events are written through a [`tracing`] dispatcher bound to the
//! log stream rather than a global subscriber.

mod lifecycle;
mod lock;
mod log_stream;
mod process;
mod telemetry;

pub use daemonizer_config::{Config, DaemonPaths, LogFormat};
pub use lifecycle::{
    DaemonLifecycle, LifecycleCommand, LifecycleError, LifecycleOutcome, LifecycleOutput,
    LifecycleSettings, WorkloadError,
};
pub use lock::{LockState, PidLock, PidLockError, process_alive};
pub use log_stream::{LogStream, LogStreamError, LogWriter};
pub use process::{
    DetachError, DetachPlan, DetachedHandle, Detacher, Detachment, Handoff, InlineDetacher,
    LaunchMode, ProcessSignals, ShutdownError, SignalDeliveryError, StopToken, SystemDetacher,
    SystemSignals, TERMINATION_SIGNAL,
};
pub use telemetry::{TelemetryError, log_dispatch};

#[cfg(test)]
mod tests;
