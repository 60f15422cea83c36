//! Termination signal delivery and the daemon-side stop flag.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::flag;
use thiserror::Error;
use tracing::{debug, info};

use super::PROCESS_TARGET;
use crate::lock::to_os_pid;

/// Signal `stop` sends to request a graceful shutdown.
pub const TERMINATION_SIGNAL: Signal = Signal::SIGQUIT;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Abstraction over signal delivery and stop-signal handling.
pub trait ProcessSignals {
    /// Sends [`TERMINATION_SIGNAL`] to `pid` without waiting for it to exit.
    fn terminate(&self, pid: u32) -> Result<(), SignalDeliveryError>;

    /// Routes stop signals received by the current process to `token`.
    fn listen(&self, token: &StopToken) -> Result<(), ShutdownError>;
}

/// Delivering the termination signal failed.
#[derive(Debug, Error)]
#[error("failed to signal pid {pid}: {source}")]
pub struct SignalDeliveryError {
    /// Target pid.
    pub pid: u32,
    /// Underlying OS error.
    #[source]
    pub source: Errno,
}

impl SignalDeliveryError {
    /// True when the target no longer exists, i.e. the lock was stale.
    pub fn process_gone(&self) -> bool {
        self.source == Errno::ESRCH
    }
}

/// Errors reported while installing stop handlers.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Flag raised once the daemon has been asked to stop.
///
/// Workloads poll it from their loop; [`StopToken::sleep`] doubles as an
/// interruptible pause.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    requested: Arc<AtomicBool>,
}

impl StopToken {
    /// Creates a token that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as triggered.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Returns true once a stop was requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns false when
    /// the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.requested)
    }
}

/// Signal handling backed by `kill(2)` and `signal-hook`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignals;

impl SystemSignals {
    /// Builds the system signal backend.
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessSignals for SystemSignals {
    fn terminate(&self, pid: u32) -> Result<(), SignalDeliveryError> {
        let os_pid = to_os_pid(pid).ok_or(SignalDeliveryError {
            pid,
            source: Errno::ESRCH,
        })?;
        kill(os_pid, TERMINATION_SIGNAL).map_err(|source| SignalDeliveryError { pid, source })?;
        info!(
            target: PROCESS_TARGET,
            pid,
            signal = %TERMINATION_SIGNAL,
            "termination signal sent"
        );
        Ok(())
    }

    fn listen(&self, token: &StopToken) -> Result<(), ShutdownError> {
        for signal in [SIGQUIT, SIGTERM, SIGINT] {
            // A second signal while the first is still pending exits at once.
            flag::register_conditional_shutdown(signal, 1, token.flag())
                .map_err(|source| ShutdownError::Install { source })?;
            flag::register(signal, token.flag())
                .map_err(|source| ShutdownError::Install { source })?;
        }
        debug!(target: PROCESS_TARGET, "stop signal handlers installed");
        Ok(())
    }
}
