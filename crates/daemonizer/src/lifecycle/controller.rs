//! High-level orchestration for daemon lifecycle commands.
//!
//! [`DaemonLifecycle`] consults the PID lock to decide whether to detach and
//! run the workload, signal and release, or merely report. Every command
//! returns a [`LifecycleOutcome`]; only [`DaemonLifecycle::run_command`] turns
//! outcomes and errors into an exit code.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;

use tracing::{Dispatch, debug, error, info, warn};

use super::LIFECYCLE_TARGET;
use super::error::LifecycleError;
use super::types::{
    LifecycleCommand, LifecycleOutcome, LifecycleOutput, LifecycleSettings, Workload,
    WorkloadError,
};
use crate::lock::{LockState, PidLock};
use crate::log_stream::LogStream;
use crate::process::{
    DetachPlan, DetachedHandle, Detacher, Detachment, Handoff, LaunchMode, ProcessSignals,
    StopToken, SystemSignals,
};
use crate::telemetry;

/// Exit code for commands the dispatcher does not recognise.
const UNKNOWN_COMMAND_EXIT: u8 = 2;

/// Start/stop/restart/status controller for one named daemon.
pub struct DaemonLifecycle<D = LaunchMode, K = SystemSignals> {
    settings: LifecycleSettings,
    lock: PidLock,
    log: LogStream,
    dispatch: Dispatch,
    workload: Option<Workload>,
    detacher: D,
    signals: K,
}

impl DaemonLifecycle {
    /// Builds a lifecycle logging to the default `<log_dir>/<name>.log`,
    /// rotated daily.
    pub fn new(settings: LifecycleSettings) -> Result<Self, LifecycleError> {
        let log = LogStream::daily(settings.paths().log_path())?;
        Self::with_log(settings, log)
    }

    /// Builds a lifecycle logging to an already open stream.
    pub fn with_log(settings: LifecycleSettings, log: LogStream) -> Result<Self, LifecycleError> {
        let mode = settings.mode();
        Self::with_collaborators(settings, log, mode, SystemSignals::new())
    }
}

impl<D: Detacher, K: ProcessSignals> DaemonLifecycle<D, K> {
    /// Builds a lifecycle with injected detachment and signal collaborators.
    pub fn with_collaborators(
        settings: LifecycleSettings,
        log: LogStream,
        detacher: D,
        signals: K,
    ) -> Result<Self, LifecycleError> {
        let dispatch =
            telemetry::log_dispatch(&log, settings.log_format(), settings.log_filter())?;
        let lock = PidLock::new(settings.paths().pid_path());
        Ok(Self {
            settings,
            lock,
            log,
            dispatch,
            workload: None,
            detacher,
            signals,
        })
    }

    /// Name of the managed daemon.
    pub fn name(&self) -> &str {
        self.settings.name()
    }

    /// Lock guarding the daemon.
    pub const fn lock(&self) -> &PidLock {
        &self.lock
    }

    /// Registers the workload `start` runs inside the daemon, replacing any
    /// earlier registration.
    pub fn register_func<F, I>(&mut self, func: F, args: I)
    where
        F: FnOnce(&[String], &StopToken) -> Result<(), WorkloadError> + 'static,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.workload = Some(Workload {
            func: Box::new(func),
            args: args.into_iter().map(Into::into).collect(),
        });
    }

    /// Dispatches `command` and maps the result to an exit code.
    ///
    /// Unknown commands exit with status 2; lifecycle errors are reported as a
    /// single stderr line and exit with status 1.
    pub fn run_command<W: Write, E: Write>(
        &mut self,
        command: &str,
        output: &mut LifecycleOutput<W, E>,
    ) -> ExitCode {
        let Ok(parsed) = command.parse::<LifecycleCommand>() else {
            let _ = output.stderr_line(format_args!("command '{command}' does not exist"));
            return ExitCode::from(UNKNOWN_COMMAND_EXIT);
        };
        match self.execute(parsed, output) {
            Ok(_) => ExitCode::SUCCESS,
            Err(error) => {
                let _ = output.stderr_line(format_args!("{}: {error}", self.settings.name()));
                ExitCode::FAILURE
            }
        }
    }

    /// Runs a parsed command.
    pub fn execute<W: Write, E: Write>(
        &mut self,
        command: LifecycleCommand,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        match command {
            LifecycleCommand::Start => self.start(output),
            LifecycleCommand::Stop => self.stop(output),
            LifecycleCommand::Restart => self.restart(output),
            LifecycleCommand::Status => self.status(output),
        }
    }

    /// Starts the daemon unless a live one already holds the lock.
    ///
    /// In the launching process this returns once the daemon reported back.
    /// In the daemon process it returns after the workload ends.
    pub fn start<W: Write, E: Write>(
        &mut self,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        let outcome = self.traced(Self::start_daemon)?;
        output.stdout_line(format_args!("{outcome}"))?;
        Ok(outcome)
    }

    /// Signals the recorded daemon and releases its lock without waiting for
    /// it to exit.
    pub fn stop<W: Write, E: Write>(
        &mut self,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        let outcome = self.traced(Self::stop_daemon)?;
        output.stdout_line(format_args!("{outcome}"))?;
        Ok(outcome)
    }

    /// Stops, then starts in the same call.
    ///
    /// The old process is not awaited, so it may still be shutting down
    /// while its successor runs.
    pub fn restart<W: Write, E: Write>(
        &mut self,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        let stopped = self.traced(Self::stop_daemon)?;
        if stopped != LifecycleOutcome::NotStarted {
            output.stdout_line(format_args!("{stopped}"))?;
        }
        self.start(output)
    }

    /// Reports whether the daemon is running. Never mutates the lock.
    pub fn status<W: Write, E: Write>(
        &mut self,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        let outcome = match self.lock.state()? {
            LockState::Held { pid } => LifecycleOutcome::Running { pid },
            LockState::Stale { pid } => LifecycleOutcome::NotRunning { stale: Some(pid) },
            LockState::Unlocked => LifecycleOutcome::NotRunning { stale: None },
        };
        output.stdout_line(format_args!("{outcome}"))?;
        Ok(outcome)
    }

    fn traced<T>(&mut self, action: impl FnOnce(&mut Self) -> T) -> T {
        let dispatch = self.dispatch.clone();
        tracing::dispatcher::with_default(&dispatch, || action(self))
    }

    fn start_daemon(&mut self) -> Result<LifecycleOutcome, LifecycleError> {
        match self.lock.state()? {
            LockState::Held { pid } => {
                info!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    pid,
                    "already running"
                );
                return Ok(LifecycleOutcome::AlreadyRunning { pid: Some(pid) });
            }
            LockState::Stale { pid } if self.workload.is_some() => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    pid,
                    "previous daemon exited without releasing its lock"
                );
                self.lock.break_stale(pid)?;
            }
            LockState::Stale { .. } | LockState::Unlocked => {}
        }
        if self.workload.is_none() {
            return Err(LifecycleError::MissingWorkload);
        }

        // Handlers survive fork, so the daemon is stoppable from the moment
        // its launcher reports it started.
        let token = StopToken::new();
        self.signals.listen(&token)?;

        let preserve = [self.log.raw_fd()];
        let plan = DetachPlan {
            working_directory: self.settings.paths().working_directory(),
            umask: self.settings.umask(),
            preserve: &preserve,
        };
        match self.detacher.detach(&plan, &mut self.lock)? {
            Detachment::Launcher(Handoff::Started { pid }) => {
                info!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    pid,
                    "daemon launched"
                );
                Ok(LifecycleOutcome::Started { pid })
            }
            Detachment::Launcher(Handoff::AlreadyRunning { pid }) => {
                info!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    holder = pid,
                    "lost start race; already running"
                );
                Ok(LifecycleOutcome::AlreadyRunning { pid })
            }
            Detachment::Daemon(handle) => {
                let Some(workload) = self.workload.take() else {
                    self.release_owned_lock();
                    return Err(LifecycleError::MissingWorkload);
                };
                self.run_workload(handle, workload, &token)
            }
        }
    }

    fn run_workload(
        &mut self,
        handle: DetachedHandle,
        workload: Workload,
        token: &StopToken,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        info!(
            target: LIFECYCLE_TARGET,
            name = self.settings.name(),
            pid = handle.pid(),
            args = ?workload.args,
            "started"
        );
        let Workload { func, args } = workload;
        let result = panic::catch_unwind(AssertUnwindSafe(|| func(args.as_slice(), token)));
        self.release_owned_lock();

        match result {
            Ok(Ok(())) => {
                info!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    stop_requested = token.is_requested(),
                    "finished"
                );
                Ok(LifecycleOutcome::Finished)
            }
            Ok(Err(source)) => {
                error!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    error = %source,
                    detail = ?source,
                    "workload failed"
                );
                Err(LifecycleError::Workload { source })
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    panic = %message,
                    "workload panicked"
                );
                Err(LifecycleError::WorkloadPanic { message })
            }
        }
    }

    fn stop_daemon(&mut self) -> Result<LifecycleOutcome, LifecycleError> {
        let Some(pid) = self.lock.read_pid()? else {
            info!(
                target: LIFECYCLE_TARGET,
                name = self.settings.name(),
                "not started"
            );
            return Ok(LifecycleOutcome::NotStarted);
        };
        let delivered = match self.signals.terminate(pid) {
            Ok(()) => true,
            Err(error) if error.process_gone() => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    pid,
                    "daemon already exited; clearing its lock"
                );
                false
            }
            Err(error) => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    name = self.settings.name(),
                    pid,
                    %error,
                    "termination signal not delivered; clearing the lock anyway"
                );
                false
            }
        };
        self.lock.release()?;
        info!(
            target: LIFECYCLE_TARGET,
            name = self.settings.name(),
            pid,
            delivered,
            "stopped"
        );
        Ok(LifecycleOutcome::Stopped { pid, delivered })
    }

    fn release_owned_lock(&mut self) {
        match self.lock.release_owned() {
            Ok(released) => debug!(
                target: LIFECYCLE_TARGET,
                released,
                "daemon lock handed back"
            ),
            Err(error) => warn!(
                target: LIFECYCLE_TARGET,
                %error,
                "failed to release daemon lock"
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}
