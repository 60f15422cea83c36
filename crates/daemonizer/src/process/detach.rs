//! Detaches a daemon from the launching process.
//!
//! [`SystemDetacher`] performs the classic double fork. The final daemon
//! process acquires the PID lock with its own pid and reports the outcome
//! back through a pipe, so the lock never names an exited ancestor and the
//! launcher learns whether it lost a concurrent start. [`InlineDetacher`]
//! keeps the workload in the current process for debugging.

use std::env;
use std::io::{self, PipeWriter, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::process;

use nix::libc::mode_t;
use nix::sys::stat::{Mode, umask};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, fork, setsid};
use tracing::{debug, info, warn};

use super::PROCESS_TARGET;
use super::descriptors::{close_inherited_descriptors, redirect_standard_streams};
use super::errors::DetachError;
use super::handoff::HandoffReport;
use crate::lock::{PidLock, PidLockError};

/// Environment the daemon process is settled into.
#[derive(Debug, Clone, Copy)]
pub struct DetachPlan<'a> {
    /// Directory the daemon changes into.
    pub working_directory: &'a Path,
    /// Umask the daemon applies.
    pub umask: u32,
    /// Descriptors that must survive detachment, such as the log stream.
    pub preserve: &'a [RawFd],
}

/// Marker held by the process that goes on to run the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachedHandle {
    pid: u32,
}

impl DetachedHandle {
    /// Wraps the pid of the process that will run the workload.
    pub const fn new(pid: u32) -> Self {
        Self { pid }
    }

    /// Pid of the daemon process, as recorded in the lock.
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

/// What the launching process learns about the daemon it spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// The daemon acquired the lock and is running.
    Started {
        /// Pid of the daemon.
        pid: u32,
    },
    /// Another daemon won the lock first.
    AlreadyRunning {
        /// Pid recorded by the winning daemon, when readable.
        pid: Option<u32>,
    },
}

/// Result of a detachment as seen by the returning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detachment {
    /// This process launched the daemon and should report the handoff.
    Launcher(Handoff),
    /// This process is the daemon and holds the lock.
    Daemon(DetachedHandle),
}

/// Strategy for turning the current process into a daemon.
pub trait Detacher {
    /// Detaches according to `plan`, acquiring `lock` inside the process that
    /// will run the workload.
    fn detach(&self, plan: &DetachPlan<'_>, lock: &mut PidLock)
    -> Result<Detachment, DetachError>;
}

/// Double-fork detacher that leaves the workload in a background session.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDetacher;

impl SystemDetacher {
    /// Builds the system detacher.
    pub const fn new() -> Self {
        Self
    }
}

impl Detacher for SystemDetacher {
    fn detach(
        &self,
        plan: &DetachPlan<'_>,
        lock: &mut PidLock,
    ) -> Result<Detachment, DetachError> {
        // Buffered output would otherwise be written by both processes.
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        let (reader, mut writer) = io::pipe().map_err(|source| DetachError::Pipe { source })?;

        info!(
            target: PROCESS_TARGET,
            lock = %lock.path().display(),
            "detaching into background"
        );
        // SAFETY: the child only calls async-signal-safe primitives before it
        // either exits or replaces itself with the final daemon process, and
        // the launcher is single-threaded while lifecycle commands run.
        match unsafe { fork() }.map_err(|source| DetachError::Fork { source })? {
            ForkResult::Parent { child } => {
                drop(writer);
                let report = HandoffReport::read_from(reader);
                reap(child);
                match report? {
                    HandoffReport::Started { pid } => {
                        Ok(Detachment::Launcher(Handoff::Started { pid }))
                    }
                    HandoffReport::AlreadyRunning { pid } => {
                        Ok(Detachment::Launcher(Handoff::AlreadyRunning { pid }))
                    }
                    HandoffReport::Failed { message } => Err(DetachError::Daemon { message }),
                }
            }
            ForkResult::Child => {
                drop(reader);
                if let Err(source) = setsid() {
                    abandon(&mut writer, DetachError::Session { source });
                }
                // SAFETY: as above; the intermediate child exits immediately.
                match unsafe { fork() } {
                    Ok(ForkResult::Parent { .. }) => exit_immediately(0),
                    Ok(ForkResult::Child) => {}
                    Err(source) => abandon(&mut writer, DetachError::Fork { source }),
                }
                let handle = match settle_daemon(plan, lock, writer.as_raw_fd()) {
                    Ok(handle) => handle,
                    Err(report) => {
                        let _ = report.write_to(&mut writer);
                        exit_immediately(1);
                    }
                };
                let started = HandoffReport::Started { pid: handle.pid() };
                if let Err(error) = started.write_to(&mut writer) {
                    release_after_failure(lock);
                    warn!(
                        target: PROCESS_TARGET,
                        %error,
                        "launcher vanished before the handoff; exiting"
                    );
                    exit_immediately(1);
                }
                drop(writer);
                info!(
                    target: PROCESS_TARGET,
                    pid = handle.pid(),
                    "daemon process detached; continuing in background"
                );
                Ok(Detachment::Daemon(handle))
            }
        }
    }
}

/// Detacher that keeps the workload attached to the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDetacher;

impl InlineDetacher {
    /// Builds the inline detacher.
    pub const fn new() -> Self {
        Self
    }
}

impl Detacher for InlineDetacher {
    fn detach(
        &self,
        plan: &DetachPlan<'_>,
        lock: &mut PidLock,
    ) -> Result<Detachment, DetachError> {
        let pid = process::id();
        match lock.acquire(pid) {
            Ok(()) => {}
            Err(PidLockError::AlreadyLocked { pid: holder, .. }) => {
                return Ok(Detachment::Launcher(Handoff::AlreadyRunning { pid: holder }));
            }
            Err(error) => return Err(error.into()),
        }
        if let Err(error) = enter_environment(plan) {
            release_after_failure(lock);
            return Err(error);
        }
        debug!(target: PROCESS_TARGET, pid, "running workload in the foreground");
        Ok(Detachment::Daemon(DetachedHandle::new(pid)))
    }
}

/// How `start` runs the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    #[default]
    Background,
    /// Remain attached to the terminal; primarily used for debugging.
    Foreground,
}

impl Detacher for LaunchMode {
    fn detach(
        &self,
        plan: &DetachPlan<'_>,
        lock: &mut PidLock,
    ) -> Result<Detachment, DetachError> {
        match self {
            Self::Background => SystemDetacher.detach(plan, lock),
            Self::Foreground => InlineDetacher.detach(plan, lock),
        }
    }
}

fn settle_daemon(
    plan: &DetachPlan<'_>,
    lock: &mut PidLock,
    report_fd: RawFd,
) -> Result<DetachedHandle, HandoffReport> {
    let pid = process::id();
    match lock.acquire(pid) {
        Ok(()) => {}
        Err(PidLockError::AlreadyLocked { pid: holder, .. }) => {
            return Err(HandoffReport::AlreadyRunning { pid: holder });
        }
        Err(error) => return Err(HandoffReport::failed(error)),
    }

    let mut keep = plan.preserve.to_vec();
    keep.push(report_fd);
    let settled = enter_environment(plan).and_then(|()| {
        redirect_standard_streams()?;
        close_inherited_descriptors(&keep);
        Ok(())
    });
    if let Err(error) = settled {
        release_after_failure(lock);
        return Err(HandoffReport::failed(error));
    }
    Ok(DetachedHandle::new(pid))
}

fn enter_environment(plan: &DetachPlan<'_>) -> Result<(), DetachError> {
    env::set_current_dir(plan.working_directory).map_err(|source| {
        DetachError::WorkingDirectory {
            path: plan.working_directory.to_path_buf(),
            source,
        }
    })?;
    umask(Mode::from_bits_truncate(plan.umask as mode_t));
    Ok(())
}

fn release_after_failure(lock: &mut PidLock) {
    if let Err(error) = lock.release() {
        warn!(
            target: PROCESS_TARGET,
            %error,
            "failed to release pid lock after aborted start"
        );
    }
}

fn abandon(writer: &mut PipeWriter, error: DetachError) -> ! {
    let _ = HandoffReport::failed(error).write_to(writer);
    exit_immediately(1)
}

/// Terminates a forked child without running exit handlers or flushing
/// buffers shared with the launcher.
fn exit_immediately(code: i32) -> ! {
    // SAFETY: `_exit` is async-signal-safe and takes no pointers.
    unsafe { nix::libc::_exit(code) }
}

fn reap(child: Pid) {
    if let Err(error) = waitpid(child, None) {
        debug!(
            target: PROCESS_TARGET,
            %error,
            child = child.as_raw(),
            "failed to reap intermediate child"
        );
    }
}
