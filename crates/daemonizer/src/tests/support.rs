//! Fixtures and recording doubles shared by the behaviour suites.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use tempfile::TempDir;

use crate::lifecycle::{DaemonLifecycle, LifecycleOutput, LifecycleSettings};
use crate::lock::{PidLock, PidLockError};
use crate::log_stream::LogStream;
use crate::process::{
    DetachError, DetachPlan, DetachedHandle, Detacher, Detachment, Handoff, ProcessSignals,
    ShutdownError, SignalDeliveryError, StopToken,
};
use daemonizer_config::Config;

pub(crate) const DAEMON_NAME: &str = "demo";

pub(crate) type TestLifecycle = DaemonLifecycle<RecordingDetacher, RecordingSignals>;
pub(crate) type BufferedOutput = LifecycleOutput<Vec<u8>, Vec<u8>>;

/// Which side of the fork the recording detacher pretends to return on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DetachRole {
    Launcher,
    Daemon,
}

/// Detacher that acquires the lock with the test process pid instead of
/// forking.
#[derive(Debug, Clone)]
pub(crate) struct RecordingDetacher {
    role: DetachRole,
    calls: Arc<AtomicUsize>,
    listened: Arc<AtomicUsize>,
    listened_at_detach: Arc<Mutex<Vec<usize>>>,
}

impl RecordingDetacher {
    /// Records how many stop handlers `signals` had installed at each detach.
    pub(crate) fn new(role: DetachRole, signals: &RecordingSignals) -> Self {
        Self {
            role,
            calls: Arc::new(AtomicUsize::new(0)),
            listened: Arc::clone(&signals.listened),
            listened_at_detach: Arc::default(),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn listened_at_detach(&self) -> Vec<usize> {
        self.listened_at_detach
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Detacher for RecordingDetacher {
    fn detach(
        &self,
        _plan: &DetachPlan<'_>,
        lock: &mut PidLock,
    ) -> Result<Detachment, DetachError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.listened_at_detach
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(self.listened.load(Ordering::SeqCst));
        let pid = std::process::id();
        match lock.acquire(pid) {
            Ok(()) => {}
            Err(PidLockError::AlreadyLocked { pid: holder, .. }) => {
                return Ok(Detachment::Launcher(Handoff::AlreadyRunning { pid: holder }));
            }
            Err(error) => return Err(error.into()),
        }
        Ok(match self.role {
            DetachRole::Launcher => Detachment::Launcher(Handoff::Started { pid }),
            DetachRole::Daemon => Detachment::Daemon(DetachedHandle::new(pid)),
        })
    }
}

/// Signal backend that records deliveries instead of sending them.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingSignals {
    terminated: Arc<Mutex<Vec<u32>>>,
    listened: Arc<AtomicUsize>,
    failure: Option<Errno>,
    stop_on_listen: bool,
}

impl RecordingSignals {
    pub(crate) fn failing_with(errno: Errno) -> Self {
        Self {
            failure: Some(errno),
            ..Self::default()
        }
    }

    /// Requests a stop as soon as the daemon installs its handlers.
    pub(crate) fn stopping_immediately() -> Self {
        Self {
            stop_on_listen: true,
            ..Self::default()
        }
    }

    pub(crate) fn terminated(&self) -> Vec<u32> {
        self.terminated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn listen_calls(&self) -> usize {
        self.listened.load(Ordering::SeqCst)
    }
}

impl ProcessSignals for RecordingSignals {
    fn terminate(&self, pid: u32) -> Result<(), SignalDeliveryError> {
        self.terminated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(pid);
        match self.failure {
            Some(source) => Err(SignalDeliveryError { pid, source }),
            None => Ok(()),
        }
    }

    fn listen(&self, token: &StopToken) -> Result<(), ShutdownError> {
        self.listened.fetch_add(1, Ordering::SeqCst);
        if self.stop_on_listen {
            token.request();
        }
        Ok(())
    }
}

/// Temporary daemon environment with recording collaborators.
pub(crate) struct Harness {
    pub(crate) dir: TempDir,
    pub(crate) lifecycle: TestLifecycle,
    pub(crate) detacher: RecordingDetacher,
    pub(crate) signals: RecordingSignals,
    pub(crate) output: BufferedOutput,
}

impl Harness {
    pub(crate) fn new(role: DetachRole, signals: RecordingSignals) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let settings = settings_in(&dir);
        let log = LogStream::open(settings.paths().log_path()).expect("open log");
        let detacher = RecordingDetacher::new(role, &signals);
        let lifecycle = DaemonLifecycle::with_collaborators(
            settings,
            log,
            detacher.clone(),
            signals.clone(),
        )
        .expect("build lifecycle");
        Self {
            dir,
            lifecycle,
            detacher,
            signals,
            output: LifecycleOutput::new(Vec::new(), Vec::new()),
        }
    }

    pub(crate) fn pid_path(&self) -> PathBuf {
        self.dir.path().join("pids").join(format!("{DAEMON_NAME}.pid"))
    }

    pub(crate) fn write_lock(&self, content: &str) {
        fs::write(self.pid_path(), content).expect("write lock file");
    }

    pub(crate) fn lock_files(&self) -> usize {
        fs::read_dir(self.dir.path().join("pids"))
            .expect("list pid dir")
            .count()
    }

    pub(crate) fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub(crate) fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    pub(crate) fn log(&self) -> String {
        fs::read_to_string(self.dir.path().join("logs").join(format!("{DAEMON_NAME}.log")))
            .expect("read log file")
    }
}

pub(crate) fn settings_in(dir: &TempDir) -> LifecycleSettings {
    let config = Config {
        pid_dir: dir.path().join("pids"),
        log_dir: dir.path().join("logs"),
        working_directory: dir.path().to_path_buf(),
        ..Config::default()
    };
    LifecycleSettings::from_config(&config, DAEMON_NAME).expect("derive settings")
}

/// Pid of a process that has already exited and been reaped.
pub(crate) fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().expect("spawn short-lived child");
    let pid = child.id();
    child.wait().expect("reap child");
    pid
}
