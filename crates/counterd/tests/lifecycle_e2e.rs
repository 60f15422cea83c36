//! End-to-end lifecycle tests driving the `counterd` binary.
//!
//! Each test runs in its own temporary directory using the default relative
//! `./.pids` and `./logs` locations, and stops any daemon it started on drop.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::{contains, is_match};
use rstest::{fixture, rstest};
use tempfile::TempDir;

const DAEMON_NAME: &str = "demo";
const SETTLE: Duration = Duration::from_millis(300);
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

struct DaemonDir {
    dir: TempDir,
}

impl DaemonDir {
    fn counterd(&self, command: &str) -> Command {
        self.counterd_with(&[], command)
    }

    /// Runs `command` with configuration flags placed ahead of the CLI flags.
    fn counterd_with(&self, config: &[&str], command: &str) -> Command {
        let mut cmd = cargo_bin_cmd!("counterd");
        cmd.current_dir(self.dir.path())
            .args(config)
            .args(["--name", DAEMON_NAME, "--interval-ms", "50", command]);
        cmd
    }

    fn start(&self) -> u32 {
        self.start_with(&[])
    }

    fn start_with(&self, config: &[&str]) -> u32 {
        let output = self
            .counterd_with(config, "start")
            .assert()
            .success()
            .stdout(is_match(r"^started \(pid=\d+\)\n$").expect("valid regex"))
            .get_output()
            .stdout
            .clone();
        pid_from(&String::from_utf8_lossy(&output))
    }

    fn pid_dir(&self) -> PathBuf {
        self.dir.path().join(".pids")
    }

    fn log(&self) -> String {
        fs::read_to_string(self.dir.path().join("logs").join(format!("{DAEMON_NAME}.log")))
            .unwrap_or_default()
    }

    /// Waits until the daemon log mentions `needle`, e.g. a daemon's
    /// "finished" record once it has wound down.
    fn wait_for_log(&self, needle: &str) {
        wait_until(|| self.log().contains(needle), || {
            format!("log never mentioned {needle:?}: {}", self.log())
        });
    }

    fn pid_files(&self) -> Vec<String> {
        fs::read_dir(self.pid_dir())
            .expect("list pid dir")
            .map(|entry| {
                entry
                    .expect("pid dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }
}

impl Drop for DaemonDir {
    fn drop(&mut self) {
        let _ = self.counterd("stop").output();
    }
}

#[fixture]
fn daemon_dir() -> DaemonDir {
    DaemonDir {
        dir: TempDir::new().expect("create temp dir"),
    }
}

fn wait_until(mut condition: impl FnMut() -> bool, describe: impl Fn() -> String) {
    let deadline = Instant::now() + EXIT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "{}", describe());
        thread::sleep(Duration::from_millis(25));
    }
}

fn pid_from(line: &str) -> u32 {
    line.split("pid=")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or_else(|| panic!("no pid in {line:?}"))
}

#[rstest]
fn start_status_stop_status(daemon_dir: DaemonDir) {
    let pid = daemon_dir.start();
    thread::sleep(SETTLE);

    daemon_dir
        .counterd("status")
        .assert()
        .success()
        .stdout(format!("running (pid={pid})\n"));
    assert!(daemon_dir.log().contains("tick"), "{}", daemon_dir.log());

    daemon_dir
        .counterd("stop")
        .assert()
        .success()
        .stdout(format!("stopped (pid={pid})\n"));
    daemon_dir
        .counterd("status")
        .assert()
        .success()
        .stdout("not running\n");

    daemon_dir.wait_for_log("finished");
    assert!(daemon_dir.pid_files().is_empty());
}

#[rstest]
fn daemon_settles_into_configured_environment(daemon_dir: DaemonDir) {
    let work = daemon_dir.dir.path().join("work");
    fs::create_dir(&work).expect("create working directory");

    let pid = daemon_dir.start_with(&["--working-directory", "work", "--umask", "027"]);

    let count_file = work.join(format!("{DAEMON_NAME}.count"));
    wait_until(|| count_file.exists(), || {
        format!("daemon never wrote {}", count_file.display())
    });
    let mode = fs::metadata(&count_file)
        .expect("stat count file")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o640);
    assert!(
        !daemon_dir
            .dir
            .path()
            .join(format!("{DAEMON_NAME}.count"))
            .exists()
    );
    assert_only_log_descriptors(pid);
}

/// Checks that the daemon's standard streams point at `/dev/null` and every
/// other open descriptor belongs to its own files.
fn assert_only_log_descriptors(pid: u32) {
    let fd_dir = PathBuf::from(format!("/proc/{pid}/fd"));
    let Ok(entries) = fs::read_dir(&fd_dir) else {
        return;
    };
    for entry in entries {
        let entry = entry.expect("descriptor entry");
        let Ok(target) = fs::read_link(entry.path()) else {
            continue;
        };
        let fd: i32 = entry
            .file_name()
            .to_string_lossy()
            .parse()
            .expect("numeric descriptor");
        if fd <= 2 {
            assert_eq!(target, Path::new("/dev/null"), "fd {fd}");
        } else {
            let name = target.to_string_lossy();
            assert!(
                name.contains(&format!("{DAEMON_NAME}.log"))
                    || name.ends_with(&format!("{DAEMON_NAME}.count")),
                "unexpected descriptor {fd} -> {name}"
            );
        }
    }
}

#[rstest]
fn second_start_reports_running_daemon(daemon_dir: DaemonDir) {
    let pid = daemon_dir.start();

    daemon_dir
        .counterd("start")
        .assert()
        .success()
        .stdout(format!("already running (pid={pid})\n"));
    assert_eq!(daemon_dir.pid_files(), vec![format!("{DAEMON_NAME}.pid")]);
}

#[rstest]
fn restart_replaces_the_daemon(daemon_dir: DaemonDir) {
    let first = daemon_dir.start();

    let output = daemon_dir
        .counterd("restart")
        .assert()
        .success()
        .stdout(contains(format!("stopped (pid={first})")))
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output).into_owned();
    let started = text
        .lines()
        .find(|line| line.starts_with("started"))
        .unwrap_or_else(|| panic!("restart did not start: {text:?}"));
    let second = pid_from(started);

    assert_ne!(first, second);
    daemon_dir.wait_for_log("finished");
    daemon_dir
        .counterd("status")
        .assert()
        .success()
        .stdout(format!("running (pid={second})\n"));
    assert_eq!(daemon_dir.pid_files(), vec![format!("{DAEMON_NAME}.pid")]);
}

#[rstest]
fn restart_starts_a_stopped_daemon(daemon_dir: DaemonDir) {
    daemon_dir
        .counterd("restart")
        .assert()
        .success()
        .stdout(is_match(r"^started \(pid=\d+\)\n$").expect("valid regex"));
}

#[rstest]
fn concurrent_starts_leave_one_daemon(daemon_dir: DaemonDir) {
    let outputs: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    let output = daemon_dir
                        .counterd("start")
                        .output()
                        .expect("run counterd");
                    assert!(output.status.success());
                    String::from_utf8_lossy(&output.stdout).into_owned()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("launcher thread"))
            .collect()
    });

    let started: Vec<_> = outputs
        .iter()
        .filter(|output| output.starts_with("started"))
        .collect();
    assert_eq!(started.len(), 1, "{outputs:?}");
    assert!(
        outputs
            .iter()
            .filter(|output| !output.starts_with("started"))
            .all(|output| output.starts_with("already running")),
        "{outputs:?}"
    );
    assert_eq!(daemon_dir.pid_files(), vec![format!("{DAEMON_NAME}.pid")]);
}

#[rstest]
fn stop_without_daemon_reports_not_started(daemon_dir: DaemonDir) {
    daemon_dir
        .counterd("stop")
        .assert()
        .success()
        .stdout("not started\n");
}

#[rstest]
fn unknown_command_exits_with_usage_code(daemon_dir: DaemonDir) {
    daemon_dir
        .counterd("reload")
        .assert()
        .code(2)
        .stderr("command 'reload' does not exist\n");
}
