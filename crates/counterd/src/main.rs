//! Entrypoint for the `counterd` reference daemon.
//!
//! Delegates to [`counterd::run`], which splits configuration flags from the
//! lifecycle command and drives the daemon lifecycle.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    counterd::run(std::env::args_os(), &mut stdout, &mut stderr)
}
