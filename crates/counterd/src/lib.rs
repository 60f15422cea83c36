//! Runtime for the `counterd` reference daemon.
//!
//! `counterd [CONFIG FLAGS] [--name NAME] [--interval-ms MS] COMMAND [ARG...]`
//! loads layered configuration, binds a [`DaemonLifecycle`] to the daemon name
//! and dispatches `start`, `stop`, `restart` or `status`. The extra `run`
//! command starts the counter attached to the terminal.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use daemonizer::{
    DaemonLifecycle, LaunchMode, LifecycleError, LifecycleOutput, LifecycleSettings,
};
use daemonizer_config::Config;
use ortho_config::OrthoConfig;
use thiserror::Error;

mod cli;
mod config;
mod workload;

use cli::Cli;
use config::split_config_arguments;

/// Command that starts the workload in the foreground.
const FOREGROUND_COMMAND: &str = "run";
const USAGE: &str =
    "usage: counterd [CONFIG FLAGS] [--name NAME] <start|stop|restart|status|run> [ARG...]";
const USAGE_EXIT: u8 = 2;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Runs the CLI with the given arguments and output streams.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);

    let cli = match Cli::try_parse_from(split.cli_arguments) {
        Ok(cli) => cli,
        Err(error) if error.use_stderr() => {
            let _ = write!(stderr, "{error}");
            return ExitCode::from(USAGE_EXIT);
        }
        Err(error) => {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
    };
    let Some(command) = cli.command.clone() else {
        let _ = writeln!(stderr, "{USAGE}");
        return ExitCode::from(USAGE_EXIT);
    };

    let (command, mode) = if command.eq_ignore_ascii_case(FOREGROUND_COMMAND) {
        (String::from("start"), LaunchMode::Foreground)
    } else {
        (command, LaunchMode::Background)
    };

    let mut lifecycle = match build_lifecycle(split.config_arguments, &cli, mode) {
        Ok(lifecycle) => lifecycle,
        Err(error) => {
            let _ = writeln!(stderr, "{}: {error}", cli.name);
            return ExitCode::FAILURE;
        }
    };
    let mut output = LifecycleOutput::new(stdout, stderr);
    lifecycle.run_command(&command, &mut output)
}

fn build_lifecycle(
    config_arguments: Vec<OsString>,
    cli: &Cli,
    mode: LaunchMode,
) -> Result<DaemonLifecycle, AppError> {
    let config = Config::load_from_iter(config_arguments).map_err(AppError::LoadConfiguration)?;
    let settings = LifecycleSettings::from_config(&config, &cli.name)?.with_mode(mode);
    let mut lifecycle = DaemonLifecycle::new(settings)?;
    let interval = Duration::from_millis(cli.interval_ms);
    let count_file = PathBuf::from(format!("{}.count", cli.name));
    lifecycle.register_func(
        move |args, stop| workload::count(args, stop, interval, &count_file),
        cli.arguments.iter().cloned(),
    );
    Ok(lifecycle)
}
