//! Command-line interface definition for `counterd`.

use clap::Parser;

/// Default daemon name, used for the PID and log file stems.
pub(crate) const DEFAULT_NAME: &str = "counterd";

/// Reference daemon that counts upwards until it is stopped.
#[derive(Parser, Debug)]
#[command(name = "counterd", disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Daemon name; selects `<pid_dir>/<name>.pid` and `<log_dir>/<name>.log`.
    #[arg(long, default_value = DEFAULT_NAME)]
    pub(crate) name: String,
    /// Milliseconds between counter ticks.
    #[arg(long, default_value_t = 1000)]
    pub(crate) interval_ms: u64,
    /// Lifecycle command: start, stop, restart, status, or run to stay in the
    /// foreground.
    #[arg(value_name = "COMMAND")]
    pub(crate) command: Option<String>,
    /// Arguments handed to the counter workload.
    #[arg(
        value_name = "ARG",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) arguments: Vec<String>,
}
