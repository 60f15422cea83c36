//! Structured telemetry bound to a lifecycle's log stream.
//!
//! Each lifecycle builds its own [`Dispatch`] instead of installing a global
//! subscriber, so embedding applications keep control of their own tracing
//! setup.

use tracing::{Dispatch, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use daemonizer_config::LogFormat;

use crate::log_stream::LogStream;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
}

/// Builds a dispatcher writing `format` records that pass `filter` to
/// `stream`.
pub fn log_dispatch(
    stream: &LogStream,
    format: LogFormat,
    filter: &str,
) -> Result<Dispatch, TelemetryError> {
    let filter =
        EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(stream.clone())
            // Log files never render colour codes.
            .with_ansi(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };
    Ok(Dispatch::new(subscriber))
}
