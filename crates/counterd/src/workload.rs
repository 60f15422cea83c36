//! The counter workload run inside the daemon.

use std::fs;
use std::path::Path;
use std::time::Duration;

use daemonizer::{StopToken, WorkloadError};
use tracing::info;

const WORKLOAD_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::workload");

/// Increments and logs a counter every `interval` until a stop is requested.
///
/// The latest value is also written to `count_file`; a relative path lands
/// in the daemon's working directory.
pub(crate) fn count(
    args: &[String],
    stop: &StopToken,
    interval: Duration,
    count_file: &Path,
) -> Result<(), WorkloadError> {
    let mut count: u64 = 0;
    while !stop.is_requested() {
        count = count.checked_add(1).ok_or("counter overflowed")?;
        fs::write(count_file, format!("{count}\n"))?;
        info!(target: WORKLOAD_TARGET, count, ?args, "tick");
        if !stop.sleep(interval) {
            break;
        }
    }
    info!(target: WORKLOAD_TARGET, count, "stop requested; counter halted");
    Ok(())
}
