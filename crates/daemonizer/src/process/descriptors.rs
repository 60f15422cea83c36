//! Descriptor hygiene for the detached daemon.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use nix::unistd::{close, dup2};

use super::errors::DetachError;

const STANDARD_STREAMS: [RawFd; 3] = [0, 1, 2];
const FALLBACK_DESCRIPTOR_LIMIT: RawFd = 1024;

/// Points stdin, stdout and stderr at `/dev/null`.
pub(super) fn redirect_standard_streams() -> Result<(), DetachError> {
    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(|source| DetachError::Redirect { source })?;
    for target in STANDARD_STREAMS {
        dup2(null.as_raw_fd(), target).map_err(|errno| DetachError::Redirect {
            source: io::Error::from(errno),
        })?;
    }
    Ok(())
}

/// Closes every inherited descriptor above the standard streams except those
/// listed in `keep`.
pub(super) fn close_inherited_descriptors(keep: &[RawFd]) {
    for fd in open_descriptors() {
        if fd > 2 && !keep.contains(&fd) {
            // EBADF here only means the listing descriptor itself.
            let _ = close(fd);
        }
    }
}

fn open_descriptors() -> Vec<RawFd> {
    for listing in ["/proc/self/fd", "/dev/fd"] {
        if let Ok(entries) = fs::read_dir(listing) {
            return entries
                .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
                .collect();
        }
    }
    (0..FALLBACK_DESCRIPTOR_LIMIT).collect()
}
