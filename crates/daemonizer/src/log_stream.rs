//! Append-mode log destination shared between the launcher and the daemon.
//!
//! [`LogStream::daily`] rolls the file over at UTC midnight: the first record
//! of a new day renames `<name>.log` to `<name>.log.YYYYMMDD`, named after the
//! day it covers, and continues in a fresh `<name>.log`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing_subscriber::fmt::MakeWriter;

const ROTATED_SUFFIX: &[BorrowedFormatItem<'static>] = format_description!("[year][month][day]");

/// Errors raised while opening a log stream.
#[derive(Debug, Error)]
#[error("failed to open log file '{path}': {source}")]
pub struct LogStreamError {
    /// Log file path.
    pub path: PathBuf,
    /// Underlying IO error.
    #[source]
    pub source: io::Error,
}

/// Open log file handed to a lifecycle.
///
/// The stream is never closed by the lifecycle and its descriptor survives
/// detachment, so the daemon keeps writing to the file the launcher opened
/// until the next rollover.
#[derive(Debug, Clone)]
pub struct LogStream {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    /// Path reopened on rollover; `None` for streams that never rotate.
    rotation: Option<PathBuf>,
    current: Mutex<Current>,
}

#[derive(Debug)]
struct Current {
    file: File,
    day: Date,
}

impl LogStream {
    /// Opens `path` for appending, creating it when missing. The file is
    /// never rotated.
    pub fn open(path: &Path) -> Result<Self, LogStreamError> {
        let file = open_append(path).map_err(|source| LogStreamError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_file(file))
    }

    /// Opens `path` for appending and rotates it daily.
    ///
    /// An existing file is attributed to the day it was last written, so a
    /// file left over from an earlier day is rotated by the first record.
    pub fn daily(path: &Path) -> Result<Self, LogStreamError> {
        let file = open_append(path).map_err(|source| LogStreamError {
            path: path.to_path_buf(),
            source,
        })?;
        let day = last_written(&file);
        Ok(Self::build(file, day, Some(path.to_path_buf())))
    }

    /// Wraps an already open file.
    pub fn from_file(file: File) -> Self {
        Self::build(file, today(), None)
    }

    fn build(file: File, day: Date, rotation: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                rotation,
                current: Mutex::new(Current { file, day }),
            }),
        }
    }

    /// Descriptor that detachment must leave open.
    pub fn raw_fd(&self) -> RawFd {
        self.shared.lock().file.as_raw_fd()
    }

    /// Rotates the file if `today` is later than the day it covers.
    pub(crate) fn roll_over(&self, today: Date) -> io::Result<()> {
        let mut current = self.shared.lock();
        self.shared.roll_over(&mut current, today)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roll_over(&self, current: &mut Current, today: Date) -> io::Result<()> {
        let Some(path) = self.rotation.as_deref() else {
            return Ok(());
        };
        if today <= current.day {
            return Ok(());
        }
        let rotated = rotated_path(path, current.day)?;
        // The launcher and the daemon share the file; only the first of them
        // to notice the new day renames it.
        if is_same_file(path, &current.file)? && !rotated.exists() {
            fs::rename(path, &rotated)?;
        }
        current.file = open_append(path)?;
        current.day = today;
        Ok(())
    }
}

/// Writer handed to the tracing formatter for one record.
#[derive(Debug)]
pub struct LogWriter<'a> {
    shared: &'a Shared,
}

impl Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut current = self.shared.lock();
        // A failed rollover keeps appending to the current file and is
        // retried with the next record.
        let _ = self.shared.roll_over(&mut current, today());
        current.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.shared.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for LogStream {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            shared: &self.shared,
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn last_written(file: &File) -> Date {
    file.metadata()
        .and_then(|metadata| metadata.modified())
        .map_or_else(|_| today(), |modified| OffsetDateTime::from(modified).date())
}

fn rotated_path(path: &Path, day: Date) -> io::Result<PathBuf> {
    let suffix = day.format(ROTATED_SUFFIX).map_err(io::Error::other)?;
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    Ok(PathBuf::from(name))
}

fn is_same_file(path: &Path, file: &File) -> io::Result<bool> {
    let open = file.metadata()?;
    match fs::metadata(path) {
        Ok(on_disk) => Ok(on_disk.dev() == open.dev() && on_disk.ino() == open.ino()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}
