//! Startup report the detached daemon sends back to the launching process.
//!
//! The report travels as a single JSON line over an anonymous pipe. The
//! launching process treats end-of-file without a report as a lost daemon.

use std::io::{self, BufRead, BufReader, Read, Write};

use serde::{Deserialize, Serialize};

use super::errors::DetachError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub(super) enum HandoffReport {
    Started { pid: u32 },
    AlreadyRunning { pid: Option<u32> },
    Failed { message: String },
}

impl HandoffReport {
    pub(super) fn failed(error: impl ToString) -> Self {
        Self::Failed {
            message: error.to_string(),
        }
    }

    pub(super) fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        serde_json::to_writer(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub(super) fn read_from<R: Read>(reader: R) -> Result<Self, DetachError> {
        let mut line = String::new();
        BufReader::new(reader)
            .read_line(&mut line)
            .map_err(|source| DetachError::Handoff { source })?;
        if line.trim().is_empty() {
            return Err(DetachError::HandoffLost);
        }
        serde_json::from_str(&line).map_err(|source| DetachError::HandoffDecode { source })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(HandoffReport::Started { pid: 4242 })]
    #[case(HandoffReport::AlreadyRunning { pid: None })]
    #[case(HandoffReport::failed("lock directory vanished"))]
    fn reports_survive_the_pipe(#[case] report: HandoffReport) {
        let mut buffer = Vec::new();
        report.write_to(&mut buffer).expect("report should encode");
        assert_eq!(buffer.last(), Some(&b'\n'));
        let decoded = HandoffReport::read_from(buffer.as_slice()).expect("report should decode");
        assert_eq!(decoded, report);
    }

    #[test]
    fn closed_pipe_means_lost_daemon() {
        let error = HandoffReport::read_from(io::empty()).expect_err("no report was written");
        assert!(matches!(error, DetachError::HandoffLost), "{error}");
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let error = HandoffReport::read_from("started\n".as_bytes())
            .expect_err("garbage should not decode");
        assert!(matches!(error, DetachError::HandoffDecode { .. }), "{error}");
    }
}
