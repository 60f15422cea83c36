//! Record format of the daemon log file.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How records are rendered into `<log_dir>/<name>.log`.
///
/// Accepted case-insensitively from configuration files, environment
/// variables and flags.
#[derive(
    Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Deserialize, Serialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One human-readable line per record, with an RFC 3339 UTC timestamp.
    #[default]
    Compact,
    /// One JSON object per line with event fields flattened to the top level.
    Json,
}

/// Error returned when text does not name a [`LogFormat`].
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("compact", LogFormat::Compact)]
    #[case("JSON", LogFormat::Json)]
    fn parses_ignoring_case(#[case] raw: &str, #[case] expected: LogFormat) {
        assert_eq!(raw.parse::<LogFormat>().ok(), Some(expected));
    }

    #[test]
    fn rejects_unknown_formats() {
        assert!("pretty".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }
}
