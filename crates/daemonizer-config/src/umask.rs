//! Parses the octal umask notation accepted in configuration.

use std::num::ParseIntError;

use thiserror::Error;

/// Highest permission bits a umask may clear.
pub const MAX_UMASK: u32 = 0o777;

/// Errors raised while interpreting a configured umask.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UmaskError {
    /// The value was not an octal number.
    #[error("umask '{value}' is not an octal number: {source}")]
    Parse {
        /// Text supplied by the operator.
        value: String,
        /// Underlying integer parse error.
        #[source]
        source: ParseIntError,
    },
    /// The value carries a `+` or `-` sign.
    #[error("umask '{value}' must be written without a sign")]
    Signed {
        /// Text supplied by the operator.
        value: String,
    },
    /// The value sets bits outside the permission range.
    #[error("umask {value:#o} exceeds 0o777")]
    OutOfRange {
        /// Parsed umask bits.
        value: u32,
    },
}

/// Parses `077`, `0077` or `0o077` into permission bits.
pub fn parse_umask(text: &str) -> Result<u32, UmaskError> {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    if digits.starts_with(['+', '-']) {
        return Err(UmaskError::Signed {
            value: text.to_owned(),
        });
    }
    let value = u32::from_str_radix(digits, 8).map_err(|source| UmaskError::Parse {
        value: text.to_owned(),
        source,
    })?;
    if value > MAX_UMASK {
        return Err(UmaskError::OutOfRange { value });
    }
    Ok(value)
}
