//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [`Result`]. The top-level
//! binary is the only place that converts an [`Error`] into a process exit
//! code; library code never aborts the process itself.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Bad CLI usage.
    InvalidArgs(String),
    /// Could not open, read, or write a file.
    Io(std::io::Error),
    /// A `scroll` read/write failed (out of range offset, short buffer, ...).
    Scroll(scroll::Error),
    /// DOS/PE magic mismatch, truncated or out-of-range offsets, invalid
    /// section/symbol indices, or any other structurally malformed image.
    Malformed(String),
    /// A STABS or COFF function name exceeded the 255-byte working buffer.
    NameTooLong(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgs(msg) => write!(f, "{}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Scroll(err) => write!(f, "malformed image: {}", err),
            Error::Malformed(msg) => write!(f, "malformed image: {}", msg),
            Error::NameTooLong(len) => {
                write!(f, "function name too long ({} bytes, max 255)", len)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Scroll(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Scroll(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
