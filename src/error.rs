//! Error taxonomy for serial port operations.
//!
//! Mirrors `AMSerialErrorDomain` from the library this crate's design is
//! based on: a small closed set of error kinds rather than a generic
//! `io::Error` passthrough, because callers need to distinguish a timed-out
//! read (partial data, try again) from a fatal one (port is gone).

use std::io;

use thiserror::Error;

/// Errors raised by [`crate::port::Port`] operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// An unrecoverable OS error: open/ioctl/tcsetattr/read/write returned an
    /// unexpected errno.
    #[error("fatal serial port error: {0}")]
    Fatal(#[source] io::Error),

    /// The read timeout budget was exhausted before a stop condition fired.
    /// Carries whatever was read before the timeout.
    #[error("read timed out after {timeout:?} with {} byte(s) buffered", partial.len())]
    Timeout {
        /// The configured timeout budget that was exhausted.
        timeout: std::time::Duration,
        /// Bytes accumulated before the timeout fired.
        partial: Vec<u8>,
    },

    /// Accumulated read data exceeded the internal 4096-byte buffer without
    /// hitting a stop condition.
    #[error("internal read buffer filled without a stop condition")]
    InternalBufferFull {
        /// The full (4096-byte) buffer accumulated before giving up.
        partial: Vec<u8>,
    },

    /// `write` was called with an empty or absent buffer.
    #[error("no data to write")]
    NoDataToWrite,

    /// `write` made partial progress before a fatal errno.
    #[error("only {written} of {requested} byte(s) written")]
    OnlySomeDataWritten {
        /// Bytes actually written to the driver.
        written: usize,
        /// Bytes the caller asked to write.
        requested: usize,
    },
}

impl From<io::Error> for PortError {
    fn from(err: io::Error) -> Self {
        PortError::Fatal(err)
    }
}

impl From<nix::Error> for PortError {
    fn from(err: nix::Error) -> Self {
        PortError::Fatal(io::Error::from(err))
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, PortError>;

/// Terminator tag returned alongside a synchronous read, identifying which
/// stop condition fired. Checked in this priority order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndCode {
    /// The underlying read returned 0 bytes.
    EndOfStream,
    /// Delimiter mode, and the most recently read chunk ended with the stop
    /// character. Detected at chunk boundary, not at the first in-stream
    /// occurrence.
    StopCharReached,
    /// Length mode, and the accumulated size equals the requested length.
    StopLengthReached,
    /// Accumulated size exceeded the requested length. Defensive: should not
    /// occur since reads are clamped to the remaining budget.
    StopLengthExceeded,
}
