/*!
 * Error Types
 *
 * `FrameError` describes why a byte stream is not a valid RESP reply.
 * `ClientError` is everything a `Connection` call can fail with; each
 * variant is a distinct failure class so callers can pick a retry policy.
 */

use std::io;
use thiserror::Error;

/// Why the Framer rejected the bytes it was given.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Leading byte is not one of `+ - : $ *`.
    #[error("invalid type marker: {0:#04x}")]
    InvalidMarker(u8),

    /// Length or integer line is not a decimal i64.
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Bulk/array length is negative but not the `-1` null sentinel.
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Bulk payload is not followed by CRLF.
    #[error("bulk payload not terminated by CRLF")]
    MissingCrlf,

    #[error("bulk string too long: {len} bytes exceeds {max} byte limit")]
    BulkTooLong { len: usize, max: usize },

    #[error("array too large: {len} elements exceeds {max} element limit")]
    ArrayTooLarge { len: usize, max: usize },

    #[error("nesting too deep: depth {0} exceeds limit")]
    NestingTooDeep(usize),

    /// Simple string or error line runs past the limit without a CRLF.
    #[error("line too long: exceeds {max} byte limit")]
    LineTooLong { max: usize },
}

/// Failure of a `Connection` operation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Resolving, reaching or handshaking with the server failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// A read failed for a reason other than a timeout or a peer close.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// No data moved within the configured timeout window.
    #[error("timed out waiting for the server")]
    Timeout,

    /// The peer closed the socket before a complete reply arrived.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// The connection was already closed; no I/O was attempted.
    #[error("connection is closed")]
    Closed,

    #[error("refusing to send an empty command")]
    EmptyCommand,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Classify a failed socket read.
    pub(crate) fn from_read(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => ClientError::ConnectionClosed,
            _ => ClientError::Read(e),
        }
    }

    /// Classify a failed socket write.
    pub(crate) fn from_write(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout,
            _ => ClientError::Write(e),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout)
    }
}
