//! Error types shared by the client and server loops.

use std::io;

use thiserror::Error;

/// Failure observed on a live connection.
///
/// Loops never hand these to their callers. A loop that sees one stops and
/// leaves cleanup to whoever owns the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer went away: orderly close, reset, or broken pipe.
    #[error("connection closed by peer")]
    Closed,

    /// Any other socket-level failure.
    #[error("transport failure: {0}")]
    Failed(#[source] io::Error),

    /// The peer sent something that cannot be framed.
    #[error(transparent)]
    Framing(#[from] FramingError),
}

impl TransportError {
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Failed(err),
        }
    }
}

/// Invalid framing setup or unframeable input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("message terminator must not be empty")]
    EmptyTerminator,

    #[error("no terminator within {limit} buffered bytes")]
    MessageTooLong { limit: usize },
}
