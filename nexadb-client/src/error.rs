//! Client error types.

use nexadb_protocol::ProtocolError;
use std::fmt;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unknown response type: {0:#04x}")]
    UnexpectedResponse(u8),

    #[error("server error: {message}")]
    Server { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("duplicate: {message}")]
    Duplicate { message: String },
}

/// Closed classification of client errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Socket-level failure: refused, timed out, closed, not connected.
    Connection,
    /// Bad magic, unknown message type, malformed frame.
    Protocol,
    /// Payload bytes did not parse.
    Decode,
    /// The server rejected the request.
    Remote,
    /// The server reported that the target does not exist.
    NotFound,
    /// The server reported a duplicate.
    Duplicate,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Decode => "decode",
            ErrorKind::Remote => "remote",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Duplicate => "duplicate",
        };
        f.write_str(name)
    }
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connect { .. }
            | ClientError::NotConnected
            | ClientError::ConnectionClosed
            | ClientError::Timeout
            | ClientError::Io(_) => ErrorKind::Connection,
            ClientError::Protocol(e) if e.is_decode() => ErrorKind::Decode,
            ClientError::Protocol(_) | ClientError::UnexpectedResponse(_) => ErrorKind::Protocol,
            ClientError::Server { .. } => ErrorKind::Remote,
            ClientError::NotFound { .. } => ErrorKind::NotFound,
            ClientError::Duplicate { .. } => ErrorKind::Duplicate,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns whether the error leaves the byte stream in an unknown state,
    /// so the socket can no longer be used.
    pub fn breaks_connection(&self) -> bool {
        match self.kind() {
            ErrorKind::Connection | ErrorKind::Protocol => {
                !matches!(self, ClientError::NotConnected)
            }
            _ => false,
        }
    }
}
