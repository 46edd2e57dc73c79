// src/core/errors.rs

//! Defines the primary error type for the connection core.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering every way a client connection can fail.
/// Every variant is handled locally by destroying the affected connection;
/// none of them propagate past the listener.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Connection closed by peer")]
    Disconnected,

    #[error("Stream is closed")]
    StreamClosed,

    #[error("Input line exceeds the maximum length of {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("Authentication client not compatible with this server (mixed old and new binaries?)")]
    IncompatibleVersion,

    #[error("Authentication client said it's PID 0")]
    ZeroPid,

    #[error("Authentication client gave a PID {0} of existing connection")]
    DuplicatePid(u32),

    #[error("Unknown authentication mechanism '{0}'")]
    UnknownMechanism(String),
}

impl AuthError {
    /// A short label used for the `kind` dimension of the protocol error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Io(_) => "io",
            AuthError::Disconnected => "disconnected",
            AuthError::StreamClosed => "closed",
            AuthError::LineTooLong { .. } => "line_too_long",
            AuthError::IncompatibleVersion => "version",
            AuthError::ZeroPid => "zero_pid",
            AuthError::DuplicatePid(_) => "duplicate_pid",
            AuthError::UnknownMechanism(_) => "unknown_mechanism",
        }
    }

    /// True for failures caused by the peer breaking the wire protocol,
    /// as opposed to the socket simply going away.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            AuthError::LineTooLong { .. }
                | AuthError::IncompatibleVersion
                | AuthError::ZeroPid
                | AuthError::DuplicatePid(_)
        )
    }
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => AuthError::Disconnected,
            _ => AuthError::Io(Arc::new(e)),
        }
    }
}
