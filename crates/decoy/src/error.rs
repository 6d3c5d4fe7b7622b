//! Error types for the simulators.
//!
//! Three layers, matching where a failure can surface:
//! - `ConfigError`: a misconfigured listener, detected before any socket is bound
//! - `SimError`: construction and lifecycle failures returned to the driver
//! - `HandlerError`: failures inside a handling task, kept in the listener's `ErrorLog`

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Invalid listener configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("expected at least one mode")]
    NoModes,
    #[error("mode '{0}' has no rules")]
    EmptyMode(String),
    #[error("mode '{0}' is declared more than once")]
    DuplicateMode(String),
    #[error("mode '{mode}' declares {method} {selector} more than once")]
    DuplicateRule {
        mode: String,
        selector: String,
        method: String,
    },
    #[error("invalid selector pattern '{selector}': {source}")]
    InvalidPattern {
        selector: String,
        #[source]
        source: regex::Error,
    },
    #[error("no mode configured with name: {0}")]
    UnknownMode(String),
    #[error("capture queue capacity must be greater than zero")]
    ZeroCapacity,
    #[error("read buffer size must be greater than zero")]
    ZeroBufferSize,
    #[error("failed to encode response body for {selector}: {source}")]
    BodyEncoding {
        selector: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid status code {0}")]
    InvalidStatus(u16),
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors returned to the driver by listener construction and lifecycle calls.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("no free port found on {host} after {attempts} attempts")]
    PortsExhausted { host: String, attempts: usize },
    #[error("listener is stopped and cannot be restarted")]
    Stopped,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A failure observed inside a handling task.
///
/// These never stop the listener; they are appended to its `ErrorLog`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("accept failed: {message}")]
    Accept { kind: io::ErrorKind, message: String },
    #[error("read from {peer} failed: {message}")]
    Read {
        peer: SocketAddr,
        kind: io::ErrorKind,
        message: String,
    },
    #[error("write to {peer} failed: {message}")]
    Write {
        peer: SocketAddr,
        kind: io::ErrorKind,
        message: String,
    },
    #[error("write to {peer} timed out")]
    WriteTimeout { peer: SocketAddr },
    #[error("no rule matched {method} {uri}")]
    Unmatched { method: String, uri: String },
}

impl HandlerError {
    pub(crate) fn accept(err: &io::Error) -> Self {
        Self::Accept {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub(crate) fn read(peer: SocketAddr, err: &io::Error) -> Self {
        Self::Read {
            peer,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// A failure on an HTTP connection, reported as a read failure and
    /// keeping the I/O kind when hyper carries one.
    pub(crate) fn http(peer: SocketAddr, err: &hyper::Error) -> Self {
        let mut source = std::error::Error::source(err);
        let io_kind = loop {
            match source {
                Some(inner) => match inner.downcast_ref::<io::Error>() {
                    Some(io_err) => break Some(io_err.kind()),
                    None => source = inner.source(),
                },
                None => break None,
            }
        };
        let kind = io_kind.unwrap_or(if err.is_timeout() {
            io::ErrorKind::TimedOut
        } else if err.is_incomplete_message() {
            io::ErrorKind::UnexpectedEof
        } else {
            io::ErrorKind::InvalidData
        });
        Self::Read {
            peer,
            kind,
            message: err.to_string(),
        }
    }

    pub(crate) fn write(peer: SocketAddr, err: &io::Error) -> Self {
        Self::Write {
            peer,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
