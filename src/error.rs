//! Error types.
//!
//! Only [`Error`] is fatal to the process. Everything below it is scoped to
//! a single line or a single connection and is logged and absorbed.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::hub::{CloseReason, ConnectionId};

/// Process-level failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Tail(#[from] TailError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),

    #[error("line source ended unexpectedly")]
    LineSourceEnded,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure reported by the file tailer.
///
/// `Open` is a startup error. The other variants are per-line: the line is
/// skipped and tailing continues.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("discarded {bytes} bytes of an unterminated line in {}", .path.display())]
    PartialLine { path: PathBuf, bytes: usize },
}

impl TailError {
    /// Whether tailing cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),

    #[error("connection {0} is not active")]
    NotActive(ConnectionId),
}

/// Failure to hand a line to one connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound queue is full")]
    QueueFull,

    #[error("connection writer has gone away")]
    Closed,
}

impl SendError {
    pub fn close_reason(self) -> CloseReason {
        match self {
            Self::QueueFull => CloseReason::QueueFull,
            Self::Closed => CloseReason::SendFailed,
        }
    }
}
