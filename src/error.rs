//! Error types shared by the reactor and the worker pool.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use thiserror::Error;

/// Result type for evloop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for evloop.
///
/// Connection-scoped failures never surface through this type: they are
/// logged and end only the affected connection. What remains are setup
/// failures, capacity reports and fatal demultiplexer errors.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from an underlying system call.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The readiness backend could not be created.
    #[error("failed to create {backend} demultiplexer: {source}")]
    Demultiplexer {
        backend: &'static str,
        #[source]
        source: io::Error,
    },

    /// Creating, binding or listening on the server socket failed.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Every connection slot is in use.
    #[error("connection table is full ({limit} connections)")]
    Capacity { limit: usize },

    /// The descriptor cannot be represented in an `fd_set`.
    #[error("descriptor {fd} exceeds the select() limit of {limit}")]
    DescriptorLimit { fd: RawFd, limit: usize },

    /// The descriptor already has a registration.
    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),

    /// The descriptor has no registration.
    #[error("descriptor {0} is not registered")]
    NotRegistered(RawFd),

    /// The work queue was closed while pushing.
    #[error("work queue is closed")]
    QueueClosed,

    /// The server closed the connection while the client was still running.
    #[error("server {0} terminated the connection")]
    ServerTerminated(SocketAddr),

    /// The requested backend is not available on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    /// Unknown backend name.
    #[error("unknown backend `{0}` (expected select, poll, epoll or epoll-edge)")]
    InvalidBackend(String),

    /// Unknown transform name.
    #[error("unknown transform `{0}` (expected echo or rot13)")]
    InvalidTransform(String),
}
