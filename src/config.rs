//! Defaults shared by the servers and the command line.

use crate::transform::Transform;

/// Port the servers bind and the client connects to when none is given.
pub const DEFAULT_PORT: u16 = 43211;

/// Live connections a single event loop accepts before pausing its acceptor.
pub const DEFAULT_MAX_CONNECTIONS: usize = 128;

/// Readiness events collected per `wait` call.
pub const DEFAULT_EVENTS_CAPACITY: usize = 128;

/// Bytes reserved in a connection buffer for each read.
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Worker threads started by the pool server.
pub const DEFAULT_WORKERS: usize = 4;

/// Accepted connections the pool queue holds before the acceptor blocks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Configuration of the thread-pool server.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Capacity of the queue between the acceptor and the workers.
    pub queue_capacity: usize,

    /// Transform applied to every received byte.
    pub transform: Transform,

    /// Size of the per-worker read buffer.
    pub read_chunk: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            transform: Transform::Echo,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}
