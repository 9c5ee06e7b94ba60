//! Readiness-based TCP servers.
//!
//! Two ways of serving many clients with one process:
//!
//! - [`EventLoop`]: a single-threaded reactor over a pluggable
//!   demultiplexer (`select`, `poll`, `epoll`, level or edge-triggered)
//!   driving non-blocking [`Connection`]s through a [`ConnectionHandler`];
//! - [`PoolServer`]: a blocking acceptor feeding a bounded [`WorkQueue`]
//!   drained by a fixed [`WorkerPool`].
//!
//! Both bundled servers echo what they receive through a [`Transform`].

mod buffer;
mod handler;
mod transform;
mod utils;

pub mod client;
pub mod config;
pub mod error;
pub mod net;
pub mod pool;
pub mod reactor;

pub use buffer::Buffer;
pub use config::PoolConfig;
pub use error::{Error, Result};
pub use handler::{ConnectionHandler, TransformHandler};
pub use net::{Connection, ConnectionState};
pub use pool::{PoolServer, TryPushError, WorkQueue, WorkerPool};
pub use reactor::poller::{Backend, Interest, Trigger};
pub use reactor::{EventLoop, EventLoopBuilder, LoopHandle};
pub use transform::{Transform, rot13};
