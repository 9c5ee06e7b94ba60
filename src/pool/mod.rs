//! The blocking alternative to the reactor: one acceptor thread, a
//! bounded queue and a fixed pool of workers.

mod queue;
mod server;
mod worker;

pub use queue::{TryPushError, WorkQueue};
pub use server::PoolServer;
pub use worker::{WorkerPool, serve_connection};
