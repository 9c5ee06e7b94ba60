//! Sockets and connections.

pub(crate) mod acceptor;
pub(crate) mod connection;
pub(crate) mod listener;

pub use connection::{Connection, ConnectionState};
pub use listener::TcpListener;
