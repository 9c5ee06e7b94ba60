use crate::net::connection::Connection;
use crate::transform::Transform;

use tracing::{debug, info};

/// Application callbacks invoked by the event loop.
///
/// Every method runs synchronously on the loop thread and must not
/// block: while a callback runs, no other connection on the same loop
/// makes progress.
pub trait ConnectionHandler {
    /// A connection was accepted and registered.
    fn on_connection_completed(&mut self, _conn: &mut Connection) {}

    /// New bytes are available in the connection's input buffer.
    ///
    /// The handler consumes what it needs from the input and queues its
    /// reply in the output buffer; the loop writes it out right after
    /// this call returns.
    fn on_message(&mut self, conn: &mut Connection);

    /// The output buffer was fully written to the socket.
    fn on_write_completed(&mut self, _conn: &mut Connection) {}

    /// The peer went away or the connection failed.
    ///
    /// The connection is in the `Closing` state. Its descriptor is
    /// released as soon as its output buffer is empty.
    fn on_connection_closed(&mut self, _conn: &Connection) {}
}

/// Handler that sends every received byte back through a [`Transform`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformHandler {
    transform: Transform,
}

impl TransformHandler {
    pub fn new(transform: Transform) -> Self {
        Self { transform }
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }
}

impl ConnectionHandler for TransformHandler {
    fn on_connection_completed(&mut self, conn: &mut Connection) {
        info!(peer = %conn.peer_addr(), token = conn.token(), "connection completed");
    }

    fn on_message(&mut self, conn: &mut Connection) {
        let token = conn.token();
        let (input, output) = conn.buffers_mut();

        let start = output.readable_size();
        let received = input.readable_size();

        output.append(input.peek());
        input.clear();
        self.transform.apply(&mut output.peek_mut()[start..]);

        debug!(token, bytes = received, transform = %self.transform, "message transformed");
    }

    fn on_write_completed(&mut self, conn: &mut Connection) {
        debug!(token = conn.token(), "write completed");
    }

    fn on_connection_closed(&mut self, conn: &Connection) {
        info!(peer = %conn.peer_addr(), token = conn.token(), "connection closed");
    }
}
