use crate::buffer::Buffer;
use crate::error::Result;
use crate::handler::ConnectionHandler;
use crate::reactor::poller::unix::sys_close;
use crate::reactor::poller::{Demultiplexer, Interest, Trigger};

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use tracing::{debug, warn};

/// Lifecycle of a connection.
///
/// `Accepted → Active → Closing → Closed`, with `Accepted → Closing`
/// when the peer shuts down before sending anything. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, nothing received yet.
    Accepted,

    /// At least one read succeeded.
    Active,

    /// The peer is gone or I/O failed; the close callback has run.
    /// Output queued before that is still flushed.
    Closing,

    /// The descriptor has been released.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One accepted TCP peer driven by the event loop.
///
/// A connection owns its non-blocking descriptor, an input buffer
/// filled by the loop, and an output buffer the handler queues replies
/// into. It is owned by exactly one event loop for its whole life.
pub struct Connection {
    fd: RawFd,
    token: usize,
    peer: SocketAddr,
    state: ConnectionState,
    input: Buffer,
    output: Buffer,

    /// Interest currently registered with the demultiplexer.
    interest: Interest,
}

impl Connection {
    /// Wraps an accepted, non-blocking descriptor registered as READABLE.
    pub(crate) fn new(fd: RawFd, token: usize, peer: SocketAddr) -> Self {
        Self {
            fd,
            token,
            peer,
            state: ConnectionState::Accepted,
            input: Buffer::new(),
            output: Buffer::new(),
            interest: Interest::READABLE,
        }
    }

    /// Token identifying this connection in its event loop.
    pub fn token(&self) -> usize {
        self.token
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn input(&self) -> &Buffer {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Buffer {
        &mut self.input
    }

    pub fn output(&self) -> &Buffer {
        &self.output
    }

    /// Both buffers at once, for handlers that move bytes from input to output.
    pub fn buffers_mut(&mut self) -> (&mut Buffer, &mut Buffer) {
        (&mut self.input, &mut self.output)
    }

    /// Queues bytes for writing.
    pub fn send(&mut self, bytes: &[u8]) {
        self.output.append(bytes);
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn is_closing(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed
        )
    }

    /// Handles a readable notification.
    ///
    /// Reads until the socket would block when edge-triggered, once
    /// when level-triggered. Received bytes are handed to the handler
    /// and its reply is flushed immediately. End of stream, a reset or
    /// a read error then moves the connection to `Closing`.
    pub(crate) fn on_readable<H: ConnectionHandler>(
        &mut self,
        trigger: Trigger,
        chunk: usize,
        handler: &mut H,
    ) {
        let mut received = 0;
        let mut peer_gone = false;

        loop {
            match self.input.read_from_fd(self.fd, chunk) {
                Ok(0) => {
                    debug!(token = self.token, "peer closed the connection");
                    peer_gone = true;
                    break;
                }
                Ok(n) => {
                    received += n;
                    if trigger == Trigger::Level {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    debug!(token = self.token, "connection reset by peer");
                    peer_gone = true;
                    break;
                }
                Err(e) => {
                    warn!(token = self.token, peer = %self.peer, error = %e, "read failed");
                    peer_gone = true;
                    break;
                }
            }
        }

        if received > 0 {
            if self.state == ConnectionState::Accepted {
                self.state = ConnectionState::Active;
            }

            handler.on_message(self);
            self.flush(handler);
        }

        if peer_gone {
            self.close(handler);
        }
    }

    /// Handles a writable notification.
    pub(crate) fn on_writable<H: ConnectionHandler>(&mut self, handler: &mut H) {
        self.flush(handler);
    }

    /// Writes pending output until it is drained or the socket would block.
    ///
    /// Also runs while `Closing`, so a reply queued before the peer
    /// half-closed still reaches it.
    fn flush<H: ConnectionHandler>(&mut self, handler: &mut H) {
        if self.state == ConnectionState::Closed {
            return;
        }

        while !self.output.is_empty() {
            match self.output.write_to_fd(self.fd) {
                Ok(0) => return,
                Ok(n) => {
                    if self.output.is_empty() {
                        debug!(token = self.token, bytes = n, "output drained");
                        handler.on_write_completed(self);
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    debug!(
                        token = self.token,
                        pending = self.output.readable_size(),
                        "partial write, waiting for writability"
                    );
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(token = self.token, peer = %self.peer, error = %e, "write failed");
                    self.abort(handler);
                    return;
                }
            }
        }
    }

    /// Moves to `Closing` and notifies the handler once.
    pub(crate) fn close<H: ConnectionHandler>(&mut self, handler: &mut H) {
        if self.is_closing() {
            return;
        }

        self.state = ConnectionState::Closing;
        handler.on_connection_closed(self);
    }

    /// Closes and discards pending output.
    pub(crate) fn abort<H: ConnectionHandler>(&mut self, handler: &mut H) {
        self.output.clear();
        self.close(handler);
    }

    /// Closing with nothing left to write; ready to be released.
    pub(crate) fn is_finished(&self) -> bool {
        self.is_closing() && self.output.is_empty()
    }

    /// Asks for writability only while output is pending, and stops
    /// reading once closing.
    pub(crate) fn sync_interest(&mut self, demux: &mut dyn Demultiplexer) -> Result<()> {
        let desired = match (self.is_closing(), self.output.is_empty()) {
            (false, true) => Interest::READABLE,
            (false, false) => Interest::BOTH,
            (true, _) => Interest::WRITABLE,
        };

        if desired != self.interest {
            demux.modify(self.fd, self.token, desired)?;
            self.interest = desired;
        }

        Ok(())
    }

    /// Closes the descriptor. The caller has already unregistered it.
    pub(crate) fn release(&mut self) {
        if self.state != ConnectionState::Closed {
            sys_close(self.fd);
            self.state = ConnectionState::Closed;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.fd)
            .field("token", &self.token)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("pending_input", &self.input.readable_size())
            .field("pending_output", &self.output.readable_size())
            .finish()
    }
}
