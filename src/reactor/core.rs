use super::event::Event;
use super::poller::unix::sys_close;
use super::poller::{Backend, Demultiplexer, Interest, Trigger, Waker};
use crate::error::{Error, Result};
use crate::handler::ConnectionHandler;
use crate::net::acceptor::Acceptor;
use crate::net::connection::{Connection, ConnectionState};
use crate::net::listener::TcpListener;
use crate::utils::Slab;

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Token of the listening socket.
pub(crate) const ACCEPTOR_TOKEN: usize = usize::MAX - 1;

/// Token of the waker's read end.
pub(crate) const WAKER_TOKEN: usize = usize::MAX;

/// A single-threaded reactor serving TCP connections.
///
/// The loop owns one demultiplexer, the acceptor and every live
/// connection. Each [`turn`](Self::turn) waits for readiness and
/// dispatches every reported event to completion (read, then write,
/// then interest update) before the next one. Connection tokens are
/// slab indices, so dispatch is a direct lookup.
pub struct EventLoop<H> {
    demux: Box<dyn Demultiplexer>,
    events: Vec<Event>,

    connections: Slab<Connection>,
    acceptor: Option<Acceptor>,

    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,

    backend: Backend,
    trigger: Trigger,
    max_connections: usize,
    read_chunk: usize,

    handler: H,
}

impl<H: ConnectionHandler> EventLoop<H> {
    pub(crate) fn new(
        backend: Backend,
        handler: H,
        max_connections: usize,
        events_capacity: usize,
        read_chunk: usize,
    ) -> Result<Self> {
        let mut demux = backend.build(events_capacity)?;

        let waker = Waker::new()?;
        demux.register(waker.fd(), WAKER_TOKEN, Interest::READABLE)?;

        debug!(backend = demux.name(), max_connections, events_capacity, "event loop created");

        Ok(Self {
            trigger: demux.trigger(),
            demux,
            events: Vec::with_capacity(events_capacity),
            connections: Slab::new(max_connections.min(1024)),
            acceptor: None,
            waker: Arc::new(waker),
            running: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicUsize::new(0)),
            backend,
            max_connections,
            read_chunk,
            handler,
        })
    }

    /// Binds a listener and starts accepting connections on it.
    ///
    /// Returns the bound address, which carries the real port when
    /// binding port 0. A previously bound listener is replaced.
    pub fn bind(&mut self, addr: &str) -> Result<SocketAddr> {
        if let Some(previous) = self.acceptor.take() {
            previous.deregister(self.demux.as_mut())?;
        }

        let listener = TcpListener::bind(addr)?;
        let acceptor = Acceptor::new(listener, ACCEPTOR_TOKEN, self.demux.as_mut())?;
        let local = acceptor.local_addr()?;

        info!(addr = %local, backend = self.demux.name(), "listening");

        self.acceptor = Some(acceptor);
        Ok(local)
    }

    /// Runs until [`LoopHandle::stop`] is called or the demultiplexer fails.
    pub fn run(&mut self) -> Result<()> {
        while self.running.load(Ordering::Acquire) {
            self.turn(None)?;
        }

        info!("event loop stopped");
        Ok(())
    }

    /// Waits once for readiness and dispatches what was reported.
    ///
    /// Returns the number of events handled. A `wait` failure is fatal
    /// and returned as is.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let timeout = self.rearm_acceptor(timeout)?;

        if let Err(e) = self.demux.wait(&mut self.events, timeout) {
            error!(backend = self.demux.name(), error = %e, "wait failed");
            return Err(e);
        }

        let events = std::mem::take(&mut self.events);
        let handled = events.len();

        let result = events.iter().try_for_each(|event| self.dispatch(*event));
        self.events = events;

        result.map(|_| handled)
    }

    /// Re-arms an acceptor paused by a failed round once its retry
    /// deadline has passed, otherwise shortens the wait to that deadline.
    fn rearm_acceptor(&mut self, timeout: Option<Duration>) -> Result<Option<Duration>> {
        let Some(acceptor) = self.acceptor.as_mut() else {
            return Ok(timeout);
        };
        let Some(retry_at) = acceptor.retry_at() else {
            return Ok(timeout);
        };

        let now = Instant::now();
        if retry_at <= now {
            acceptor.resume(self.demux.as_mut())?;
            return Ok(timeout);
        }

        let remaining = retry_at - now;
        Ok(Some(timeout.map_or(remaining, |t| t.min(remaining))))
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        match event.token {
            WAKER_TOKEN => {
                self.waker.drain();
                Ok(())
            }
            ACCEPTOR_TOKEN => self.accept_ready(),
            token => self.connection_ready(token, event),
        }
    }

    fn accept_ready(&mut self) -> Result<()> {
        let slots = self
            .max_connections
            .saturating_sub(self.connections.len());

        let Some(acceptor) = self.acceptor.as_mut() else {
            return Ok(());
        };

        let round = acceptor.accept_round(self.trigger, slots);

        if round.at_capacity {
            let full = Error::Capacity {
                limit: self.max_connections,
            };
            warn!(error = %full, "pausing acceptor");
            acceptor.pause(self.demux.as_mut())?;
        } else if round.failed {
            // Under edge triggering the backlog would never be reported
            // again, and under level triggering the loop would spin.
            acceptor.pause_after_error(self.demux.as_mut())?;
        }

        for (fd, peer) in round.accepted {
            self.install(fd, peer)?;
        }

        Ok(())
    }

    /// Registers an accepted descriptor and hands it to the handler.
    fn install(&mut self, fd: RawFd, peer: SocketAddr) -> Result<()> {
        let token = self.connections.vacant_key();

        if let Err(e) = self.demux.register(fd, token, Interest::READABLE) {
            warn!(
                %peer,
                backend = self.demux.name(),
                error = %e,
                "failed to register connection"
            );
            sys_close(fd);
            return Ok(());
        }

        self.connections.insert(Connection::new(fd, token, peer));
        self.live.fetch_add(1, Ordering::Release);

        debug!(token, %peer, live = self.connections.len(), "connection accepted");

        if let Some(conn) = self.connections.get_mut(token) {
            self.handler.on_connection_completed(conn);
            conn.on_writable(&mut self.handler);
        }

        self.settle(token)
    }

    fn connection_ready(&mut self, token: usize, event: Event) -> Result<()> {
        let Some(conn) = self.connections.get_mut(token) else {
            debug!(token, "event for a released connection");
            return Ok(());
        };

        if conn.is_closing() {
            // Lingering for its last output: any report, including an
            // error or hangup seen as readable, retries the flush.
            conn.on_writable(&mut self.handler);
            return self.settle(token);
        }

        if event.readable {
            conn.on_readable(self.trigger, self.read_chunk, &mut self.handler);
        }

        if event.writable && !conn.is_closing() {
            conn.on_writable(&mut self.handler);
        }

        self.settle(token)
    }

    /// Updates the interest of a connection, or releases it once it is
    /// closing with nothing left to write.
    fn settle(&mut self, token: usize) -> Result<()> {
        let Some(conn) = self.connections.get_mut(token) else {
            return Ok(());
        };

        if !conn.is_finished() {
            match conn.sync_interest(self.demux.as_mut()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(token, error = %e, "failed to update interest");
                    conn.abort(&mut self.handler);
                }
            }
        }

        self.release(token)
    }

    /// Unregisters and closes a connection, freeing its slot.
    fn release(&mut self, token: usize) -> Result<()> {
        let Some(mut conn) = self.connections.remove(token) else {
            return Ok(());
        };

        if let Err(e) = self.demux.unregister(conn.fd()) {
            warn!(token, error = %e, "failed to unregister connection");
        }

        conn.release();
        self.live.fetch_sub(1, Ordering::Release);

        debug!(token, peer = %conn.peer_addr(), live = self.connections.len(), "connection released");

        if let Some(acceptor) = self.acceptor.as_mut() {
            acceptor.resume(self.demux.as_mut())?;
        }

        Ok(())
    }

    /// A cloneable handle for stopping the loop from another thread.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            running: self.running.clone(),
            live: self.live.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Address of the bound listener, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.as_ref()?.local_addr().ok()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// State of a live connection; `None` once it has been released.
    pub fn connection_state(&self, token: usize) -> Option<ConnectionState> {
        self.connections.get(token).map(Connection::state)
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Whether the acceptor is paused, either because every slot is
    /// taken or until a failed accept is retried.
    pub fn is_accept_paused(&self) -> bool {
        self.acceptor.as_ref().is_some_and(Acceptor::is_paused)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

/// Cross-thread control of an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    running: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
    waker: Arc<Waker>,
}

impl LoopHandle {
    /// Asks the loop to stop and interrupts its current `wait`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.waker.wake();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}
