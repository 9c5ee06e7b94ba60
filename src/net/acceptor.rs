use crate::error::Result;
use crate::net::listener::TcpListener;
use crate::reactor::poller::unix::{sys_close, sys_set_nonblocking};
use crate::reactor::poller::{Demultiplexer, Interest, Trigger};

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Wait before re-arming the listener after consecutive failed rounds.
pub(crate) const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Outcome of one readable notification on the listening socket.
#[derive(Debug, Default)]
pub(crate) struct AcceptRound {
    /// Accepted non-blocking descriptors with their peers.
    pub(crate) accepted: Vec<(RawFd, SocketAddr)>,

    /// The round stopped because no connection slot was left.
    pub(crate) at_capacity: bool,

    /// The round stopped on an accept error other than an empty backlog,
    /// such as `EMFILE`. Connections may still be pending.
    pub(crate) failed: bool,
}

/// The listening side of an event loop.
///
/// Watches the listener for readability and turns pending connections
/// into descriptors the loop can register. While the loop is full the
/// listener stays registered with no interest, so pending connections
/// wait in the kernel backlog instead of spinning the loop.
///
/// A round that fails leaves the listener paused with a retry deadline.
/// An edge-triggered listener is not reported again for connections
/// already queued, so the loop re-arms it once the deadline passes.
pub(crate) struct Acceptor {
    listener: TcpListener,
    token: usize,
    paused: bool,

    /// Set while paused after a failed round.
    retry_at: Option<Instant>,

    /// Failed rounds in a row.
    failures: u32,
}

impl Acceptor {
    /// Registers the listener for readability under `token`.
    pub(crate) fn new(
        listener: TcpListener,
        token: usize,
        demux: &mut dyn Demultiplexer,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        demux.register(listener.as_raw_fd(), token, Interest::READABLE)?;

        Ok(Self {
            listener,
            token,
            paused: false,
            retry_at: None,
            failures: 0,
        })
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    /// Accepts pending connections.
    ///
    /// Edge-triggered, accepts until the backlog is empty; level-triggered,
    /// accepts at most one. Never accepts more than `slots` connections.
    pub(crate) fn accept_round(&mut self, trigger: Trigger, mut slots: usize) -> AcceptRound {
        let mut round = AcceptRound::default();

        loop {
            if slots == 0 {
                round.at_capacity = true;
                break;
            }

            match self.accept() {
                Ok(Some(accepted)) => {
                    round.accepted.push(accepted);
                    slots -= 1;

                    if trigger == Trigger::Level {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, failures = self.failures + 1, "accept failed");
                    round.failed = true;
                    break;
                }
            }
        }

        if round.failed {
            self.failures = self.failures.saturating_add(1);
        } else {
            self.failures = 0;
        }

        round
    }

    /// Accepts one connection, or `None` when the backlog is empty.
    fn accept(&self) -> io::Result<Option<(RawFd, SocketAddr)>> {
        loop {
            match self.listener.accept_raw() {
                Ok((fd, peer)) => {
                    if let Err(e) = sys_set_nonblocking(fd, true) {
                        sys_close(fd);
                        return Err(e);
                    }

                    return Ok(Some((fd, peer)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stops watching the listener until [`resume`](Self::resume).
    pub(crate) fn pause(&mut self, demux: &mut dyn Demultiplexer) -> Result<()> {
        self.retry_at = None;

        if !self.paused {
            demux.modify(self.listener.as_raw_fd(), self.token, Interest::NONE)?;
            self.paused = true;
            debug!("acceptor paused");
        }

        Ok(())
    }

    /// Pauses after a failed round and schedules the listener to be re-armed.
    ///
    /// The first failure is retried on the next turn. Further failures in
    /// a row wait [`ACCEPT_RETRY_DELAY`] so a persistent `EMFILE` does not
    /// spin the loop.
    pub(crate) fn pause_after_error(&mut self, demux: &mut dyn Demultiplexer) -> Result<()> {
        self.pause(demux)?;

        let delay = if self.failures > 1 {
            ACCEPT_RETRY_DELAY
        } else {
            Duration::ZERO
        };
        self.retry_at = Some(Instant::now() + delay);

        debug!(failures = self.failures, ?delay, "accept retry scheduled");
        Ok(())
    }

    /// Deadline for re-arming after a failed round, if one is pending.
    pub(crate) fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Watches the listener again.
    ///
    /// Re-arming also re-reports connections that queued up while paused.
    pub(crate) fn resume(&mut self, demux: &mut dyn Demultiplexer) -> Result<()> {
        self.retry_at = None;

        if self.paused {
            demux.modify(self.listener.as_raw_fd(), self.token, Interest::READABLE)?;
            self.paused = false;
            debug!("acceptor resumed");
        }

        Ok(())
    }

    /// Unregisters the listener. It is closed when the acceptor drops.
    pub(crate) fn deregister(&self, demux: &mut dyn Demultiplexer) -> Result<()> {
        demux.unregister(self.listener.as_raw_fd())
    }
}
