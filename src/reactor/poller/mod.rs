//! Readiness demultiplexers.
//!
//! This module provides a unified interface over the readiness
//! notification mechanisms of the operating system:
//!
//! - [`Backend::Select`]: bitmask sets (`select(2)`), level-triggered,
//!   limited to descriptors below `FD_SETSIZE`;
//! - [`Backend::Poll`]: a dense `pollfd` array (`poll(2)`), level-triggered;
//! - [`Backend::Epoll`] and [`Backend::EpollEdge`]: a kernel-side
//!   interest list (`epoll(7)`, Linux only), level- or edge-triggered.
//!
//! The backend is chosen when an event loop is built; the acceptor and
//! connection logic is written once against [`Demultiplexer`] and
//! consults [`Demultiplexer::trigger`] to know whether it must drain.

pub(crate) mod common;
pub(crate) mod unix;

mod poll;
mod select;

#[cfg(target_os = "linux")]
mod epoll;

pub use common::{Interest, Trigger};
pub(crate) use common::Waker;
pub use poll::PollDemultiplexer;
pub use select::SelectDemultiplexer;

#[cfg(target_os = "linux")]
pub use epoll::EpollDemultiplexer;

use crate::error::{Error, Result};
use crate::reactor::event::Event;

use std::fmt;
use std::os::fd::RawFd;
use std::str::FromStr;
use std::time::Duration;

/// A readiness notification backend.
///
/// Implementations keep a registration table mapping each descriptor
/// to the token and interest it was registered with. Entries must be
/// removed with [`unregister`](Self::unregister) before the descriptor
/// is closed.
pub trait Demultiplexer: Send {
    /// Starts watching `fd`, reporting its readiness under `token`.
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> Result<()>;

    /// Replaces the token and interest of an existing registration.
    fn modify(&mut self, fd: RawFd, token: usize, interest: Interest) -> Result<()>;

    /// Stops watching `fd`.
    fn unregister(&mut self, fd: RawFd) -> Result<()>;

    /// Blocks until at least one registered descriptor is ready or the
    /// timeout expires (`None` waits forever).
    ///
    /// `events` is cleared and refilled. Interrupted calls are retried;
    /// any other failure is returned and is fatal to the caller.
    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> Result<()>;

    /// Triggering discipline of this backend.
    fn trigger(&self) -> Trigger;

    /// Short backend name used in logs, matching [`Backend::name`].
    fn name(&self) -> &'static str;

    /// Number of registered descriptors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Available demultiplexer backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Select,
    Poll,
    Epoll,
    EpollEdge,
}

impl Backend {
    /// The edge-triggered backend where available, `poll` elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "linux") {
            Backend::EpollEdge
        } else {
            Backend::Poll
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Select => "select",
            Backend::Poll => "poll",
            Backend::Epoll => "epoll",
            Backend::EpollEdge => "epoll-edge",
        }
    }

    pub fn trigger(self) -> Trigger {
        match self {
            Backend::EpollEdge => Trigger::Edge,
            _ => Trigger::Level,
        }
    }

    /// Creates the demultiplexer.
    ///
    /// `events_capacity` bounds how many events one `wait` call reports
    /// on backends that need a fixed event array.
    pub fn build(self, events_capacity: usize) -> Result<Box<dyn Demultiplexer>> {
        match self {
            Backend::Select => Ok(Box::new(SelectDemultiplexer::new())),
            Backend::Poll => Ok(Box::new(PollDemultiplexer::new())),
            #[cfg(target_os = "linux")]
            Backend::Epoll | Backend::EpollEdge => {
                let demux = EpollDemultiplexer::new(self.trigger(), events_capacity).map_err(
                    |source| Error::Demultiplexer {
                        backend: self.name(),
                        source,
                    },
                )?;
                Ok(Box::new(demux))
            }
            #[cfg(not(target_os = "linux"))]
            Backend::Epoll | Backend::EpollEdge => {
                let _ = events_capacity;
                Err(Error::Unsupported(self.name()))
            }
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "select" => Ok(Backend::Select),
            "poll" => Ok(Backend::Poll),
            "epoll" => Ok(Backend::Epoll),
            "epoll-edge" | "epoll-et" => Ok(Backend::EpollEdge),
            _ => Err(Error::InvalidBackend(s.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts an optional timeout to the millisecond form used by
/// `poll(2)` and `epoll_wait(2)`, rounding up so short timeouts do not
/// turn into busy polling.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            let mut ms = t.as_millis();
            if Duration::from_millis(ms as u64) < t {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
