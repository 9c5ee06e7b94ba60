//! Linux `epoll`-based demultiplexer.
//!
//! The interest list lives in the kernel; the token of each
//! registration travels in `epoll_event.u64`. Built with
//! [`Trigger::Edge`], every registration carries `EPOLLET` and the
//! owner of a descriptor must drain it before waiting again.

use super::common::{Interest, Trigger};
use super::{Demultiplexer, timeout_millis};
use crate::error::Result;
use crate::reactor::event::Event;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLET, EPOLLHUP,
    EPOLLIN, EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Linux `epoll` demultiplexer.
///
/// This demultiplexer owns:
/// - an `epoll` instance,
/// - a reusable event buffer,
/// - a count of live registrations (the kernel keeps the table itself).
pub struct EpollDemultiplexer {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Level- or edge-triggered registrations.
    trigger: Trigger,

    registered: usize,
}

impl EpollDemultiplexer {
    /// Creates the epoll instance.
    ///
    /// `capacity` is the maximum number of events one `wait` reports.
    pub fn new(trigger: Trigger, capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(capacity.max(1)),
            trigger,
            registered: 0,
        })
    }

    fn flags(&self, interest: Interest) -> u32 {
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }
        if self.trigger == Trigger::Edge {
            flags |= EPOLLET;
        }

        flags as u32
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: self.flags(interest),
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Demultiplexer for EpollDemultiplexer {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, interest)?;
        self.registered += 1;
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, token: usize, interest: Interest) -> Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, interest)?;
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) -> Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        self.registered = self.registered.saturating_sub(1);
        Ok(())
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> Result<()> {
        let timeout_ms = timeout_millis(timeout);

        events.clear();

        let n = loop {
            let n = unsafe {
                epoll_wait(
                    self.epoll,
                    self.events.as_mut_ptr(),
                    self.events.capacity() as i32,
                    timeout_ms,
                )
            };

            if n >= 0 {
                break n as usize;
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        };

        unsafe {
            self.events.set_len(n);
        }

        for ev in &self.events {
            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & (EPOLLOUT as u32) != 0;

            events.push(Event {
                token: ev.u64 as usize,
                readable,
                writable,
            });
        }

        Ok(())
    }

    fn trigger(&self) -> Trigger {
        self.trigger
    }

    fn name(&self) -> &'static str {
        match self.trigger {
            Trigger::Level => "epoll",
            Trigger::Edge => "epoll-edge",
        }
    }

    fn len(&self) -> usize {
        self.registered
    }
}

impl Drop for EpollDemultiplexer {
    fn drop(&mut self) {
        super::unix::sys_close(self.epoll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::poller::unix::{sys_close, sys_pipe, sys_read, sys_write};

    #[test]
    fn test_level_triggered_repeats_readiness() {
        let mut demux = EpollDemultiplexer::new(Trigger::Level, 8).unwrap();
        let (rx, tx) = sys_pipe().unwrap();
        demux.register(rx, 7, Interest::READABLE).unwrap();

        sys_write(tx, b"x").unwrap();

        let mut events = Vec::new();
        for _ in 0..2 {
            demux
                .wait(&mut events, Some(Duration::from_millis(100)))
                .unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].token, 7);
            assert!(events[0].readable);
        }

        demux.unregister(rx).unwrap();
        sys_close(rx);
        sys_close(tx);
    }

    #[test]
    fn test_edge_triggered_reports_once_until_drained() {
        let mut demux = EpollDemultiplexer::new(Trigger::Edge, 8).unwrap();
        let (rx, tx) = sys_pipe().unwrap();
        demux.register(rx, 3, Interest::READABLE).unwrap();

        sys_write(tx, b"abc").unwrap();

        let mut events = Vec::new();
        demux
            .wait(&mut events, Some(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(events.len(), 1);

        // Nothing read: no new transition, no new event.
        demux
            .wait(&mut events, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(events.is_empty());

        let mut buf = [0u8; 8];
        assert_eq!(sys_read(rx, &mut buf).unwrap(), 3);

        sys_write(tx, b"d").unwrap();
        demux
            .wait(&mut events, Some(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(events.len(), 1);

        demux.unregister(rx).unwrap();
        sys_close(rx);
        sys_close(tx);
    }

    #[test]
    fn test_unregister_unknown_fails() {
        let mut demux = EpollDemultiplexer::new(Trigger::Level, 8).unwrap();
        let (rx, tx) = sys_pipe().unwrap();
        assert!(demux.unregister(rx).is_err());
        sys_close(rx);
        sys_close(tx);
    }
}
