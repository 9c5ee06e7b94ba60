//! `poll(2)`-based demultiplexer.
//!
//! Registrations live in a dense `pollfd` array handed to the kernel
//! as is. A descriptor → index map makes `modify` and `unregister`
//! constant time: removal swaps the last entry into the freed slot and
//! fixes its index.

use super::common::{Interest, Trigger};
use super::{Demultiplexer, timeout_millis};
use crate::error::{Error, Result};
use crate::reactor::event::Event;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, nfds_t, pollfd};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Level-triggered demultiplexer over `poll(2)`.
#[derive(Default)]
pub struct PollDemultiplexer {
    /// Array passed to `poll(2)`.
    fds: Vec<pollfd>,

    /// Token of each entry of `fds`, at the same index.
    tokens: Vec<usize>,

    /// Position of each registered descriptor in `fds`.
    index: HashMap<RawFd, usize>,
}

impl PollDemultiplexer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;

    if interest.read {
        events |= POLLIN;
    }
    if interest.write {
        events |= POLLOUT;
    }

    events
}

impl Demultiplexer for PollDemultiplexer {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> Result<()> {
        if self.index.contains_key(&fd) {
            return Err(Error::AlreadyRegistered(fd));
        }

        self.index.insert(fd, self.fds.len());
        self.fds.push(pollfd {
            fd,
            events: poll_events(interest),
            revents: 0,
        });
        self.tokens.push(token);

        Ok(())
    }

    fn modify(&mut self, fd: RawFd, token: usize, interest: Interest) -> Result<()> {
        let &i = self.index.get(&fd).ok_or(Error::NotRegistered(fd))?;

        self.fds[i].events = poll_events(interest);
        self.tokens[i] = token;

        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) -> Result<()> {
        let i = self.index.remove(&fd).ok_or(Error::NotRegistered(fd))?;

        self.fds.swap_remove(i);
        self.tokens.swap_remove(i);

        if let Some(moved) = self.fds.get(i) {
            self.index.insert(moved.fd, i);
        }

        Ok(())
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> Result<()> {
        let timeout_ms = timeout_millis(timeout);

        events.clear();

        for entry in &mut self.fds {
            entry.revents = 0;
        }

        let mut ready = loop {
            let n = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as nfds_t,
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

        for (entry, &token) in self.fds.iter().zip(&self.tokens) {
            if ready == 0 {
                break;
            }
            if entry.revents == 0 {
                continue;
            }

            ready -= 1;
            events.push(Event {
                token,
                readable: entry.revents & (POLLIN | POLLERR | POLLHUP | POLLNVAL) != 0,
                writable: entry.revents & POLLOUT != 0,
            });
        }

        Ok(())
    }

    fn trigger(&self) -> Trigger {
        Trigger::Level
    }

    fn name(&self) -> &'static str {
        "poll"
    }

    fn len(&self) -> usize {
        self.fds.len()
    }
}
