//! `select(2)`-based demultiplexer.
//!
//! The read and write bitmask sets are rebuilt from the registration
//! table before every call, since the kernel overwrites them with the
//! ready subset. Descriptors at or above `FD_SETSIZE` cannot be
//! represented and are rejected at registration.

use super::common::{Interest, Trigger};
use super::Demultiplexer;
use crate::error::{Error, Result};
use crate::reactor::event::Event;

use libc::{FD_ISSET, FD_SET, FD_SETSIZE, FD_ZERO, fd_set, suseconds_t, time_t, timeval};
use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::time::Duration;
use std::{io, mem, ptr};

struct Registration {
    token: usize,
    interest: Interest,
}

/// Level-triggered demultiplexer over `select(2)`.
///
/// The table is ordered by descriptor, so the highest registered
/// descriptor (needed for `nfds`) is its last key and events come out
/// in ascending descriptor order.
#[derive(Default)]
pub struct SelectDemultiplexer {
    table: BTreeMap<RawFd, Registration>,
}

impl SelectDemultiplexer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn empty_set() -> fd_set {
    let mut set: fd_set = unsafe { mem::zeroed() };
    unsafe { FD_ZERO(&mut set) };
    set
}

impl Demultiplexer for SelectDemultiplexer {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> Result<()> {
        if fd < 0 || fd as usize >= FD_SETSIZE as usize {
            return Err(Error::DescriptorLimit {
                fd,
                limit: FD_SETSIZE as usize,
            });
        }
        if self.table.contains_key(&fd) {
            return Err(Error::AlreadyRegistered(fd));
        }

        self.table.insert(fd, Registration { token, interest });
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, token: usize, interest: Interest) -> Result<()> {
        let registration = self.table.get_mut(&fd).ok_or(Error::NotRegistered(fd))?;

        registration.token = token;
        registration.interest = interest;
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd) -> Result<()> {
        self.table
            .remove(&fd)
            .map(|_| ())
            .ok_or(Error::NotRegistered(fd))
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> Result<()> {
        events.clear();

        let nfds = self.table.keys().next_back().map_or(0, |&fd| fd + 1);

        let (reads, writes) = loop {
            let mut reads = empty_set();
            let mut writes = empty_set();

            for (&fd, registration) in &self.table {
                if registration.interest.read {
                    unsafe { FD_SET(fd, &mut reads) };
                }
                if registration.interest.write {
                    unsafe { FD_SET(fd, &mut writes) };
                }
            }

            // select(2) may modify the timeval, so it is rebuilt per attempt.
            let mut tv = timeout.map(|t| timeval {
                tv_sec: t.as_secs() as time_t,
                tv_usec: t.subsec_micros() as suseconds_t,
            });
            let tv_ptr = tv.as_mut().map_or(ptr::null_mut(), |tv| tv as *mut timeval);

            let rc = unsafe { libc::select(nfds, &mut reads, &mut writes, ptr::null_mut(), tv_ptr) };

            if rc >= 0 {
                break (reads, writes);
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        };

        for (&fd, registration) in &self.table {
            let readable = unsafe { FD_ISSET(fd, &reads) };
            let writable = unsafe { FD_ISSET(fd, &writes) };

            if readable || writable {
                events.push(Event {
                    token: registration.token,
                    readable,
                    writable,
                });
            }
        }

        Ok(())
    }

    fn trigger(&self) -> Trigger {
        Trigger::Level
    }

    fn name(&self) -> &'static str {
        "select"
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}
