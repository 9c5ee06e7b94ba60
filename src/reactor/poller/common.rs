use super::unix::{sys_close, sys_pipe, sys_read, sys_write};

use std::io;
use std::os::fd::RawFd;

/// Readiness a registration asks to be notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    /// Registered, but no readiness is reported (except errors on some backends).
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    pub const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };

    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_none(self) -> bool {
        !self.read && !self.write
    }
}

/// How a backend reports readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Readiness is reported on every `wait` while the condition holds.
    Level,

    /// Readiness is reported once per transition. The owner must read,
    /// accept or write until the call would block before waiting again.
    Edge,
}

/// Self-pipe used to interrupt a blocking `wait` from another thread.
///
/// The read end is registered with the demultiplexer like any other
/// descriptor, so the wake-up works the same way on every backend.
pub(crate) struct Waker {
    read: RawFd,
    write: RawFd,
}

impl Waker {
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = sys_pipe()?;
        Ok(Self { read, write })
    }

    /// Descriptor to register for readability.
    pub(crate) fn fd(&self) -> RawFd {
        self.read
    }

    /// Makes the read end readable.
    ///
    /// A full pipe already guarantees a pending wake-up, so `WouldBlock`
    /// is ignored.
    pub(crate) fn wake(&self) {
        let _ = sys_write(self.write, &[1]);
    }

    /// Consumes every pending wake-up.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = sys_read(self.read, &mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        sys_close(self.read);
        sys_close(self.write);
    }
}
