use crate::error::{Error, Result};
use crate::reactor::poller::unix::{
    sys_accept, sys_bind, sys_close, sys_ipv6_is_necessary, sys_listen, sys_parse_sockaddr,
    sys_set_nonblocking, sys_set_reuseaddr, sys_sockname, sys_socket,
};

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

/// A listening TCP socket.
///
/// The socket starts in blocking mode, which is what the worker pool's
/// acceptor thread wants; the event loop switches it to non-blocking
/// with [`set_nonblocking`](Self::set_nonblocking).
pub struct TcpListener {
    /// File descriptor of the listening socket.
    fd: RawFd,
}

impl TcpListener {
    /// Binds a TCP listener to the given address.
    ///
    /// The address must be a valid socket address string, such as
    /// `"127.0.0.1:8080"` or `"[::1]:8080"`.
    ///
    /// This function:
    /// - creates a socket,
    /// - enables `SO_REUSEADDR`,
    /// - configures IPv6 dual-stack if applicable,
    /// - binds and starts listening.
    pub fn bind(address: &str) -> Result<Self> {
        let bind_error = |source| Error::Bind {
            addr: address.to_string(),
            source,
        };

        let (storage, len) = sys_parse_sockaddr(address).map_err(bind_error)?;
        let domain = storage.ss_family as i32;

        let listener = Self {
            fd: sys_socket(domain).map_err(bind_error)?,
        };

        sys_set_reuseaddr(listener.fd).map_err(bind_error)?;
        sys_ipv6_is_necessary(listener.fd, domain).map_err(bind_error)?;
        sys_bind(listener.fd, &storage, len).map_err(bind_error)?;
        sys_listen(listener.fd).map_err(bind_error)?;

        Ok(listener)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        sys_set_nonblocking(self.fd, nonblocking)
    }

    /// Accepts a connection, handing back ownership of its raw descriptor.
    ///
    /// The caller must close the descriptor.
    pub(crate) fn accept_raw(&self) -> io::Result<(RawFd, SocketAddr)> {
        sys_accept(self.fd)
    }

    /// Accepts a connection as a blocking [`TcpStream`].
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (fd, addr) = self.accept_raw()?;

        // The descriptor was just returned by accept(2) and has no other owner.
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        Ok((stream, addr))
    }

    /// Returns the local socket address of this listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.fd)
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TcpListener {
    /// Closes the listening socket.
    fn drop(&mut self) {
        sys_close(self.fd);
    }
}
