use libc::{
    AF_INET, AF_INET6, F_GETFL, F_SETFL, IPPROTO_IPV6, IPV6_V6ONLY, O_NONBLOCK, SO_REUSEADDR,
    SOCK_STREAM, SOL_SOCKET, bind, c_int, close, fcntl, getsockname, listen, read, setsockopt,
    sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socket, socklen_t, write,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::str::FromStr;
use std::{io, mem};

/// Backlog passed to `listen(2)`.
pub(crate) const LISTEN_BACKLOG: c_int = 128;

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read; `Ok(0)` is end of stream.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Writes the buffer to a file descriptor.
///
/// Returns the number of bytes the kernel accepted, which may be fewer
/// than `buffer.len()` on a non-blocking descriptor.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    let n = unsafe { write(fd, buffer.as_ptr() as *const _, buffer.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Switches `O_NONBLOCK` on or off.
pub(crate) fn sys_set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let flags = if nonblocking {
        flags | O_NONBLOCK
    } else {
        flags & !O_NONBLOCK
    };

    let rc = unsafe { fcntl(fd, F_SETFL, flags) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Sets `FD_CLOEXEC` so the descriptor does not leak into child processes.
///
/// Only needed where the creating call cannot set it atomically.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Whether `FD_CLOEXEC` is set on the descriptor.
#[cfg(test)]
pub(crate) fn sys_is_cloexec(fd: RawFd) -> io::Result<bool> {
    let flags = unsafe { fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(flags & libc::FD_CLOEXEC != 0)
}

/// Closes `fd` if marking it close-on-exec fails.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn with_cloexec(fd: RawFd) -> io::Result<RawFd> {
    match sys_set_cloexec(fd) {
        Ok(()) => Ok(fd),
        Err(e) => {
            sys_close(fd);
            Err(e)
        }
    }
}

/// Creates a close-on-exec stream socket.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fd)
}

/// Creates a close-on-exec stream socket.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    with_cloexec(fd)
}

/// Creates a pipe whose both ends are non-blocking and close-on-exec.
///
/// Returns `(read_end, write_end)`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds: [c_int; 2] = [-1; 2];

    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((fds[0], fds[1]))
}

/// Creates a pipe whose both ends are non-blocking and close-on-exec.
///
/// Returns `(read_end, write_end)`.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds: [c_int; 2] = [-1; 2];

    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    for &fd in &fds {
        if let Err(e) = sys_set_nonblocking(fd, true).and_then(|()| sys_set_cloexec(fd)) {
            sys_close(fds[0]);
            sys_close(fds[1]);
            return Err(e);
        }
    }

    Ok((fds[0], fds[1]))
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> io::Result<()> {
    let rc = unsafe { bind(fd, addr as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: RawFd) -> io::Result<()> {
    let rc = unsafe { listen(fd, LISTEN_BACKLOG) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts a new incoming connection.
///
/// The client socket is close-on-exec and keeps the kernel's default
/// (blocking) mode; the caller decides how it will be driven.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let client_fd = unsafe {
        libc::accept4(
            fd,
            &mut storage as *mut _ as *mut sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC,
        )
    };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let client_fd = unsafe { libc::accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if client_fd < 0 {
        return Err(io::Error::last_os_error());
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let client_fd = with_cloexec(client_fd)?;

    match sockaddr_storage_to_socketaddr(&storage) {
        Ok(addr) => Ok((client_fd, addr)),
        Err(e) => {
            sys_close(client_fd);
            Err(e)
        }
    }
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Parses a socket address string into a `sockaddr_storage`.
pub(crate) fn sys_parse_sockaddr(address: &str) -> io::Result<(sockaddr_storage, socklen_t)> {
    let addr = SocketAddr::from_str(address)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket addr"))?;

    Ok(socketaddr_to_storage(&addr))
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

/// Accepts IPv4-mapped peers on an IPv6 listener.
pub(crate) fn sys_ipv6_is_necessary(fd: RawFd, domain: c_int) -> io::Result<()> {
    if domain != AF_INET6 {
        return Ok(());
    }

    let value: c_int = 0;
    let rc = unsafe {
        setsockopt(
            fd,
            IPPROTO_IPV6,
            IPV6_V6ONLY,
            &value as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_convert_round_trip() {
        let (storage, _) = sys_parse_sockaddr("127.0.0.1:43211").unwrap();
        let addr = sockaddr_storage_to_socketaddr(&storage).unwrap();
        assert_eq!(addr, "127.0.0.1:43211".parse().unwrap());

        let (storage, _) = sys_parse_sockaddr("[::1]:8080").unwrap();
        let addr = sockaddr_storage_to_socketaddr(&storage).unwrap();
        assert_eq!(addr, "[::1]:8080".parse().unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = sys_parse_sockaddr("not-an-address").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_pipe_is_nonblocking() {
        let (rx, tx) = sys_pipe().unwrap();

        let mut buf = [0u8; 4];
        let err = sys_read(rx, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert_eq!(sys_write(tx, b"ping").unwrap(), 4);
        assert_eq!(sys_read(rx, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"ping");

        sys_close(rx);
        sys_close(tx);
    }

    #[test]
    fn test_created_descriptors_are_cloexec() {
        let (rx, tx) = sys_pipe().unwrap();
        assert!(sys_is_cloexec(rx).unwrap());
        assert!(sys_is_cloexec(tx).unwrap());
        sys_close(rx);
        sys_close(tx);

        let fd = sys_socket(AF_INET).unwrap();
        assert!(sys_is_cloexec(fd).unwrap());
        sys_close(fd);
    }
}
