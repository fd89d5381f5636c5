//! Thin wrappers around the socket system calls used by the crate.
//!
//! Every wrapper returns an [`io::Error`] carrying the `errno` kind, so callers
//! can distinguish [`io::ErrorKind::WouldBlock`] from real failures.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::{io, mem};

use crate::error::errno;

/// Listen backlog passed to `listen(2)`.
pub const BACKLOG: libc::c_int = libc::SOMAXCONN;

/// Allocates a new IPv4 TCP socket descriptor.
pub fn socket() -> io::Result<OwnedFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
            libc::IPPROTO_TCP,
        )
    };
    if fd == -1 {
        return Err(errno!("socket() failed"));
    }

    // SAFETY: `fd` is a freshly created descriptor owned by no one else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Switches the descriptor to non-blocking mode.
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let fd = fd.as_raw_fd();

    // Get the current flags so they can be combined with `O_NONBLOCK`.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(errno!("failed to get flags of socket {fd}"));
    }

    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(errno!("failed to set socket {fd} to non-blocking"));
    }

    Ok(())
}

/// Returns `true` if the descriptor has `O_NONBLOCK` set.
pub fn is_nonblocking(fd: BorrowedFd<'_>) -> io::Result<bool> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags == -1 {
        return Err(errno!("failed to get flags of socket {}", fd.as_raw_fd()));
    }

    Ok(flags & libc::O_NONBLOCK != 0)
}

/// Blocking `connect(2)` to `addr`.
pub fn connect(fd: BorrowedFd<'_>, addr: &SocketAddrV4) -> io::Result<()> {
    let sin = to_sockaddr(addr);

    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &raw const sin as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(errno!("connect() to {addr} failed"));
    }

    Ok(())
}

/// Binds the descriptor to `addr`.
pub fn bind(fd: BorrowedFd<'_>, addr: &SocketAddrV4) -> io::Result<()> {
    let sin = to_sockaddr(addr);

    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &raw const sin as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc == -1 {
        return Err(errno!("bind() to {addr} failed"));
    }

    Ok(())
}

/// Marks the bound descriptor as passive with the platform-maximum backlog.
pub fn listen(fd: BorrowedFd<'_>) -> io::Result<()> {
    if unsafe { libc::listen(fd.as_raw_fd(), BACKLOG) } == -1 {
        return Err(errno!("listen() failed"));
    }

    Ok(())
}

/// Accepts one pending connection, returning its descriptor and the peer's
/// address.
pub fn accept(fd: BorrowedFd<'_>) -> io::Result<(OwnedFd, SocketAddrV4)> {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let conn = unsafe {
        libc::accept4(
            fd.as_raw_fd(),
            &raw mut sin as *mut libc::sockaddr,
            &raw mut len,
            libc::SOCK_CLOEXEC,
        )
    };
    if conn == -1 {
        return Err(errno!("accept() failed"));
    }

    // SAFETY: `conn` is a freshly accepted descriptor owned by no one else.
    let conn = unsafe { OwnedFd::from_raw_fd(conn) };

    Ok((conn, from_sockaddr(&sin)))
}

/// Writes up to `buf.len()` bytes, returning the number written.
///
/// `MSG_NOSIGNAL` turns a write to a reset connection into `EPIPE` instead of
/// a process-terminating `SIGPIPE`.
pub fn send(fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe {
        libc::send(
            fd.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if n == -1 {
        return Err(errno!("send() failed"));
    }

    Ok(n as usize)
}

/// Reads up to `buf.len()` bytes, returning the number read. `Ok(0)` means
/// the peer performed an orderly shutdown.
pub fn recv(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe {
        libc::recv(
            fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
        )
    };
    if n == -1 {
        return Err(errno!("recv() failed"));
    }

    Ok(n as usize)
}

/// Shuts down the send direction of the connection.
pub fn shutdown_write(fd: BorrowedFd<'_>) -> io::Result<()> {
    if unsafe { libc::shutdown(fd.as_raw_fd(), libc::SHUT_WR) } == -1 {
        return Err(errno!("shutdown() failed"));
    }

    Ok(())
}

/// Returns the local address the descriptor is bound to.
pub fn local_addr(fd: BorrowedFd<'_>) -> io::Result<SocketAddrV4> {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let rc = unsafe {
        libc::getsockname(
            fd.as_raw_fd(),
            &raw mut sin as *mut libc::sockaddr,
            &raw mut len,
        )
    };
    if rc == -1 {
        return Err(errno!("getsockname() failed"));
    }

    Ok(from_sockaddr(&sin))
}

/// Waits until at least one descriptor in `fds` is ready. A negative timeout
/// blocks indefinitely. Returns the number of ready descriptors.
pub fn poll(fds: &mut [libc::pollfd], timeout_ms: libc::c_int) -> io::Result<usize> {
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if n == -1 {
        return Err(errno!("poll() failed"));
    }

    Ok(n as usize)
}

/// Installs `handler` for `signum`, returning the previous disposition.
pub fn set_signal_handler(
    signum: libc::c_int,
    handler: libc::sighandler_t,
) -> io::Result<libc::sigaction> {
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handler;

    // Initialize the signal set, excluding all signals.
    if unsafe { libc::sigemptyset(&raw mut action.sa_mask) } == -1 {
        return Err(errno!("sigemptyset() failed"));
    }

    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    if unsafe { libc::sigaction(signum, &raw const action, &raw mut previous) } == -1 {
        return Err(errno!("failed to set handler for signal {signum}"));
    }

    Ok(previous)
}

/// Reinstalls a disposition returned by [set_signal_handler].
pub fn restore_signal_handler(signum: libc::c_int, action: &libc::sigaction) -> io::Result<()> {
    if unsafe { libc::sigaction(signum, action, std::ptr::null_mut()) } == -1 {
        return Err(errno!("failed to restore handler for signal {signum}"));
    }

    Ok(())
}

/// Returns the handler currently installed for `signum`.
#[cfg(test)]
pub fn signal_handler(signum: libc::c_int) -> io::Result<libc::sighandler_t> {
    let mut current: libc::sigaction = unsafe { mem::zeroed() };
    if unsafe { libc::sigaction(signum, std::ptr::null(), &raw mut current) } == -1 {
        return Err(errno!("failed to query handler for signal {signum}"));
    }

    Ok(current.sa_sigaction)
}

pub(crate) fn to_sockaddr(addr: &SocketAddrV4) -> libc::sockaddr_in {
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };

    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };

    sin
}

pub(crate) fn from_sockaddr(sin: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
        u16::from_be(sin.sin_port),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn sockaddr_conversion() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 44), 4200);
        let sin = to_sockaddr(&addr);

        assert_eq!(sin.sin_family, libc::AF_INET as libc::sa_family_t);
        assert_eq!(sin.sin_port, 4200u16.to_be());
        assert_eq!(from_sockaddr(&sin), addr);
    }

    #[test]
    fn nonblocking_flag() {
        let fd = socket().unwrap();
        assert!(!is_nonblocking(fd.as_fd()).unwrap());

        set_nonblocking(fd.as_fd()).unwrap();
        assert!(is_nonblocking(fd.as_fd()).unwrap());
    }

    #[test]
    fn accept_on_idle_listener_would_block() {
        let fd = socket().unwrap();
        set_nonblocking(fd.as_fd()).unwrap();
        bind(fd.as_fd(), &SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        listen(fd.as_fd()).unwrap();

        let addr = local_addr(fd.as_fd()).unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);

        let err = accept(fd.as_fd()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn poll_with_zero_timeout_reports_nothing_ready() {
        let fd = socket().unwrap();
        bind(fd.as_fd(), &SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        listen(fd.as_fd()).unwrap();

        let mut fds = [libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];

        assert_eq!(poll(&mut fds, 0).unwrap(), 0);
        assert_eq!(fds[0].revents, 0);
    }
}
