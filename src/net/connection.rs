//! Connection handles shared by outbound clients and server-accepted peers,
//! and the send/receive operations applied to them.

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use crate::error::{Error, Result};
use crate::net::{Message, addr, sys};
use crate::{debug, error, info, warn};

/// Transport protocol of a [Connection]. Only [Protocol::Tcp] paths are
/// implemented.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Stream-oriented TCP.
    Tcp,
    /// Datagram-oriented UDP.
    Udp,
}

/// Lifecycle state of a [Connection].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not usable for I/O.
    Disconnected,
    /// Connected to a peer.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("DISCONNECTED"),
            ConnectionState::Connected => f.write_str("CONNECTED"),
        }
    }
}

/// A handle to one TCP endpoint: either an outbound client connection or a
/// connection accepted by a [Server].
///
/// The descriptor is owned by the handle and released exactly once, either
/// by [Connection::close], by a transition to
/// [ConnectionState::Disconnected], or when the handle is dropped.
///
/// [Server]: crate::net::Server
#[derive(Debug)]
pub struct Connection {
    fd: Option<OwnedFd>,
    protocol: Protocol,
    state: ConnectionState,
    peer: Option<SocketAddrV4>,
    user_data: Option<Box<dyn Any + Send>>,
}

impl Connection {
    /// Allocates a new TCP descriptor. The handle starts
    /// [ConnectionState::Disconnected] until [Connection::connect] succeeds.
    ///
    /// # Errors
    ///
    /// Returns [Error::Resource] if the socket cannot be allocated.
    pub fn create() -> Result<Self> {
        let fd = sys::socket().map_err(|err| {
            error!("{err}");
            Error::Resource(err)
        })?;

        Ok(Self {
            fd: Some(fd),
            protocol: Protocol::Tcp,
            state: ConnectionState::Disconnected,
            peer: None,
            user_data: None,
        })
    }

    /// Wraps a descriptor returned by `accept(2)`.
    pub(crate) fn accepted(fd: OwnedFd, peer: SocketAddrV4) -> Self {
        Self {
            fd: Some(fd),
            protocol: Protocol::Tcp,
            state: ConnectionState::Connected,
            peer: Some(peer),
            user_data: None,
        }
    }

    /// Resolves `host`/`port` and performs a blocking connect, trying each
    /// resolved address in turn.
    ///
    /// On failure the handle stays [ConnectionState::Disconnected] and holds a
    /// fresh descriptor, so the call may be retried.
    ///
    /// # Errors
    ///
    /// - [Error::Connect] if the address cannot be resolved, the handle is
    ///   already connected, or every connect attempt fails.
    /// - [Error::Resource] if a replacement descriptor cannot be allocated.
    pub fn connect(&mut self, host: &str, port: &str) -> Result<()> {
        if self.is_connected() {
            return Err(Error::Connect(io::Error::from_raw_os_error(
                libc::EISCONN,
            )));
        }

        let addrs = addr::resolve(host, port).map_err(|err| {
            error!("{err}");
            Error::Connect(io::Error::new(io::ErrorKind::NotFound, err.to_string()))
        })?;

        let mut last_err =
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}:{port}"));

        for addr in addrs {
            let fd = match self.fd.take() {
                Some(fd) => fd,
                None => sys::socket().map_err(Error::Resource)?,
            };

            match sys::connect(fd.as_fd(), &addr) {
                Ok(()) => {
                    self.fd = Some(fd);
                    self.peer = Some(addr);
                    self.state = ConnectionState::Connected;

                    debug!("[{addr}] connected");
                    return Ok(());
                }
                Err(err) => {
                    debug!("{err}");
                    last_err = err;
                    // A socket whose connect failed is in an unspecified
                    // state; retries use a fresh one.
                    drop(fd);
                }
            }
        }

        self.fd = Some(sys::socket().map_err(Error::Resource)?);

        error!("{last_err}");
        Err(Error::Connect(last_err))
    }

    /// Returns `true` if the handle is [ConnectionState::Connected].
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the transport protocol.
    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the peer's address, once connected or accepted.
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    /// Returns the peer's IPv4 address in dotted-decimal form, or an empty
    /// string if it is unknown.
    pub fn peer_ip(&self) -> String {
        self.peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
    }

    /// Switches the descriptor to non-blocking mode, making [Connection::receive]
    /// return `Ok(0)` instead of blocking when no data is available.
    ///
    /// # Errors
    ///
    /// Returns [Error::NotConnected] if the handle owns no descriptor.
    pub fn set_nonblocking(&self) -> Result<()> {
        let fd = self.fd.as_ref().ok_or(Error::NotConnected)?;
        sys::set_nonblocking(fd.as_fd())?;

        Ok(())
    }

    /// Returns `true` if the descriptor is in non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns [Error::NotConnected] if the handle owns no descriptor.
    pub fn is_nonblocking(&self) -> Result<bool> {
        let fd = self.fd.as_ref().ok_or(Error::NotConnected)?;

        Ok(sys::is_nonblocking(fd.as_fd())?)
    }

    /// Closes the connection: shuts down the send direction, then releases
    /// the descriptor. A no-op on a disconnected handle.
    ///
    /// The descriptor is released even if the shutdown fails.
    ///
    /// # Errors
    ///
    /// Returns [Error::Io] if the shutdown failed.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_connected() {
            // Release an unconnected descriptor left by `create`.
            self.fd = None;
            return Ok(());
        }

        let res = self.shutdown_write();
        self.release();

        res.map_err(|err| {
            warn!("{err}");
            Error::Io(err)
        })
    }

    /// Writes the message payload with a single `send(2)`.
    ///
    /// Returns the number of bytes written, which may be less than
    /// `msg.len()`: any successful write counts as success. Use
    /// [Connection::send_all] to flush the whole payload.
    ///
    /// A failed write leaves the connection state unchanged.
    ///
    /// # Errors
    ///
    /// - [Error::NotConnected] if the handle is disconnected.
    /// - [Error::Transfer] if the write fails.
    pub fn send(&self, msg: &Message) -> Result<usize> {
        let fd = self.io_fd()?;

        sys::send(fd, msg.payload()).map_err(|err| {
            error!("{}{err}", self.tag());
            Error::Transfer(err)
        })
    }

    /// Writes the whole message payload, looping over partial writes and
    /// waiting for writability on a non-blocking descriptor.
    ///
    /// # Errors
    ///
    /// - [Error::NotConnected] if the handle is disconnected.
    /// - [Error::Transfer] if any write fails.
    pub fn send_all(&self, msg: &Message) -> Result<()> {
        let fd = self.io_fd()?;
        let mut buf = msg.payload();

        while !buf.is_empty() {
            match sys::send(fd, buf) {
                Ok(0) => {
                    return Err(Error::Transfer(io::Error::from(io::ErrorKind::WriteZero)));
                }
                Ok(n) => buf = &buf[n..],
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let mut fds = [libc::pollfd {
                        fd: fd.as_raw_fd(),
                        events: libc::POLLOUT,
                        revents: 0,
                    }];

                    match sys::poll(&mut fds, -1) {
                        Ok(_) => {}
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                        Err(err) => return Err(Error::Transfer(err)),
                    }
                }
                Err(err) => {
                    error!("{}{err}", self.tag());
                    return Err(Error::Transfer(err));
                }
            }
        }

        Ok(())
    }

    /// Reads up to `msg.capacity() - 1` bytes into `msg` and terminates the
    /// payload.
    ///
    /// Outcomes:
    ///
    /// - `Ok(n)` with `n > 0`: `n` bytes were received.
    /// - `Ok(0)`: no data is available right now on a non-blocking handle.
    ///   The connection stays connected. A read interrupted by a signal is
    ///   retried rather than reported as `Ok(0)`.
    /// - [Error::PeerClosed]: the peer performed an orderly close. The handle
    ///   is now disconnected.
    /// - [Error::Transfer]: the read failed. The handle is now disconnected.
    /// - [Error::NotConnected]: the handle was already disconnected. No read
    ///   is attempted.
    pub fn receive(&mut self, msg: &mut Message) -> Result<usize> {
        let fd = self.io_fd()?;

        // A zero-length read is indistinguishable from an orderly close.
        if msg.capacity() == 1 {
            msg.clear();
            return Ok(0);
        }

        // A signal interrupting a blocking read is not "no data".
        let res = loop {
            match sys::recv(fd, msg.recv_region()) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                res => break res,
            }
        };

        match res {
            Ok(0) => {
                info!("{}connection closed", self.tag());
                msg.clear();
                self.release();

                Err(Error::PeerClosed)
            }
            Ok(n) => {
                msg.commit(n);

                Ok(n)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                msg.clear();

                Ok(0)
            }
            Err(err) => {
                error!("{}connection lost: {err}", self.tag());
                msg.clear();
                self.release();

                Err(Error::Transfer(err))
            }
        }
    }

    /// Attaches opaque user data, replacing any previous value.
    pub fn set_user_data<T: Any + Send>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    /// Returns the attached user data if it is of type `T`.
    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref()
    }

    /// Returns the attached user data mutably if it is of type `T`.
    pub fn user_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut()?.downcast_mut()
    }

    /// Detaches and returns the user data if it is of type `T`.
    pub fn take_user_data<T: Any + Send>(&mut self) -> Option<T> {
        match self.user_data.take()?.downcast::<T>() {
            Ok(data) => Some(*data),
            Err(data) => {
                self.user_data = Some(data);
                None
            }
        }
    }

    /// Returns the raw descriptor of a connected handle.
    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        if !self.is_connected() {
            return None;
        }
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Shuts down the send direction without releasing the descriptor.
    pub(crate) fn shutdown_write(&self) -> io::Result<()> {
        match self.fd.as_ref() {
            Some(fd) => sys::shutdown_write(fd.as_fd()),
            None => Ok(()),
        }
    }

    /// Drops the descriptor and marks the handle disconnected.
    pub(crate) fn release(&mut self) {
        self.fd = None;
        self.state = ConnectionState::Disconnected;
    }

    fn io_fd(&self) -> Result<BorrowedFd<'_>> {
        match (self.state, self.fd.as_ref()) {
            (ConnectionState::Connected, Some(fd)) => Ok(fd.as_fd()),
            _ => Err(Error::NotConnected),
        }
    }

    fn tag(&self) -> String {
        match self.peer {
            Some(addr) => format!("[{addr}] "),
            None => String::new(),
        }
    }
}
