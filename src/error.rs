//! Error types for connection setup, data transfer, and the server event loop.

use std::{error, fmt, io, result};

/// Creates an [`io::Error`] with a custom message prefixed to the current
/// `errno` value, preserving its [`io::ErrorKind`].
///
/// [`io::Error`]: std::io::Error
/// [`io::ErrorKind`]: std::io::ErrorKind
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);
        let msg = format!("{prefix}: {errno}");
        ::std::io::Error::new(errno.kind(), msg)
    }};
}
pub(crate) use errno;

/// A convenience wrapper around `Result` for [crate::Error].
pub type Result<T> = result::Result<T, Error>;

/// Represents errors that can occur while creating, connecting, serving, or
/// transferring data over a connection.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A socket descriptor could not be allocated.
    Resource(io::Error),
    /// The host/port pair could not be resolved to an IPv4 stream endpoint.
    Resolution {
        /// Host that was looked up.
        host: String,
        /// Port (or service) that was looked up.
        port: String,
        /// Reason reported by the resolver.
        reason: String,
    },
    /// The connect handshake failed for every resolved address.
    Connect(io::Error),
    /// The listening descriptor could not be configured or bound.
    Bind(io::Error),
    /// The bound descriptor could not be switched to listening.
    Listen(io::Error),
    /// Accepting a pending connection failed.
    Accept(io::Error),
    /// The operation requires a connected handle.
    NotConnected,
    /// The operation requires a listening server.
    NotListening,
    /// The peer performed an orderly shutdown.
    PeerClosed,
    /// An abnormal I/O failure occurred while sending or receiving.
    Transfer(io::Error),
    /// The connection table has no free slot.
    CapacityExceeded {
        /// Number of slots in the table.
        capacity: usize,
    },
    /// The readiness-multiplexing primitive failed.
    Poll(io::Error),
    /// A message buffer was declared with zero capacity.
    InvalidBuffer,
    /// Any other I/O error.
    Io(io::Error),
}

impl Error {
    /// Returns `true` if the error is an orderly close by the peer rather than
    /// a transport failure.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Error::PeerClosed)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Resource(ref err)
            | Error::Connect(ref err)
            | Error::Bind(ref err)
            | Error::Listen(ref err)
            | Error::Accept(ref err)
            | Error::Transfer(ref err)
            | Error::Poll(ref err)
            | Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Resource(ref err) => write!(f, "failed to allocate socket: {err}"),
            Error::Resolution {
                ref host,
                ref port,
                ref reason,
            } => write!(f, "failed to resolve {host}:{port}: {reason}"),
            Error::Connect(ref err) => write!(f, "failed to connect: {err}"),
            Error::Bind(ref err) => write!(f, "failed to bind: {err}"),
            Error::Listen(ref err) => write!(f, "failed to listen: {err}"),
            Error::Accept(ref err) => write!(f, "failed to accept connection: {err}"),
            Error::NotConnected => f.write_str("handle is not connected"),
            Error::NotListening => f.write_str("server is not listening"),
            Error::PeerClosed => f.write_str("connection closed by peer"),
            Error::Transfer(ref err) => write!(f, "connection lost: {err}"),
            Error::CapacityExceeded { capacity } => {
                write!(f, "server full: all {capacity} connection slots occupied")
            }
            Error::Poll(ref err) => write!(f, "failed to wait for readiness: {err}"),
            Error::InvalidBuffer => f.write_str("message capacity must be greater than 0"),
            Error::Io(ref err) => fmt::Display::fmt(err, f),
        }
    }
}
