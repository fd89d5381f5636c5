//! Single-threaded TCP connection multiplexing over raw sockets.
//!
//! A [net::Server] owns one listening socket and a fixed-capacity table of
//! accepted connections. Each call to [net::Server::run] waits for readiness,
//! accepts at most one new connection, and dispatches readable connections
//! to application hooks. Outbound clients use [net::Connection] directly.
//!
//! Only IPv4 stream sockets are supported. Not suitable for production use.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

#[cfg(not(target_os = "linux"))]
compile_error!("This crate is only compatible with Linux systems that support the poll interface.");

pub mod error;
pub mod log;
pub mod net;

pub use error::{Error, Result};
