//! TCP connection handles, a fixed-capacity connection table, and a
//! single-threaded server multiplexing readiness events over it.
//!
//! Clients use [Connection] directly: [Connection::create], then
//! [Connection::connect], then [Connection::send] and [Connection::receive]
//! with caller-owned [Message] buffers. Servers wrap a [Handler] in a
//! [Server] and drive [Server::run] in a loop.
//!
//! Call [init] once before any other operation and [deinit] when done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

mod addr;
mod connection;
mod handler;
mod message;
mod server;
pub(crate) mod sys;
mod table;

pub use addr::{local_ip, resolve, resolve_first};
pub use connection::{Connection, ConnectionState, Protocol};
pub use handler::{Handler, Hooks, Peers};
pub use message::Message;
pub use server::{AcceptStatus, Server, ServerState};
pub use sys::BACKLOG;
pub use table::{ConnectionTable, MAX_CLIENTS, Slot};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// `SIGPIPE` disposition in effect before [init], reinstalled by [deinit].
static PREVIOUS_SIGPIPE: Mutex<Option<libc::sigaction>> = Mutex::new(None);

/// Prepares the process for socket I/O.
///
/// Writes to a connection whose peer has gone away must surface as
/// [Error::Transfer] rather than terminate the process, so `SIGPIPE` is
/// ignored while the library is initialized. Calling `init` more than once is
/// a no-op.
///
/// [Error::Transfer]: crate::Error::Transfer
pub fn init() {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return;
    }

    match sys::set_signal_handler(libc::SIGPIPE, libc::SIG_IGN) {
        Ok(previous) => *previous_sigpipe() = Some(previous),
        Err(err) => crate::warn!("{err}"),
    }

    crate::debug!("networking initialized");
}

/// Restores the process state changed by [init], reinstalling whatever
/// `SIGPIPE` disposition was in effect before it. A no-op if the library is
/// not initialized.
pub fn deinit() {
    if !INITIALIZED.swap(false, Ordering::AcqRel) {
        return;
    }

    let previous = previous_sigpipe().take();
    if let Some(previous) = previous {
        if let Err(err) = sys::restore_signal_handler(libc::SIGPIPE, &previous) {
            crate::warn!("{err}");
        }
    }

    crate::debug!("networking deinitialized");
}

/// Returns `true` between [init] and [deinit].
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

fn previous_sigpipe() -> MutexGuard<'static, Option<libc::sigaction>> {
    PREVIOUS_SIGPIPE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
