//! A single-threaded TCP server multiplexing up to `N` connections over one
//! readiness-polling loop.
//!
//! The server owns a listening descriptor and a [ConnectionTable]. Each call to
//! [Server::run] performs exactly one readiness cycle:
//!
//! 1. Waits (without timeout) until the listener or any occupied slot is
//!    readable.
//! 2. Accepts at most one pending connection and offers it to
//!    [Handler::on_connect].
//! 3. Invokes [Handler::on_client_data] once for every slot that was readable.
//!
//! The embedding application drives the loop:
//!
//! ```no_run
//! use sockmux::net::Server;
//!
//! let mut server = Server::create(())?;
//! server.listen("127.0.0.1", "4200")?;
//!
//! while server.is_listening() {
//!     server.run()?;
//! }
//! # Ok::<(), sockmux::Error>(())
//! ```

use std::io;
use std::net::SocketAddrV4;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use crate::error::{Error, Result};
use crate::net::{Connection, ConnectionTable, Handler, MAX_CLIENTS, Message, Peers, Slot};
use crate::net::{addr, sys};
use crate::{debug, error, info, warn};

/// Events that mark a descriptor as ready for reading. Hang-ups and errors
/// are reported as readable so the next read observes them.
const READABLE: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// The number of milliseconds that `poll()` will block for. -1 will block
/// indefinitely until a descriptor is ready.
const POLL_TIMEOUT_MS: libc::c_int = -1;

/// Lifecycle state of a [Server].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Created, not yet bound.
    Unbound,
    /// Bound and accepting connections.
    Listening,
    /// Closed. A closed server cannot listen again.
    Closed,
}

/// Outcome of a successful [Server::accept].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AcceptStatus {
    /// A connection was accepted into the given slot.
    Accepted(usize),
    /// No connection was pending.
    NoWork,
}

/// A TCP server dispatching readiness events to a [Handler].
///
/// `N` is the capacity of the connection table.
#[derive(Debug)]
pub struct Server<H, const N: usize = MAX_CLIENTS> {
    listener: Option<OwnedFd>,
    state: ServerState,
    table: ConnectionTable<N>,
    handler: H,
}

impl<H: Handler> Server<H> {
    /// Creates an unbound server with [MAX_CLIENTS] slots.
    ///
    /// # Errors
    ///
    /// Returns [Error::Resource] if the listening socket cannot be allocated.
    pub fn create(handler: H) -> Result<Self> {
        Self::with_capacity(handler)
    }
}

impl<H: Handler, const N: usize> Server<H, N> {
    /// Creates an unbound server with `N` slots.
    ///
    /// # Errors
    ///
    /// Returns [Error::Resource] if the listening socket cannot be allocated.
    pub fn with_capacity(handler: H) -> Result<Self> {
        let listener = sys::socket().map_err(|err| {
            error!("{err}");
            Error::Resource(err)
        })?;

        Ok(Self {
            listener: Some(listener),
            state: ServerState::Unbound,
            table: ConnectionTable::new(),
            handler,
        })
    }

    /// Binds to `host`/`port` and starts listening with the platform-maximum
    /// backlog. The listening descriptor is switched to non-blocking mode.
    ///
    /// On failure the server stays [ServerState::Unbound].
    ///
    /// # Errors
    ///
    /// - [Error::Listen] if the server is not [ServerState::Unbound], or
    ///   `listen(2)` fails.
    /// - [Error::Bind] if the address cannot be resolved, or the descriptor
    ///   cannot be configured or bound.
    pub fn listen(&mut self, host: &str, port: &str) -> Result<()> {
        let fd = match (self.state, self.listener.as_ref()) {
            (ServerState::Unbound, Some(fd)) => fd.as_fd(),
            _ => {
                return Err(Error::Listen(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("server cannot listen in state {:?}", self.state),
                )));
            }
        };

        sys::set_nonblocking(fd).map_err(|err| {
            error!("{err}");
            Error::Bind(err)
        })?;

        let addr = addr::resolve_first(host, port).map_err(|err| {
            error!("{err}");
            Error::Bind(io::Error::new(io::ErrorKind::NotFound, err.to_string()))
        })?;

        sys::bind(fd, &addr).map_err(|err| {
            error!("{err}");
            Error::Bind(err)
        })?;

        sys::listen(fd).map_err(|err| {
            error!("{err}");
            Error::Listen(err)
        })?;

        self.state = ServerState::Listening;

        match sys::local_addr(fd) {
            Ok(local) => info!("listening on {local}"),
            Err(_) => info!("listening on {addr}"),
        }

        Ok(())
    }

    /// Returns `true` if the server is [ServerState::Listening].
    #[inline]
    pub fn is_listening(&self) -> bool {
        self.state == ServerState::Listening
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [Error::NotListening] once the server is closed.
    pub fn local_addr(&self) -> Result<SocketAddrV4> {
        let fd = self.listener.as_ref().ok_or(Error::NotListening)?;

        Ok(sys::local_addr(fd.as_fd())?)
    }

    /// Attempts one non-blocking accept outside of [Server::run].
    ///
    /// An accepted connection is switched to non-blocking mode and placed in
    /// the first free slot. [Handler::on_connect] is not invoked on this path.
    ///
    /// # Errors
    ///
    /// - [Error::NotListening] if the server is not listening.
    /// - [Error::CapacityExceeded] if every slot is occupied. The new
    ///   connection is closed immediately.
    /// - [Error::Accept] if `accept(2)` fails.
    pub fn accept(&mut self) -> Result<AcceptStatus> {
        let fd = self.listening_fd()?;

        match sys::accept(fd) {
            Ok((conn, peer)) => self.admit(conn, peer).map(AcceptStatus::Accepted),
            Err(err) if is_transient(&err) => Ok(AcceptStatus::NoWork),
            Err(err) => {
                error!("{err}");
                Err(Error::Accept(err))
            }
        }
    }

    /// Performs one readiness cycle: waits for the listener or any occupied
    /// slot to become readable, accepts at most one connection, then
    /// dispatches every readable slot to [Handler::on_client_data] once.
    ///
    /// Blocks indefinitely if nothing becomes ready. Hooks must not call
    /// `run` themselves.
    ///
    /// # Errors
    ///
    /// - [Error::NotListening] if the server is not listening.
    /// - [Error::Poll] if the readiness wait fails. The caller is expected to
    ///   stop driving the loop.
    pub fn run(&mut self) -> Result<()> {
        let listener = self.listening_fd()?.as_raw_fd();

        // Readiness-interest set: the listener first, then every occupied
        // slot. `owners[i]` is the slot index of `fds[i + 1]`.
        let mut fds = Vec::with_capacity(N + 1);
        let mut owners = Vec::with_capacity(N);

        fds.push(libc::pollfd {
            fd: listener,
            events: libc::POLLIN,
            revents: 0,
        });

        for (idx, conn) in self.table.iter() {
            if let Some(fd) = conn.raw_fd() {
                fds.push(libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                });
                owners.push(idx);
            }
        }

        match sys::poll(&mut fds, POLL_TIMEOUT_MS) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                debug!("readiness wait interrupted");
                return Ok(());
            }
            Err(err) => {
                error!("{err}");
                return Err(Error::Poll(err));
            }
        }

        if fds[0].revents & READABLE != 0 {
            self.accept_phase();
        }

        let ready: Vec<usize> = fds[1..]
            .iter()
            .zip(owners)
            .filter(|(pfd, _)| pfd.revents & READABLE != 0)
            .map(|(_, idx)| idx)
            .collect();

        for idx in ready {
            self.dispatch(idx);
        }

        self.reap();

        Ok(())
    }

    /// Closes every occupied slot, invoking [Handler::on_disconnect] for
    /// each, then releases the listening descriptor.
    ///
    /// Every slot is processed even if some shutdowns fail. Closing a closed
    /// server is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown failure after all slots and the listener
    /// have been released.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ServerState::Closed {
            return Ok(());
        }

        let mut res = Ok(());

        for idx in 0..N {
            let Some(conn) = self.table.remove(idx) else {
                continue;
            };

            if let Err(err) = self.disconnect(idx, conn) {
                warn!("failed to shut down slot {idx}: {err}");
                if res.is_ok() {
                    res = Err(err);
                }
            }
        }

        self.listener = None;
        self.state = ServerState::Closed;

        info!("server closed");

        res
    }

    /// Closes the connection in slot `idx`, invoking
    /// [Handler::on_disconnect], and frees the slot.
    ///
    /// # Errors
    ///
    /// - [Error::NotConnected] if the slot is empty.
    /// - [Error::Io] if the shutdown failed. The slot is freed regardless.
    pub fn close_client(&mut self, idx: usize) -> Result<()> {
        let conn = self.table.remove(idx).ok_or(Error::NotConnected)?;

        self.disconnect(idx, conn)
    }

    /// Sends `msg` to every connected slot. Returns the number of successful
    /// sends; failures are logged and skipped.
    pub fn broadcast(&self, msg: &Message) -> usize {
        self.table
            .iter()
            .filter(|(_, conn)| conn.is_connected())
            .filter(|(_, conn)| conn.send(msg).is_ok())
            .count()
    }

    /// Returns the number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if no slot is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the connection in slot `idx`.
    pub fn connection(&self, idx: usize) -> Option<&Connection> {
        self.table.get(idx)
    }

    /// Returns the connection in slot `idx` mutably.
    pub fn connection_mut(&mut self, idx: usize) -> Option<&mut Connection> {
        self.table.get_mut(idx)
    }

    /// Iterates over occupied slots in table order.
    pub fn connections(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.table.iter()
    }

    /// Returns the handler.
    #[inline]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns the handler mutably.
    #[inline]
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    fn listening_fd(&self) -> Result<BorrowedFd<'_>> {
        match (self.state, self.listener.as_ref()) {
            (ServerState::Listening, Some(fd)) => Ok(fd.as_fd()),
            _ => Err(Error::NotListening),
        }
    }

    /// Places an accepted descriptor in the first free slot.
    fn admit(&mut self, fd: OwnedFd, peer: SocketAddrV4) -> Result<usize> {
        if self.table.is_full() {
            warn!("[{peer}] server full, rejecting connection");
            drop(fd);

            return Err(Error::CapacityExceeded { capacity: N });
        }

        // Server-owned connections never block the loop.
        if let Err(err) = sys::set_nonblocking(fd.as_fd()) {
            error!("[{peer}] {err}");
            return Err(Error::Accept(err));
        }

        match self.table.insert(Connection::accepted(fd, peer)) {
            Ok(idx) => {
                info!("[{peer}] accepted into slot {idx}");
                Ok(idx)
            }
            Err(_) => Err(Error::CapacityExceeded { capacity: N }),
        }
    }

    /// Accepts at most one connection and offers it to the handler.
    fn accept_phase(&mut self) {
        let Ok(fd) = self.listening_fd() else {
            return;
        };

        let (conn, peer) = match sys::accept(fd) {
            Ok(accepted) => accepted,
            Err(err) if is_transient(&err) => return,
            Err(err) => {
                error!("{err}");
                return;
            }
        };

        let Ok(idx) = self.admit(conn, peer) else {
            return;
        };

        let allow = match self.table.get_mut(idx) {
            Some(conn) => self.handler.on_connect(conn),
            None => return,
        };

        if !allow {
            // Dropping the handle closes the descriptor.
            self.table.remove(idx);
            debug!("[{peer}] connection rejected, slot {idx} freed");
        }
    }

    /// Invokes the data hook for slot `idx` with the rest of the table as
    /// context.
    fn dispatch(&mut self, idx: usize) {
        let Some(mut conn) = self.table.remove(idx) else {
            return;
        };

        if !conn.is_connected() {
            self.notify_disconnect(idx, &mut conn);
            return;
        }

        let keep_alive = {
            let mut peers = Peers::new(self.table.slots_mut(), idx);
            self.handler.on_client_data(&mut peers, &mut conn)
        };

        if !keep_alive {
            if let Err(err) = conn.close() {
                debug!("failed to shut down slot {idx}: {err}");
            }
            self.notify_disconnect(idx, &mut conn);
        } else if !conn.is_connected() {
            self.notify_disconnect(idx, &mut conn);
        } else {
            self.table.slots_mut()[idx] = Slot::Occupied(conn);
        }
    }

    /// Frees slots whose connection went disconnected outside of its own
    /// dispatch, e.g. through [Peers].
    fn reap(&mut self) {
        for idx in 0..N {
            if self.table.get(idx).is_some_and(Connection::is_connected) {
                continue;
            }

            if let Some(mut conn) = self.table.remove(idx) {
                self.notify_disconnect(idx, &mut conn);
            }
        }
    }

    /// Half-closes, notifies, then releases a connection already removed
    /// from slot `idx`.
    fn disconnect(&mut self, idx: usize, mut conn: Connection) -> Result<()> {
        let res = if conn.is_connected() {
            conn.shutdown_write()
        } else {
            Ok(())
        };

        self.notify_disconnect(idx, &mut conn);
        conn.release();

        res.map_err(Error::Io)
    }

    fn notify_disconnect(&mut self, idx: usize, conn: &mut Connection) {
        if !self.handler.on_disconnect(conn) {
            debug!("on_disconnect for slot {idx} returned false (ignored)");
        }

        match conn.peer_addr() {
            Some(peer) => debug!("[{peer}] slot {idx} freed"),
            None => debug!("slot {idx} freed"),
        }
    }
}

/// Returns `true` for `accept(2)` failures that only mean "nothing to do".
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(libc::ECONNABORTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Hooks;
    use std::cell::{Cell, RefCell};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::rc::Rc;
    use std::time::Duration;

    fn listening<H: Handler, const N: usize>(handler: H) -> (Server<H, N>, SocketAddrV4) {
        let mut server = Server::with_capacity(handler).unwrap();
        server.listen("127.0.0.1", "0").unwrap();
        let addr = server.local_addr().unwrap();

        (server, addr)
    }

    fn client(addr: SocketAddrV4) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn assert_eof(stream: &mut TcpStream) {
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[derive(Debug, Default)]
    struct Counter {
        connects: usize,
        disconnects: usize,
        data: usize,
        /// When set, each disconnect checks that this address still accepts.
        listener: Option<SocketAddrV4>,
        listener_open: usize,
    }

    impl Handler for Counter {
        fn on_connect(&mut self, _client: &mut Connection) -> bool {
            self.connects += 1;
            true
        }

        fn on_disconnect(&mut self, client: &mut Connection) -> bool {
            assert!(client.peer_addr().is_some());
            self.disconnects += 1;

            if self
                .listener
                .is_some_and(|addr| TcpStream::connect(addr).is_ok())
            {
                self.listener_open += 1;
            }
            true
        }

        fn on_client_data(&mut self, _peers: &mut Peers<'_>, client: &mut Connection) -> bool {
            self.data += 1;
            let mut msg = Message::with_capacity(64).unwrap();
            client.receive(&mut msg).is_ok()
        }
    }

    #[test]
    fn lifecycle() {
        let mut server = Server::create(()).unwrap();
        assert_eq!(server.state(), ServerState::Unbound);
        assert_eq!(server.capacity(), MAX_CLIENTS);
        assert!(!server.is_listening());
        assert!(matches!(server.run(), Err(Error::NotListening)));
        assert!(matches!(server.accept(), Err(Error::NotListening)));

        server.listen("127.0.0.1", "0").unwrap();
        assert!(server.is_listening());
        assert!(matches!(
            server.listen("127.0.0.1", "0"),
            Err(Error::Listen(_))
        ));

        server.close().unwrap();
        assert_eq!(server.state(), ServerState::Closed);
        assert!(!server.is_listening());
        assert!(matches!(server.run(), Err(Error::NotListening)));
        assert!(matches!(
            server.listen("127.0.0.1", "0"),
            Err(Error::Listen(_))
        ));
        assert!(server.close().is_ok());
    }

    #[test]
    fn failed_listen_stays_unbound() {
        let (_taken, addr) = listening::<(), 1>(());

        let mut server = Server::create(()).unwrap();

        assert!(matches!(
            server.listen("127.0.0.1", "no-such-service"),
            Err(Error::Bind(_))
        ));
        assert_eq!(server.state(), ServerState::Unbound);

        assert!(matches!(
            server.listen("127.0.0.1", &addr.port().to_string()),
            Err(Error::Bind(_))
        ));
        assert_eq!(server.state(), ServerState::Unbound);

        server.listen("127.0.0.1", "0").unwrap();
        assert!(server.is_listening());
    }

    #[test]
    fn polling_accept() {
        let (mut server, addr) = listening::<_, 4>(Counter::default());

        assert_eq!(server.accept().unwrap(), AcceptStatus::NoWork);

        let _stream = client(addr);
        assert_eq!(server.accept().unwrap(), AcceptStatus::Accepted(0));
        assert_eq!(server.len(), 1);

        let conn = server.connection(0).unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.peer_ip(), "127.0.0.1");
        assert!(conn.is_nonblocking().unwrap());

        // The polling path does not consult the handler.
        assert_eq!(server.handler().connects, 0);
    }

    #[test]
    fn full_table_drops_new_connection() {
        let (mut server, addr) = listening::<(), MAX_CLIENTS>(());

        let _streams: Vec<TcpStream> = (0..MAX_CLIENTS)
            .map(|n| {
                let stream = client(addr);
                assert_eq!(server.accept().unwrap(), AcceptStatus::Accepted(n));
                stream
            })
            .collect();
        assert_eq!(server.len(), MAX_CLIENTS);

        let mut extra = client(addr);
        assert!(matches!(
            server.accept(),
            Err(Error::CapacityExceeded {
                capacity: MAX_CLIENTS
            })
        ));
        assert_eq!(server.len(), MAX_CLIENTS);

        // The extra descriptor was released, not queued.
        assert_eof(&mut extra);
        assert_eq!(server.accept().unwrap(), AcceptStatus::NoWork);
    }

    #[test]
    fn reactor_drops_connection_when_full() {
        let (mut server, addr) = listening::<_, 2>(Counter::default());

        let _a = client(addr);
        server.run().unwrap();
        let _b = client(addr);
        server.run().unwrap();
        assert_eq!(server.len(), 2);

        let mut c = client(addr);
        server.run().unwrap();

        assert_eq!(server.len(), 2);
        assert_eq!(server.handler().connects, 2);
        assert_eof(&mut c);
    }

    #[test]
    fn echo_round_trip() {
        let received = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&received);

        let hooks = Hooks::new().on_client_data(move |_peers, client| {
            let mut msg = Message::with_capacity(1024).unwrap();
            match client.receive(&mut msg) {
                Ok(0) => true,
                Ok(_) => {
                    log.borrow_mut().push(msg.payload_with_nul().to_vec());
                    client.send(&msg).is_ok()
                }
                Err(_) => false,
            }
        });

        let (mut server, addr) = listening::<_, 4>(hooks);

        let mut conn = Connection::create().unwrap();
        conn.connect("127.0.0.1", &addr.port().to_string()).unwrap();

        server.run().unwrap();
        assert_eq!(server.len(), 1);

        assert_eq!(conn.send(&Message::from("Echo!")).unwrap(), 5);
        server.run().unwrap();

        assert_eq!(received.borrow().as_slice(), &[b"Echo!\0".to_vec()]);

        let mut reply = Message::with_capacity(1024).unwrap();
        assert_eq!(conn.receive(&mut reply).unwrap(), 5);
        assert_eq!(reply.payload_with_nul(), b"Echo!\0");
    }

    #[test]
    fn rejected_connection_never_dispatched() {
        let allow = Rc::new(Cell::new(false));
        let data_calls = Rc::new(Cell::new(0));

        let gate = Rc::clone(&allow);
        let calls = Rc::clone(&data_calls);
        let hooks = Hooks::new()
            .on_connect(move |_| gate.get())
            .on_client_data(move |_, client| {
                calls.set(calls.get() + 1);
                let mut msg = Message::with_capacity(16).unwrap();
                client.receive(&mut msg).is_ok()
            });

        let (mut server, addr) = listening::<_, 4>(hooks);

        let mut stream = client(addr);
        server.run().unwrap();

        assert!(server.is_empty());
        assert_eof(&mut stream);

        // A later, accepted peer is dispatched while the rejected one is not.
        allow.set(true);
        let mut other = client(addr);
        server.run().unwrap();
        assert_eq!(server.len(), 1);

        other.write_all(b"ping").unwrap();
        server.run().unwrap();
        assert_eq!(data_calls.get(), 1);
    }

    #[test]
    fn keep_alive_false_closes_and_notifies() {
        let disconnects = Rc::new(Cell::new(0));
        let count = Rc::clone(&disconnects);

        let hooks = Hooks::new()
            .on_client_data(|_, client| {
                let mut msg = Message::with_capacity(16).unwrap();
                let _ = client.receive(&mut msg);
                false
            })
            .on_disconnect(move |client| {
                assert!(!client.is_connected());
                count.set(count.get() + 1);
                true
            });

        let (mut server, addr) = listening::<_, 4>(hooks);

        let mut stream = client(addr);
        server.run().unwrap();
        assert_eq!(server.len(), 1);

        stream.write_all(b"bye").unwrap();
        server.run().unwrap();

        assert!(server.is_empty());
        assert_eq!(disconnects.get(), 1);
        assert_eof(&mut stream);
    }

    #[test]
    fn failed_shutdown_still_frees_slot() {
        let disconnects = Rc::new(Cell::new(0));
        let count = Rc::clone(&disconnects);

        let hooks = Hooks::new()
            .on_client_data(|_, _| false)
            .on_disconnect(move |_| {
                count.set(count.get() + 1);
                true
            });

        let (mut server, addr) = listening::<_, 4>(hooks);

        let stream = client(addr);
        server.run().unwrap();
        assert_eq!(server.len(), 1);

        // Shutting down a reset connection fails with `ENOTCONN`.
        let linger = libc::linger {
            l_onoff: 1,
            l_linger: 0,
        };
        let rc = unsafe {
            libc::setsockopt(
                stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                &raw const linger as *const libc::c_void,
                std::mem::size_of::<libc::linger>() as libc::socklen_t,
            )
        };
        assert_eq!(rc, 0);
        drop(stream);

        server.run().unwrap();

        assert!(server.is_empty());
        assert_eq!(disconnects.get(), 1);
    }

    #[test]
    fn peer_close_frees_slot() {
        let (mut server, addr) = listening::<_, 4>(Counter::default());

        let stream = client(addr);
        server.run().unwrap();
        assert_eq!(server.len(), 1);

        drop(stream);
        server.run().unwrap();

        assert!(server.is_empty());
        assert_eq!(server.handler().data, 1);
        assert_eq!(server.handler().disconnects, 1);
    }

    #[test]
    fn close_notifies_every_slot() {
        let (mut server, addr) = listening::<_, 8>(Counter::default());

        let mut streams: Vec<TcpStream> = (0..3)
            .map(|_| {
                let stream = client(addr);
                server.run().unwrap();
                stream
            })
            .collect();
        assert_eq!(server.len(), 3);
        assert_eq!(server.handler().connects, 3);

        server.handler_mut().listener = Some(addr);
        server.close().unwrap();

        assert_eq!(server.handler().disconnects, 3);
        // Every hook ran while the listener was still open.
        assert_eq!(server.handler().listener_open, 3);
        assert!(server.is_empty());
        assert!(matches!(server.local_addr(), Err(Error::NotListening)));
        for stream in &mut streams {
            assert_eof(stream);
        }
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn close_client_frees_one_slot() {
        let (mut server, addr) = listening::<_, 4>(Counter::default());

        let mut a = client(addr);
        server.run().unwrap();
        let _b = client(addr);
        server.run().unwrap();

        server.close_client(0).unwrap();

        assert_eq!(server.len(), 1);
        assert_eq!(server.handler().disconnects, 1);
        assert!(server.connection(1).is_some());
        assert!(matches!(server.close_client(0), Err(Error::NotConnected)));
        assert_eof(&mut a);

        // The freed slot is reused first.
        let _c = client(addr);
        server.run().unwrap();
        assert!(server.connection(0).is_some());
    }

    #[test]
    fn broadcast_reaches_every_slot() {
        let (mut server, addr) = listening::<_, 4>(());

        let mut streams: Vec<TcpStream> = (0..2)
            .map(|_| {
                let stream = client(addr);
                server.run().unwrap();
                stream
            })
            .collect();

        assert_eq!(server.broadcast(&Message::from("hi")), 2);

        for stream in &mut streams {
            let mut buf = [0u8; 2];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"hi");
        }
    }

    #[test]
    fn peers_relay_to_other_clients() {
        let hooks = Hooks::new().on_client_data(|peers, client| {
            let mut msg = Message::with_capacity(64).unwrap();
            match client.receive(&mut msg) {
                Ok(0) => true,
                Ok(_) => {
                    assert_eq!(peers.len(), 1);
                    assert_eq!(peers.broadcast(&msg), 1);
                    true
                }
                Err(_) => false,
            }
        });

        let (mut server, addr) = listening::<_, 4>(hooks);

        let mut a = client(addr);
        server.run().unwrap();
        let mut b = client(addr);
        server.run().unwrap();

        a.write_all(b"hello").unwrap();
        server.run().unwrap();

        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        // The sender is not echoed.
        a.set_nonblocking(true).unwrap();
        assert_eq!(
            a.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }
}
