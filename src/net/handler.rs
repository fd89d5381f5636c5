//! Callbacks invoked by a [Server] while it accepts, serves, and drops
//! connections.
//!
//! [Server]: crate::net::Server

use std::fmt;

use crate::net::{Connection, Message, Slot};

/// Hooks supplied by the embedding application.
///
/// Every method has a default, so an implementation overrides only the hooks
/// it needs: unset hooks allow every connection and keep it alive.
///
/// Hooks run synchronously on the thread calling [Server::run].
///
/// [Server::run]: crate::net::Server::run
pub trait Handler {
    /// Called once a connection has been accepted into a slot. Returning
    /// `false` rejects it: its descriptor is released immediately and
    /// [Handler::on_client_data] is never invoked for it.
    fn on_connect(&mut self, _client: &mut Connection) -> bool {
        true
    }

    /// Called when a connection is dropped by the server. The return value is
    /// advisory only.
    fn on_disconnect(&mut self, _client: &mut Connection) -> bool {
        true
    }

    /// Called when `client` is ready for reading. Returning `false` closes the
    /// connection.
    fn on_client_data(&mut self, _peers: &mut Peers<'_>, _client: &mut Connection) -> bool {
        true
    }
}

impl Handler for () {}

impl<H: Handler + ?Sized> Handler for &mut H {
    fn on_connect(&mut self, client: &mut Connection) -> bool {
        (**self).on_connect(client)
    }

    fn on_disconnect(&mut self, client: &mut Connection) -> bool {
        (**self).on_disconnect(client)
    }

    fn on_client_data(&mut self, peers: &mut Peers<'_>, client: &mut Connection) -> bool {
        (**self).on_client_data(peers, client)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn on_connect(&mut self, client: &mut Connection) -> bool {
        (**self).on_connect(client)
    }

    fn on_disconnect(&mut self, client: &mut Connection) -> bool {
        (**self).on_disconnect(client)
    }

    fn on_client_data(&mut self, peers: &mut Peers<'_>, client: &mut Connection) -> bool {
        (**self).on_client_data(peers, client)
    }
}

/// The rest of the server's connection table, handed to
/// [Handler::on_client_data].
///
/// The connection being dispatched is passed to the hook separately and is
/// not reachable through `Peers`.
#[derive(Debug)]
pub struct Peers<'a> {
    slots: &'a mut [Slot],
    current: usize,
}

impl<'a> Peers<'a> {
    pub(crate) fn new(slots: &'a mut [Slot], current: usize) -> Self {
        Self { slots, current }
    }

    /// Returns the slot index of the connection being dispatched.
    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    /// Returns the number of other occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_occupied()).count()
    }

    /// Returns `true` if no other slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the connection in slot `idx`.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Connection> {
        self.slots.get_mut(idx)?.connection_mut()
    }

    /// Iterates over the other occupied slots in table order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.connection_mut().map(|conn| (idx, conn)))
    }

    /// Sends `msg` to every other connected peer. Returns the number of
    /// successful sends; failures are logged and skipped.
    pub fn broadcast(&mut self, msg: &Message) -> usize {
        self.iter_mut()
            .filter(|(_, conn)| conn.is_connected())
            .filter(|(_, conn)| conn.send(msg).is_ok())
            .count()
    }
}

type ConnectFn = Box<dyn FnMut(&mut Connection) -> bool>;
type ClientDataFn = Box<dyn FnMut(&mut Peers<'_>, &mut Connection) -> bool>;

/// A [Handler] assembled from individually registered closures.
///
/// # Examples
///
/// ```no_run
/// use sockmux::net::{Hooks, Message, Server};
///
/// let hooks = Hooks::new()
///     .on_connect(|client| {
///         println!("client connected with IP: {}", client.peer_ip());
///         true
///     })
///     .on_client_data(|_peers, client| {
///         let mut msg = Message::with_capacity(256).unwrap();
///         match client.receive(&mut msg) {
///             Ok(n) if n > 0 => client.send(&msg).is_ok(),
///             Ok(_) => true,
///             Err(_) => false,
///         }
///     });
///
/// let mut server = Server::create(hooks)?;
/// server.listen("127.0.0.1", "4200")?;
///
/// while server.is_listening() {
///     server.run()?;
/// }
/// # Ok::<(), sockmux::Error>(())
/// ```
#[derive(Default)]
pub struct Hooks {
    connect: Option<ConnectFn>,
    disconnect: Option<ConnectFn>,
    client_data: Option<ClientDataFn>,
}

impl Hooks {
    /// Creates a set with no hooks registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the hook for [Handler::on_connect].
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Connection) -> bool + 'static,
    {
        self.connect = Some(Box::new(f));
        self
    }

    /// Registers the hook for [Handler::on_disconnect].
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Connection) -> bool + 'static,
    {
        self.disconnect = Some(Box::new(f));
        self
    }

    /// Registers the hook for [Handler::on_client_data].
    pub fn on_client_data<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut Peers<'_>, &mut Connection) -> bool + 'static,
    {
        self.client_data = Some(Box::new(f));
        self
    }
}

impl Handler for Hooks {
    fn on_connect(&mut self, client: &mut Connection) -> bool {
        self.connect.as_mut().is_none_or(|f| f(client))
    }

    fn on_disconnect(&mut self, client: &mut Connection) -> bool {
        self.disconnect.as_mut().is_none_or(|f| f(client))
    }

    fn on_client_data(&mut self, peers: &mut Peers<'_>, client: &mut Connection) -> bool {
        self.client_data.as_mut().is_none_or(|f| f(peers, client))
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connect", &self.connect.is_some())
            .field("on_disconnect", &self.disconnect.is_some())
            .field("on_client_data", &self.client_data.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;

    fn pair() -> (Connection, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        let conn = Connection::accepted(
            OwnedFd::from(a),
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        );
        (conn, b)
    }

    #[test]
    fn unset_hooks_allow_and_keep_alive() {
        let (mut conn, _peer) = pair();
        let mut slots: [Slot; 0] = [];
        let mut peers = Peers::new(&mut slots, 0);

        let mut hooks = Hooks::new();
        assert!(Handler::on_connect(&mut hooks, &mut conn));
        assert!(Handler::on_disconnect(&mut hooks, &mut conn));
        assert!(Handler::on_client_data(&mut hooks, &mut peers, &mut conn));

        let mut unit = ();
        assert!(Handler::on_connect(&mut unit, &mut conn));
        assert!(Handler::on_client_data(&mut unit, &mut peers, &mut conn));
    }

    #[test]
    fn registered_hooks_are_called() {
        let (mut conn, _peer) = pair();
        let calls = Rc::new(Cell::new(0));

        let counter = Rc::clone(&calls);
        let mut hooks: Box<dyn Handler> = Box::new(
            Hooks::new()
                .on_connect(|_| false)
                .on_disconnect(move |_| {
                    counter.set(counter.get() + 1);
                    false
                }),
        );

        assert!(!hooks.on_connect(&mut conn));
        assert!(!hooks.on_disconnect(&mut conn));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn peers_broadcast_skips_empty_slots() {
        use std::io::Read;

        let (a, mut a_peer) = pair();
        let (b, mut b_peer) = pair();
        let mut slots = [Slot::Occupied(a), Slot::Empty, Slot::Empty, Slot::Occupied(b)];

        let mut peers = Peers::new(&mut slots, 1);
        assert_eq!(peers.current(), 1);
        assert_eq!(peers.len(), 2);
        assert!(peers.get_mut(2).is_none());

        assert_eq!(peers.broadcast(&Message::from("all")), 2);

        let mut buf = [0u8; 3];
        a_peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"all");
        b_peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"all");
    }
}
