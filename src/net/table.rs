//! Fixed-capacity registry of connections owned by a server.
//!
//! Slots are never reordered or compacted: a slot index identifies a
//! connection for as long as it is occupied, and a freed slot is reused by the
//! next insertion through a first-fit scan.

use crate::net::Connection;

/// Default number of slots in a server's connection table.
pub const MAX_CLIENTS: usize = 64;

/// One entry in a [ConnectionTable].
#[derive(Debug, Default)]
pub enum Slot {
    /// No connection.
    #[default]
    Empty,
    /// A connection accepted by the server.
    Occupied(Connection),
}

impl Slot {
    /// Returns `true` if the slot holds a connection.
    #[inline]
    pub fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied(_))
    }

    /// Returns the connection held by the slot.
    #[inline]
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            Slot::Occupied(conn) => Some(conn),
            Slot::Empty => None,
        }
    }

    /// Returns the connection held by the slot mutably.
    #[inline]
    pub fn connection_mut(&mut self) -> Option<&mut Connection> {
        match self {
            Slot::Occupied(conn) => Some(conn),
            Slot::Empty => None,
        }
    }

    /// Empties the slot, returning its connection.
    #[inline]
    pub fn take(&mut self) -> Option<Connection> {
        match std::mem::take(self) {
            Slot::Occupied(conn) => Some(conn),
            Slot::Empty => None,
        }
    }
}

/// A fixed-size, ordered array of `N` [Slot]s.
#[derive(Debug)]
pub struct ConnectionTable<const N: usize = MAX_CLIENTS> {
    slots: [Slot; N],
}

impl<const N: usize> Default for ConnectionTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ConnectionTable<N> {
    /// Creates a table with every slot empty.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::Empty),
        }
    }

    /// Returns the number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_occupied()).count()
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        !self.slots.iter().any(Slot::is_occupied)
    }

    /// Returns `true` if every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Slot::is_occupied)
    }

    /// Returns the index of the first empty slot.
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| !slot.is_occupied())
    }

    /// Places `conn` in the first empty slot and returns its index.
    ///
    /// # Errors
    ///
    /// Returns the connection back if every slot is occupied.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, Connection> {
        match self.free_slot() {
            Some(idx) => {
                self.slots[idx] = Slot::Occupied(conn);
                Ok(idx)
            }
            None => Err(conn),
        }
    }

    /// Empties slot `idx`, returning its connection.
    pub fn remove(&mut self, idx: usize) -> Option<Connection> {
        self.slots.get_mut(idx)?.take()
    }

    /// Returns the connection in slot `idx`.
    pub fn get(&self, idx: usize) -> Option<&Connection> {
        self.slots.get(idx)?.connection()
    }

    /// Returns the connection in slot `idx` mutably.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Connection> {
        self.slots.get_mut(idx)?.connection_mut()
    }

    /// Iterates over occupied slots in table order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.connection().map(|conn| (idx, conn)))
    }

    /// Iterates mutably over occupied slots in table order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.connection_mut().map(|conn| (idx, conn)))
    }

    /// Returns every slot, occupied or not.
    #[inline]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    #[inline]
    pub(crate) fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }
}
