//! Caller-owned byte buffers exchanged through [Connection::send] and
//! [Connection::receive].
//!
//! A [Message] has a fixed capacity and a payload length. Received payloads
//! are at most `capacity - 1` bytes long and are always followed by a `\0`
//! terminator, so the buffer can be treated as a bounded byte string.
//!
//! [Connection::send]: crate::net::Connection::send
//! [Connection::receive]: crate::net::Connection::receive

use std::fmt;

use crate::error::{Error, Result};

/// A fixed-capacity byte buffer plus the length of its current payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    buf: Box<[u8]>,
    len: usize,
}

impl Message {
    /// Creates an empty message able to receive up to `capacity - 1` bytes.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidBuffer] if `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidBuffer);
        }

        Ok(Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        })
    }

    /// Returns the declared capacity of the buffer, terminator included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the length of the payload.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Returns the payload followed by its terminator, if one fits.
    pub fn payload_with_nul(&self) -> &[u8] {
        let end = (self.len + 1).min(self.capacity());
        &self.buf[..end]
    }

    /// Returns the payload as UTF-8, if valid.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.payload()).ok()
    }

    /// Replaces the payload with a copy of `data`, followed by a terminator.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidBuffer] if `data` does not fit in
    /// `capacity - 1` bytes. The message is left unchanged.
    pub fn set_payload(&mut self, data: &[u8]) -> Result<()> {
        if data.len() >= self.capacity() {
            return Err(Error::InvalidBuffer);
        }

        self.buf[..data.len()].copy_from_slice(data);
        self.buf[data.len()] = 0;
        self.len = data.len();

        Ok(())
    }

    /// Clears the payload.
    pub fn clear(&mut self) {
        self.len = 0;
        self.buf[0] = 0;
    }

    /// Returns the writable region for a receive of at most `capacity - 1`
    /// bytes.
    pub(crate) fn recv_region(&mut self) -> &mut [u8] {
        let max = self.capacity() - 1;
        &mut self.buf[..max]
    }

    /// Commits `n` received bytes and appends the terminator.
    pub(crate) fn commit(&mut self, n: usize) {
        debug_assert!(n < self.capacity());

        self.buf[n] = 0;
        self.len = n;
    }
}

impl From<&[u8]> for Message {
    /// Creates a message holding `data`, sized for the payload plus its
    /// terminator.
    fn from(data: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.extend_from_slice(data);
        buf.push(0);

        Self {
            buf: buf.into_boxed_slice(),
            len: data.len(),
        }
    }
}

impl From<&str> for Message {
    fn from(data: &str) -> Self {
        Self::from(data.as_bytes())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field(
                "payload",
                &String::from_utf8_lossy(self.payload()).escape_debug().to_string(),
            )
            .finish()
    }
}
