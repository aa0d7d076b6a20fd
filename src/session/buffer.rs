//! Receive buffer for bytes read but not yet echoed.
//!
//! Strictly FIFO: bytes are appended at the tail on read and removed from
//! the head only after a successful write. Nothing in between is ever
//! reordered or dropped.

use crate::session::allocator::{Lease, SessionAllocator};
use crate::session::scanner::find_line_terminator;
use bytes::{Buf, BytesMut};
use std::rc::Rc;

/// Append/consume-only byte queue accounted against a [`SessionAllocator`].
#[derive(Debug)]
pub struct ReceiveBuffer {
    bytes: BytesMut,
    _lease: Lease,
}

impl ReceiveBuffer {
    /// Allocate an empty buffer.
    ///
    /// Returns `None` if the allocator's buffer limit is reached.
    pub fn allocate(allocator: &Rc<SessionAllocator>) -> Option<Self> {
        let lease = allocator.lease_buffer()?;
        Some(Self {
            bytes: BytesMut::with_capacity(allocator.settings().buffer_capacity),
            _lease: lease,
        })
    }

    /// Append bytes at the tail.
    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// The first complete line, terminator included, if one is buffered.
    pub fn first_line(&self) -> Option<&[u8]> {
        find_line_terminator(&self.bytes).map(|end| &self.bytes[..=end])
    }

    /// Remove `count` bytes from the head.
    ///
    /// # Panics
    /// Panics if `count` exceeds the buffered length.
    pub fn consume(&mut self, count: usize) {
        self.bytes.advance(count);
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
