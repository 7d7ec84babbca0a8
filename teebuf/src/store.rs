//! Backing store contract.
//!
//! A [`Buffer`](crate::Buffer) keeps its bytes in a [`Store`]. The store is
//! a plain append/discard container with no locking of its own; the buffer
//! only touches it while holding its state lock. Readers never see the
//! store directly. They get a [`Snapshot`] of the retained bytes, which must
//! stay valid and unchanged no matter what the store does afterwards.
//!
//! [`RingStore`](crate::RingStore) is the default in-memory implementation.

use crate::error::Result;

/// Append-only byte storage with front eviction.
///
/// Offsets are implicit: the store holds the bytes between the buffer's
/// discard offset and its write offset, in order.
pub trait Store: Send + 'static {
    /// Cursor type returned by [`Store::snapshot`].
    type Snapshot: Snapshot;

    /// Returns the number of bytes currently retained.
    fn len(&self) -> usize;

    /// Returns true if no bytes are retained.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `p` to the end of the store, growing it as needed.
    ///
    /// Returns the number of bytes written, which is `p.len()` unless
    /// growth failed.
    fn write(&mut self, p: &[u8]) -> Result<usize>;

    /// Drops up to `n` bytes from the front of the store.
    ///
    /// Returns the number of bytes actually dropped. A count smaller than
    /// `n` means the store ran out of data.
    fn discard(&mut self, n: usize) -> usize;

    /// Returns a cursor over every byte retained right now.
    ///
    /// Later writes and discards on the store must not affect it.
    fn snapshot(&mut self) -> Self::Snapshot;
}

/// Read cursor over a fixed run of bytes taken from a [`Store`].
pub trait Snapshot: Send + 'static {
    /// Returns the number of unread bytes.
    fn len(&self) -> usize;

    /// Returns true if every byte has been read or discarded.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Skips up to `n` unread bytes and returns how many were skipped.
    fn discard(&mut self, n: usize) -> usize;

    /// Copies unread bytes into `buf` and consumes them.
    ///
    /// Returns 0 only if `buf` is empty or the snapshot is exhausted.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Copies unread bytes starting `off` bytes past the read position into
    /// `buf`, without consuming anything.
    ///
    /// Returns 0 if `off` is at or past the end of the unread bytes.
    fn read_at(&self, buf: &mut [u8], off: usize) -> usize;
}
