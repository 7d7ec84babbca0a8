//! Reader handles.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::buffer::Shared;
use crate::heap::ReaderId;
use crate::ring::RingStore;
use crate::store::{Snapshot, Store};

/// An independent read position in a [`Buffer`](crate::Buffer).
///
/// Readers are created by [`Buffer::next_reader`](crate::Buffer::next_reader)
/// and [`Buffer::next_reader_from_now`](crate::Buffer::next_reader_from_now).
/// Clones share the same position. The reader is closed when
/// [`close`](Reader::close) is called or when its last clone is dropped;
/// a reader that stops early must be closed, or the buffer keeps every byte
/// from its position onwards.
///
/// `close` may be called from another thread while a `read` is blocked,
/// which makes that `read` return end of data.
pub struct Reader<S: Store = RingStore> {
    inner: Arc<ReaderInner<S>>,
}

struct ReaderInner<S: Store> {
    id: ReaderId,
    shared: Arc<Shared<S>>,
    // Held for a whole read, including the wait for data.
    reading: Mutex<()>,
    // Never held across a wait.
    cursor: Mutex<Cursor<S::Snapshot>>,
    alive: AtomicBool,
}

/// The bytes handed to a reader by its last fetch.
struct Cursor<T> {
    snapshot: Option<T>,
    // Length of the snapshot when it was fetched.
    chunk: usize,
}

impl<T: Snapshot> Cursor<T> {
    fn new(snapshot: Option<T>) -> Self {
        let chunk = snapshot.as_ref().map_or(0, |s| s.len());
        Cursor { snapshot, chunk }
    }

    fn len(&self) -> usize {
        self.snapshot.as_ref().map_or(0, |s| s.len())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn consumed(&self) -> usize {
        self.chunk - self.len()
    }

    fn clear(&mut self) {
        self.snapshot = None;
        self.chunk = 0;
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.snapshot.as_mut().map_or(0, |s| s.read(buf))
    }
}

impl<S: Store> Clone for Reader<S> {
    fn clone(&self) -> Self {
        Reader {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store> Reader<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>, id: ReaderId, snapshot: Option<S::Snapshot>) -> Self {
        Reader {
            inner: Arc::new(ReaderInner {
                id,
                shared,
                reading: Mutex::new(()),
                cursor: Mutex::new(Cursor::new(snapshot)),
                alive: AtomicBool::new(true),
            }),
        }
    }

    /// Reads the next bytes into `buf`.
    ///
    /// Blocks until at least one byte is available. Returns 0 for a
    /// non-empty `buf` only at end of data: the buffer is closed and
    /// drained, or this reader is closed.
    ///
    /// Reads through clones of one reader take turns. [`len`](Reader::len),
    /// [`discard`](Reader::discard) and [`peek`](Reader::peek) do not wait
    /// for a blocked read; while it waits they see no fetched bytes.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let _reading = self.inner.reading.lock();
        loop {
            if self.is_closed() {
                self.inner.cursor.lock().clear();
                return 0;
            }
            let empty = self.inner.cursor.lock().is_empty();
            if empty {
                self.fetch();
            }
            let n = self.inner.cursor.lock().read(buf);
            if n > 0 {
                return n;
            }
            if self.is_closed() {
                return 0;
            }
            if self.inner.shared.is_closed() {
                // A final write may have landed just before the close.
                self.fetch();
                return self.inner.cursor.lock().read(buf);
            }
        }
    }

    /// Skips up to `n` already fetched bytes and returns how many were
    /// skipped.
    ///
    /// Only bytes returned by the last fetch count; this never blocks for
    /// more data. The skipped bytes are released to the buffer on the next
    /// fetch.
    pub fn discard(&self, n: usize) -> usize {
        let mut cursor = self.inner.cursor.lock();
        cursor.snapshot.as_mut().map_or(0, |s| s.discard(n))
    }

    /// Copies fetched, unread bytes into `buf` without consuming them.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let cursor = self.inner.cursor.lock();
        cursor.snapshot.as_ref().map_or(0, |s| s.read_at(buf, 0))
    }

    /// Returns the number of fetched bytes not yet read.
    pub fn len(&self) -> usize {
        self.inner.cursor.lock().len()
    }

    /// Returns true if no fetched bytes are waiting to be read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the reader. Closing twice is harmless.
    ///
    /// The buffer stops holding bytes for this reader, and a `read` blocked
    /// on it returns end of data.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Returns true if the reader has been closed.
    pub fn is_closed(&self) -> bool {
        !self.inner.alive.load(Ordering::Acquire)
    }

    fn fetch(&self) {
        let consumed = {
            let mut cursor = self.inner.cursor.lock();
            let consumed = cursor.consumed();
            cursor.clear();
            consumed
        };
        let snapshot = self.inner.shared.fetch(self.inner.id, consumed, &self.inner.alive);
        *self.inner.cursor.lock() = Cursor::new(snapshot);
    }
}

impl<S: Store> ReaderInner<S> {
    fn close(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.shared.drop_reader(self.id);
            self.cursor.lock().clear();
        }
    }
}

impl<S: Store> Drop for ReaderInner<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: Store> io::Read for &Reader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Reader::<S>::read(*self, buf))
    }
}

impl<S: Store> io::Read for Reader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Reader::<S>::read(self, buf))
    }
}
