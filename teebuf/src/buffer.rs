//! Broadcast buffer implementation.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::BufferConfig;
use crate::error::{BufferError, Result};
use crate::heap::{ReaderHeap, ReaderId};
use crate::reader::Reader;
use crate::ring::RingStore;
use crate::store::{Snapshot, Store};

/// Last-reader callback type alias.
type Callback<S> = Arc<dyn Fn(&Buffer<S>) + Send + Sync>;

/// A byte buffer shared by one writer and any number of readers.
///
/// Every reader sees every byte written after it joined, at its own pace.
/// Bytes are kept once, no matter how many readers there are, and are
/// evicted as soon as every live reader has read past them.
///
/// # Semantics
///
/// - **Write**: Appends and wakes blocked readers. With a capacity bound,
///   blocks while the unread bytes fill the bound.
/// - **Read**: Each [`Reader`] blocks when it has read everything written
///   so far, and reports end of data once the buffer is closed and drained.
/// - **Close**: One-way. Fails later writes and releases blocked writers
///   and readers.
///
/// A reader created with [`next_reader`](Buffer::next_reader) starts at the
/// oldest byte still retained. Bytes that every earlier reader had already
/// consumed are gone, so a late joiner never sees them.
///
/// # Example
///
/// ```
/// use giztoy_teebuf::Buffer;
/// use std::thread;
///
/// let buf = Buffer::new();
/// let readers: Vec<_> = (0..3).map(|_| buf.next_reader()).collect();
///
/// let handles: Vec<_> = readers
///     .into_iter()
///     .map(|r| {
///         thread::spawn(move || {
///             let mut out = Vec::new();
///             std::io::Read::read_to_end(&mut &r, &mut out).unwrap();
///             out
///         })
///     })
///     .collect();
///
/// buf.write(b"Hello ").unwrap();
/// buf.write(b"World").unwrap();
/// buf.close();
///
/// for h in handles {
///     assert_eq!(h.join().unwrap(), b"Hello World");
/// }
/// ```
pub struct Buffer<S: Store = RingStore> {
    shared: Arc<Shared<S>>,
}

pub(crate) struct Shared<S: Store> {
    state: Mutex<State<S>>,
    // Serializes whole writes so capped writes never interleave.
    writer: Mutex<()>,
    data_available: Condvar,
    space_available: Condvar,
    next_id: AtomicU64,
}

struct State<S: Store> {
    store: S,
    discard_offset: u64,
    readers: ReaderHeap,
    closed: bool,
    capacity: usize,
    on_last_close: Option<Callback<S>>,
}

impl<S: Store> State<S> {
    fn write_offset(&self) -> u64 {
        self.discard_offset + self.store.len() as u64
    }

    /// Evicts everything before the slowest live reader.
    fn shift(&mut self) -> bool {
        let Some(min) = self.readers.peek() else {
            return false;
        };
        let diff = min.saturating_sub(self.discard_offset);
        if diff == 0 {
            return false;
        }
        let dropped = self.store.discard(diff as usize);
        self.discard_offset += dropped as u64;
        trace!(dropped, discard_offset = self.discard_offset, "evicted");
        true
    }
}

impl<S: Store> Clone for Buffer<S> {
    fn clone(&self) -> Self {
        Buffer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for Buffer<RingStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer<RingStore> {
    /// Creates an unbounded in-memory buffer.
    pub fn new() -> Self {
        Self::with_store(RingStore::new())
    }

    /// Creates an in-memory buffer that retains at most `capacity` unread
    /// bytes. A capacity of 0 means unbounded.
    ///
    /// Writes block while the bound is reached. With no reader registered
    /// nothing is ever evicted, so a capped writer waits for the first
    /// reader to join and make progress, or for the buffer to be closed.
    pub fn capped(capacity: usize) -> Self {
        Self::with_store_capped(RingStore::new(), capacity)
    }

    /// Creates an in-memory buffer from `config`.
    pub fn with_config(config: BufferConfig) -> Self {
        Self::with_store_capped(RingStore::with_capacity(config.initial_size), config.capacity)
    }
}

impl<S: Store> Buffer<S> {
    /// Creates an unbounded buffer on top of `store`.
    pub fn with_store(store: S) -> Self {
        Self::with_store_capped(store, 0)
    }

    /// Creates a buffer on top of `store` retaining at most `capacity`
    /// unread bytes. A capacity of 0 means unbounded.
    pub fn with_store_capped(store: S, capacity: usize) -> Self {
        Buffer {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    store,
                    discard_offset: 0,
                    readers: ReaderHeap::new(),
                    closed: false,
                    capacity,
                    on_last_close: None,
                }),
                writer: Mutex::new(()),
                data_available: Condvar::new(),
                space_available: Condvar::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Appends `p` to the buffer. Every live reader will see it.
    ///
    /// With a capacity bound, `p` is written in slices that fit the free
    /// room, waking readers after each slice, and the call blocks while
    /// the buffer is full.
    ///
    /// Returns [`BufferError::Closed`] if the buffer is closed before the
    /// call or while it is blocked, and [`BufferError::Alloc`] if the store
    /// cannot grow. Either way `written` counts the bytes that were
    /// accepted.
    pub fn write(&self, p: &[u8]) -> Result<usize> {
        let _writer = self.shared.writer.lock();
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(BufferError::Closed { written: 0 });
        }

        let mut written = 0;
        while written < p.len() {
            let mut n = p.len() - written;
            if state.capacity > 0 {
                while state.store.len() >= state.capacity && !state.closed {
                    trace!(
                        retained = state.store.len(),
                        capacity = state.capacity,
                        "writer waiting for space"
                    );
                    self.shared.space_available.wait(&mut state);
                }
                if state.closed {
                    return Err(BufferError::Closed { written });
                }
                n = n.min(state.capacity - state.store.len());
            }

            let n = state
                .store
                .write(&p[written..written + n])
                .map_err(|err| err.with_written(written))?;
            if n == 0 {
                return Err(BufferError::Alloc {
                    requested: p.len() - written,
                    written,
                });
            }
            written += n;
            self.shared.wake();
        }
        Ok(written)
    }

    /// Returns a reader starting at the oldest retained byte.
    ///
    /// The reader sees everything still retained plus every later write.
    pub fn next_reader(&self) -> Reader<S> {
        self.shared.register(false)
    }

    /// Returns a reader that only sees bytes written from now on.
    pub fn next_reader_from_now(&self) -> Reader<S> {
        self.shared.register(true)
    }

    /// Returns the number of readers created and not yet closed.
    pub fn num_readers(&self) -> usize {
        self.shared.state.lock().readers.len()
    }

    /// Registers `f` to run each time closing a reader leaves no reader
    /// open. Replaces any earlier callback.
    ///
    /// `f` runs on the thread that closed the last reader, after the
    /// buffer's lock is released, so it may call back into the buffer.
    /// That [`Reader::close`], or the drop of the reader's last clone, does
    /// not return until `f` has returned.
    ///
    /// ```
    /// use giztoy_teebuf::Buffer;
    ///
    /// let buf = Buffer::new();
    /// buf.on_last_reader_close(|buf| buf.close());
    ///
    /// let r = buf.next_reader();
    /// r.close();
    /// assert!(buf.is_closed());
    /// ```
    pub fn on_last_reader_close<F>(&self, f: F)
    where
        F: Fn(&Buffer<S>) + Send + Sync + 'static,
    {
        self.shared.state.lock().on_last_close = Some(Arc::new(f));
    }

    /// Closes the buffer.
    ///
    /// Later writes fail, blocked writers return [`BufferError::Closed`],
    /// and readers report end of data once they have drained what is
    /// retained. Closing twice is harmless.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.closed {
            state.closed = true;
            debug!(
                retained = state.store.len(),
                readers = state.readers.len(),
                "buffer closed"
            );
        }
        drop(state);
        self.shared.wake();
    }

    /// Returns true if [`close`](Buffer::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Returns the number of bytes currently retained.
    pub fn len(&self) -> usize {
        self.shared.state.lock().store.len()
    }

    /// Returns true if no bytes are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the retained-bytes bound, if the buffer is capped.
    pub fn capacity_limit(&self) -> Option<usize> {
        match self.shared.state.lock().capacity {
            0 => None,
            cap => Some(cap),
        }
    }

    /// Returns the total number of bytes ever written.
    pub fn write_offset(&self) -> u64 {
        self.shared.state.lock().write_offset()
    }

    /// Returns the number of bytes evicted so far.
    pub fn discard_offset(&self) -> u64 {
        self.shared.state.lock().discard_offset
    }
}

impl<S: Store> Shared<S> {
    fn wake(&self) {
        self.data_available.notify_all();
        self.space_available.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn register(self: &Arc<Self>, from_now: bool) -> Reader<S> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let (offset, snapshot) = if from_now {
            (state.write_offset(), None)
        } else {
            (state.discard_offset, Some(state.store.snapshot()))
        };
        state.readers.push(id, offset);
        if state.shift() {
            self.wake();
        }
        debug!(reader = id, offset, readers = state.readers.len(), "reader joined");
        drop(state);
        Reader::new(Arc::clone(self), id, snapshot)
    }

    /// Moves reader `id` forward by the `consumed` bytes of its previous
    /// snapshot, evicts what nobody needs anymore, then waits for bytes past
    /// the reader's offset.
    ///
    /// Returns a snapshot starting at the reader's offset, which is empty
    /// only if the buffer was closed with nothing left. Returns `None` once
    /// the reader is closed.
    pub(crate) fn fetch(
        &self,
        id: ReaderId,
        consumed: usize,
        alive: &AtomicBool,
    ) -> Option<S::Snapshot> {
        let mut state = self.state.lock();
        if !alive.load(Ordering::Acquire) {
            return None;
        }
        let offset = state.readers.offset(id)? + consumed as u64;
        if consumed > 0 {
            state.readers.set_offset(id, offset);
            state.shift();
            self.wake();
        }

        while offset == state.write_offset() && !state.closed && alive.load(Ordering::Acquire) {
            trace!(reader = id, offset, "reader waiting for data");
            self.data_available.wait(&mut state);
        }
        if !alive.load(Ordering::Acquire) {
            return None;
        }

        let mut snapshot = state.store.snapshot();
        let skip = offset.saturating_sub(state.discard_offset) as usize;
        snapshot.discard(skip);
        Some(snapshot)
    }

    /// Deregisters reader `id` and runs the last-reader callback if it was
    /// the last one open.
    pub(crate) fn drop_reader(self: &Arc<Self>, id: ReaderId) {
        let callback = {
            let mut state = self.state.lock();
            let Some(offset) = state.readers.remove(id) else {
                return;
            };
            state.shift();
            self.wake();
            debug!(reader = id, offset, readers = state.readers.len(), "reader left");
            if state.readers.is_empty() {
                state.on_last_close.clone()
            } else {
                None
            }
        };

        if let Some(callback) = callback {
            debug!("last reader closed, running callback");
            callback(&Buffer {
                shared: Arc::clone(self),
            });
        }
    }
}

impl<S: Store> io::Write for &Buffer<S> {
    /// A write that fails part way reports the accepted prefix; the next
    /// call returns the error.
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        match Buffer::<S>::write(*self, p) {
            Ok(n) => Ok(n),
            Err(err) if err.written() > 0 => Ok(err.written()),
            Err(err) => Err(err.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: Store> io::Write for Buffer<S> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, p)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn read_some(r: &Reader, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        let got = r.read(&mut out);
        out.truncate(got);
        out
    }

    #[test]
    fn test_write_then_read() {
        let buf = Buffer::new();
        let r = buf.next_reader();
        assert_eq!(buf.write(b"Hello World").unwrap(), 11);
        assert_eq!(read_some(&r, 32), b"Hello World");
    }

    #[test]
    fn test_write_after_close() {
        let buf = Buffer::new();
        buf.close();
        assert_eq!(buf.write(b"."), Err(BufferError::Closed { written: 0 }));
        assert_eq!(buf.write(b""), Err(BufferError::Closed { written: 0 }));
        assert_eq!(buf.write_offset(), 0);
    }

    #[test]
    fn test_io_write_after_close_is_broken_pipe() {
        let buf = Buffer::new();
        buf.close();
        let err = (&buf).write_all(b".").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_close_twice() {
        let buf = Buffer::new();
        buf.close();
        buf.close();
        assert!(buf.is_closed());
    }

    #[test]
    fn test_empty_write() {
        let buf = Buffer::new();
        assert_eq!(buf.write(b"").unwrap(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_retained_without_readers() {
        let buf = Buffer::new();
        buf.write(b"abc").unwrap();
        buf.write(b"def").unwrap();
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.discard_offset(), 0);
        assert_eq!(buf.write_offset(), 6);
    }

    #[test]
    fn test_eviction_follows_slowest_reader() {
        let buf = Buffer::new();
        let fast = buf.next_reader();
        let slow = buf.next_reader();

        buf.write(b"0123456789").unwrap();
        assert_eq!(read_some(&fast, 10), b"0123456789");
        assert_eq!(read_some(&slow, 4), b"0123");

        // Offsets only move on the next fetch.
        buf.write(b"ab").unwrap();
        assert_eq!(read_some(&fast, 10), b"ab");
        assert_eq!(buf.discard_offset(), 0);

        assert_eq!(read_some(&slow, 6), b"456789");
        assert_eq!(read_some(&slow, 1), b"a");
        assert_eq!(buf.discard_offset(), 10);
        assert_eq!(buf.len(), 2);

        slow.close();
        // `fast` registered offset 10 at its last fetch.
        assert_eq!(buf.discard_offset(), 10);
        fast.close();
        assert_eq!(buf.num_readers(), 0);
    }

    #[test]
    fn test_drop_last_reader_evicts_nothing_more() {
        let buf = Buffer::new();
        let r = buf.next_reader();
        buf.write(b"abc").unwrap();
        r.close();
        // Nobody is left to decide; the retained bytes wait for the next reader.
        assert_eq!(buf.len(), 3);
        let late = buf.next_reader();
        assert_eq!(read_some(&late, 8), b"abc");
    }

    #[test]
    fn test_reader_from_now_evicts_when_alone() {
        let buf = Buffer::new();
        buf.write(b"old").unwrap();
        let r = buf.next_reader_from_now();
        assert_eq!(buf.discard_offset(), 3);
        assert!(buf.is_empty());

        buf.write(b"new").unwrap();
        assert_eq!(read_some(&r, 8), b"new");
    }

    #[test]
    fn test_capacity_limit() {
        assert_eq!(Buffer::new().capacity_limit(), None);
        assert_eq!(Buffer::capped(0).capacity_limit(), None);
        assert_eq!(Buffer::capped(5).capacity_limit(), Some(5));
        let buf = Buffer::with_config(BufferConfig::new().capacity(9).initial_size(32));
        assert_eq!(buf.capacity_limit(), Some(9));
    }

    #[test]
    fn test_capped_write_fits() {
        let buf = Buffer::capped(8);
        let _r = buf.next_reader();
        assert_eq!(buf.write(b"12345678").unwrap(), 8);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_callback_replaced() {
        use std::sync::atomic::AtomicUsize;

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let buf = Buffer::new();

        let counter = Arc::clone(&first);
        buf.on_last_reader_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        buf.on_last_reader_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        buf.next_reader().close();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_waits_for_callback() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let (entered, wait_entered) = mpsc::channel();
        let (release, wait_release) = mpsc::channel::<()>();
        let wait_release = Mutex::new(wait_release);
        let buf = Buffer::new();
        buf.on_last_reader_close(move |_| {
            entered.send(()).unwrap();
            wait_release.lock().recv().unwrap();
        });

        let r = buf.next_reader();
        let (closed, wait_closed) = mpsc::channel();
        let handle = thread::spawn(move || {
            r.close();
            closed.send(()).unwrap();
        });

        wait_entered.recv_timeout(Duration::from_secs(2)).unwrap();
        // Still inside the callback, so close has not returned.
        assert!(wait_closed.recv_timeout(Duration::from_millis(50)).is_err());
        release.send(()).unwrap();
        wait_closed.recv_timeout(Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
    }

    /// Accepts at most `step` bytes per call and fails once `limit` bytes
    /// are stored.
    struct LimitedStore {
        inner: RingStore,
        step: usize,
        limit: usize,
    }

    impl Store for LimitedStore {
        type Snapshot = crate::RingSnapshot;

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn write(&mut self, p: &[u8]) -> Result<usize> {
            if self.inner.len() >= self.limit {
                return Err(BufferError::Alloc {
                    requested: p.len(),
                    written: 0,
                });
            }
            let n = p.len().min(self.step);
            self.inner.write(&p[..n])
        }

        fn discard(&mut self, n: usize) -> usize {
            self.inner.discard(n)
        }

        fn snapshot(&mut self) -> Self::Snapshot {
            self.inner.snapshot()
        }
    }

    #[test]
    fn test_alloc_failure_keeps_written() {
        let buf = Buffer::with_store(LimitedStore {
            inner: RingStore::new(),
            step: 3,
            limit: 6,
        });
        assert_eq!(
            buf.write(b"0123456789"),
            Err(BufferError::Alloc {
                requested: 4,
                written: 6
            })
        );
        assert_eq!(buf.write_offset(), 6);

        // io::Write reports the accepted prefix, then the error.
        let buf = Buffer::with_store(LimitedStore {
            inner: RingStore::new(),
            step: 3,
            limit: 6,
        });
        assert_eq!(io::Write::write(&mut &buf, b"0123456789").unwrap(), 6);
        let err = io::Write::write(&mut &buf, b"6789").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_io_write_impl() {
        let mut buf = Buffer::new();
        let r = buf.next_reader();
        write!(buf, "{}-{}", 1, 2).unwrap();
        buf.flush().unwrap();
        assert_eq!(read_some(&r, 8), b"1-2");
    }
}
