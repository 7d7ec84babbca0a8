//! Default in-memory backing store.

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::error::{BufferError, Result};
use crate::store::{Snapshot, Store};

/// Growable in-memory byte store.
///
/// Writes are appended to a single block. Taking a snapshot seals the bytes
/// written since the previous snapshot into an immutable [`Bytes`] segment
/// and links it after the newest sealed segment; the unused tail of the
/// block stays writable. Segments are only ever appended to the chain, so a
/// snapshot is a handle to its first segment plus an offset and a length.
/// Taking one costs the same no matter how many segments are retained, and
/// later writes and discards never change what it reads.
///
/// When the block cannot hold a write, a new one is allocated with room for
/// twice the retained bytes plus the write. Older blocks are freed once the
/// store and every snapshot have let go of their segments.
///
/// # Example
///
/// ```
/// use giztoy_teebuf::{RingStore, Snapshot, Store};
///
/// let mut store = RingStore::new();
/// store.write(b"Hello World").unwrap();
///
/// let mut snap = store.snapshot();
/// store.discard(6);
/// store.write(b"!").unwrap();
///
/// let mut out = [0u8; 11];
/// assert_eq!(snap.read(&mut out), 11);
/// assert_eq!(&out, b"Hello World");
/// assert_eq!(store.len(), 6);
/// ```
#[derive(Debug, Default)]
pub struct RingStore {
    // Oldest segment holding retained bytes, and how much of it is discarded.
    head: Option<Arc<Segment>>,
    head_offset: usize,
    tail: Option<Arc<Segment>>,
    sealed: usize,
    block: BytesMut,
    block_size: usize,
}

/// A sealed run of bytes and the run sealed after it.
struct Segment {
    data: Bytes,
    next: OnceLock<Arc<Segment>>,
}

impl Segment {
    fn new(data: Bytes) -> Arc<Self> {
        Arc::new(Segment {
            data,
            next: OnceLock::new(),
        })
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.data.len())
            .field("linked", &self.next.get().is_some())
            .finish()
    }
}

impl Drop for Segment {
    // Unlinks the chain one segment at a time instead of recursing.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(seg) = next {
            match Arc::try_unwrap(seg) {
                Ok(mut seg) => next = seg.next.take(),
                Err(_) => break,
            }
        }
    }
}

impl RingStore {
    /// Creates an empty store. Nothing is allocated until the first write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose first block holds `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        RingStore {
            block: BytesMut::with_capacity(capacity),
            block_size: capacity,
            ..Self::default()
        }
    }

    /// Returns the retained bytes plus the free room in the current block.
    pub fn capacity(&self) -> usize {
        self.sealed + self.block.capacity()
    }

    fn spare(&self) -> usize {
        self.block.capacity() - self.block.len()
    }

    fn seal(&mut self) {
        if self.block.is_empty() {
            return;
        }
        let seg = Segment::new(self.block.split().freeze());
        self.sealed += seg.data.len();
        let prev = self.tail.replace(Arc::clone(&seg));
        match prev {
            Some(prev) if self.head.is_some() => {
                // `prev` is the chain's last segment, so its link is unset.
                let _ = prev.next.set(seg);
            }
            _ => {
                self.head = Some(seg);
                self.head_offset = 0;
            }
        }
    }

    fn grow(&mut self, n: usize) -> Result<()> {
        if self.spare() >= n {
            return Ok(());
        }
        let size = self
            .len()
            .checked_mul(2)
            .and_then(|size| size.checked_add(n))
            .filter(|&size| size <= isize::MAX as usize)
            .ok_or(BufferError::Alloc {
                requested: n,
                written: 0,
            })?
            .max(self.block_size);

        trace!(retained = self.len(), incoming = n, block = size, "ring store grow");
        self.seal();
        self.block = BytesMut::with_capacity(size);
        self.block_size = size;
        Ok(())
    }
}

impl Store for RingStore {
    type Snapshot = RingSnapshot;

    fn len(&self) -> usize {
        self.sealed + self.block.len()
    }

    fn write(&mut self, p: &[u8]) -> Result<usize> {
        if p.is_empty() {
            return Ok(0);
        }
        self.grow(p.len())?;
        self.block.extend_from_slice(p);
        Ok(p.len())
    }

    fn discard(&mut self, n: usize) -> usize {
        let mut left = n;
        while left > 0 {
            let Some(head) = &self.head else {
                // Only unsealed bytes remain.
                let k = left.min(self.block.len());
                self.block.advance(k);
                left -= k;
                break;
            };
            let avail = head.data.len() - self.head_offset;
            if avail <= left {
                let next = head.next.get().cloned();
                left -= avail;
                self.sealed -= avail;
                self.head = next;
                self.head_offset = 0;
                if self.head.is_none() {
                    self.tail = None;
                }
            } else {
                self.head_offset += left;
                self.sealed -= left;
                left = 0;
            }
        }
        n - left
    }

    fn snapshot(&mut self) -> RingSnapshot {
        self.seal();
        RingSnapshot {
            head: self.head.clone(),
            offset: self.head_offset,
            remaining: self.sealed,
        }
    }
}

/// Snapshot of a [`RingStore`].
///
/// Also usable through [`bytes::Buf`] and [`std::io::Read`].
#[derive(Debug, Clone, Default)]
pub struct RingSnapshot {
    head: Option<Arc<Segment>>,
    offset: usize,
    remaining: usize,
}

impl Snapshot for RingSnapshot {
    fn len(&self) -> usize {
        self.remaining
    }

    fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.remaining);
        self.advance(n);
        n
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining);
        self.copy_to_slice(&mut buf[..n]);
        n
    }

    fn read_at(&self, buf: &mut [u8], off: usize) -> usize {
        if off >= self.remaining {
            return 0;
        }
        let want = buf.len().min(self.remaining - off);
        let mut skip = self.offset + off;
        let mut copied = 0;
        let mut next = self.head.as_ref();
        while copied < want {
            let Some(seg) = next else {
                break;
            };
            if skip >= seg.data.len() {
                skip -= seg.data.len();
            } else {
                let src = &seg.data[skip..];
                skip = 0;
                let k = src.len().min(want - copied);
                buf[copied..copied + k].copy_from_slice(&src[..k]);
                copied += k;
            }
            next = seg.next.get();
        }
        copied
    }
}

impl Buf for RingSnapshot {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        match &self.head {
            Some(seg) if self.remaining > 0 => {
                let chunk = &seg.data[self.offset..];
                &chunk[..chunk.len().min(self.remaining)]
            }
            _ => &[],
        }
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(
            cnt <= self.remaining,
            "cannot advance past end: {} > {}",
            cnt,
            self.remaining
        );
        self.remaining -= cnt;
        while cnt > 0 {
            let Some(seg) = &self.head else {
                break;
            };
            let avail = seg.data.len() - self.offset;
            if avail <= cnt {
                let next = seg.next.get().cloned();
                cnt -= avail;
                self.head = next;
                self.offset = 0;
            } else {
                self.offset += cnt;
                cnt = 0;
            }
        }
    }
}

impl io::Read for RingSnapshot {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Snapshot::read(self, buf))
    }
}
