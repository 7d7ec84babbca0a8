//! Append-only byte buffer broadcast to many independent readers.
//!
//! One writer appends bytes to a [`Buffer`]; any number of [`Reader`]s read
//! them, each at its own pace. The bytes are stored once, not once per
//! reader, and are evicted as soon as every open reader has read past them.
//! A slow reader never blocks a fast one, and readers may join or leave at
//! any time.
//!
//! # Example
//!
//! ```
//! use giztoy_teebuf::Buffer;
//! use std::io::Read;
//!
//! let buf = Buffer::new();
//! let r1 = buf.next_reader();
//! let r2 = buf.next_reader();
//!
//! buf.write(b"Hello World\n").unwrap();
//! buf.close();
//!
//! let mut a = String::new();
//! (&r1).read_to_string(&mut a).unwrap();
//! let mut b = String::new();
//! (&r2).read_to_string(&mut b).unwrap();
//! assert_eq!(a, "Hello World\n");
//! assert_eq!(b, "Hello World\n");
//! ```
//!
//! # Joining Late
//!
//! - [`Buffer::next_reader`] starts at the oldest byte still retained.
//!   Bytes every earlier reader already consumed have been evicted and are
//!   not replayed.
//! - [`Buffer::next_reader_from_now`] skips everything retained and only
//!   sees later writes.
//!
//! # Closing
//!
//! - [`Buffer::close`] fails later writes and releases blocked writers.
//!   Readers drain what is left, then read 0 bytes (end of data).
//! - [`Reader::close`] releases the reader's hold on the buffer and
//!   unblocks a read waiting on it. Dropping the last clone of a reader
//!   closes it too. [`Buffer::on_last_reader_close`] runs a callback when
//!   the last open reader goes away.
//!
//! # Back-Pressure
//!
//! [`Buffer::capped`] bounds the number of unread bytes. Writes block until
//! the slowest reader catches up, or until the buffer is closed.
//!
//! # Storage
//!
//! Bytes live in a [`Store`]. The default [`RingStore`] keeps them in
//! memory; [`Buffer::with_store`] accepts any other implementation of the
//! [`Store`] and [`Snapshot`] contract.
//!
//! # Thread Safety
//!
//! [`Buffer`] and [`Reader`] are `Send + Sync` and cheap to clone. Buffer
//! clones share one buffer; reader clones share one read position.

mod buffer;
mod config;
mod error;
mod heap;
mod reader;
mod ring;
mod store;

pub use buffer::Buffer;
pub use config::BufferConfig;
pub use error::{BufferError, Result};
pub use reader::Reader;
pub use ring::{RingSnapshot, RingStore};
pub use store::{Snapshot, Store};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Buffer>();
        assert_send_sync::<Reader>();
        assert_send_sync::<RingStore>();
        assert_send_sync::<RingSnapshot>();
    }

    #[test]
    fn test_handles_are_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Buffer>();
        assert_clone::<Reader>();
    }
}
