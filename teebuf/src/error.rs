//! Error types for buffer operations.

use std::io;

use thiserror::Error;

/// Buffer operation error.
///
/// Reaching the end of the stream is not an error: readers report it as a
/// zero-length read, the same way [`std::io::Read`] does.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer was closed before or while writing.
    ///
    /// `written` counts the bytes accepted before the close was observed.
    /// It is non-zero only for a capped write that was blocked waiting for
    /// readers to free space.
    #[error("teebuf: write after close ({written} bytes accepted)")]
    Closed { written: usize },

    /// The backing store could not grow to hold the write.
    ///
    /// `requested` is the size of the slice the store refused; `written`
    /// counts the bytes of the same write accepted before it.
    #[error("teebuf: cannot allocate {requested} bytes ({written} bytes accepted)")]
    Alloc { requested: usize, written: usize },
}

impl BufferError {
    /// Returns true if this error was caused by a closed buffer.
    pub fn is_closed(&self) -> bool {
        matches!(self, BufferError::Closed { .. })
    }

    /// Returns the number of bytes accepted before the write failed.
    pub fn written(&self) -> usize {
        match *self {
            BufferError::Closed { written } | BufferError::Alloc { written, .. } => written,
        }
    }

    pub(crate) fn with_written(self, written: usize) -> Self {
        match self {
            BufferError::Closed { .. } => BufferError::Closed { written },
            BufferError::Alloc { requested, .. } => BufferError::Alloc { requested, written },
        }
    }
}

impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> Self {
        let kind = match err {
            BufferError::Closed { .. } => io::ErrorKind::BrokenPipe,
            BufferError::Alloc { .. } => io::ErrorKind::OutOfMemory,
        };
        io::Error::new(kind, err)
    }
}

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_error_display() {
        let err = BufferError::Closed { written: 0 };
        assert_eq!(format!("{}", err), "teebuf: write after close (0 bytes accepted)");

        let err = BufferError::Alloc {
            requested: 42,
            written: 7,
        };
        assert_eq!(
            format!("{}", err),
            "teebuf: cannot allocate 42 bytes (7 bytes accepted)"
        );
    }

    #[test]
    fn test_is_closed() {
        assert!(BufferError::Closed { written: 3 }.is_closed());
        assert!(
            !BufferError::Alloc {
                requested: 1,
                written: 0
            }
            .is_closed()
        );
    }

    #[test]
    fn test_written() {
        assert_eq!(BufferError::Closed { written: 3 }.written(), 3);
        let err = BufferError::Alloc {
            requested: 8,
            written: 0,
        }
        .with_written(5);
        assert_eq!(
            err,
            BufferError::Alloc {
                requested: 8,
                written: 5
            }
        );
        assert_eq!(err.written(), 5);
    }

    #[test]
    fn test_into_io_error() {
        let err: io::Error = BufferError::Closed { written: 0 }.into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let err: io::Error = BufferError::Alloc {
            requested: usize::MAX,
            written: 0,
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
    }
}
