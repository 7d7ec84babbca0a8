//! Buffer configuration.

use serde::{Deserialize, Serialize};

/// Construction options for a [`Buffer`](crate::Buffer).
///
/// Missing fields take their default when deserialized, so a config file
/// only needs to name what it changes.
///
/// ```
/// use giztoy_teebuf::{Buffer, BufferConfig};
///
/// let buf = Buffer::with_config(BufferConfig::new().capacity(4096).initial_size(1024));
/// assert_eq!(buf.capacity_limit(), Some(4096));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of unread bytes retained. 0 means unbounded.
    pub capacity: usize,
    /// Size of the first storage block allocated.
    pub initial_size: usize,
}

impl BufferConfig {
    /// Creates an unbounded config with no pre-allocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retained-bytes bound. 0 removes the bound.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the size of the first storage block.
    pub fn initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }
}
