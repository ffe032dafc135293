use crate::Error;

/// Default size of a small block (128KB).
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

/// Default granularity of large buffer size classes (1MB).
pub const DEFAULT_LARGE_BUFFER_MULTIPLE: usize = 1024 * 1024;

/// Default largest pooled buffer (128MB).
pub const DEFAULT_MAXIMUM_BUFFER_SIZE: usize = 128 * 1024 * 1024;

/// Configuration for a [crate::Manager].
///
/// The three sizes are fixed once the manager is constructed. The remaining fields only seed the
/// manager's policy knobs, which can be changed at runtime through the manager's setters.
///
/// # Size Classes
///
/// Large buffers are organized into `maximum_buffer_size / large_buffer_multiple` classes, where
/// class `i` holds buffers of exactly `(i + 1) * large_buffer_multiple` bytes. For example, with
/// `large_buffer_multiple = 1MB` and `maximum_buffer_size = 4MB`:
/// - Class 0: 1MB
/// - Class 1: 2MB
/// - Class 2: 3MB
/// - Class 3: 4MB
///
/// Requests larger than `maximum_buffer_size` are still rounded to a multiple but are never
/// pooled.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of every small block. Must be > 0.
    pub block_size: usize,
    /// Every large buffer is a multiple of this value. Must be > 0.
    pub large_buffer_multiple: usize,
    /// Buffers larger than this are not pooled. Must be a multiple of `large_buffer_multiple`
    /// and >= `block_size`.
    pub maximum_buffer_size: usize,
    /// Free bytes of small blocks to retain before dropping returned blocks (0 = unlimited).
    pub maximum_free_small_pool_bytes: usize,
    /// Free bytes of large buffers to retain per class before dropping returned buffers
    /// (0 = unlimited).
    pub maximum_free_large_pool_bytes: usize,
    /// Largest capacity a stream may grow to (0 = unlimited).
    pub maximum_stream_capacity: usize,
    /// Whether streams return outgrown large buffers immediately instead of holding them until
    /// they are dropped.
    pub aggressive_buffer_return: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            large_buffer_multiple: DEFAULT_LARGE_BUFFER_MULTIPLE,
            maximum_buffer_size: DEFAULT_MAXIMUM_BUFFER_SIZE,
            maximum_free_small_pool_bytes: 0,
            maximum_free_large_pool_bytes: 0,
            maximum_stream_capacity: 0,
            aggressive_buffer_return: false,
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidConfiguration] if:
    /// - `block_size` is 0
    /// - `large_buffer_multiple` is 0
    /// - `maximum_buffer_size < block_size`
    /// - `maximum_buffer_size` is not a multiple of `large_buffer_multiple`
    pub fn validate(&self) -> Result<(), Error> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfiguration("block_size must be positive"));
        }
        if self.large_buffer_multiple == 0 {
            return Err(Error::InvalidConfiguration(
                "large_buffer_multiple must be positive",
            ));
        }
        if self.maximum_buffer_size < self.block_size {
            return Err(Error::InvalidConfiguration(
                "maximum_buffer_size must be at least block_size",
            ));
        }
        if !self.is_large_multiple(self.maximum_buffer_size) {
            return Err(Error::InvalidConfiguration(
                "maximum_buffer_size must be a multiple of large_buffer_multiple",
            ));
        }
        Ok(())
    }

    /// Returns the number of pooled large size classes.
    pub const fn num_classes(&self) -> usize {
        self.maximum_buffer_size / self.large_buffer_multiple
    }

    /// Returns true if `value` is a strictly positive multiple of `large_buffer_multiple`.
    pub(crate) const fn is_large_multiple(&self, value: usize) -> bool {
        value != 0 && value % self.large_buffer_multiple == 0
    }

    /// Rounds `size` up to the next multiple of `large_buffer_multiple`.
    ///
    /// Returns `None` on overflow.
    pub(crate) fn round_up(&self, size: usize) -> Option<usize> {
        size.div_ceil(self.large_buffer_multiple)
            .checked_mul(self.large_buffer_multiple)
    }

    /// Returns the class index for a buffer of exactly `size` bytes, where `size` is a positive
    /// multiple of `large_buffer_multiple`.
    ///
    /// Indices at or beyond [Self::num_classes] denote buffers too large to pool.
    pub(crate) const fn class_index(&self, size: usize) -> usize {
        size / self.large_buffer_multiple - 1
    }
}
