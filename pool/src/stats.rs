/// A snapshot of a [crate::Manager]'s accounting.
///
/// Each field is read from independent atomic counters, and an acquire or return updates those
/// counters one at a time. A snapshot taken while other threads use the pool may therefore count
/// a buffer as neither free nor in use (or as both) for a moment. Treat it as diagnostic, not
/// authoritative.
///
/// Byte counts are signed: returning a malformed batch of blocks decrements the small in-use count
/// before the batch is rejected, which can leave it below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Bytes of blocks sitting in the small pool.
    pub small_pool_free_bytes: i64,
    /// Bytes of blocks owned by callers.
    pub small_pool_in_use_bytes: i64,
    /// Bytes of large buffers sitting in the large pools.
    pub large_pool_free_bytes: i64,
    /// Bytes of large buffers owned by callers, including unpooled oversized buffers.
    pub large_pool_in_use_bytes: i64,
    /// Number of blocks in the small pool.
    pub small_blocks_free: usize,
    /// Number of large buffers across all size classes.
    pub large_buffers_free: usize,
}
