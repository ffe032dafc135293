use bytes::BytesMut;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicI64, Ordering};

/// Free-list of fixed-size blocks and its byte accounting.
///
/// The free-list is unbounded; how much it retains is decided by the caller through the cap
/// passed to [SmallPool::release].
pub(crate) struct SmallPool {
    /// Size of every block.
    block_size: usize,
    /// Blocks available for reuse. Every entry is exactly `block_size` long.
    freelist: SegQueue<BytesMut>,
    /// Bytes sitting in `freelist`.
    free_bytes: AtomicI64,
    /// Bytes handed out to callers and not yet returned.
    ///
    /// Signed because [SmallPool::unaccount] runs before a batch is validated, so a malformed
    /// batch can leave this understated (even negative).
    in_use_bytes: AtomicI64,
}

/// Outcome of [SmallPool::release].
pub(crate) struct Released {
    /// Blocks pushed back onto the free-list.
    pub(crate) retained: usize,
    /// Blocks dropped because the free-list reached its cap.
    pub(crate) discarded: usize,
}

impl SmallPool {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            block_size,
            freelist: SegQueue::new(),
            free_bytes: AtomicI64::new(0),
            in_use_bytes: AtomicI64::new(0),
        }
    }

    /// Take a block from the free-list, or allocate a zeroed one.
    ///
    /// Returns the block and whether it was freshly allocated.
    pub(crate) fn acquire(&self) -> (BytesMut, bool) {
        let (block, created) = match self.freelist.pop() {
            Some(block) => {
                self.free_bytes
                    .fetch_sub(self.block_size as i64, Ordering::Relaxed);
                (block, false)
            }
            None => (BytesMut::zeroed(self.block_size), true),
        };
        self.in_use_bytes
            .fetch_add(self.block_size as i64, Ordering::Relaxed);
        (block, created)
    }

    /// Remove `count` blocks from the in-use tally.
    pub(crate) fn unaccount(&self, count: usize) {
        let bytes = count.saturating_mul(self.block_size);
        self.in_use_bytes
            .fetch_sub(i64::try_from(bytes).unwrap_or(i64::MAX), Ordering::Relaxed);
    }

    /// Returns the index of the first block whose length is not `block_size`, if any.
    pub(crate) fn find_invalid(&self, blocks: &[BytesMut]) -> Option<usize> {
        blocks.iter().position(|block| block.len() != self.block_size)
    }

    /// Push validated blocks back onto the free-list, in order, until free bytes reach `cap`
    /// (0 = unlimited). Blocks after that point are dropped.
    ///
    /// The cap check reads the free counter without reserving space, so concurrent releases may
    /// retain slightly more than `cap`.
    pub(crate) fn release(&self, blocks: Vec<BytesMut>, cap: usize) -> Released {
        let total = blocks.len();
        let mut retained = 0;
        for block in blocks {
            if cap != 0 && i64::try_from(cap).is_ok_and(|cap| self.free_bytes() >= cap) {
                break;
            }
            self.free_bytes
                .fetch_add(self.block_size as i64, Ordering::Relaxed);
            self.freelist.push(block);
            retained += 1;
        }
        Released {
            retained,
            discarded: total - retained,
        }
    }

    pub(crate) fn free_bytes(&self) -> i64 {
        self.free_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn in_use_bytes(&self) -> i64 {
        self.in_use_bytes.load(Ordering::Relaxed)
    }

    /// Number of blocks in the free-list.
    pub(crate) fn free_count(&self) -> usize {
        self.freelist.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 1024;

    #[test]
    fn test_acquire_miss_then_hit() {
        let pool = SmallPool::new(BLOCK);

        let (block, created) = pool.acquire();
        assert!(created);
        assert_eq!(block.len(), BLOCK);
        assert!(block.iter().all(|&b| b == 0));
        assert_eq!(pool.in_use_bytes(), BLOCK as i64);
        assert_eq!(pool.free_bytes(), 0);

        pool.unaccount(1);
        let released = pool.release(vec![block], 0);
        assert_eq!(released.retained, 1);
        assert_eq!(pool.free_bytes(), BLOCK as i64);
        assert_eq!(pool.in_use_bytes(), 0);
        assert_eq!(pool.free_count(), 1);

        let (block, created) = pool.acquire();
        assert!(!created);
        assert_eq!(block.len(), BLOCK);
        assert_eq!(pool.free_bytes(), 0);
        assert_eq!(pool.in_use_bytes(), BLOCK as i64);
    }

    #[test]
    fn test_release_stops_at_cap() {
        let pool = SmallPool::new(BLOCK);
        let blocks: Vec<_> = (0..5).map(|_| pool.acquire().0).collect();
        pool.unaccount(blocks.len());

        // Cap of 2.5 blocks: the check is "free < cap", so a third block is still admitted.
        let released = pool.release(blocks, BLOCK * 5 / 2);
        assert_eq!(released.retained, 3);
        assert_eq!(released.discarded, 2);
        assert_eq!(pool.free_count(), 3);
        assert_eq!(pool.free_bytes(), 3 * BLOCK as i64);
    }

    #[test]
    fn test_release_cap_beyond_counter_range() {
        let pool = SmallPool::new(BLOCK);
        let blocks: Vec<_> = (0..2).map(|_| pool.acquire().0).collect();
        pool.unaccount(blocks.len());

        let released = pool.release(blocks, usize::MAX);
        assert_eq!(released.retained, 2);
        assert_eq!(released.discarded, 0);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_find_invalid() {
        let pool = SmallPool::new(BLOCK);
        let blocks = vec![
            BytesMut::zeroed(BLOCK),
            BytesMut::zeroed(BLOCK - 1),
            BytesMut::zeroed(BLOCK),
        ];
        assert_eq!(pool.find_invalid(&blocks), Some(1));
        assert_eq!(pool.find_invalid(&blocks[..1]), None);
        assert_eq!(pool.find_invalid(&[]), None);
    }
}
