use crate::Config;
use bytes::BytesMut;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicI64, Ordering};

/// Per-size-class state.
struct SizeClass {
    /// Buffers available for reuse. Every entry is exactly the class size.
    freelist: SegQueue<BytesMut>,
    /// Bytes sitting in `freelist`.
    free_bytes: AtomicI64,
}

/// Where an acquired large buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// Popped from the class free-list.
    Reused,
    /// Allocated because the class free-list was empty.
    Created,
    /// Allocated because the size exceeds the maximum buffer size.
    Oversized,
}

/// What happened to a returned large buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Pushed back onto its class free-list.
    Retained,
    /// Dropped because its class was at capacity.
    Discarded,
    /// Dropped because it exceeds the maximum buffer size.
    Oversized,
}

/// The set of large buffer free-lists, one per size class.
///
/// `classes[i]` holds buffers of `(i + 1) * large_buffer_multiple` bytes. `in_use_bytes` has one
/// more slot than `classes`: the last entry tracks buffers too large to pool.
pub(crate) struct LargePools {
    classes: Vec<SizeClass>,
    in_use_bytes: Vec<AtomicI64>,
}

impl LargePools {
    pub(crate) fn new(num_classes: usize) -> Self {
        let classes = (0..num_classes)
            .map(|_| SizeClass {
                freelist: SegQueue::new(),
                free_bytes: AtomicI64::new(0),
            })
            .collect();
        let in_use_bytes = (0..=num_classes).map(|_| AtomicI64::new(0)).collect();
        Self {
            classes,
            in_use_bytes,
        }
    }

    /// Index of the in-use slot reserved for unpooled buffers.
    pub(crate) fn overflow_index(&self) -> usize {
        self.classes.len()
    }

    /// Take a buffer of exactly `size` bytes (a positive multiple of the class granularity).
    ///
    /// Returns the buffer, the in-use slot it was charged to, and where it came from.
    pub(crate) fn acquire(&self, config: &Config, size: usize) -> (BytesMut, usize, Source) {
        let index = config.class_index(size);
        let (buffer, index, source) = match self.classes.get(index) {
            Some(class) => match class.freelist.pop() {
                Some(buffer) => {
                    class
                        .free_bytes
                        .fetch_sub(buffer.len() as i64, Ordering::Relaxed);
                    (buffer, index, Source::Reused)
                }
                None => (BytesMut::zeroed(size), index, Source::Created),
            },
            // Too large to pool, but still rounded to limit fragmentation.
            None => (
                BytesMut::zeroed(size),
                self.overflow_index(),
                Source::Oversized,
            ),
        };
        self.in_use_bytes[index].fetch_add(buffer.len() as i64, Ordering::Relaxed);
        (buffer, index, source)
    }

    /// Return a buffer whose length is a positive multiple of the class granularity.
    ///
    /// The buffer is retained only if its class would hold at most `cap` bytes afterwards
    /// (0 = unlimited). The count is read without reserving space, so concurrent releases may
    /// retain slightly more than `cap`.
    pub(crate) fn release(&self, config: &Config, buffer: BytesMut, cap: usize) -> Disposition {
        let len = buffer.len();
        let index = config.class_index(len);
        let (index, disposition) = match self.classes.get(index) {
            Some(class) => {
                let projected = class.freelist.len().saturating_add(1).saturating_mul(len);
                if cap == 0 || projected <= cap {
                    class.freelist.push(buffer);
                    class.free_bytes.fetch_add(len as i64, Ordering::Relaxed);
                    (index, Disposition::Retained)
                } else {
                    (index, Disposition::Discarded)
                }
            }
            None => (self.overflow_index(), Disposition::Oversized),
        };
        self.in_use_bytes[index].fetch_sub(len as i64, Ordering::Relaxed);
        disposition
    }

    pub(crate) fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Free bytes in class `index`.
    pub(crate) fn class_free_bytes(&self, index: usize) -> Option<i64> {
        self.classes
            .get(index)
            .map(|class| class.free_bytes.load(Ordering::Relaxed))
    }

    /// Number of buffers in the free-list of class `index`.
    pub(crate) fn class_free_count(&self, index: usize) -> Option<usize> {
        self.classes.get(index).map(|class| class.freelist.len())
    }

    /// In-use bytes charged to slot `index` (which may be the overflow slot).
    pub(crate) fn class_in_use_bytes(&self, index: usize) -> Option<i64> {
        self.in_use_bytes
            .get(index)
            .map(|bytes| bytes.load(Ordering::Relaxed))
    }

    pub(crate) fn free_bytes(&self) -> i64 {
        self.classes
            .iter()
            .map(|class| class.free_bytes.load(Ordering::Relaxed))
            .sum()
    }

    pub(crate) fn in_use_bytes(&self) -> i64 {
        self.in_use_bytes
            .iter()
            .map(|bytes| bytes.load(Ordering::Relaxed))
            .sum()
    }

    /// Number of buffers across all class free-lists.
    pub(crate) fn free_count(&self) -> usize {
        self.classes.iter().map(|class| class.freelist.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPLE: usize = 1024;

    fn test_config() -> Config {
        Config {
            block_size: 256,
            large_buffer_multiple: MULTIPLE,
            maximum_buffer_size: 4 * MULTIPLE,
            ..Config::default()
        }
    }

    #[test]
    fn test_in_use_has_overflow_slot() {
        let config = test_config();
        let pools = LargePools::new(config.num_classes());
        assert_eq!(pools.num_classes(), 4);
        assert_eq!(pools.in_use_bytes.len(), 5);
        assert_eq!(pools.overflow_index(), 4);
        assert_eq!(pools.class_free_bytes(4), None);
        assert_eq!(pools.class_in_use_bytes(4), Some(0));
        assert_eq!(pools.class_in_use_bytes(5), None);
    }

    #[test]
    fn test_acquire_release_class() {
        let config = test_config();
        let pools = LargePools::new(config.num_classes());

        let (buffer, index, source) = pools.acquire(&config, 2 * MULTIPLE);
        assert_eq!(buffer.len(), 2 * MULTIPLE);
        assert_eq!(index, 1);
        assert_eq!(source, Source::Created);
        assert_eq!(pools.class_in_use_bytes(1), Some(2 * MULTIPLE as i64));

        assert_eq!(pools.release(&config, buffer, 0), Disposition::Retained);
        assert_eq!(pools.class_in_use_bytes(1), Some(0));
        assert_eq!(pools.class_free_bytes(1), Some(2 * MULTIPLE as i64));
        assert_eq!(pools.class_free_count(1), Some(1));

        let (buffer, index, source) = pools.acquire(&config, 2 * MULTIPLE);
        assert_eq!(buffer.len(), 2 * MULTIPLE);
        assert_eq!(index, 1);
        assert_eq!(source, Source::Reused);
        assert_eq!(pools.class_free_bytes(1), Some(0));
        assert_eq!(pools.free_count(), 0);
    }

    #[test]
    fn test_oversized_never_pooled() {
        let config = test_config();
        let pools = LargePools::new(config.num_classes());

        let (buffer, index, source) = pools.acquire(&config, 6 * MULTIPLE);
        assert_eq!(buffer.len(), 6 * MULTIPLE);
        assert_eq!(index, pools.overflow_index());
        assert_eq!(source, Source::Oversized);
        assert_eq!(pools.in_use_bytes(), 6 * MULTIPLE as i64);

        assert_eq!(pools.release(&config, buffer, 0), Disposition::Oversized);
        assert_eq!(pools.in_use_bytes(), 0);
        assert_eq!(pools.free_bytes(), 0);
        assert_eq!(pools.free_count(), 0);
    }

    #[test]
    fn test_release_respects_cap() {
        let config = test_config();
        let pools = LargePools::new(config.num_classes());
        let buffers: Vec<_> = (0..3)
            .map(|_| pools.acquire(&config, MULTIPLE).0)
            .collect();

        let cap = 2 * MULTIPLE;
        let dispositions: Vec<_> = buffers
            .into_iter()
            .map(|buffer| pools.release(&config, buffer, cap))
            .collect();
        assert_eq!(
            dispositions,
            vec![
                Disposition::Retained,
                Disposition::Retained,
                Disposition::Discarded
            ]
        );
        assert_eq!(pools.class_free_count(0), Some(2));
        assert_eq!(pools.class_free_bytes(0), Some(cap as i64));
        assert_eq!(pools.class_in_use_bytes(0), Some(0));
    }
}
