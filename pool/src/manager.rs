use crate::{
    large::{Disposition, LargePools, Source},
    metrics::{Metrics, SizeClassLabel},
    small::SmallPool,
    Config, Error, RecyclableStream, Stats,
};
use bytes::BytesMut;
use prometheus_client::registry::Registry;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use tracing::{debug, trace};

/// Internal state of the manager.
pub(crate) struct Inner {
    config: Config,
    small: SmallPool,
    large: LargePools,
    maximum_free_small_pool_bytes: AtomicUsize,
    maximum_free_large_pool_bytes: AtomicUsize,
    maximum_stream_capacity: AtomicUsize,
    aggressive_buffer_return: AtomicBool,
    next_stream_id: AtomicU64,
    metrics: Metrics,
}

/// A pool of recyclable blocks and large buffers.
///
/// The manager is a handle: clones share the same pools, counters, and policy. Pass it to
/// whatever needs buffers rather than storing it in a global, so independently configured pools
/// can coexist (and tests cannot contaminate each other).
///
/// # Thread Safety
///
/// [Manager] is `Send + Sync`. Acquiring and returning never block: free-lists are lock-free
/// queues ([crossbeam_queue::SegQueue]) and byte accounting uses independent atomic counters.
///
/// # Ownership
///
/// Acquired buffers are moved to the caller and moved back on return. A buffer must be returned
/// at most once and must keep its original length; the manager rejects buffers whose length does
/// not match their class but cannot detect a buffer that was returned to two different pools.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.inner.config)
            .field("num_classes", &self.inner.large.num_classes())
            .finish()
    }
}

impl Manager {
    /// Creates a new manager with the given configuration, registering its metrics with
    /// `registry`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidConfiguration] if the configuration is invalid (see
    /// [Config::validate]). Nothing is registered in that case.
    pub fn new(config: Config, registry: &mut Registry) -> Result<Self, Error> {
        config.validate()?;

        let metrics = Metrics::new(registry);
        let small = SmallPool::new(config.block_size);
        let large = LargePools::new(config.num_classes());
        debug!(
            block_size = config.block_size,
            large_buffer_multiple = config.large_buffer_multiple,
            maximum_buffer_size = config.maximum_buffer_size,
            num_classes = config.num_classes(),
            "created buffer manager"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                maximum_free_small_pool_bytes: AtomicUsize::new(
                    config.maximum_free_small_pool_bytes,
                ),
                maximum_free_large_pool_bytes: AtomicUsize::new(
                    config.maximum_free_large_pool_bytes,
                ),
                maximum_stream_capacity: AtomicUsize::new(config.maximum_stream_capacity),
                aggressive_buffer_return: AtomicBool::new(config.aggressive_buffer_return),
                next_stream_id: AtomicU64::new(0),
                config,
                small,
                large,
                metrics,
            }),
        })
    }

    /// Returns the configuration the manager was created with.
    ///
    /// Policy fields reflect their initial values; use the getters below for current values.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Size of every block.
    pub fn block_size(&self) -> usize {
        self.inner.config.block_size
    }

    /// Every large buffer is a multiple of this value.
    pub fn large_buffer_multiple(&self) -> usize {
        self.inner.config.large_buffer_multiple
    }

    /// Buffers larger than this are not pooled.
    pub fn maximum_buffer_size(&self) -> usize {
        self.inner.config.maximum_buffer_size
    }

    /// Number of pooled large size classes.
    pub fn number_of_large_classes(&self) -> usize {
        self.inner.large.num_classes()
    }

    /// Free bytes of small blocks to retain before dropping returned blocks (0 = unlimited).
    pub fn maximum_free_small_pool_bytes(&self) -> usize {
        self.inner
            .maximum_free_small_pool_bytes
            .load(Ordering::Relaxed)
    }

    /// Sets the small pool cap. Lowering it does not evict blocks already in the pool.
    pub fn set_maximum_free_small_pool_bytes(&self, bytes: usize) {
        self.inner
            .maximum_free_small_pool_bytes
            .store(bytes, Ordering::Relaxed);
    }

    /// Free bytes to retain per large size class before dropping returned buffers
    /// (0 = unlimited).
    pub fn maximum_free_large_pool_bytes(&self) -> usize {
        self.inner
            .maximum_free_large_pool_bytes
            .load(Ordering::Relaxed)
    }

    /// Sets the large pool cap. Lowering it does not evict buffers already in the pool.
    pub fn set_maximum_free_large_pool_bytes(&self, bytes: usize) {
        self.inner
            .maximum_free_large_pool_bytes
            .store(bytes, Ordering::Relaxed);
    }

    /// Largest capacity a stream may grow to (0 = unlimited).
    pub fn maximum_stream_capacity(&self) -> usize {
        self.inner.maximum_stream_capacity.load(Ordering::Relaxed)
    }

    /// Sets the stream capacity limit. Streams that already exceed it keep their buffers but
    /// cannot grow further.
    pub fn set_maximum_stream_capacity(&self, bytes: usize) {
        self.inner
            .maximum_stream_capacity
            .store(bytes, Ordering::Relaxed);
    }

    /// Whether streams return outgrown large buffers immediately.
    ///
    /// When disabled, a stream holds every large buffer it outgrew until it is dropped, so slices
    /// previously obtained from [RecyclableStream::get_buffer] are never handed to someone else
    /// while the stream lives.
    pub fn aggressive_buffer_return(&self) -> bool {
        self.inner.aggressive_buffer_return.load(Ordering::Relaxed)
    }

    /// Enables or disables aggressive buffer return.
    pub fn set_aggressive_buffer_return(&self, enabled: bool) {
        self.inner
            .aggressive_buffer_return
            .store(enabled, Ordering::Relaxed);
    }

    /// Takes a block from the small pool, or allocates a zeroed one if the pool is empty.
    ///
    /// The block is exactly [Self::block_size] bytes long.
    pub fn acquire_block(&self) -> BytesMut {
        let (block, created) = self.inner.small.acquire();
        if created {
            self.inner.metrics.blocks_created.inc();
            trace!(size = block.len(), "allocated block");
        }
        block
    }

    /// Returns a buffer of at least `required_size` bytes from the large pool.
    ///
    /// The length is `required_size` rounded up to the next multiple of
    /// [Self::large_buffer_multiple]. If that exceeds [Self::maximum_buffer_size], a fresh
    /// buffer of the rounded size is allocated and will not be pooled when returned.
    ///
    /// `tag` identifies the requester in logs only.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidArgument] if `required_size` is 0 or cannot be rounded without
    /// overflow.
    pub fn acquire_large_buffer(&self, required_size: usize, tag: &str) -> Result<BytesMut, Error> {
        if required_size == 0 {
            return Err(Error::InvalidArgument("required_size must be positive"));
        }
        let size = self
            .inner
            .config
            .round_up(required_size)
            .ok_or(Error::InvalidArgument("required_size is too large to round"))?;

        let (buffer, class, source) = self.inner.large.acquire(&self.inner.config, size);
        match source {
            Source::Reused => {}
            Source::Created => {
                self.inner
                    .metrics
                    .large_buffers_created
                    .get_or_create(&SizeClassLabel::new(size))
                    .inc();
                trace!(tag, size, class, "allocated large buffer");
            }
            Source::Oversized => {
                self.inner.metrics.large_buffers_oversized.inc();
                debug!(
                    tag,
                    size,
                    maximum = self.maximum_buffer_size(),
                    "allocated unpooled large buffer"
                );
            }
        }
        Ok(buffer)
    }

    /// Returns a large buffer to the pool.
    ///
    /// The buffer is retained if its size class would hold at most
    /// [Self::maximum_free_large_pool_bytes] afterwards (or the cap is 0). Otherwise, or if it is
    /// larger than [Self::maximum_buffer_size], it is dropped.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidBuffer] if the buffer's length is not a positive multiple of
    /// [Self::large_buffer_multiple] (it did not come from this manager). Accounting is left
    /// untouched in that case.
    pub fn return_large_buffer(&self, buffer: BytesMut, tag: &str) -> Result<(), Error> {
        let size = buffer.len();
        if !self.inner.config.is_large_multiple(size) {
            return Err(Error::InvalidBuffer(
                "length is not a multiple of large_buffer_multiple",
            ));
        }

        let cap = self.maximum_free_large_pool_bytes();
        let disposition = self.inner.large.release(&self.inner.config, buffer, cap);
        match disposition {
            Disposition::Retained => return Ok(()),
            Disposition::Discarded => {
                debug!(tag, size, cap, "discarded large buffer: size class full");
            }
            Disposition::Oversized => {
                debug!(tag, size, "discarded large buffer: too large to pool");
            }
        }
        self.inner
            .metrics
            .large_buffers_discarded
            .get_or_create(&SizeClassLabel::new(size))
            .inc();
        Ok(())
    }

    /// Returns blocks to the small pool.
    ///
    /// Blocks are pushed in order while the pool holds less than
    /// [Self::maximum_free_small_pool_bytes] (or the cap is 0). Once the cap is reached, the
    /// remaining blocks are dropped.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidBuffer] if any block is not exactly [Self::block_size] bytes. No
    /// block is pooled in that case, but the in-use count has already been reduced by the size of
    /// the whole batch and is not restored: callers must only return blocks they acquired.
    pub fn return_blocks(&self, blocks: Vec<BytesMut>, tag: &str) -> Result<(), Error> {
        self.inner.small.unaccount(blocks.len());
        if let Some(index) = self.inner.small.find_invalid(&blocks) {
            debug!(
                tag,
                index,
                size = blocks[index].len(),
                "rejected block batch"
            );
            return Err(Error::InvalidBuffer("length does not match block_size"));
        }

        let cap = self.maximum_free_small_pool_bytes();
        let released = self.inner.small.release(blocks, cap);
        if released.discarded > 0 {
            self.inner
                .metrics
                .blocks_discarded
                .inc_by(released.discarded as u64);
            debug!(
                tag,
                retained = released.retained,
                discarded = released.discarded,
                cap,
                "discarded blocks: small pool full"
            );
        }
        Ok(())
    }

    /// Bytes of blocks sitting in the small pool.
    pub fn small_pool_free_bytes(&self) -> i64 {
        self.inner.small.free_bytes()
    }

    /// Bytes of blocks owned by callers.
    pub fn small_pool_in_use_bytes(&self) -> i64 {
        self.inner.small.in_use_bytes()
    }

    /// Bytes of large buffers sitting in the large pools.
    pub fn large_pool_free_bytes(&self) -> i64 {
        self.inner.large.free_bytes()
    }

    /// Bytes of large buffers owned by callers, including unpooled oversized buffers.
    pub fn large_pool_in_use_bytes(&self) -> i64 {
        self.inner.large.in_use_bytes()
    }

    /// Number of blocks in the small pool.
    pub fn small_blocks_free(&self) -> usize {
        self.inner.small.free_count()
    }

    /// Number of large buffers across all size classes.
    pub fn large_buffers_free(&self) -> usize {
        self.inner.large.free_count()
    }

    /// Free bytes in size class `index`, or `None` if there is no such class.
    pub fn large_class_free_bytes(&self, index: usize) -> Option<i64> {
        self.inner.large.class_free_bytes(index)
    }

    /// Number of buffers in size class `index`, or `None` if there is no such class.
    pub fn large_class_buffers_free(&self, index: usize) -> Option<usize> {
        self.inner.large.class_free_count(index)
    }

    /// In-use bytes charged to size class `index`.
    ///
    /// Index [Self::number_of_large_classes] is the slot for buffers too large to pool.
    pub fn large_class_in_use_bytes(&self, index: usize) -> Option<i64> {
        self.inner.large.class_in_use_bytes(index)
    }

    /// Returns a snapshot of all aggregate counters.
    pub fn stats(&self) -> Stats {
        Stats {
            small_pool_free_bytes: self.small_pool_free_bytes(),
            small_pool_in_use_bytes: self.small_pool_in_use_bytes(),
            large_pool_free_bytes: self.large_pool_free_bytes(),
            large_pool_in_use_bytes: self.large_pool_in_use_bytes(),
            small_blocks_free: self.small_blocks_free(),
            large_buffers_free: self.large_buffers_free(),
        }
    }

    /// Returns an empty stream with no tag.
    pub fn get_stream(&self) -> RecyclableStream {
        self.get_stream_tagged("")
    }

    /// Returns an empty stream with the given tag.
    pub fn get_stream_tagged(&self, tag: &str) -> RecyclableStream {
        RecyclableStream::new(self.clone(), tag, 0)
    }

    /// Returns an empty stream that expects to hold at least `required_size` bytes.
    ///
    /// Blocks are acquired when the stream first grows, not here.
    ///
    /// # Errors
    ///
    /// Returns [Error::CapacityExceeded] if `required_size` exceeds
    /// [Self::maximum_stream_capacity].
    pub fn get_stream_with_capacity(
        &self,
        tag: &str,
        required_size: usize,
    ) -> Result<RecyclableStream, Error> {
        self.check_stream_capacity(required_size)?;
        Ok(RecyclableStream::new(self.clone(), tag, required_size))
    }

    /// Returns an empty stream of at least `required_size` bytes, backed by a single large
    /// buffer when `contiguous` is set and `required_size` exceeds [Self::block_size].
    ///
    /// Use this when the size is known up front and the contents will be consumed through
    /// [RecyclableStream::get_buffer], to avoid copying a chain of blocks into a large buffer
    /// later.
    ///
    /// # Errors
    ///
    /// Returns [Error::CapacityExceeded] if `required_size` exceeds
    /// [Self::maximum_stream_capacity].
    pub fn get_stream_contiguous(
        &self,
        tag: &str,
        required_size: usize,
        contiguous: bool,
    ) -> Result<RecyclableStream, Error> {
        if !contiguous || required_size <= self.block_size() {
            return self.get_stream_with_capacity(tag, required_size);
        }
        self.check_stream_capacity(required_size)?;
        let buffer = self.acquire_large_buffer(required_size, tag)?;
        Ok(RecyclableStream::with_buffer(self.clone(), tag, buffer))
    }

    /// Returns a stream holding a copy of `source[offset..offset + count]`, positioned at the
    /// start.
    ///
    /// `source` is not retained.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidArgument] if the range is out of bounds, or
    /// [Error::CapacityExceeded] if `count` exceeds [Self::maximum_stream_capacity].
    pub fn get_stream_from(
        &self,
        tag: &str,
        source: &[u8],
        offset: usize,
        count: usize,
    ) -> Result<RecyclableStream, Error> {
        let data = offset
            .checked_add(count)
            .and_then(|end| source.get(offset..end))
            .ok_or(Error::InvalidArgument("range exceeds source length"))?;
        let mut stream = self.get_stream_with_capacity(tag, count)?;
        stream.write_slice(data)?;
        stream.set_position(0);
        Ok(stream)
    }

    /// Ensures `capacity` is allowed by [Self::maximum_stream_capacity].
    pub(crate) fn check_stream_capacity(&self, capacity: usize) -> Result<(), Error> {
        let maximum = self.maximum_stream_capacity();
        if maximum != 0 && capacity > maximum {
            return Err(Error::CapacityExceeded {
                requested: capacity,
                maximum,
            });
        }
        Ok(())
    }

    /// Assigns the next diagnostic stream id.
    pub(crate) fn next_stream_id(&self) -> u64 {
        self.inner.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }
}
