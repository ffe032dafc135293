use crate::METRICS_PREFIX;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Label for large buffer metrics, identifying the size class by its buffer size.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub(crate) struct SizeClassLabel {
    pub(crate) size_class: u64,
}

impl SizeClassLabel {
    pub(crate) const fn new(size: usize) -> Self {
        Self {
            size_class: size as u64,
        }
    }
}

/// Event counters for the pool.
///
/// Byte accounting lives in the pools themselves (see [crate::Stats]). These only count events.
pub(crate) struct Metrics {
    /// Blocks allocated because the small pool was empty.
    pub(crate) blocks_created: Counter,
    /// Returned blocks dropped because the small pool was at capacity.
    pub(crate) blocks_discarded: Counter,
    /// Large buffers allocated because their class was empty.
    pub(crate) large_buffers_created: Family<SizeClassLabel, Counter>,
    /// Returned large buffers dropped because their class was at capacity or they were too large
    /// to pool.
    pub(crate) large_buffers_discarded: Family<SizeClassLabel, Counter>,
    /// Large buffers allocated above the maximum buffer size.
    pub(crate) large_buffers_oversized: Counter,
    /// Streams handed out by the manager.
    pub(crate) streams_created: Counter,
    /// Streams dropped (and their buffers returned).
    pub(crate) streams_disposed: Counter,
    /// Streams whose contents were copied out into a new vector.
    pub(crate) streams_converted: Counter,
}

impl Metrics {
    pub(crate) fn new(registry: &mut Registry) -> Self {
        let metrics = Self {
            blocks_created: Counter::default(),
            blocks_discarded: Counter::default(),
            large_buffers_created: Family::default(),
            large_buffers_discarded: Family::default(),
            large_buffers_oversized: Counter::default(),
            streams_created: Counter::default(),
            streams_disposed: Counter::default(),
            streams_converted: Counter::default(),
        };

        let registry = registry.sub_registry_with_prefix(METRICS_PREFIX);
        registry.register(
            "blocks_created",
            "Number of blocks allocated because the small pool was empty",
            metrics.blocks_created.clone(),
        );
        registry.register(
            "blocks_discarded",
            "Number of returned blocks dropped because the small pool was full",
            metrics.blocks_discarded.clone(),
        );
        registry.register(
            "large_buffers_created",
            "Number of large buffers allocated because their size class was empty",
            metrics.large_buffers_created.clone(),
        );
        registry.register(
            "large_buffers_discarded",
            "Number of returned large buffers dropped because their size class was full or they were too large to pool",
            metrics.large_buffers_discarded.clone(),
        );
        registry.register(
            "large_buffers_oversized",
            "Number of large buffers allocated above the maximum buffer size",
            metrics.large_buffers_oversized.clone(),
        );
        registry.register(
            "streams_created",
            "Number of streams created",
            metrics.streams_created.clone(),
        );
        registry.register(
            "streams_disposed",
            "Number of streams dropped",
            metrics.streams_disposed.clone(),
        );
        registry.register(
            "streams_converted",
            "Number of streams copied into a vector",
            metrics.streams_converted.clone(),
        );

        metrics
    }
}
