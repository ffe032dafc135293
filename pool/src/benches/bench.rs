use prometheus_client::registry::Registry;
use recycle_pool::{Config, Manager};

mod acquire_return;

criterion::criterion_main!(acquire_return::benches, stream_write::benches);

/// Block size used by the benchmarks (a "prod sized" 128KB).
const BLOCK_SIZE: usize = 128 * 1024;

/// Large buffer granularity used by the benchmarks.
const LARGE_BUFFER_MULTIPLE: usize = 1024 * 1024;

/// Create a manager with the benchmark sizes and a 16MB maximum buffer.
fn manager() -> Manager {
    let mut registry = Registry::default();
    let config = Config {
        block_size: BLOCK_SIZE,
        large_buffer_multiple: LARGE_BUFFER_MULTIPLE,
        maximum_buffer_size: 16 * LARGE_BUFFER_MULTIPLE,
        ..Config::default()
    };
    Manager::new(config, &mut registry).unwrap()
}
