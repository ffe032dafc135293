use super::{manager, LARGE_BUFFER_MULTIPLE};
use criterion::{criterion_group, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn bench_blocks(c: &mut Criterion) {
    for batch in [1, 8, 64] {
        let manager = manager();
        c.bench_function(&format!("{}/blocks batch={}", module_path!(), batch), |b| {
            b.iter(|| {
                let blocks: Vec<_> = (0..batch).map(|_| manager.acquire_block()).collect();
                manager.return_blocks(blocks, "bench").unwrap();
            });
        });
    }
}

fn bench_large(c: &mut Criterion) {
    let manager = manager();
    c.bench_function(&format!("{}/large random", module_path!()), |b| {
        let mut rng = StdRng::seed_from_u64(0);
        b.iter(|| {
            let size = rng.gen_range(1..=8 * LARGE_BUFFER_MULTIPLE);
            let buffer = manager.acquire_large_buffer(size, "bench").unwrap();
            manager.return_large_buffer(buffer, "bench").unwrap();
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_blocks, bench_large,
}
