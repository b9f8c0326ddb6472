//! STAMP interning and resolution benchmarks
//!
//! - intern: repeated and fresh committed tuples, uncommitted tuples
//! - resolve: latest version among N versions, own path and via an origin

use chronicle::{
    MemoryBackingStore, PathRegistry, StampFilter, StampInterner, StampPosition, StampPrecedence, StampResolver,
    Status, StatusSet, VersionBlock,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const AUTHOR: i32 = -1;
const MODULE: i32 = -2;
const MAIN: i32 = -3;
const DEV: i32 = -4;

fn bench_intern(c: &mut Criterion) {
    let mut group = c.benchmark_group("intern");
    group.throughput(Throughput::Elements(1));

    let interner = StampInterner::new();
    interner
        .stamp_sequence(Status::Active, 1, AUTHOR, MODULE, MAIN)
        .unwrap();
    group.bench_function("existing", |b| {
        b.iter(|| {
            interner
                .stamp_sequence(Status::Active, black_box(1), AUTHOR, MODULE, MAIN)
                .unwrap()
        })
    });

    let fresh = StampInterner::new();
    let time = AtomicI64::new(0);
    group.bench_function("fresh", |b| {
        b.iter(|| {
            let t = time.fetch_add(1, Ordering::Relaxed);
            fresh
                .stamp_sequence(Status::Active, t, AUTHOR, MODULE, MAIN)
                .unwrap()
        })
    });

    let pending = StampInterner::new();
    group.bench_function("uncommitted", |b| {
        b.iter(|| {
            pending
                .stamp_sequence(Status::Active, chronicle::UNCOMMITTED_TIME, AUTHOR, MODULE, MAIN)
                .unwrap()
        })
    });
    group.finish();
}

fn setup(versions: usize) -> (StampResolver, Vec<VersionBlock>) {
    let stamps = Arc::new(StampInterner::new());
    let paths = Arc::new(PathRegistry::open(Arc::new(MemoryBackingStore::new())).unwrap());
    paths.add_origin(DEV, StampPosition::new(MAIN, versions as i64 / 2)).unwrap();
    let blocks = (0..versions)
        .map(|i| {
            let status = if i % 3 == 0 { Status::Inactive } else { Status::Active };
            let path = if i % 2 == 0 { MAIN } else { DEV };
            let sequence = stamps
                .stamp_sequence(status, i as i64, AUTHOR, MODULE, path)
                .unwrap();
            VersionBlock::new(sequence, Vec::new())
        })
        .collect();
    (StampResolver::new(stamps, paths), blocks)
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for versions in [4usize, 64, 1024] {
        let (resolver, blocks) = setup(versions);
        let on_main = StampFilter::new(StatusSet::ACTIVE_ONLY, StampPosition::latest(MAIN));
        let on_dev = StampFilter::new(StatusSet::ACTIVE_ONLY, StampPosition::latest(DEV));
        let by_time = on_dev.with_precedence(StampPrecedence::Time);

        group.throughput(Throughput::Elements(versions as u64));
        group.bench_with_input(BenchmarkId::new("path_main", versions), &blocks, |b, blocks| {
            b.iter(|| resolver.latest(black_box(blocks), &on_main).is_some())
        });
        group.bench_with_input(BenchmarkId::new("path_dev", versions), &blocks, |b, blocks| {
            b.iter(|| resolver.latest(black_box(blocks), &on_dev).is_some())
        });
        group.bench_with_input(BenchmarkId::new("time_dev", versions), &blocks, |b, blocks| {
            b.iter(|| resolver.latest(black_box(blocks), &by_time).is_some())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_intern, bench_resolve);
criterion_main!(benches);
