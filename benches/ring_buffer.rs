//! Criterion benchmarks for the window ring hot paths.
//!
//! - Write throughput with and without eviction
//! - `read_next` for a reader that keeps up and one that is snapped forward
//! - Snapshot latency
//!
//! Run with: cargo bench --bench ring_buffer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rhx_stream::data::ring_buffer::{RingReader, WindowRing};
use rhx_stream::window::{ChannelBlock, Window};
use std::sync::Arc;
use std::thread;

/// A 100 ms window at 30 kHz with `channels` amplifier channels.
fn window(first_sample: u64, channels: usize) -> Window {
    let samples = 3000;
    let row: Vec<f64> = (0..samples).map(|i| i as f64).collect();
    let rows: Vec<&[f64]> = (0..channels).map(|_| row.as_slice()).collect();
    Window {
        first_sample,
        timestamps: row.iter().map(|i| i / 30_000.0).collect(),
        amplifier: ChannelBlock::from_rows(rows, samples).unwrap_or_else(|| ChannelBlock::empty(samples)),
        stimulation: ChannelBlock::empty(samples),
        stim_flags: ChannelBlock::empty(samples),
        digital_input: ChannelBlock::empty(samples),
    }
}

fn ring_write_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_ring_write");

    for capacity in [4usize, 20, 200] {
        let ring = WindowRing::new(capacity, 5);
        let shared = Arc::new(window(0, 32));

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("write_arc", capacity), &capacity, |b, _| {
            b.iter(|| ring.write_arc(black_box(shared.clone())));
        });
    }

    group.finish();
}

fn ring_read_next(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_ring_read");
    let shared = Arc::new(window(0, 32));

    // Reader one window behind the writer.
    group.bench_function("keeping_up", |b| {
        let ring = Arc::new(WindowRing::new(20, 5));
        let mut reader = RingReader::new(ring.clone());
        b.iter(|| {
            ring.write_arc(shared.clone());
            black_box(reader.read_next());
        });
    });

    // Reader snapped forward on every read.
    group.bench_function("catch_up", |b| {
        let ring = Arc::new(WindowRing::new(20, 5));
        let mut reader = RingReader::new(ring.clone());
        b.iter(|| {
            for _ in 0..10 {
                ring.write_arc(shared.clone());
            }
            black_box(reader.read_next());
        });
    });

    group.finish();
}

fn ring_snapshot(c: &mut Criterion) {
    let ring = WindowRing::new(20, 5);
    for n in 0..20 {
        ring.write(window(n * 3000, 8));
    }
    c.bench_function("window_ring_snapshot", |b| {
        b.iter(|| black_box(ring.snapshot()));
    });
}

/// One writer thread with several readers polling concurrently.
fn ring_concurrent_readers(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_ring_concurrent");
    let shared = Arc::new(window(0, 8));

    for readers in [1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("readers", readers), &readers, |b, &readers| {
            b.iter(|| {
                let ring = Arc::new(WindowRing::new(20, 5));
                let handles: Vec<_> = (0..readers)
                    .map(|_| {
                        let mut reader = RingReader::new(ring.clone());
                        thread::spawn(move || {
                            let mut seen = 0;
                            for _ in 0..200 {
                                if reader.read_next().is_some() {
                                    seen += 1;
                                }
                            }
                            seen
                        })
                    })
                    .collect();
                for _ in 0..100 {
                    ring.write_arc(shared.clone());
                }
                for handle in handles {
                    black_box(handle.join().unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    ring_write_throughput,
    ring_read_next,
    ring_snapshot,
    ring_concurrent_readers
);
criterion_main!(benches);
