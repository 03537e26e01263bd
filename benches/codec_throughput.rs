//! Benchmarks for the per-event wire codec
//!
//! Measures both encodings over a detector-style record at several hit
//! occupancies:
//! - plain packing of live slots through the compiled pack list
//! - bit compaction of the packed words and its inverse
//! - struct matching projection into a consumer layout

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use evwire::codec::{decode_bits, decode_plain, encode_bits, encode_plain};
use evwire::layout::{EventBuffer, match_layouts};
use evwire::test_utils::{fill_event, hits_descriptor};
use std::hint::black_box;

const HITS: u32 = 256;

/// Word source giving roughly `occupancy` live hits out of `HITS`.
fn words_for(occupancy: u32) -> Vec<u32> {
    let mut words = vec![7, 1024, 0x3f80_0000, 0, 0, 0, occupancy];
    for i in 0..occupancy {
        words.push(i * 3);
    }
    words
}

fn bench_plain(c: &mut Criterion) {
    let descriptor = hits_descriptor(HITS);
    let list = descriptor.compile();

    let mut group = c.benchmark_group("plain");
    for occupancy in [4, 64, 256] {
        let event = fill_event(&descriptor, &words_for(occupancy));
        let mut words = Vec::with_capacity(list.slot_count());
        encode_plain(&list, &event, &mut words).expect("encode");
        group.throughput(Throughput::Bytes(words.len() as u64 * 4));

        group.bench_with_input(BenchmarkId::new("encode", occupancy), &event, |b, event| {
            let mut out = Vec::with_capacity(list.slot_count());
            b.iter(|| {
                out.clear();
                encode_plain(&list, black_box(event), &mut out).expect("encode");
                black_box(out.len())
            })
        });

        group.bench_with_input(BenchmarkId::new("decode", occupancy), &words, |b, words| {
            let mut decoded = EventBuffer::new(&descriptor);
            b.iter(|| {
                decode_plain(&list, black_box(words), &mut decoded).expect("decode");
                black_box(decoded.len())
            })
        });
    }
    group.finish();
}

fn bench_bits(c: &mut Criterion) {
    let descriptor = hits_descriptor(HITS);
    let list = descriptor.compile();

    let mut group = c.benchmark_group("bits");
    for occupancy in [4, 64, 256] {
        let event = fill_event(&descriptor, &words_for(occupancy));
        let mut words = Vec::new();
        encode_plain(&list, &event, &mut words).expect("encode");
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        let stream = encode_bits(&bytes);
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", occupancy), &bytes, |b, bytes| {
            b.iter(|| black_box(encode_bits(black_box(bytes))))
        });

        group.bench_with_input(BenchmarkId::new("decode", occupancy), &stream, |b, stream| {
            let mut out = vec![0u8; bytes.len()];
            b.iter(|| {
                decode_bits(black_box(stream), &mut out).expect("decode");
                black_box(out[0])
            })
        });
    }
    group.finish();
}

fn bench_projection(c: &mut Criterion) {
    let producer = hits_descriptor(HITS);
    let consumer = hits_descriptor(HITS / 4);
    let map = match_layouts(&producer, &consumer);
    let event = fill_event(&producer, &words_for(128));
    let mut projected = EventBuffer::new(&consumer);

    c.bench_function("project_into_smaller_layout", |b| {
        b.iter(|| {
            map.project(black_box(&event), &mut projected).expect("project");
            black_box(projected.len())
        })
    });
}

criterion_group!(benches, bench_plain, bench_bits, bench_projection);
criterion_main!(benches);
