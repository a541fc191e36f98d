//! Encoder benchmarks.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;
use batchline_chunk::{ChunkEncoder, EncoderOptions, HeapAllocator, RawBatch};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn make_batch(rows: usize) -> RecordBatch {
    let ids: Vec<i32> = (0..rows as i32).collect();
    let scores: Vec<f64> = (0..rows).map(|i| i as f64 * 0.5).collect();
    let names: Vec<String> = (0..rows).map(|i| format!("row{i}")).collect();
    RecordBatch::try_from_iter([
        ("id", Arc::new(Int32Array::from(ids)) as ArrayRef),
        ("score", Arc::new(Float64Array::from(scores)) as ArrayRef),
        ("name", Arc::new(StringArray::from(names)) as ArrayRef),
    ])
    .unwrap()
}

fn encode_benchmark(c: &mut Criterion) {
    let host = Arc::new(HeapAllocator::new());
    let encoder = ChunkEncoder::new(host.clone(), EncoderOptions::default());
    let raw = RawBatch::new(make_batch(2048), false);

    c.bench_function("encode_2048_rows", |b| {
        b.iter(|| {
            let address = encoder.encode(black_box(&raw)).unwrap();
            host.release(address);
        })
    });
}

fn read_benchmark(c: &mut Criterion) {
    let host = Arc::new(HeapAllocator::new());
    let encoder = ChunkEncoder::new(host.clone(), EncoderOptions::default());
    let address = encoder
        .encode(&RawBatch::new(make_batch(2048), false))
        .unwrap();
    let chunk = host.take(address).unwrap();

    c.bench_function("read_2048_rows", |b| {
        b.iter(|| {
            let reader = chunk.reader().unwrap();
            let mut cells = 0;
            for column in reader.columns().unwrap() {
                cells += column.values().unwrap().len();
            }
            black_box(cells)
        })
    });
}

criterion_group!(benches, encode_benchmark, read_benchmark);
criterion_main!(benches);
