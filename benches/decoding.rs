use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gep_subscriber::mocks::{build_compact_data_packet, random_measurement_batch};
use gep_subscriber::transport::codec::PayloadReader;
use gep_subscriber::transport::compact::CompactMeasurementDecoder;
use gep_subscriber::transport::tssc::{TsscDecoder, TsscEncoder};
use gep_subscriber::SignalIndexCache;
use uuid::Uuid;

const POINTS: u16 = 30;
const FRAMES: usize = 60;

fn build_cache(points: u16) -> SignalIndexCache {
    let mut cache = SignalIndexCache::new();
    for index in 0..points {
        cache.add_measurement_key(index, Uuid::new_v4(), "PPA".to_string(), index as u32 + 1);
    }
    cache
}

fn bench_tssc_decode(c: &mut Criterion) {
    let batch = random_measurement_batch(POINTS, FRAMES);

    let mut encoder = TsscEncoder::new();
    encoder.set_buffer(batch.len() * 32);
    for &(id, timestamp, quality, value) in &batch {
        assert!(encoder.try_add_measurement(id, timestamp, quality, value));
    }
    let block = encoder.finish_block().to_vec();

    let mut group = c.benchmark_group("tssc");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("decode_block", |b| {
        b.iter(|| {
            let mut decoder = TsscDecoder::new();
            decoder.set_buffer(black_box(&block));
            let mut count = 0;
            while let Some(tuple) = decoder.try_get_measurement().unwrap() {
                black_box(tuple);
                count += 1;
            }
            assert_eq!(count, batch.len());
        })
    });
    group.finish();
}

fn bench_compact_decode(c: &mut Criterion) {
    let cache = build_cache(POINTS);
    let batch: Vec<(u16, i64, f32)> = random_measurement_batch(POINTS, FRAMES)
        .into_iter()
        .map(|(id, timestamp, _, value)| (id, timestamp, value))
        .collect();
    let packet = build_compact_data_packet(&batch);
    let payload = &packet[5..]; // skip flags and count

    let mut group = c.benchmark_group("compact");
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("decode_packet", |b| {
        b.iter(|| {
            let decoder = CompactMeasurementDecoder::new(&cache, [0, 0], true, false);
            let mut reader = PayloadReader::new(black_box(payload));
            let mut count = 0;
            while reader.remaining() > 0 {
                if decoder.parse(&mut reader).unwrap().is_some() {
                    count += 1;
                }
            }
            assert_eq!(count, batch.len());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_tssc_decode, bench_compact_decode);
criterion_main!(benches);
