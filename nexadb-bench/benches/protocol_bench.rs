//! Protocol encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nexadb_protocol::{
    decode_payload, decode_record, encode_record, ChangeEvent, Encoder, Frame, MessageType, Record,
    Value,
};

fn create_test_document(payload_size: usize) -> Record {
    let mut data = Record::new();
    data.insert("name".into(), "Alice".into());
    data.insert("email".into(), "alice@example.com".into());
    data.insert("bio".into(), "x".repeat(payload_size).into());
    data.insert("age".into(), 30i64.into());

    let mut record = Record::new();
    record.insert("collection".into(), "users".into());
    record.insert("database".into(), "default".into());
    record.insert("data".into(), Value::Map(data));
    record
}

fn create_test_event(payload_size: usize) -> Record {
    let mut ns = Record::new();
    ns.insert("db".into(), "nexadb".into());
    ns.insert("coll".into(), "orders".into());

    let mut key = Record::new();
    key.insert("_id".into(), "abc123".into());

    let mut document = Record::new();
    document.insert("_id".into(), "abc123".into());
    document.insert("notes".into(), "x".repeat(payload_size).into());

    let mut record = Record::new();
    record.insert("operationType".into(), "insert".into());
    record.insert("ns".into(), Value::Map(ns));
    record.insert("documentKey".into(), Value::Map(key));
    record.insert("fullDocument".into(), Value::Map(document));
    record.insert("timestamp".into(), Value::Float(1_700_000_000.123));
    record
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [100, 1000, 10000] {
        let payload = Bytes::from("x".repeat(size));
        let frame = Frame::new(MessageType::Create, payload);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let payload = Bytes::from("x".repeat(size));
        let frame = Frame::new(MessageType::Success, payload);
        let encoded = frame.encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = encoded.clone();
                black_box(Frame::decode(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_request_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encode");

    for size in [100, 1000, 10000] {
        let record = create_test_document(size);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &record, |b, record| {
            b.iter(|| black_box(Encoder::encode(MessageType::Create, record).unwrap()));
        });
    }

    group.finish();
}

fn bench_record_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_decode");

    for size in [100, 1000, 10000] {
        let encoded = encode_record(&create_test_document(size)).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(decode_record(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_change_event_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_event_decode");

    for size in [100, 1000, 10000] {
        let encoded = encode_record(&create_test_event(size)).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(decode_payload::<ChangeEvent>(encoded).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_request_encode,
    bench_record_decode,
    bench_change_event_decode,
);

criterion_main!(benches);
