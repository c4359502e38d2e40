use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use respwire::*;

fn bench_resp(c: &mut Criterion) {
    let mut group = c.benchmark_group("resp");

    group.bench_function("encode_set", |b| {
        let parts = ["SET", "test_key", "test_value"];
        let mut buf = BytesMut::with_capacity(128);
        b.iter(|| {
            buf.clear();
            protocol::encode_into(black_box(&parts[..]), &mut buf);
            black_box(buf.len());
        });
    });

    // MGET-style reply: an array of 1k bulk strings
    let items = (0..1000)
        .map(|i| Reply::BulkString(Bytes::from(format!("val{}", i))))
        .collect();
    let wire = Reply::Array(items).to_bytes();

    group.bench_function("try_parse_array_1k", |b| {
        b.iter(|| match protocol::try_parse(black_box(&wire)) {
            ParseResult::Parsed(reply, consumed) => black_box((reply, consumed)),
            other => panic!("unexpected {:?}", other),
        });
    });

    // Worst case for the read loop: re-parsing a growing prefix of one reply
    group.bench_function("try_parse_incomplete_prefix", |b| {
        let prefix = &wire[..wire.len() - 1];
        b.iter(|| black_box(protocol::try_parse(black_box(prefix))));
    });

    // What the read loop does per read: resume a scan over a grown buffer
    group.bench_function("scan_array_1k_in_4k_steps", |b| {
        let limits = FrameLimits::default();
        b.iter(|| {
            let mut scanner = FrameScanner::new();
            let mut end = 0;
            loop {
                end = (end + 4096).min(wire.len());
                if let Some(len) = scanner.scan(black_box(&wire[..end]), &limits).unwrap() {
                    break black_box(len);
                }
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_resp);
criterion_main!(benches);
