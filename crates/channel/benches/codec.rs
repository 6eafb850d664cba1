use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use tether_channel::codec::{decode, encode};
use tether_channel::{ByteOrder, Codec, DEFAULT_S11N_SIZE, IoRegion, OpKind, Request, Value};

// ============================================================================
// Benchmark: Argument Encoding
// ============================================================================

fn bench_request_args(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_args");

    let requests = [
        ("read", Request::Read { fid: 7, len: 4096, offset: 1 << 20 }),
        ("lock", Request::Lock { fid: 7, level: 4 }),
        (
            "open",
            Request::Open {
                fid: 7,
                path: "/databases/tenant-0042/main.db-journal".to_owned(),
                flags: 0x6,
                proxy_flags: tether_channel::ProxyFlags::UNLOCK_ASAP,
            },
        ),
    ];

    let mut buf = vec![0u8; DEFAULT_S11N_SIZE];
    for (name, request) in &requests {
        let args = request.to_args();
        group.bench_with_input(BenchmarkId::new("encode", name), &args, |b, args| {
            b.iter(|| black_box(encode(&mut buf, ByteOrder::Little, args).unwrap()));
        });

        let used = encode(&mut buf, ByteOrder::Little, &args).unwrap();
        let encoded = buf[..used].to_vec();
        group.bench_with_input(BenchmarkId::new("decode", name), &encoded, |b, encoded| {
            b.iter(|| {
                let values = decode(encoded, ByteOrder::Little).unwrap();
                black_box(Request::from_args(request.kind(), values).unwrap())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Text Payloads Through The Shared Region
// ============================================================================

fn bench_text_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_payload");
    let codec = Codec::new(Arc::new(IoRegion::new(0, DEFAULT_S11N_SIZE)), ByteOrder::native());

    for size in [16usize, 256, 1024] {
        let text = vec![Value::Text("e".repeat(size))];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("serialize_deserialize", size), &text, |b, text| {
            b.iter(|| {
                codec.serialize(text).unwrap();
                black_box(codec.deserialize(true).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_op_lookup(c: &mut Criterion) {
    let table = tether_channel::OpTable::from_ids(&tether_channel::OpTable::default_ids()).unwrap();
    let code = table.code(OpKind::Write);
    c.bench_function("op_lookup", |b| b.iter(|| black_box(table.kind(black_box(code)))));
}

criterion_group!(benches, bench_request_args, bench_text_payload, bench_op_lookup);
criterion_main!(benches);
