//! Benchmarks for packet framing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pulsenet::protocol::{decode_body, encode_packet, Event, FrameDecoder, Packet, Ping};

fn event_packet(payload_size: usize) -> Packet {
    Event {
        event_id: 0xdead_beef,
        payload: vec![0x5a; payload_size],
    }
    .into()
}

fn encode_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [16usize, 1024, 64 * 1024] {
        let packet = event_packet(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("event", size), &packet, |b, packet| {
            b.iter(|| encode_packet(black_box(packet)).unwrap())
        });
    }

    let ping: Packet = Ping {
        iterations: 1,
        timestamp: 1000,
        time: 1000,
    }
    .into();
    group.bench_function("ping", |b| b.iter(|| encode_packet(black_box(&ping)).unwrap()));

    group.finish();
}

fn decode_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [16usize, 1024, 64 * 1024] {
        let frame = encode_packet(&event_packet(size)).unwrap();
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("event", size), &frame, |b, frame| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new(1024 * 1024);
                decoder.extend(black_box(frame));
                let body = decoder.next_frame().unwrap().unwrap();
                decode_body(&body).unwrap().unwrap()
            })
        });
    }

    // Many small frames arriving in 1 KB chunks
    let mut stream = Vec::new();
    for _ in 0..256 {
        stream.extend(encode_packet(&event_packet(40)).unwrap());
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("chunked_stream", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new(1024 * 1024);
            let mut count = 0;
            for chunk in stream.chunks(1024) {
                decoder.extend(chunk);
                while let Some(body) = decoder.next_frame().unwrap() {
                    black_box(decode_body(&body).unwrap());
                    count += 1;
                }
            }
            count
        })
    });

    group.finish();
}

criterion_group!(benches, encode_benchmarks, decode_benchmarks);
criterion_main!(benches);
