//! Stream decoder benchmarks for pulsync-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pulsync_protocol::{codec, StreamDecoder};

fn completion_body(frames: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for i in 0..frames {
        body.extend_from_slice(
            format!(
                "event: content_block_delta\ndata: {{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"token {}\"}}}}\n\n",
                i
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(b"data: [DONE]\n\n");
    body
}

fn bench_feed_whole(c: &mut Criterion) {
    let body = completion_body(256);

    let mut group = c.benchmark_group("sse_feed");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("whole_256_frames", |b| {
        b.iter(|| {
            let mut count = 0usize;
            let mut decoder = StreamDecoder::new(|_: &str| count += 1);
            decoder.feed(black_box(&body));
            decoder.finish();
            drop(decoder);
            count
        })
    });
    group.bench_function("chunked_64B", |b| {
        b.iter(|| {
            let mut count = 0usize;
            let mut decoder = StreamDecoder::new(|_: &str| count += 1);
            for chunk in body.chunks(64) {
                decoder.feed(black_box(chunk));
            }
            decoder.finish();
            drop(decoder);
            count
        })
    });
    group.finish();
}

fn bench_decode_envelope(c: &mut Criterion) {
    let frame = r#"{"type":"events_api","envelope_id":"57d6a792-4d35-4d0b-b6aa-3361493e1caf","payload":{"type":"event_callback","event_id":"Ev1","event_time":1700000000,"event":{"type":"message","channel":"C123","user":"U123","text":"hello world","ts":"1700000000.000100"}}}"#;

    let mut group = c.benchmark_group("envelope");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("decode_with_event", |b| {
        b.iter(|| {
            let env = codec::decode_envelope(black_box(frame)).unwrap();
            codec::decode_event(&env).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_feed_whole, bench_decode_envelope);
criterion_main!(benches);
