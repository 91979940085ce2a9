//! Criterion benchmarks for the QMK Display packet codec.
//!
//! The telemetry path encodes one packet per second, so these numbers matter
//! mostly for image uploads (32 packets plus 32 acknowledgement checks).
//!
//! Run with:
//! ```bash
//! cargo bench --package qmk-display-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use qmk_display_core::protocol::codec::{check_acknowledge, decode_response, encode_message};
use qmk_display_core::protocol::messages::{HostVersion, Image, Message, IMAGE_SIZE, PACKET_SIZE};
use qmk_display_core::Percent;

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_version() -> Message {
    Message::Version(HostVersion::new(1, 1, 0))
}

fn make_hardware_state() -> Message {
    Message::hardware_state(Percent::saturating_from_f64(42.0), Percent::saturating_from_f64(67.0))
}

fn make_image() -> Message {
    Message::Image(Image::new(
        (0..IMAGE_SIZE).map(|i| (i % 256) as u8).collect::<Vec<_>>(),
    ))
}

// ── Benchmark functions ───────────────────────────────────────────────────────

/// Benchmarks `encode_message` for every message type.
fn bench_encode(c: &mut Criterion) {
    let messages: &[(&str, Message)] = &[
        ("Version", make_version()),
        ("HardwareState", make_hardware_state()),
        ("StopCommunication", Message::StopCommunication),
        ("Image", make_image()),
    ];

    let mut group = c.benchmark_group("encode_message");
    for (name, msg) in messages {
        group.bench_with_input(BenchmarkId::new("msg", name), msg, |b, msg| {
            b.iter(|| encode_message(black_box(msg)).expect("encode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks acknowledgement classification of a single echoed report.
fn bench_decode(c: &mut Criterion) {
    let msg = make_hardware_state();
    let request = encode_message(&msg).expect("encode must succeed")[0];
    let echo = vec![0u8; PACKET_SIZE];

    c.bench_function("decode_response/HardwareState", |b| {
        b.iter(|| decode_response(black_box(&msg), black_box(&request), black_box(&echo)))
    });
}

/// Benchmarks a full image: encode all chunks and check an echo for each.
fn bench_image_round_trip(c: &mut Criterion) {
    let image = make_image();
    let echo = vec![0u8; PACKET_SIZE];

    c.bench_function("image_encode_and_ack_all_chunks", |b| {
        b.iter(|| {
            let packets = encode_message(black_box(&image)).unwrap();
            for packet in &packets {
                check_acknowledge(packet, black_box(&echo)).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_image_round_trip);
criterion_main!(benches);
