//! Criterion benchmarks for the TriAxis binary codec.
//!
//! The hot path is a jog or pattern run: a burst of `MoveAxis` frames, with an
//! `EmergencyStop` able to cut in at any point.
//!
//! Run with:
//! ```bash
//! cargo bench --package triaxis-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use triaxis_core::protocol::codec::{decode_message, encode_message};
use triaxis_core::protocol::messages::{
    ControlMessage, DiscoveryAnnounceMessage, HelloMessage, MoveAxisMessage, PROTOCOL_VERSION,
};
use triaxis_core::{Axis, Pattern};
use uuid::Uuid;

fn fixtures() -> Vec<(&'static str, ControlMessage)> {
    vec![
        ("ping", ControlMessage::Ping(42)),
        ("emergency_stop", ControlMessage::EmergencyStop),
        (
            "move_axis",
            ControlMessage::MoveAxis(MoveAxisMessage {
                axis: Axis::Y,
                steps: -250,
                speed: 600,
                torque: 70,
            }),
        ),
        (
            "hello",
            ControlMessage::Hello(HelloMessage {
                protocol_version: PROTOCOL_VERSION,
                controller_id: Uuid::new_v4(),
                controller_name: "benchmark-controller".to_string(),
            }),
        ),
        (
            "discovery_announce",
            ControlMessage::DiscoveryAnnounce(DiscoveryAnnounceMessage {
                control_port: 24810,
                signal_dbm: -42,
                device_name: "TriAxis_192.168.1.200".to_string(),
            }),
        ),
    ]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, msg) in fixtures() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &msg, |b, msg| {
            b.iter(|| encode_message(black_box(msg), 1, 0).unwrap())
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, msg) in fixtures() {
        let bytes = encode_message(&msg, 1, 0).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &bytes, |b, bytes| {
            b.iter(|| decode_message(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn bench_pattern_burst(c: &mut Criterion) {
    let steps = Pattern::Spiral.expand(500);
    c.bench_function("encode_spiral_burst", |b| {
        b.iter(|| {
            for (seq, step) in steps.iter().enumerate() {
                let msg = ControlMessage::MoveAxis(MoveAxisMessage {
                    axis: Axis::X,
                    steps: step.dx,
                    speed: 500,
                    torque: 50,
                });
                black_box(encode_message(&msg, seq as u64, 0).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_pattern_burst);
criterion_main!(benches);
