//! Benchmarks for DL-bus decoding performance

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dlbus::emulation::SignalBuilder;
use dlbus::event::EdgeEvent;
use dlbus::framer::DlbusFramer;
use dlbus::manchester::ManchesterDecoder;

const FRAMES: usize = 100;

fn build_signal() -> Vec<EdgeEvent> {
    let mut signal = SignalBuilder::new(Duration::from_millis(10));
    signal.calibration_preamble();
    for i in 0..FRAMES {
        let t1 = (300 + i as i16).to_le_bytes();
        let raw = [0x10, t1[0], t1[1], 0x58, 0x02, 0x84, 0x03, 0xB0, 0x04, 0x60];
        signal.sync_gap().frame(&raw);
    }
    signal.sync_gap();
    signal.finish()
}

fn bench_decoding(c: &mut Criterion) {
    let events = build_signal();

    let mut group = c.benchmark_group("decoding");
    group.throughput(Throughput::Elements(events.len() as u64));

    group.bench_function("decode_100_frames", |b| {
        b.iter(|| {
            let mut decoder = ManchesterDecoder::new();
            let mut framer = DlbusFramer::new();
            let mut frames = 0usize;
            for &event in &events {
                if let Some(bit) = decoder.push(event) {
                    if let Some(frame) = framer.push(bit) {
                        frames += 1;
                        black_box(frame);
                    }
                }
            }
            assert_eq!(frames, FRAMES);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decoding);
criterion_main!(benches);
