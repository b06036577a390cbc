//! End-to-end tests over the emulated edge source.
//!
//! Every test synthesizes the electrical signal a controller would put on
//! the wire and runs it through the real stages, so the decoder, framer,
//! parser and gate are exercised exactly as they are against hardware.

use std::time::Duration;

use dlbus::device::DeviceFrame;
use dlbus::emulation::{EmulatedSource, SignalBuilder};
use dlbus::event::{Bit, EdgeEvent};
use dlbus::framer::DlbusFramer;
use dlbus::manchester::ManchesterDecoder;
use dlbus::pipeline::{Pipeline, PipelineConfig};
use dlbus::source::{SourceEvent, EDGE_BUFFER_SIZE};

const T: Duration = Duration::from_millis(10);

/// S1 from the device documentation: 30/60/90/120 degC, both outputs on.
const NOMINAL_FRAME: [u8; 10] = [0x10, 0x2C, 0x01, 0x58, 0x02, 0x84, 0x03, 0xB0, 0x04, 0x60];

/// Same temperatures, both outputs off.
const OUTPUTS_OFF_FRAME: [u8; 10] = [0x10, 0x2C, 0x01, 0x58, 0x02, 0x84, 0x03, 0xB0, 0x04, 0x00];

/// Temperature 1 decodes to -3276.8 degC.
const OUT_OF_RANGE_FRAME: [u8; 10] = [0x10, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Run an edge schedule through decoder and framer synchronously.
fn decode_frames(events: Vec<EdgeEvent>) -> (Vec<Vec<u8>>, usize) {
    let mut decoder = ManchesterDecoder::new();
    let mut framer = DlbusFramer::new();
    let mut frames = Vec::new();
    let mut invalids = 0;

    for event in events {
        if let Some(bit) = decoder.push(event) {
            if bit == Bit::Invalid {
                invalids += 1;
            }
            if let Some(frame) = framer.push(bit) {
                frames.push(frame);
            }
        }
    }
    (frames, invalids)
}

#[test]
fn clock_discovery_converges_under_jitter() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut signal = SignalBuilder::new(T);
    signal.calibration_preamble();
    let events = signal.finish();

    // Re-time the schedule with up to 5% jitter per interval.
    let mut rng = StdRng::seed_from_u64(0x42);
    let mut decoder = ManchesterDecoder::new();
    let mut nominal_last = Duration::ZERO;
    let mut now = Duration::ZERO;
    for event in events {
        let interval = event.timestamp - nominal_last;
        nominal_last = event.timestamp;
        now += interval.mul_f64(1.0 + rng.gen_range(-0.05..0.05));
        decoder.push(EdgeEvent::new(now, event.edge));
    }

    let clock = decoder.clock().expect("clock should be discovered");
    let ratio = clock.half_bit.as_secs_f64() / T.as_secs_f64();
    assert!(
        (0.9..=1.1).contains(&ratio),
        "discovered half-bit off by factor {ratio}"
    );
}

#[test]
fn frames_are_delimited_by_sync_gaps() {
    // Arbitrary byte content including worst cases for the bit patterns:
    // all zeros, all ones and both alternating phases.
    let frames: [&[u8]; 3] = [
        &[0x01, 0x02, 0x03],
        &[0x00, 0xFF, 0xAA, 0x55],
        &NOMINAL_FRAME,
    ];

    let mut signal = SignalBuilder::new(T);
    signal.calibration_preamble();
    for frame in frames {
        signal.sync_gap().frame(frame);
    }
    signal.sync_gap();

    let (decoded, invalids) = decode_frames(signal.finish());
    assert_eq!(invalids, 0);
    let expected: Vec<Vec<u8>> = frames.iter().map(|f| f.to_vec()).collect();
    assert_eq!(decoded, expected);
}

#[test]
fn dropped_edge_emits_single_invalid_and_recovers_within_one_gap() {
    // 0x55 bytes alternate bits, so every edge is a mid-bit transition a
    // full period apart; removing one merges two intervals into an
    // unambiguous violation.
    let sacrificed = [0x55u8; 10];

    let mut signal = SignalBuilder::new(T);
    signal.calibration_preamble().sync_gap();
    let frame_start = signal.len();
    signal.frame(&sacrificed);
    let frame_end = signal.len();
    signal.sync_gap().frame(&NOMINAL_FRAME).sync_gap();

    let mut events = signal.finish();
    events.remove((frame_start + frame_end) / 2);

    let (decoded, invalids) = decode_frames(events);
    assert_eq!(invalids, 1);
    // The damaged frame is discarded; the next one decodes intact.
    assert_eq!(decoded, vec![NOMINAL_FRAME.to_vec()]);
}

#[test]
fn spurious_edge_is_contained_by_the_framer() {
    // An extra edge close to a real one emits one bogus bit but cannot
    // break the interval grammar; the framer drops the damaged frame and
    // the stream is clean again after the next sync gap.
    let sacrificed = [0x55u8; 10];

    let mut signal = SignalBuilder::new(T);
    signal.calibration_preamble().sync_gap();
    let frame_start = signal.len();
    signal.frame(&sacrificed);
    let frame_end = signal.len();
    signal.sync_gap().frame(&NOMINAL_FRAME).sync_gap();

    let mut events = signal.finish();
    let at = (frame_start + frame_end) / 2;
    let shadowed = events[at];
    let polarity = match shadowed.edge {
        dlbus::Edge::Rising => dlbus::Edge::Falling,
        dlbus::Edge::Falling => dlbus::Edge::Rising,
    };
    events.insert(
        at + 1,
        EdgeEvent::new(shadowed.timestamp + T / 5, polarity),
    );

    let (decoded, invalids) = decode_frames(events);
    assert_eq!(invalids, 0);
    assert_eq!(decoded.last(), Some(&NOMINAL_FRAME.to_vec()));
    assert!(decoded.len() <= 2);
}

#[tokio::test]
async fn pipeline_decodes_and_publishes_frames() {
    let mut signal = SignalBuilder::new(T);
    signal
        .calibration_preamble()
        .sync_gap()
        .frame(&NOMINAL_FRAME)
        .sync_gap();

    let edges = EmulatedSource::spawn(signal.finish(), EDGE_BUFFER_SIZE);
    let config = PipelineConfig {
        stall_timeout: Duration::from_secs(30),
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::spawn(config, edges);

    let frame = tokio::time::timeout(Duration::from_secs(5), pipeline.published.recv())
        .await
        .expect("pipeline should publish in time")
        .expect("one frame should cross the gate");

    let DeviceFrame::Uvr42(frame) = &frame;
    assert_eq!(frame.temperature1, 30.0);
    assert_eq!(frame.temperature2, 60.0);
    assert_eq!(frame.temperature3, 90.0);
    assert_eq!(frame.temperature4, 120.0);
    assert!(frame.out1);
    assert!(frame.out2);

    // Reading the snapshot twice without a new decode is idempotent.
    let first = pipeline.snapshot.borrow().clone();
    let second = pipeline.snapshot.borrow().clone();
    assert!(first.is_some());
    assert_eq!(first, second);

    // The source closed; every stage drains and finishes.
    for task in pipeline.tasks {
        task.await.unwrap();
    }

    let stats = pipeline.stats.snapshot();
    assert_eq!(stats.frames_decoded, 1);
    assert_eq!(stats.frames_published, 1);
    assert_eq!(stats.frames_rejected, 0);
}

#[tokio::test]
async fn pipeline_rejects_invalid_frames_without_publishing() {
    // The idle stretch between the two frames is longer than one gap so
    // the latest-value slot is drained before the second frame lands.
    let mut signal = SignalBuilder::new(T);
    signal
        .calibration_preamble()
        .sync_gap()
        .frame(&OUT_OF_RANGE_FRAME)
        .sync_gap()
        .high_bits(48)
        .frame(&NOMINAL_FRAME)
        .sync_gap();

    let edges = EmulatedSource::spawn(signal.finish(), EDGE_BUFFER_SIZE);
    let config = PipelineConfig {
        stall_timeout: Duration::from_secs(30),
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::spawn(config, edges);

    // The first frame that crosses the gate is the valid one.
    let frame = tokio::time::timeout(Duration::from_secs(5), pipeline.published.recv())
        .await
        .expect("pipeline should publish in time")
        .expect("the valid frame should cross the gate");
    let DeviceFrame::Uvr42(frame) = &frame;
    assert_eq!(frame.temperature1, 30.0);

    for task in pipeline.tasks {
        task.await.unwrap();
    }

    let stats = pipeline.stats.snapshot();
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.frames_rejected, 1);
    assert_eq!(stats.frames_decoded, 1);
    assert_eq!(stats.frames_published, 1);
}

#[tokio::test]
async fn overflow_marker_forces_resynchronization() {
    let mut signal = SignalBuilder::new(T);
    signal.calibration_preamble().sync_gap();
    let frame_start = signal.len();
    signal.frame(&NOMINAL_FRAME);
    let frame_end = signal.len();
    signal.sync_gap().frame(&OUTPUTS_OFF_FRAME).sync_gap();
    let events = signal.finish();

    let (tx, rx) = tokio::sync::mpsc::channel(EDGE_BUFFER_SIZE);
    let config = PipelineConfig {
        stall_timeout: Duration::from_secs(30),
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::spawn(config, rx);

    // Replay the schedule with an overflow marker in the middle of the
    // first frame, as the GPIO backend would emit after a lost burst.
    let overflow_at = (frame_start + frame_end) / 2;
    for (index, event) in events.into_iter().enumerate() {
        if index == overflow_at {
            tx.send(SourceEvent::Overflow).await.unwrap();
        }
        tx.send(SourceEvent::Edge(event)).await.unwrap();
    }
    drop(tx);

    // The interrupted frame never completes; the next one does.
    let frame = tokio::time::timeout(Duration::from_secs(5), pipeline.published.recv())
        .await
        .expect("pipeline should publish in time")
        .expect("the second frame should cross the gate");
    let DeviceFrame::Uvr42(frame) = &frame;
    assert!(!frame.out1);
    assert!(!frame.out2);

    for task in pipeline.tasks {
        task.await.unwrap();
    }

    let stats = pipeline.stats.snapshot();
    assert_eq!(stats.frames_decoded, 1);
    assert!(stats.resyncs >= 1);
}

#[tokio::test]
async fn stalled_line_restarts_clock_discovery() {
    let stall = Duration::from_millis(150);
    let config = PipelineConfig {
        stall_timeout: stall,
        ..PipelineConfig::default()
    };

    let (tx, rx) = tokio::sync::mpsc::channel(EDGE_BUFFER_SIZE);
    let mut pipeline = Pipeline::spawn(config, rx);

    let mut signal = SignalBuilder::new(T);
    signal
        .calibration_preamble()
        .sync_gap()
        .frame(&NOMINAL_FRAME)
        .sync_gap();
    for event in signal.finish() {
        tx.send(SourceEvent::Edge(event)).await.unwrap();
    }

    let first = tokio::time::timeout(Duration::from_secs(5), pipeline.published.recv())
        .await
        .unwrap()
        .unwrap();
    let DeviceFrame::Uvr42(first) = &first;
    assert!(first.out1);

    // Silence well past the stall window: exactly one restart, then the
    // supervisor goes quiet until signal returns.
    tokio::time::sleep(stall * 4).await;
    assert_eq!(pipeline.stats.snapshot().signal_losses, 1);

    // After the restart the decoder calibrates from scratch; a fresh
    // schedule starting at timestamp zero is a new signal epoch.
    let mut signal = SignalBuilder::new(T);
    signal
        .calibration_preamble()
        .sync_gap()
        .frame(&OUTPUTS_OFF_FRAME)
        .sync_gap();
    for event in signal.finish() {
        tx.send(SourceEvent::Edge(event)).await.unwrap();
    }

    let second = tokio::time::timeout(Duration::from_secs(5), pipeline.published.recv())
        .await
        .unwrap()
        .unwrap();
    let DeviceFrame::Uvr42(second) = &second;
    assert!(!second.out1);

    drop(tx);
    for task in pipeline.tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn shutdown_signal_drains_the_pipeline() {
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let pipeline = Pipeline::spawn(PipelineConfig::default(), rx);

    let Pipeline {
        shutdown, tasks, ..
    } = pipeline;
    shutdown.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        for task in tasks {
            task.await.unwrap();
        }
    })
    .await
    .expect("stages should drain promptly on shutdown");

    drop(tx);
}
