// dlbus - Self-calibrating decoder pipeline for the TA DL bus
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! The decoding pipeline.
//!
//! Wires the stages into independent tasks joined by bounded buffers: the
//! edge source feeds the decoder task, the decoder feeds the framer task,
//! and the framer publishes completed raw frames into a one-slot
//! latest-value channel consumed by the parser task. The parser stamps,
//! validates and snapshots each frame, then offers it to the delta gate;
//! accepted frames leave through a bounded hand-off the publisher drains
//! at its own pace.
//!
//! Closing the edge stream drains the whole pipeline: each stage observes
//! end-of-stream and shuts down in turn. Signaling (or dropping) the
//! shutdown handle closes the edge stream from the consumer side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::device::{DeviceFrame, DeviceType};
use crate::event::Bit;
use crate::framer::DlbusFramer;
use crate::gate::{DeltaGate, GateConfig};
use crate::manchester::ManchesterDecoder;
use crate::source::SourceEvent;

/// Default capacity of the decoded-bit buffer.
pub const BIT_BUFFER_SIZE: usize = 128;

/// Default capacity of the gated-frame buffer feeding the publisher.
pub const PUBLISH_BUFFER_SIZE: usize = 16;

/// Default stall window after which the decoder restarts clock discovery.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Controller model expected on the bus.
    pub device: DeviceType,
    /// Delta gate thresholds.
    pub gate: GateConfig,
    /// Restart clock discovery when the line is silent for this long.
    pub stall_timeout: Duration,
    /// Capacity of the decoded-bit buffer.
    pub bit_buffer: usize,
    /// Capacity of the gated-frame buffer.
    pub publish_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: DeviceType::Uvr42,
            gate: GateConfig::default(),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            bit_buffer: BIT_BUFFER_SIZE,
            publish_buffer: PUBLISH_BUFFER_SIZE,
        }
    }
}

/// Counters exposed over the health surface.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Raw frames completed by the framer.
    pub frames_received: AtomicU64,
    /// Frames that parsed and validated.
    pub frames_decoded: AtomicU64,
    /// Frames rejected by the parser.
    pub frames_rejected: AtomicU64,
    /// Frames that crossed the delta gate.
    pub frames_published: AtomicU64,
    /// Manchester violations and overflow resynchronizations.
    pub resyncs: AtomicU64,
    /// Decoder restarts caused by signal loss.
    pub signal_losses: AtomicU64,
}

/// Plain-value copy of the counters for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub frames_published: u64,
    pub resyncs: u64,
    pub signal_losses: u64,
}

impl PipelineStats {
    /// Take a consistent-enough snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            signal_losses: self.signal_losses.load(Ordering::Relaxed),
        }
    }
}

/// Handles of a running pipeline.
pub struct Pipeline {
    /// Latest successfully parsed frame, `None` until the first one.
    /// Reads are non-blocking and idempotent.
    pub snapshot: watch::Receiver<Option<DeviceFrame>>,
    /// Frames that crossed the delta gate, in decode order.
    pub published: mpsc::Receiver<DeviceFrame>,
    /// Shared counters.
    pub stats: Arc<PipelineStats>,
    /// Send `true` (or drop the sender) to stop the decoder task, which
    /// drains the downstream stages.
    pub shutdown: watch::Sender<bool>,
    /// Stage task handles; they finish once the edge stream closed or
    /// shutdown was signaled.
    pub tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the decoder, framer and parser tasks over an edge stream.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(config: PipelineConfig, edges: mpsc::Receiver<SourceEvent>) -> Self {
        let stats = Arc::new(PipelineStats::default());
        let (bit_tx, bit_rx) = mpsc::channel(config.bit_buffer);
        let (frame_tx, frame_rx) = watch::channel(None);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (publish_tx, publish_rx) = mpsc::channel(config.publish_buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(decoder_task(
                edges,
                bit_tx,
                config.stall_timeout,
                shutdown_rx,
                Arc::clone(&stats),
            )),
            tokio::spawn(framer_task(bit_rx, frame_tx, Arc::clone(&stats))),
            tokio::spawn(parser_task(
                config.device,
                config.gate,
                frame_rx,
                snapshot_tx,
                publish_tx,
                Arc::clone(&stats),
            )),
        ];

        Self {
            snapshot: snapshot_rx,
            published: publish_rx,
            stats,
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Stage B: consume source events, emit decoded bits.
///
/// Also hosts the stall supervisor: a silent line for longer than the
/// stall window restarts clock discovery, since the old measurement is
/// not trusted across a signal loss.
async fn decoder_task(
    mut edges: mpsc::Receiver<SourceEvent>,
    bits: mpsc::Sender<Bit>,
    stall_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<PipelineStats>,
) {
    let mut decoder = ManchesterDecoder::new();

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = tokio::time::timeout(stall_timeout, edges.recv()) => received,
        };

        let event = match received {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                if decoder.is_idle() {
                    continue;
                }
                warn!(
                    "no edges for {:?}, restarting clock discovery",
                    stall_timeout
                );
                stats.signal_losses.fetch_add(1, Ordering::Relaxed);
                decoder.reset();
                if bits.send(Bit::Invalid).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let bit = match event {
            SourceEvent::Edge(edge) => decoder.push(edge),
            SourceEvent::Overflow => {
                warn!("edge buffer overflowed, resynchronizing");
                decoder.desynchronize();
                Some(Bit::Invalid)
            }
        };

        if let Some(bit) = bit {
            if bit == Bit::Invalid {
                stats.resyncs.fetch_add(1, Ordering::Relaxed);
            }
            if bits.send(bit).await.is_err() {
                break;
            }
        }
    }
    debug!("decoder task stopped");
}

/// Stage C: consume bits, publish completed raw frames into the
/// latest-value slot. An unread frame is overwritten by the next one.
async fn framer_task(
    mut bits: mpsc::Receiver<Bit>,
    frames: watch::Sender<Option<Vec<u8>>>,
    stats: Arc<PipelineStats>,
) {
    let mut framer = DlbusFramer::new();

    while let Some(bit) = bits.recv().await {
        if let Some(frame) = framer.push(bit) {
            stats.frames_received.fetch_add(1, Ordering::Relaxed);
            if frames.send(Some(frame)).is_err() {
                break;
            }
        }
    }
    debug!("framer task stopped");
}

/// Stage D: parse, validate, snapshot and gate completed frames.
async fn parser_task(
    device: DeviceType,
    gate_config: GateConfig,
    mut frames: watch::Receiver<Option<Vec<u8>>>,
    snapshot: watch::Sender<Option<DeviceFrame>>,
    published: mpsc::Sender<DeviceFrame>,
    stats: Arc<PipelineStats>,
) {
    let mut gate = DeltaGate::new(gate_config);

    while frames.changed().await.is_ok() {
        let raw = match frames.borrow_and_update().clone() {
            Some(raw) => raw,
            None => continue,
        };

        let frame = match device.parse(&raw, Utc::now()) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("discarding frame: {err}");
                stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
        debug!("frame decoded: {:?}", frame);

        if snapshot.send(Some(frame.clone())).is_err() {
            break;
        }

        if gate.offer(&frame) {
            stats.frames_published.fetch_add(1, Ordering::Relaxed);
            // The gate reference is already advanced; losing the hand-off
            // only costs this one publication.
            match published.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("publisher backlog full, dropping frame"),
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }
    debug!("parser task stopped");
}
