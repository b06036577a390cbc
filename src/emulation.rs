// dlbus - Self-calibrating decoder pipeline for the TA DL bus
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Emulated edge source.
//!
//! Synthesizes the electrical signal a controller would put on the wire:
//! byte frames are laid out as DL-bus line frames between sync gaps,
//! Manchester-encoded, and turned into a timestamped edge schedule. The
//! schedule replays through the same channel contract as the GPIO
//! backend, so every downstream stage runs unchanged against it.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::event::{Edge, EdgeEvent};
use crate::framer::SYNC_BIT_COUNT;
use crate::manchester::CLOCK_SAMPLES;
use crate::source::SourceEvent;

/// Builds the edge schedule of a Manchester-encoded DL-bus signal.
///
/// The line idles high; a high bit drives the line high in its first half
/// and falls at the mid-bit point, a low bit mirrors that. Boundary
/// transitions appear only between equal bits, which is exactly the
/// timing the decoder classifies.
#[derive(Debug)]
pub struct SignalBuilder {
    half_bit: Duration,
    /// Current line level.
    level: bool,
    /// Timestamp of the next bit boundary.
    cursor: Duration,
    events: Vec<EdgeEvent>,
}

impl SignalBuilder {
    /// Start a signal with the given half-bit period; the line idles high.
    pub fn new(half_bit: Duration) -> Self {
        Self {
            half_bit,
            level: true,
            cursor: Duration::ZERO,
            events: Vec::new(),
        }
    }

    /// Append one Manchester bit: the line assumes the bit's first-half
    /// level at the boundary and toggles at the mid-bit point.
    pub fn bit(&mut self, high: bool) -> &mut Self {
        self.set_level(high);
        self.cursor += self.half_bit;
        self.set_level(!high);
        self.cursor += self.half_bit;
        self
    }

    fn set_level(&mut self, level: bool) {
        if self.level != level {
            let edge = if level { Edge::Rising } else { Edge::Falling };
            self.events.push(EdgeEvent::new(self.cursor, edge));
            self.level = level;
        }
    }

    /// Append a run of high bits (the line-idle pattern).
    pub fn high_bits(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            self.bit(true);
        }
        self
    }

    /// Append a sync gap of 16 high bits.
    pub fn sync_gap(&mut self) -> &mut Self {
        self.high_bits(SYNC_BIT_COUNT as usize)
    }

    /// Append one byte as a DL-bus line frame: start bit, eight data bits
    /// LSB first, stop bit.
    pub fn byte(&mut self, value: u8) -> &mut Self {
        self.bit(false);
        for i in 0..8 {
            self.bit(value & (1 << i) != 0);
        }
        self.bit(true);
        self
    }

    /// Append a whole frame's bytes.
    pub fn frame(&mut self, bytes: &[u8]) -> &mut Self {
        for &byte in bytes {
            self.byte(byte);
        }
        self
    }

    /// Idle long enough for clock discovery, then present one low/high
    /// bit pair the decoder locks onto before the first sync gap.
    ///
    /// A run of high bits yields two edges per bit, so half the sample
    /// count plus some slack covers discovery; the trailing pair puts a
    /// falling edge at full-period spacing, which pins the bit phase.
    pub fn calibration_preamble(&mut self) -> &mut Self {
        self.high_bits(CLOCK_SAMPLES / 2 + 30);
        self.bit(false);
        self.bit(true);
        self
    }

    /// Number of edges scheduled so far.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no edges have been scheduled yet.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Finish the signal and take the edge schedule.
    pub fn finish(&mut self) -> Vec<EdgeEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Replays a pre-built edge schedule through the source contract.
#[derive(Debug)]
pub struct EmulatedSource;

impl EmulatedSource {
    /// Spawn a producer that delivers `events` in order and then closes
    /// the stream, which drains the pipeline cleanly.
    pub fn spawn(events: Vec<EdgeEvent>, buffer: usize) -> mpsc::Receiver<SourceEvent> {
        let (tx, rx) = mpsc::channel(buffer);
        tokio::spawn(async move {
            for event in events {
                if tx.send(SourceEvent::Edge(event)).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}
