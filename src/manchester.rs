//! Software decoder for Manchester-coded edge streams.
//!
//! Manchester encoding carries one bit per bit period as a guaranteed
//! mid-bit transition; on the DL bus a falling mid-bit edge encodes a
//! logical 1 and a rising mid-bit edge a logical 0 (the line idles high).
//! Edges therefore arrive at two kinds of spacing: a half-bit interval (T)
//! between a bit boundary and the mid-bit point, and a full-bit interval
//! (2T) where no boundary transition is needed.
//!
//! The bus clock is nominally 50 Hz, but nothing is compiled in: the
//! decoder measures the clock from the first 500 inter-event intervals of
//! each run and derives its classification tolerance from the result.

use std::time::Duration;

use tracing::{info, warn};

use crate::event::{Bit, Edge, EdgeEvent};

/// Tolerance factor applied to the half-bit period when classifying
/// intervals.
pub const SENSITIVITY_FACTOR: f64 = 0.6;

/// Number of inter-event intervals sampled to discover the clock.
pub const CLOCK_SAMPLES: usize = 500;

/// Decoding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Measuring inter-event intervals to derive the bit periods.
    DiscoverClock,
    /// Clock known; waiting for an unambiguous mid-bit edge.
    Synchronizing,
    /// Locked to the clock; decoding edges into bits.
    Synchronized,
}

/// Clock parameters derived from the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockEstimate {
    /// Half-bit period T (bit boundary to mid-bit point).
    pub half_bit: Duration,
    /// Full bit period, nominally 2 * T.
    pub full_bit: Duration,
}

impl ClockEstimate {
    /// Clock frequency in Hz.
    pub fn frequency(&self) -> f64 {
        1.0 / self.full_bit.as_secs_f64()
    }
}

/// Self-calibrating Manchester decoder.
///
/// Feed it edge events in strict timestamp order; it emits one [`Bit`]
/// per decoded bit period, or [`Bit::Invalid`] when the edge spacing
/// violates the code and downstream must resynchronize.
#[derive(Debug)]
pub struct ManchesterDecoder {
    state: State,
    /// Inter-event interval samples collected during clock discovery.
    samples: Vec<Duration>,
    /// Timestamp of the last observed event.
    last_timestamp: Option<Duration>,
    /// Discovered half-bit period T.
    half_bit: Duration,
    /// Discovered full-bit period.
    full_bit: Duration,
    /// Classification tolerance, `SENSITIVITY_FACTOR * T`.
    sensitivity: Duration,
    /// Start of the current bit period.
    reference: Duration,
}

impl ManchesterDecoder {
    /// Create a decoder; clock discovery starts with the first edges.
    pub fn new() -> Self {
        info!("clock discovery started");
        Self {
            state: State::DiscoverClock,
            samples: Vec::with_capacity(CLOCK_SAMPLES),
            last_timestamp: None,
            half_bit: Duration::ZERO,
            full_bit: Duration::ZERO,
            sensitivity: Duration::ZERO,
            reference: Duration::ZERO,
        }
    }

    /// Feed one edge event.
    ///
    /// Returns the decoded bit when the edge completes a bit period,
    /// [`Bit::Invalid`] on a coding violation, `None` otherwise.
    pub fn push(&mut self, event: EdgeEvent) -> Option<Bit> {
        let elapsed = match self.last_timestamp {
            Some(last) => {
                debug_assert!(
                    event.timestamp > last,
                    "edge timestamps must be strictly monotonic"
                );
                event.timestamp.saturating_sub(last)
            }
            None => {
                self.last_timestamp = Some(event.timestamp);
                return None;
            }
        };
        self.last_timestamp = Some(event.timestamp);

        match self.state {
            State::DiscoverClock => {
                self.collect_sample(elapsed);
                None
            }
            State::Synchronizing => {
                self.synchronize(event, elapsed);
                None
            }
            State::Synchronized => self.decode(event),
        }
    }

    /// Restart clock discovery from scratch.
    ///
    /// Used by the stall supervisor: after a signal loss the old clock
    /// measurement is not trusted.
    pub fn reset(&mut self) {
        self.state = State::DiscoverClock;
        self.samples.clear();
        self.last_timestamp = None;
        self.half_bit = Duration::ZERO;
        self.full_bit = Duration::ZERO;
        self.sensitivity = Duration::ZERO;
        self.reference = Duration::ZERO;
        info!("clock discovery started");
    }

    /// Drop the bit-phase lock but keep the discovered clock.
    ///
    /// Used when edges were lost upstream: the clock is still valid but
    /// the current phase is not.
    pub fn desynchronize(&mut self) {
        if self.state == State::Synchronized {
            self.state = State::Synchronizing;
        }
    }

    /// The discovered clock, once discovery has finished.
    pub fn clock(&self) -> Option<ClockEstimate> {
        match self.state {
            State::DiscoverClock => None,
            _ => Some(ClockEstimate {
                half_bit: self.half_bit,
                full_bit: self.full_bit,
            }),
        }
    }

    /// Whether the decoder is locked to the bit phase.
    pub fn is_synchronized(&self) -> bool {
        self.state == State::Synchronized
    }

    /// Whether the decoder is freshly created or reset and has seen no
    /// signal at all.
    pub fn is_idle(&self) -> bool {
        self.state == State::DiscoverClock && self.samples.is_empty()
    }

    /// Collect one discovery sample; on the 500th, derive the clock.
    fn collect_sample(&mut self, interval: Duration) {
        self.samples.push(interval);
        if self.samples.len() < CLOCK_SAMPLES {
            return;
        }

        let (half_bit, full_bit) = estimate_bit_periods(&mut self.samples);
        self.half_bit = half_bit;
        self.full_bit = full_bit;
        self.sensitivity = half_bit.mul_f64(SENSITIVITY_FACTOR);
        self.samples = Vec::new();
        self.state = State::Synchronizing;

        info!(
            "clock discovery finished: {:.1} Hz (T = {:?}, sensitivity = {:?})",
            1.0 / full_bit.as_secs_f64(),
            self.half_bit,
            self.sensitivity
        );
    }

    /// Wait for a falling edge a full bit period after the previous edge:
    /// that is the mid-bit transition of a logical 1 and pins the phase.
    fn synchronize(&mut self, event: EdgeEvent, elapsed: Duration) {
        if self.classify(elapsed) == 2 && event.edge == Edge::Falling {
            self.reference = event.timestamp.saturating_sub(self.half_bit);
            self.state = State::Synchronized;
            info!("synchronized with the data clock");
        }
    }

    /// Decode one edge while locked to the bit phase.
    ///
    /// Measured from the start of the current bit period, an edge lands at
    /// interval 1 (mid-bit after a boundary transition), 2 (boundary
    /// transition between equal bits) or 3 (mid-bit with no boundary
    /// transition). Intervals 1 and 3 complete a bit; anything else is a
    /// coding violation.
    fn decode(&mut self, event: EdgeEvent) -> Option<Bit> {
        let elapsed = event.timestamp.saturating_sub(self.reference);
        match self.classify(elapsed) {
            2 => {
                self.reference = event.timestamp;
                None
            }
            1 | 3 => {
                self.reference = event.timestamp.saturating_sub(self.half_bit);
                Some(match event.edge {
                    Edge::Falling => Bit::High,
                    Edge::Rising => Bit::Low,
                })
            }
            interval => {
                warn!("invalid interval {interval}, resynchronizing");
                self.state = State::Synchronizing;
                Some(Bit::Invalid)
            }
        }
    }

    /// Classify an elapsed duration as a multiple of the half-bit period,
    /// shifted by the sensitivity tolerance. Division truncates toward
    /// zero, so anything shorter than `T + sensitivity` maps to 1.
    fn classify(&self, elapsed: Duration) -> i64 {
        let t = self.half_bit.as_nanos() as i64;
        let shifted = elapsed.as_nanos() as i64 - self.sensitivity.as_nanos() as i64;
        shifted / t + 1
    }
}

impl Default for ManchesterDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the half-bit and full-bit periods from interval samples.
///
/// The samples are sorted ascending and stripped of their extremes, so the
/// smallest remaining interval must be a half-bit period and seeds the
/// estimate. Walking the rest in order, anything longer than 1.5x the
/// running half-bit average is averaged into the full-bit estimate,
/// everything else into the half-bit estimate.
fn estimate_bit_periods(samples: &mut [Duration]) -> (Duration, Duration) {
    samples.sort_unstable();
    let trimmed = &samples[1..samples.len() - 1];

    let mut half_bit = trimmed[0];
    let mut full_bit = half_bit * 2;

    let mut half_sum = Duration::ZERO;
    let mut half_count = 0u32;
    let mut full_sum = Duration::ZERO;
    let mut full_count = 0u32;

    for &interval in trimmed {
        if interval > half_bit + half_bit / 2 {
            full_sum += interval;
            full_count += 1;
            full_bit = full_sum / full_count;
        } else {
            half_sum += interval;
            half_count += 1;
            half_bit = half_sum / half_count;
        }
    }

    (half_bit, full_bit)
}
