// dlbus - Self-calibrating decoder pipeline for the TA DL bus
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Edge sources.
//!
//! An edge source watches one line and feeds timestamped transitions into
//! a bounded channel. The GPIO backend reads the Linux character device on
//! a dedicated thread whose only job is timestamped enqueue; the emulation
//! backend ([`crate::emulation`]) replays a synthetic schedule through the
//! same contract, so downstream stages cannot tell them apart.

use std::str::FromStr;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::event::EdgeEvent;

/// Default capacity of the edge hand-off buffer.
pub const EDGE_BUFFER_SIZE: usize = 1024;

/// Unit carried through the edge buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// A debounced level transition.
    Edge(EdgeEvent),
    /// Events were lost because the buffer was full; the decoder must
    /// treat the stream as interrupted.
    Overflow,
}

/// Line terminator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminator {
    /// Internal pull-up resistor enabled.
    PullUp,
    /// Internal pull-down resistor enabled.
    PullDown,
    /// Line floats; termination is external.
    #[default]
    None,
}

impl FromStr for Terminator {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pullup" => Ok(Terminator::PullUp),
            "pulldown" => Ok(Terminator::PullDown),
            "none" => Ok(Terminator::None),
            other => Err(SourceError::InvalidTerminator(other.to_string())),
        }
    }
}

/// Drops events that follow the previous forwarded event too closely.
///
/// The window must stay well below half a bit period (at most a tenth of
/// it is recommended); a zero window forwards every event.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_forwarded: Option<Duration>,
}

impl Debouncer {
    /// Create a debouncer with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_forwarded: None,
        }
    }

    /// Whether an event at `timestamp` passes the debounce window.
    pub fn accept(&mut self, timestamp: Duration) -> bool {
        if self.window.is_zero() {
            return true;
        }
        match self.last_forwarded {
            Some(last) if timestamp.saturating_sub(last) < self.window => false,
            _ => {
                self.last_forwarded = Some(timestamp);
                true
            }
        }
    }
}

/// Producer side of the edge buffer.
///
/// Enqueueing never blocks the producer: when the buffer is full the
/// event is dropped and an [`SourceEvent::Overflow`] marker is delivered
/// as soon as capacity frees, so the decoder resynchronizes instead of
/// decoding a silently gapped stream.
#[derive(Debug)]
pub struct EdgeSender {
    tx: mpsc::Sender<SourceEvent>,
    overflowed: bool,
}

impl EdgeSender {
    /// Wrap the sending half of an edge channel.
    pub fn new(tx: mpsc::Sender<SourceEvent>) -> Self {
        Self {
            tx,
            overflowed: false,
        }
    }

    /// Enqueue one edge event without ever blocking.
    pub fn send(&mut self, event: EdgeEvent) {
        if self.overflowed {
            match self.tx.try_send(SourceEvent::Overflow) {
                Ok(()) => self.overflowed = false,
                // Still full; this edge is lost with the rest of the burst.
                Err(_) => return,
            }
        }
        if self.tx.try_send(SourceEvent::Edge(event)).is_err() {
            self.overflowed = true;
        }
    }

    /// Whether the consumer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(target_os = "linux")]
pub use gpio::{GpioConfig, GpioSource};

#[cfg(target_os = "linux")]
mod gpio {
    use std::thread;
    use std::time::Duration;

    use gpio_cdev::{Chip, EventRequestFlags, EventType, LineRequestFlags};
    use tokio::sync::mpsc;
    use tracing::{error, info};

    use super::{Debouncer, EdgeSender, SourceEvent, Terminator, EDGE_BUFFER_SIZE};
    use crate::error::SourceError;
    use crate::event::{Edge, EdgeEvent};

    /// GPIO edge source configuration.
    #[derive(Debug, Clone)]
    pub struct GpioConfig {
        /// GPIO character device path.
        pub chip: String,
        /// Line offset the bus is wired to.
        pub line: u32,
        /// Line terminator.
        pub terminator: Terminator,
        /// Debounce window; zero forwards every edge.
        pub debounce: Duration,
        /// Capacity of the edge buffer.
        pub buffer: usize,
    }

    impl Default for GpioConfig {
        fn default() -> Self {
            Self {
                chip: "/dev/gpiochip0".to_string(),
                line: 4,
                terminator: Terminator::None,
                debounce: Duration::ZERO,
                buffer: EDGE_BUFFER_SIZE,
            }
        }
    }

    /// Edge source backed by the Linux GPIO character device.
    pub struct GpioSource;

    impl GpioSource {
        /// Request the line and start the reader thread.
        ///
        /// The returned receiver yields events until the line handle is
        /// lost; the thread also stops once the receiver is dropped.
        pub fn open(config: &GpioConfig) -> Result<mpsc::Receiver<SourceEvent>, SourceError> {
            let mut chip =
                Chip::new(&config.chip).map_err(|e| SourceError::Gpio(e.to_string()))?;
            let line = chip
                .get_line(config.line)
                .map_err(|e| SourceError::Gpio(e.to_string()))?;
            let events = line
                .events(
                    request_flags(config.terminator),
                    EventRequestFlags::BOTH_EDGES,
                    "dlbus",
                )
                .map_err(|e| SourceError::Gpio(e.to_string()))?;

            info!(
                "watching {} line {} (terminator {:?}, debounce {:?})",
                config.chip, config.line, config.terminator, config.debounce
            );

            let (tx, rx) = mpsc::channel(config.buffer);
            let mut sender = EdgeSender::new(tx);
            let mut debouncer = Debouncer::new(config.debounce);

            thread::Builder::new()
                .name("dlbus-gpio".to_string())
                .spawn(move || {
                    for event in events {
                        if sender.is_closed() {
                            break;
                        }
                        let event = match event {
                            Ok(event) => event,
                            Err(err) => {
                                error!("gpio event stream failed: {err}");
                                break;
                            }
                        };
                        let timestamp = Duration::from_nanos(event.timestamp());
                        if !debouncer.accept(timestamp) {
                            continue;
                        }
                        let edge = match event.event_type() {
                            EventType::RisingEdge => Edge::Rising,
                            EventType::FallingEdge => Edge::Falling,
                        };
                        sender.send(EdgeEvent::new(timestamp, edge));
                    }
                    info!("gpio reader stopped");
                })
                .map_err(|e| SourceError::Thread(e.to_string()))?;

            Ok(rx)
        }
    }

    /// Map the terminator to character-device request flags.
    fn request_flags(terminator: Terminator) -> LineRequestFlags {
        match terminator {
            Terminator::PullUp => LineRequestFlags::INPUT | LineRequestFlags::BIAS_PULL_UP,
            Terminator::PullDown => LineRequestFlags::INPUT | LineRequestFlags::BIAS_PULL_DOWN,
            Terminator::None => LineRequestFlags::INPUT,
        }
    }
}
