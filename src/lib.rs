//! # dlbus - Self-calibrating DL-bus decoder
//!
//! Decodes the single-wire "DL bus" of Technische Alternative heating
//! controllers from raw GPIO edge events into validated measurement
//! frames.
//!
//! ## Key Features
//!
//! - **Self-calibrating clock**: the Manchester decoder measures the bus
//!   clock from the signal itself instead of trusting a compiled-in rate
//! - **Layered recovery**: every stage resynchronizes locally; a bad bit
//!   never corrupts more than one frame
//! - **Backend-agnostic edge sources**: the Linux GPIO character device
//!   and an emulation backend share one contract
//! - **Change-gated publication**: a delta gate throttles downstream
//!   publishing to heartbeats, temperature movement and output changes
//!
//! ## Quick Start
//!
//! ```rust
//! use dlbus::emulation::SignalBuilder;
//! use dlbus::framer::DlbusFramer;
//! use dlbus::manchester::ManchesterDecoder;
//! use std::time::Duration;
//!
//! // Synthesize the wire signal of one UVR42 frame at a 50 Hz clock.
//! let raw = [0x10, 0x2C, 0x01, 0x58, 0x02, 0x84, 0x03, 0xB0, 0x04, 0x60];
//! let mut signal = SignalBuilder::new(Duration::from_millis(10));
//! signal
//!     .calibration_preamble()
//!     .sync_gap()
//!     .frame(&raw)
//!     .sync_gap();
//!
//! // Edge events -> bits -> framed bytes.
//! let mut decoder = ManchesterDecoder::new();
//! let mut framer = DlbusFramer::new();
//! let mut frames = Vec::new();
//! for event in signal.finish() {
//!     if let Some(bit) = decoder.push(event) {
//!         if let Some(frame) = framer.push(bit) {
//!             frames.push(frame);
//!         }
//!     }
//! }
//! assert_eq!(frames, vec![raw.to_vec()]);
//! ```
//!
//! ## Modules
//!
//! - [`event`]: edge events and bit symbols
//! - [`manchester`]: self-calibrating Manchester decoder
//! - [`framer`]: DL-bus 8N1 framer with sync-gap alignment
//! - [`device`]: device frame layouts and the UVR42 parser
//! - [`gate`]: publication-throttling delta gate
//! - [`source`]: GPIO edge source and debouncing
//! - [`emulation`]: synthetic edge source for tests and dry runs
//! - [`pipeline`]: task wiring, buffers and stall supervision

// Modules
pub mod device;
pub mod emulation;
pub mod error;
pub mod event;
pub mod framer;
pub mod gate;
pub mod manchester;
pub mod pipeline;
pub mod source;

// Re-exports for convenient access
pub use device::{DeviceFrame, DeviceType, Uvr42Frame};
pub use error::{DlbusError, FrameError, Result, SourceError};
pub use event::{Bit, Edge, EdgeEvent};
pub use framer::DlbusFramer;
pub use gate::{DeltaGate, GateConfig};
pub use manchester::ManchesterDecoder;
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats};
pub use source::{SourceEvent, Terminator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Nominal bus clock in Hz; informational only, the decoder measures the
/// real clock per run.
pub const NOMINAL_CLOCK_HZ: f64 = 50.0;
