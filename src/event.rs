//! Wire-level vocabulary of the DL bus.
//!
//! This module defines the units exchanged between pipeline stages:
//! - Edge events observed on the line
//! - Bit symbols produced by the Manchester decoder

use std::fmt;
use std::time::Duration;

/// Polarity of a level transition on the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Inactive to active transition (low to high).
    Rising,
    /// Active to inactive transition (high to low).
    Falling,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Rising => write!(f, "rising"),
            Edge::Falling => write!(f, "falling"),
        }
    }
}

/// A single level transition observed on the line.
///
/// Timestamps are monotonic durations since an arbitrary origin and are
/// strictly increasing within one event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Time the transition was detected.
    pub timestamp: Duration,
    /// Polarity of the transition.
    pub edge: Edge,
}

impl EdgeEvent {
    /// Create a new edge event.
    pub fn new(timestamp: Duration, edge: Edge) -> Self {
        Self { timestamp, edge }
    }
}

/// One decoded Manchester symbol.
///
/// `Invalid` is a first-class symbol: it tells downstream consumers to
/// discard partial state and wait for the next sync gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bit {
    /// Logical 1.
    High,
    /// Logical 0.
    Low,
    /// Decoding violation; downstream must resynchronize.
    Invalid,
}

impl Bit {
    /// Check whether the symbol carries a data value.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Bit::Invalid)
    }
}

impl fmt::Display for Bit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bit::High => write!(f, "1"),
            Bit::Low => write!(f, "0"),
            Bit::Invalid => write!(f, "?"),
        }
    }
}
