//! DL-bus line framer.
//!
//! Reassembles framed bytes from the decoded bit stream. Each byte travels
//! as a 10-symbol line frame: one start bit (low), eight data bits LSB
//! first, one stop bit (high). Between two controller frames the line
//! idles high for 16 bit periods; that sync gap is the framer's only
//! alignment signal.

use tracing::{debug, warn};

use crate::event::Bit;

/// Number of consecutive high bits that form the inter-frame sync gap.
pub const SYNC_BIT_COUNT: u32 = 16;

/// Framer state.
///
/// The receive buffer lives inside `Receiving`, so only an in-progress
/// reception can touch it; completion moves it out to the caller.
#[derive(Debug)]
enum State {
    /// Counting consecutive high bits until a sync gap is seen.
    AwaitingSync {
        /// Consecutive high bits observed so far.
        high_bits: u32,
    },
    /// Assembling framed bytes between two sync gaps.
    Receiving {
        /// Position within the current line frame; 0 expects a start bit,
        /// 1..=8 are data bits, 9 expects the stop bit.
        bit_index: u8,
        /// Data bits of the byte currently being assembled.
        register: u8,
        /// Completed bytes of the frame.
        buffer: Vec<u8>,
    },
}

/// Reassembles DL-bus frames from a Manchester bit stream.
#[derive(Debug)]
pub struct DlbusFramer {
    state: State,
}

impl DlbusFramer {
    /// Create a framer waiting for its first sync gap.
    pub fn new() -> Self {
        Self {
            state: State::AwaitingSync { high_bits: 0 },
        }
    }

    /// Discard any partial frame and wait for the next sync gap.
    pub fn resync(&mut self) {
        self.state = State::AwaitingSync { high_bits: 0 };
    }

    /// Feed one bit symbol.
    ///
    /// Returns the completed frame when this bit ends one: the first high
    /// bit where a start bit was expected marks the beginning of the next
    /// sync gap and closes the frame. Framing errors and [`Bit::Invalid`]
    /// discard the partial frame.
    pub fn push(&mut self, bit: Bit) -> Option<Vec<u8>> {
        if bit == Bit::Invalid {
            if matches!(self.state, State::Receiving { .. }) {
                warn!("invalid bit in stream, waiting for sync gap");
            }
            self.resync();
            return None;
        }

        let mut completed = None;
        let state = std::mem::replace(&mut self.state, State::AwaitingSync { high_bits: 0 });

        self.state = match state {
            State::AwaitingSync { high_bits } => match bit {
                Bit::High => State::AwaitingSync {
                    high_bits: high_bits + 1,
                },
                // The low ending a full gap is the start bit of the first byte.
                Bit::Low if high_bits >= SYNC_BIT_COUNT => State::Receiving {
                    bit_index: 1,
                    register: 0,
                    buffer: Vec::new(),
                },
                Bit::Low => State::AwaitingSync { high_bits: 0 },
                Bit::Invalid => unreachable!("handled above"),
            },

            State::Receiving {
                bit_index,
                register,
                mut buffer,
            } => match (bit_index, bit) {
                // Missing start bit: the frame is complete and this high
                // bit already counts toward the next sync gap.
                (0, Bit::High) => {
                    debug!("frame complete: {} bytes", buffer.len());
                    if !buffer.is_empty() {
                        completed = Some(buffer);
                    }
                    State::AwaitingSync { high_bits: 1 }
                }
                // Start bit of the next byte.
                (0, Bit::Low) => State::Receiving {
                    bit_index: 1,
                    register: 0,
                    buffer,
                },
                // Stop bit accepted; the byte joins the frame.
                (9, Bit::High) => {
                    buffer.push(register);
                    State::Receiving {
                        bit_index: 0,
                        register,
                        buffer,
                    }
                }
                (9, Bit::Low) => {
                    warn!("missing stop bit, waiting for sync gap");
                    State::AwaitingSync { high_bits: 0 }
                }
                // Data bit, LSB first.
                (index, bit) => {
                    let register = if bit == Bit::High {
                        register | 1 << (index - 1)
                    } else {
                        register
                    };
                    State::Receiving {
                        bit_index: index + 1,
                        register,
                        buffer,
                    }
                }
            },
        };

        completed
    }
}

impl Default for DlbusFramer {
    fn default() -> Self {
        Self::new()
    }
}
