//! UVR42 frame layout.
//!
//! A UVR42 controller repeats a 10-byte frame on the bus:
//!
//! ```text
//! [0x10] [t1 lo] [t1 hi] [t2 lo] [t2 hi] [t3 lo] [t3 hi] [t4 lo] [t4 hi] [flags]
//! ```
//!
//! Temperatures are signed 16-bit little-endian values in tenths of a
//! degree Celsius; flag bits 5 and 6 carry the switched outputs.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::{TEMP_MAX, TEMP_MIN};
use crate::error::FrameError;

/// Device id of the UVR42 controller.
pub const DEVICE_ID: u8 = 0x10;

/// Raw frame length of the UVR42 layout.
pub const FRAME_LEN: usize = 10;

/// Flag-byte masks of the switched outputs.
const OUT1_MASK: u8 = 1 << 5;
const OUT2_MASK: u8 = 1 << 6;

/// One validated measurement frame of a UVR42 controller.
///
/// Serializes to the published JSON payload shape: RFC 3339 timestamp,
/// temperatures in tenths of a degree, plain booleans for the outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Uvr42Frame {
    /// Wall time at which the frame was parsed.
    #[serde(rename = "TimeStamp")]
    pub timestamp: DateTime<Utc>,
    /// Sensor 1 temperature in degC.
    #[serde(rename = "Temperature1", serialize_with = "tenths")]
    pub temperature1: f64,
    /// Sensor 2 temperature in degC.
    #[serde(rename = "Temperature2", serialize_with = "tenths")]
    pub temperature2: f64,
    /// Sensor 3 temperature in degC.
    #[serde(rename = "Temperature3", serialize_with = "tenths")]
    pub temperature3: f64,
    /// Sensor 4 temperature in degC.
    #[serde(rename = "Temperature4", serialize_with = "tenths")]
    pub temperature4: f64,
    /// State of output 1.
    #[serde(rename = "Out1")]
    pub out1: bool,
    /// State of output 2.
    #[serde(rename = "Out2")]
    pub out2: bool,
}

/// Serialize a temperature rounded to one decimal digit.
fn tenths<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 10.0).round() / 10.0)
}

/// Decode and validate a raw UVR42 frame.
pub fn parse(raw: &[u8], timestamp: DateTime<Utc>) -> Result<Uvr42Frame, FrameError> {
    if raw.len() != FRAME_LEN {
        return Err(FrameError::InvalidSize {
            expected: FRAME_LEN,
            actual: raw.len(),
        });
    }
    if raw[0] != DEVICE_ID {
        return Err(FrameError::UnsupportedDevice(raw[0]));
    }

    let frame = Uvr42Frame {
        timestamp,
        temperature1: temperature(raw, 1),
        temperature2: temperature(raw, 3),
        temperature3: temperature(raw, 5),
        temperature4: temperature(raw, 7),
        out1: raw[9] & OUT1_MASK != 0,
        out2: raw[9] & OUT2_MASK != 0,
    };

    let channels = [
        (1u8, frame.temperature1),
        (2, frame.temperature2),
        (3, frame.temperature3),
        (4, frame.temperature4),
    ];
    for (channel, value) in channels {
        if !(TEMP_MIN..=TEMP_MAX).contains(&value) {
            return Err(FrameError::InvalidTemperature { channel, value });
        }
    }

    Ok(frame)
}

/// Signed 16-bit little-endian tenths of a degree at `offset`.
fn temperature(raw: &[u8], offset: usize) -> f64 {
    i16::from_le_bytes([raw[offset], raw[offset + 1]]) as f64 / 10.0
}
