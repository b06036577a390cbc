//! Device frame layouts and dispatch.
//!
//! The DL bus carries frames whose layout depends on the controller model.
//! [`DeviceType`] is the tagged dispatch over the supported layouts and
//! [`DeviceFrame`] over their parsed measurements; supporting another
//! controller means adding an arm to each, not a new interface.

pub mod uvr42;

pub use uvr42::Uvr42Frame;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::error::FrameError;

/// Lowest plausible temperature in degC.
pub(crate) const TEMP_MIN: f64 = -50.0;

/// Highest plausible temperature in degC.
pub(crate) const TEMP_MAX: f64 = 300.0;

/// Error returned when a datalogger type name is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported datalogger type: {0:?}")]
pub struct UnknownDeviceType(pub String);

/// Supported controller models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Technische Alternative UVR42.
    Uvr42,
}

impl DeviceType {
    /// Raw frame length declared by the device layout.
    pub fn frame_len(&self) -> usize {
        match self {
            DeviceType::Uvr42 => uvr42::FRAME_LEN,
        }
    }

    /// Device id carried in the first frame byte.
    pub fn device_id(&self) -> u8 {
        match self {
            DeviceType::Uvr42 => uvr42::DEVICE_ID,
        }
    }

    /// Decode and validate a raw frame captured between two sync gaps,
    /// stamping it with the given wall time.
    pub fn parse(&self, raw: &[u8], timestamp: DateTime<Utc>) -> Result<DeviceFrame, FrameError> {
        match self {
            DeviceType::Uvr42 => uvr42::parse(raw, timestamp).map(DeviceFrame::Uvr42),
        }
    }
}

impl FromStr for DeviceType {
    type Err = UnknownDeviceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uvr42" => Ok(DeviceType::Uvr42),
            other => Err(UnknownDeviceType(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Uvr42 => write!(f, "uvr42"),
        }
    }
}

/// A validated measurement frame from any supported device.
///
/// Serializes to the device's published payload shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeviceFrame {
    /// Measurement frame of a UVR42 controller.
    Uvr42(Uvr42Frame),
}

impl DeviceFrame {
    /// Wall time at which the frame was parsed.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DeviceFrame::Uvr42(frame) => frame.timestamp,
        }
    }

    /// Largest absolute temperature difference to an earlier frame, in
    /// Kelvin.
    pub fn max_temperature_delta(&self, earlier: &DeviceFrame) -> f64 {
        match (self, earlier) {
            (DeviceFrame::Uvr42(current), DeviceFrame::Uvr42(earlier)) => [
                (current.temperature1 - earlier.temperature1).abs(),
                (current.temperature2 - earlier.temperature2).abs(),
                (current.temperature3 - earlier.temperature3).abs(),
                (current.temperature4 - earlier.temperature4).abs(),
            ]
            .into_iter()
            .fold(0.0, f64::max),
        }
    }

    /// Whether any switched output differs from an earlier frame.
    pub fn outputs_changed(&self, earlier: &DeviceFrame) -> bool {
        match (self, earlier) {
            (DeviceFrame::Uvr42(current), DeviceFrame::Uvr42(earlier)) => {
                current.out1 != earlier.out1 || current.out2 != earlier.out2
            }
        }
    }
}
