//! Publication throttling.
//!
//! The bus repeats its frame continuously, so publishing every decode
//! would flood the broker with duplicates. The delta gate lets a frame
//! through when it is the first one, when a switched output changed, when
//! a temperature moved by at least the configured delta, or when the
//! heartbeat interval elapsed since the last publication.

use std::time::Duration;

use tracing::debug;

use crate::device::DeviceFrame;

/// Delta gate thresholds.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Heartbeat interval; zero publishes only on change.
    pub interval: Duration,
    /// Minimum temperature movement in Kelvin; zero publishes only on
    /// heartbeat.
    pub delta_kelvin: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            delta_kelvin: 0.5,
        }
    }
}

/// Change-detection gate over the stream of parsed frames.
#[derive(Debug)]
pub struct DeltaGate {
    config: GateConfig,
    /// Reference frame of the last accepted publication.
    last_published: Option<DeviceFrame>,
}

impl DeltaGate {
    /// Create a gate that accepts its first frame unconditionally.
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            last_published: None,
        }
    }

    /// Decide whether `frame` should be published.
    ///
    /// On acceptance the reference is replaced before the caller hands
    /// the frame to the publisher, so a failed publish cannot cause a
    /// duplicate later.
    pub fn offer(&mut self, frame: &DeviceFrame) -> bool {
        let publish = match &self.last_published {
            None => true,
            Some(last) => {
                let elapsed = (frame.timestamp() - last.timestamp())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let heartbeat_due =
                    !self.config.interval.is_zero() && elapsed >= self.config.interval;
                let delta_due = self.config.delta_kelvin > 0.0
                    && frame.max_temperature_delta(last) >= self.config.delta_kelvin;

                heartbeat_due || delta_due || frame.outputs_changed(last)
            }
        };

        if publish {
            debug!("frame passed the delta gate");
            self.last_published = Some(frame.clone());
        }
        publish
    }

    /// Reference frame of the last accepted publication.
    pub fn last_published(&self) -> Option<&DeviceFrame> {
        self.last_published.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Uvr42Frame;
    use chrono::{TimeZone, Utc};

    /// Frame with the given seconds offset from a fixed origin.
    fn frame_at(offset_secs: i64) -> DeviceFrame {
        let origin = Utc.with_ymd_and_hms(2022, 4, 2, 12, 0, 0).unwrap();
        DeviceFrame::Uvr42(Uvr42Frame {
            timestamp: origin + chrono::Duration::seconds(offset_secs),
            temperature1: 30.0,
            temperature2: 60.0,
            temperature3: 90.0,
            temperature4: 120.0,
            out1: true,
            out2: true,
        })
    }

    fn with_temperature1(frame: DeviceFrame, value: f64) -> DeviceFrame {
        let DeviceFrame::Uvr42(mut inner) = frame;
        inner.temperature1 = value;
        DeviceFrame::Uvr42(inner)
    }

    fn with_out1(frame: DeviceFrame, value: bool) -> DeviceFrame {
        let DeviceFrame::Uvr42(mut inner) = frame;
        inner.out1 = value;
        DeviceFrame::Uvr42(inner)
    }

    fn gate(interval_secs: u64, delta_kelvin: f64) -> DeltaGate {
        DeltaGate::new(GateConfig {
            interval: Duration::from_secs(interval_secs),
            delta_kelvin,
        })
    }

    #[test]
    fn test_first_frame_always_publishes() {
        let mut gate = gate(60, 0.5);
        assert!(gate.offer(&frame_at(0)));
        assert!(gate.last_published().is_some());
    }

    #[test]
    fn test_identical_frames_within_interval_suppressed() {
        // The heartbeat/identical-values scenario: second frame 2 s later
        // must not publish, a third one 61 s after the first must.
        let mut gate = gate(60, 0.5);
        assert!(gate.offer(&frame_at(0)));
        assert!(!gate.offer(&frame_at(2)));
        assert!(gate.offer(&frame_at(61)));
    }

    #[test]
    fn test_delta_threshold_is_inclusive() {
        let mut gate = gate(600, 0.5);
        assert!(gate.offer(&frame_at(0)));
        // 0.4 K below the threshold: suppressed.
        assert!(!gate.offer(&with_temperature1(frame_at(1), 30.4)));
        // Exactly 0.5 K from the last published reference (30.0): passes.
        assert!(gate.offer(&with_temperature1(frame_at(2), 30.5)));
    }

    #[test]
    fn test_reference_advances_only_on_publication() {
        let mut gate = gate(600, 1.0);
        assert!(gate.offer(&frame_at(0)));
        // Creeping by 0.6 K per frame never crosses 1.0 K against a
        // moving reference; against the fixed reference it does.
        assert!(!gate.offer(&with_temperature1(frame_at(1), 30.6)));
        assert!(gate.offer(&with_temperature1(frame_at(2), 31.2)));
    }

    #[test]
    fn test_output_change_always_publishes() {
        let mut gate = gate(600, 10.0);
        assert!(gate.offer(&frame_at(0)));
        assert!(gate.offer(&with_out1(frame_at(1), false)));
        assert!(gate.offer(&with_out1(frame_at(2), true)));
    }

    #[test]
    fn test_zero_interval_disables_heartbeat() {
        let mut gate = gate(0, 0.5);
        assert!(gate.offer(&frame_at(0)));
        // Hours later with identical values: still suppressed.
        assert!(!gate.offer(&frame_at(7200)));
        // A value change still passes.
        assert!(gate.offer(&with_temperature1(frame_at(7201), 31.0)));
    }

    #[test]
    fn test_zero_delta_disables_change_detection() {
        let mut gate = gate(60, 0.0);
        assert!(gate.offer(&frame_at(0)));
        // Large temperature swing without heartbeat or output change.
        assert!(!gate.offer(&with_temperature1(frame_at(1), 90.0)));
        // Heartbeat still fires.
        assert!(gate.offer(&frame_at(61)));
    }
}
