//! LiDAR packet parser: firing blocks to accumulated rotation frames.
//!
//! Packets carry 12 fixed-size firing blocks of 32 channels each. Samples
//! accumulate until the azimuth wraps (one full rotation), at which point the
//! frame is flushed through the geometry kernel.

use anyhow::Result;

use crate::parsers::calibration::{profile_for_model, CalibrationProfile};
use crate::parsers::geometry::transform_points;

const MIN_PACKET_LEN: usize = 1206;
const MODEL_CODE_OFFSET: usize = 1205;
const RETURN_MODE_OFFSET: usize = 1204;
const DUAL_RETURN_MODE: u8 = 57;
const FIRINGS_PER_PACKET: usize = 12;
const FIRING_BLOCK_LEN: usize = 100;
const CHANNELS_PER_FIRING: usize = 32;
const BLOCK_FLAG: [u8; 2] = [0xff, 0xee];
const DISTANCE_UNIT_M: f32 = 0.002;

/// One flushed rotation, already transformed to Cartesian points + colors.
#[derive(Debug, Clone, PartialEq)]
pub struct LidarFrame {
    pub timestamp_us: i64,
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 3]>,
}

/// Growable parallel sample arrays for the rotation under accumulation.
#[derive(Debug)]
struct FrameAccumulator {
    azimuth: Vec<f32>,
    elevation: Vec<f32>,
    distance: Vec<f32>,
    intensity: Vec<u8>,
    timestamp_us: i64,
}

impl FrameAccumulator {
    const INITIAL_CAPACITY: usize = 10_000;

    fn new() -> Self {
        Self {
            azimuth: Vec::with_capacity(Self::INITIAL_CAPACITY),
            elevation: Vec::with_capacity(Self::INITIAL_CAPACITY),
            distance: Vec::with_capacity(Self::INITIAL_CAPACITY),
            intensity: Vec::with_capacity(Self::INITIAL_CAPACITY),
            timestamp_us: 0,
        }
    }

    fn point_count(&self) -> usize {
        self.distance.len()
    }

    fn push(&mut self, azimuth: f32, elevation: f32, distance: f32, intensity: u8) {
        self.azimuth.push(azimuth);
        self.elevation.push(elevation);
        self.distance.push(distance);
        self.intensity.push(intensity);
    }
}

#[derive(Debug)]
pub struct LidarPacketParser {
    profile: Option<&'static CalibrationProfile>,
    frame: FrameAccumulator,
    last_azimuth: Option<f32>,
    pub packets: u64,
    pub frames: u64,
}

impl Default for LidarPacketParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LidarPacketParser {
    pub fn new() -> Self {
        Self {
            profile: None,
            frame: FrameAccumulator::new(),
            last_azimuth: None,
            packets: 0,
            frames: 0,
        }
    }

    /// Parse one UDP payload. Returns a flushed frame when this packet
    /// crossed a rotation boundary. Short payloads are skipped; a
    /// dual-return capture is fatal for the stream.
    pub fn parse(&mut self, timestamp_us: i64, payload: &[u8]) -> Result<Option<LidarFrame>> {
        if payload.len() < MIN_PACKET_LEN {
            return Ok(None);
        }

        let profile = match self.profile {
            Some(profile) => profile,
            None => {
                if payload[RETURN_MODE_OFFSET] == DUAL_RETURN_MODE {
                    anyhow::bail!("dual-return LiDAR capture mode is not supported");
                }
                let profile = profile_for_model(payload[MODEL_CODE_OFFSET]);
                tracing::info!(model = profile.name, lasers = profile.laser_count, "LiDAR profile selected");
                self.profile = Some(profile);
                profile
            }
        };
        self.packets += 1;

        let (samples, packet_last_azimuth) = decode_blocks(payload, profile);

        // Rotation boundary: this packet's azimuth wrapped past the
        // previous packet's. Flush what accumulated before appending.
        let mut flushed = None;
        if let Some(last) = self.last_azimuth
            && let Some(current) = packet_last_azimuth
            && current < last
            && self.frame.point_count() > 0
        {
            flushed = Some(self.flush());
        }
        if let Some(az) = packet_last_azimuth {
            self.last_azimuth = Some(az);
        }

        // The frame timestamp tracks the last packet that contributed points.
        if !samples.is_empty() {
            for (azimuth, elevation, distance, intensity) in samples {
                self.frame.push(azimuth, elevation, distance, intensity);
            }
            self.frame.timestamp_us = timestamp_us;
        }

        Ok(flushed)
    }

    fn flush(&mut self) -> LidarFrame {
        let done = std::mem::replace(&mut self.frame, FrameAccumulator::new());
        self.frames += 1;
        let (positions, colors) = transform_points(
            &done.azimuth,
            &done.elevation,
            &done.distance,
            &done.intensity,
        );
        LidarFrame {
            timestamp_us: done.timestamp_us,
            positions,
            colors,
        }
    }
}

type Sample = (f32, f32, f32, u8);

/// Decode the firing blocks of one packet into per-channel samples plus the
/// azimuth of the last valid block.
fn decode_blocks(payload: &[u8], profile: &CalibrationProfile) -> (Vec<Sample>, Option<f32>) {
    let mut samples = Vec::with_capacity(FIRINGS_PER_PACKET * CHANNELS_PER_FIRING);
    let mut last_azimuth = None;

    for block in 0..FIRINGS_PER_PACKET {
        let offset = block * FIRING_BLOCK_LEN;
        if offset + FIRING_BLOCK_LEN > payload.len() {
            break;
        }
        if payload[offset..offset + 2] != BLOCK_FLAG {
            continue;
        }
        let azimuth_raw = u16::from_le_bytes([payload[offset + 2], payload[offset + 3]]);
        let base_azimuth = azimuth_raw as f32 / 100.0;
        last_azimuth = Some(base_azimuth);

        for channel in 0..CHANNELS_PER_FIRING {
            let base = offset + 4 + channel * 3;
            let distance_raw = u16::from_le_bytes([payload[base], payload[base + 1]]);
            let intensity = payload[base + 2];

            let elevation = profile.elevation_deg[channel % profile.laser_count];
            let mut azimuth = base_azimuth;
            if let Some(offsets) = profile.azimuth_offset_deg {
                azimuth += offsets[channel];
            }
            azimuth = azimuth.rem_euclid(360.0);

            samples.push((azimuth, elevation, distance_raw as f32 * DISTANCE_UNIT_M, intensity));
        }
    }
    (samples, last_azimuth)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a 1206-byte packet whose 12 blocks step from `start_azimuth`
    /// (hundredths of a degree) by `step` per block.
    fn packet(start_azimuth: u16, step: u16, model: u8, return_mode: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 1206];
        for block in 0..12 {
            let offset = block * 100;
            buf[offset] = 0xff;
            buf[offset + 1] = 0xee;
            let azimuth = start_azimuth + step * block as u16;
            buf[offset + 2..offset + 4].copy_from_slice(&azimuth.to_le_bytes());
            for channel in 0..32 {
                let base = offset + 4 + channel * 3;
                buf[base..base + 2].copy_from_slice(&500u16.to_le_bytes()); // 1.0 m
                buf[base + 2] = 128;
            }
        }
        buf[1204] = return_mode;
        buf[1205] = model;
        buf
    }

    #[test]
    fn test_rotation_boundary_flushes_exactly_once() {
        let mut parser = LidarPacketParser::new();
        // First packet sweeps 350°..361°, second wraps back to ~0°.
        let first = parser.parse(1_000, &packet(35_000, 100, 34, 55)).unwrap();
        assert!(first.is_none());
        let second = parser.parse(2_000, &packet(10, 100, 34, 55)).unwrap();
        let frame = second.expect("wrap must flush the accumulated frame");
        assert_eq!(frame.timestamp_us, 1_000);
        assert_eq!(frame.positions.len(), 12 * 32);
        assert_eq!(frame.positions.len(), frame.colors.len());
        assert_eq!(parser.frames, 1);

        // Raw distance 500 scales to 1.0 m.
        let [x, y, z] = frame.positions[0];
        let range = (x * x + y * y + z * z).sqrt();
        assert!((range - 1.0).abs() < 1e-4);

        // A third wrapping packet flushes only the points of the second.
        let third = parser.parse(3_000, &packet(5, 100, 34, 55)).unwrap();
        assert_eq!(third.unwrap().positions.len(), 12 * 32);
    }

    #[test]
    fn test_empty_frame_is_never_flushed() {
        let mut parser = LidarPacketParser::new();
        // All block flags invalid: azimuths never observed, nothing buffered.
        let mut bad = packet(35_000, 100, 34, 55);
        for block in 0..12 {
            bad[block * 100] = 0x00;
        }
        assert!(parser.parse(0, &bad).unwrap().is_none());
        assert!(parser.parse(1, &packet(10, 100, 34, 55)).unwrap().is_none());
        assert_eq!(parser.frames, 0);
    }

    #[test]
    fn test_pointless_packet_does_not_touch_frame_timestamp() {
        let mut parser = LidarPacketParser::new();
        parser.parse(1_000, &packet(35_000, 100, 34, 55)).unwrap();

        // Every block flag corrupted: no samples, timestamp must stay.
        let mut bad = packet(35_900, 0, 34, 55);
        for block in 0..12 {
            bad[block * 100] = 0x00;
        }
        assert!(parser.parse(9_999, &bad).unwrap().is_none());

        let flushed = parser.parse(2_000, &packet(10, 100, 34, 55)).unwrap().unwrap();
        assert_eq!(flushed.timestamp_us, 1_000);
    }

    #[test]
    fn test_dual_return_mode_is_fatal() {
        let mut parser = LidarPacketParser::new();
        let err = parser.parse(0, &packet(0, 100, 34, 57)).unwrap_err();
        assert!(err.to_string().contains("dual-return"));
    }

    #[test]
    fn test_short_payload_skipped() {
        let mut parser = LidarPacketParser::new();
        assert!(parser.parse(0, &[0u8; 100]).unwrap().is_none());
        assert_eq!(parser.packets, 0);
    }

    #[test]
    fn test_invalid_block_flag_skips_block() {
        let mut parser = LidarPacketParser::new();
        let mut buf = packet(100, 100, 34, 55);
        buf[0] = 0x00; // corrupt first block only
        parser.parse(0, &buf).unwrap();
        let flushed = parser.parse(1, &packet(10, 1, 34, 55)).unwrap().unwrap();
        assert_eq!(flushed.positions.len(), 11 * 32);
    }

    #[test]
    fn test_equal_azimuth_does_not_flush() {
        let mut parser = LidarPacketParser::new();
        parser.parse(0, &packet(1_000, 0, 34, 55)).unwrap();
        // Same azimuth is not a wrap; the frame keeps accumulating.
        assert!(parser.parse(1, &packet(1_000, 0, 34, 55)).unwrap().is_none());
        assert_eq!(parser.frames, 0);
    }
}
