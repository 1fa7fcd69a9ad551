//! Static per-sensor-model calibration tables.
//!
//! The profile is selected once per LiDAR stream from the model code carried
//! in the first packet; unknown codes fall back to the VLP-16 profile.

/// Immutable calibration for one sensor model.
#[derive(Debug, PartialEq)]
pub struct CalibrationProfile {
    pub name: &'static str,
    /// Per-laser elevation angle, degrees; indexed by channel % laser_count.
    pub elevation_deg: &'static [f32],
    /// Per-channel azimuth correction, degrees; None when the model fires
    /// all lasers at the block azimuth.
    pub azimuth_offset_deg: Option<&'static [f32; 32]>,
    pub laser_count: usize,
}

pub const VLP16: CalibrationProfile = CalibrationProfile {
    name: "vlp16",
    elevation_deg: &[
        -15.0, 1.0, -13.0, 3.0, -11.0, 5.0, -9.0, 7.0, -7.0, 9.0, -5.0, 11.0, -3.0, 13.0, -1.0,
        15.0,
    ],
    azimuth_offset_deg: None,
    laser_count: 16,
};

pub const PUCK_MR: CalibrationProfile = CalibrationProfile {
    name: "puck_mr",
    elevation_deg: &[
        -25.0, -1.0, -1.667, -15.639, -11.31, 0.0, -0.667, -8.843, -7.254, 0.333, -0.333, -6.148,
        -5.333, 1.333, 0.667, -4.0, -4.667, 1.667, 1.0, -3.667, -3.333, 3.333, 2.333, -2.667,
        -3.0, 7.0, 4.667, -2.333, -2.0, 15.0, 10.333, -1.333,
    ],
    azimuth_offset_deg: Some(&[
        140.0, -420.0, 140.0, -140.0, 140.0, -140.0, 420.0, -140.0, 140.0, -420.0, 140.0, -140.0,
        420.0, -140.0, 420.0, -140.0, 140.0, -420.0, 140.0, -420.0, 420.0, -140.0, 140.0, -140.0,
        140.0, -140.0, 140.0, -420.0, 420.0, -140.0, 140.0, -140.0,
    ]),
    laser_count: 32,
};

/// Model code at the fixed trailing offset of a LiDAR packet.
pub fn profile_for_model(code: u8) -> &'static CalibrationProfile {
    match code {
        34 => &VLP16,
        40 => &PUCK_MR,
        other => {
            tracing::debug!(model_code = other, "unknown sensor model; using vlp16 profile");
            &VLP16
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_selection() {
        assert_eq!(profile_for_model(34).name, "vlp16");
        assert_eq!(profile_for_model(40).name, "puck_mr");
        assert_eq!(profile_for_model(0).name, "vlp16");
    }

    #[test]
    fn test_table_shapes() {
        assert_eq!(VLP16.elevation_deg.len(), VLP16.laser_count);
        assert_eq!(PUCK_MR.elevation_deg.len(), PUCK_MR.laser_count);
        assert!(VLP16.azimuth_offset_deg.is_none());
        assert!(PUCK_MR.azimuth_offset_deg.is_some());
    }
}
