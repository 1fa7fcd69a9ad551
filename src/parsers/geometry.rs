//! LiDAR geometry kernel: spherical samples to Cartesian points plus an
//! intensity colormap.
//!
//! Right-handed, Z-up: x = r·cos(el)·cos(az), y = r·cos(el)·sin(az),
//! z = r·sin(el). Fully deterministic.

const DEG2RAD: f32 = std::f32::consts::PI / 180.0;

/// Batch-transform accumulated samples. Input slices must be equal length.
pub fn transform_points(
    azimuth_deg: &[f32],
    elevation_deg: &[f32],
    distance_m: &[f32],
    intensity: &[u8],
) -> (Vec<[f32; 3]>, Vec<[u8; 3]>) {
    let n = distance_m.len();
    debug_assert_eq!(azimuth_deg.len(), n);
    debug_assert_eq!(elevation_deg.len(), n);
    debug_assert_eq!(intensity.len(), n);

    let mut positions = Vec::with_capacity(n);
    let mut colors = Vec::with_capacity(n);
    for i in 0..n {
        let az = azimuth_deg[i] * DEG2RAD;
        let el = elevation_deg[i] * DEG2RAD;
        let r = distance_m[i];
        let cos_el = el.cos();
        positions.push([r * cos_el * az.cos(), r * cos_el * az.sin(), r * el.sin()]);
        colors.push(intensity_color(intensity[i] as f32 / 255.0));
    }
    (positions, colors)
}

/// Map normalized intensity v ∈ [0, 1] through four linear segments
/// (blue, cyan, green, yellow, red) to an RGB triple.
pub fn intensity_color(v: f32) -> [u8; 3] {
    let v = v.clamp(0.0, 1.0);
    if v < 0.25 {
        [0, (4.0 * v * 255.0) as u8, 255]
    } else if v < 0.5 {
        [0, 255, ((1.0 - 4.0 * (v - 0.25)) * 255.0) as u8]
    } else if v < 0.75 {
        [(4.0 * (v - 0.5) * 255.0) as u8, 255, 0]
    } else {
        [255, ((1.0 - 4.0 * (v - 0.75)) * 255.0) as u8, 0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colormap_anchor_points() {
        assert_eq!(intensity_color(0.0), [0, 0, 255]);
        let cyan = intensity_color(0.25);
        assert_eq!(cyan[0], 0);
        assert_eq!(cyan[1], 255);
        assert!(cyan[2] >= 254);
        let green = intensity_color(0.5);
        assert_eq!(green[0], 0);
        assert_eq!(green[1], 255);
        assert!(green[2] <= 1);
        let yellow = intensity_color(0.75);
        assert!(yellow[0] >= 254);
        assert_eq!(yellow[1], 255);
        assert_eq!(yellow[2], 0);
        assert_eq!(intensity_color(1.0), [255, 0, 0]);
    }

    #[test]
    fn test_colormap_monotonic_within_segments() {
        // Green ramps up on [0, 0.25), blue ramps down on [0.25, 0.5),
        // red ramps up on [0.5, 0.75), green ramps down on [0.75, 1.0].
        let samples = |lo: f32, hi: f32| (0..=100).map(move |i| lo + (hi - lo) * i as f32 / 100.0);
        let non_decreasing = |vals: Vec<u8>| vals.windows(2).all(|w| w[1] >= w[0]);
        let non_increasing = |vals: Vec<u8>| vals.windows(2).all(|w| w[1] <= w[0]);

        assert!(non_decreasing(samples(0.0, 0.249).map(|v| intensity_color(v)[1]).collect()));
        assert!(non_increasing(samples(0.25, 0.499).map(|v| intensity_color(v)[2]).collect()));
        assert!(non_decreasing(samples(0.5, 0.749).map(|v| intensity_color(v)[0]).collect()));
        assert!(non_increasing(samples(0.75, 1.0).map(|v| intensity_color(v)[1]).collect()));
    }

    #[test]
    fn test_spherical_to_cartesian() {
        let (positions, colors) = transform_points(&[0.0, 90.0], &[0.0, 0.0], &[1.0, 2.0], &[0, 255]);
        assert!((positions[0][0] - 1.0).abs() < 1e-6);
        assert!(positions[0][1].abs() < 1e-6);
        assert!(positions[0][2].abs() < 1e-6);
        assert!(positions[1][0].abs() < 1e-5);
        assert!((positions[1][1] - 2.0).abs() < 1e-5);
        assert_eq!(colors[0], [0, 0, 255]);
        assert_eq!(colors[1], [255, 0, 0]);
    }

    #[test]
    fn test_elevation_maps_to_z() {
        let (positions, _) = transform_points(&[0.0], &[90.0], &[3.0], &[0]);
        assert!(positions[0][0].abs() < 1e-5);
        assert!((positions[0][2] - 3.0).abs() < 1e-5);
    }
}
