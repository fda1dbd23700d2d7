//! Bright/dark contrast gate.
//!
//! Before any decode, eight probe pairs straddle the marker's dark border
//! band: the dark probe sits inside the band, the bright probe just inside
//! it on the bright margin. Every pair must clear the contrast ratio or the
//! candidate is dropped as low-contrast. The surviving means set the
//! binarization threshold.

use blockmark_core::{probe_mean, GrayImageView, Homography};
use serde::{Deserialize, Serialize};

pub const NUM_THRESHOLD_PROBES: usize = 8;
pub const NUM_PROBE_POINTS: usize = 5;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GateParams {
    /// Every bright probe must exceed `ratio * dark` (dark-on-light), or the
    /// inverse for light-on-dark markers.
    pub min_contrast_ratio: f32,
    /// Marker is dark ink on a bright surface.
    pub dark_on_light: bool,
    /// Inset of the dark probes from the marker edge; lands in the border
    /// band.
    pub dark_inset: f32,
    /// Inset of the bright probes; lands on the bright margin inside the
    /// band.
    pub bright_inset: f32,
    /// Half-extent of the 5-point probe cross.
    pub probe_radius: f32,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            min_contrast_ratio: 1.25,
            dark_on_light: true,
            dark_inset: 0.05,
            bright_inset: 0.15,
            probe_radius: 0.02,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GateStats {
    pub bright_mean: u8,
    pub dark_mean: u8,
}

impl GateStats {
    /// Midpoint binarization threshold.
    pub fn threshold(&self) -> u8 {
        ((self.bright_mean as u16 + self.dark_mean as u16) / 2) as u8
    }
}

/// Corner and side-midpoint positions of a square ring inset by `t`.
fn ring_positions(t: f32) -> [(f32, f32); NUM_THRESHOLD_PROBES] {
    [
        (t, t),
        (0.5, t),
        (1.0 - t, t),
        (t, 0.5),
        (1.0 - t, 0.5),
        (t, 1.0 - t),
        (0.5, 1.0 - t),
        (1.0 - t, 1.0 - t),
    ]
}

fn cross(center: (f32, f32), r: f32) -> [(f32, f32); NUM_PROBE_POINTS] {
    let (x, y) = center;
    [(x, y), (x - r, y), (x + r, y), (x, y - r), (x, y + r)]
}

/// Measure the border contrast seen through `homography`.
///
/// Short-circuits to `None` on the first probe pair that fails the ratio;
/// on success returns the overall bright and dark means.
pub fn measure_contrast(
    image: &GrayImageView<'_>,
    homography: &Homography,
    params: &GateParams,
) -> Option<GateStats> {
    let dark_ring = ring_positions(params.dark_inset);
    let bright_ring = ring_positions(params.bright_inset);

    let mut bright_sum = 0u32;
    let mut dark_sum = 0u32;

    for (dark_at, bright_at) in dark_ring.into_iter().zip(bright_ring) {
        let dark = probe_mean(image, homography, &cross(dark_at, params.probe_radius)) as f32;
        let bright = probe_mean(image, homography, &cross(bright_at, params.probe_radius)) as f32;

        let (fg, bg) = if params.dark_on_light {
            (dark, bright)
        } else {
            (bright, dark)
        };
        if bg <= params.min_contrast_ratio * fg {
            return None;
        }

        bright_sum += bright as u32;
        dark_sum += dark as u32;
    }

    Some(GateStats {
        bright_mean: (bright_sum / NUM_THRESHOLD_PROBES as u32) as u8,
        dark_mean: (dark_sum / NUM_THRESHOLD_PROBES as u32) as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockmark_core::{homography_from_unit_square, GrayImage, Quad};
    use nalgebra::Point2;

    /// Dark border band with a bright interior, rendered over `side` pixels
    /// starting at `origin`.
    fn bordered_marker(img_side: usize, origin: f32, side: f32, dark: u8, bright: u8) -> GrayImage {
        let mut img = GrayImage::new(img_side, img_side);
        img.data.fill(bright);
        for y in 0..img_side {
            for x in 0..img_side {
                let u = (x as f32 - origin) / side;
                let v = (y as f32 - origin) / side;
                if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
                    continue;
                }
                let edge = u.min(v).min(1.0 - u).min(1.0 - v);
                if edge <= 0.1 {
                    img.data[y * img_side + x] = dark;
                }
            }
        }
        img
    }

    fn marker_homography(origin: f32, side: f32) -> Homography {
        homography_from_unit_square(&Quad::new([
            Point2::new(origin, origin),
            Point2::new(origin, origin + side),
            Point2::new(origin + side, origin),
            Point2::new(origin + side, origin + side),
        ]))
        .unwrap()
    }

    #[test]
    fn strong_border_passes_the_gate() {
        let img = bordered_marker(100, 10.0, 80.0, 20, 230);
        let h = marker_homography(10.0, 80.0);
        let stats = measure_contrast(&img.view(), &h, &GateParams::default()).unwrap();
        assert!(stats.dark_mean < 40);
        assert!(stats.bright_mean > 200);
        let t = stats.threshold();
        assert!(t > stats.dark_mean && t < stats.bright_mean);
    }

    #[test]
    fn flat_image_fails_the_gate() {
        let mut img = GrayImage::new(100, 100);
        img.data.fill(128);
        let h = marker_homography(10.0, 80.0);
        assert!(measure_contrast(&img.view(), &h, &GateParams::default()).is_none());
    }

    #[test]
    fn gate_is_monotone_in_the_ratio() {
        // A weak border passes at a permissive ratio and fails at stricter
        // ones; once it fails it keeps failing as the ratio grows.
        let img = bordered_marker(100, 10.0, 80.0, 150, 210);
        let h = marker_homography(10.0, 80.0);

        let mut passing = true;
        for ratio in [1.05, 1.2, 1.35, 1.5, 2.0] {
            let params = GateParams {
                min_contrast_ratio: ratio,
                ..GateParams::default()
            };
            let passes = measure_contrast(&img.view(), &h, &params).is_some();
            assert!(
                passing || !passes,
                "gate passed at ratio {ratio} after failing at a smaller one"
            );
            passing = passes;
        }
        assert!(!passing, "strictest ratio should have failed");
    }

    #[test]
    fn light_on_dark_markers_invert_the_test() {
        let img = bordered_marker(100, 10.0, 80.0, 230, 20); // bright border
        let h = marker_homography(10.0, 80.0);
        assert!(measure_contrast(&img.view(), &h, &GateParams::default()).is_none());

        let params = GateParams {
            dark_on_light: false,
            ..GateParams::default()
        };
        assert!(measure_contrast(&img.view(), &h, &params).is_some());
    }
}
