//! Brute-force rotation-invariant matching.
//!
//! The candidate homography maps the database square into the image. For
//! every database pixel the image is sampled once (rounded, binarized), then
//! the absolute difference is accumulated against every database image at
//! all four rotations using closed-form rotated coordinates. The smallest
//! total wins; out-of-image samples are excluded on both sides of the
//! quality ratio.

use crate::database::MarkerImageDatabase;
use blockmark_core::{in_bounds, GrayImageView, Homography, MarkerLabel, Rotation};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Largest mean disagreement a winning match may have and still count as
    /// a recognition.
    pub max_quality: f32,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self { max_quality: 0.3 }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MatchResult {
    pub index: usize,
    pub label: MarkerLabel,
    pub rotation: Rotation,
    /// Mean binarized disagreement, 0.0 = identical, 1.0 = inverted.
    pub quality: f32,
    pub num_in_bounds: usize,
}

#[inline]
fn rotated(x: usize, y: usize, w: usize, h: usize, rotation: Rotation) -> (usize, usize) {
    match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (w - 1 - y, x),
        Rotation::Deg180 => (w - 1 - x, h - 1 - y),
        Rotation::Deg270 => (y, h - 1 - x),
    }
}

/// Match the marker seen through `homography` against every database image.
///
/// `threshold` binarizes the image samples (`> threshold` reads as 255).
/// Returns `None` when the database is empty or no database pixel lands
/// inside the image.
pub fn match_exhaustive(
    image: &GrayImageView<'_>,
    homography: &Homography,
    threshold: u8,
    db: &MarkerImageDatabase,
) -> Option<MatchResult> {
    let n = db.num_images();
    if n == 0 {
        return None;
    }
    let w = db.image_width();
    let h = db.image_height();

    // totals[r * n + i] accumulates rotation r against database image i.
    let mut totals = vec![0u64; 4 * n];
    let mut num_in_bounds = 0usize;

    for y in 0..h {
        let my = (y as f32 + 0.5) / h as f32;
        for x in 0..w {
            let mx = (x as f32 + 0.5) / w as f32;
            let (px, py) = homography.project_rounded(mx, my);
            if !in_bounds(image, px, py) {
                continue;
            }
            num_in_bounds += 1;
            let sample = image.data[py as usize * image.width + px as usize];
            let query: u8 = if sample > threshold { 255 } else { 0 };

            for (r, rotation) in Rotation::ALL.into_iter().enumerate() {
                let (rx, ry) = rotated(x, y, w, h, rotation);
                let stripe = db.stripe(ry, rx);
                let acc = &mut totals[r * n..(r + 1) * n];
                for (t, &d) in acc.iter_mut().zip(stripe.iter()) {
                    *t += query.abs_diff(d) as u64;
                }
            }
        }
    }

    if num_in_bounds == 0 {
        return None;
    }

    let (best_at, best_total) = totals
        .iter()
        .enumerate()
        .min_by_key(|&(_, &t)| t)
        .map(|(i, &t)| (i, t))?;
    let rotation = Rotation::ALL[best_at / n];
    let index = best_at % n;

    Some(MatchResult {
        index,
        label: db.label(index),
        rotation,
        quality: best_total as f32 / (255.0 * num_in_bounds as f32),
        num_in_bounds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockmark_core::{homography_from_unit_square, GrayImage, MarkerSymbol, Quad};

    const DB: usize = 8;

    fn label(sym: MarkerSymbol) -> MarkerLabel {
        MarkerLabel::new(sym, Rotation::Deg0)
    }

    /// Binary 8x8 pattern with an asymmetric bright corner block.
    fn corner_pattern() -> Vec<u8> {
        let mut p = vec![0u8; DB * DB];
        for y in 0..3 {
            for x in 0..3 {
                p[y * DB + x] = 255;
            }
        }
        // Break the diagonal symmetry.
        p[6] = 255;
        p
    }

    fn rotate_pattern(p: &[u8], rotation: Rotation) -> Vec<u8> {
        let mut out = vec![0u8; DB * DB];
        for y in 0..DB {
            for x in 0..DB {
                let (rx, ry) = rotated(x, y, DB, DB, rotation);
                out[y * DB + x] = p[ry * DB + rx];
            }
        }
        out
    }

    /// Paint a pattern into a larger image over a square region.
    fn render(pattern: &[u8], img_side: usize, origin: usize, scale: usize) -> GrayImage {
        let mut img = GrayImage::new(img_side, img_side);
        img.data.fill(0);
        for y in 0..DB {
            for x in 0..DB {
                for sy in 0..scale {
                    for sx in 0..scale {
                        let ix = origin + x * scale + sx;
                        let iy = origin + y * scale + sy;
                        img.data[iy * img_side + ix] = pattern[y * DB + x];
                    }
                }
            }
        }
        img
    }

    fn marker_homography(origin: usize, scale: usize) -> Homography {
        let side = (DB * scale) as f32;
        let o = origin as f32;
        homography_from_unit_square(&Quad::new([
            nalgebra_point(o, o),
            nalgebra_point(o, o + side),
            nalgebra_point(o + side, o),
            nalgebra_point(o + side, o + side),
        ]))
        .unwrap()
    }

    fn nalgebra_point(x: f32, y: f32) -> nalgebra::Point2<f32> {
        nalgebra::Point2::new(x, y)
    }

    fn three_image_db() -> MarkerImageDatabase {
        let mut inverted = corner_pattern();
        for v in &mut inverted {
            *v = 255 - *v;
        }
        let mut stripes = vec![0u8; DB * DB];
        for y in 0..DB {
            for x in 0..DB {
                stripes[y * DB + x] = if y % 2 == 0 { 255 } else { 0 };
            }
        }
        MarkerImageDatabase::from_images(
            DB,
            DB,
            &[
                (label(MarkerSymbol::Arrow), inverted),
                (label(MarkerSymbol::Bullseye), corner_pattern()),
                (label(MarkerSymbol::Gears), stripes),
            ],
        )
        .unwrap()
    }

    #[test]
    fn self_match_is_exact() {
        let db = three_image_db();
        let img = render(&corner_pattern(), 48, 8, 4);
        let h = marker_homography(8, 4);

        let m = match_exhaustive(&img.view(), &h, 127, &db).unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(m.label.symbol, MarkerSymbol::Bullseye);
        assert_eq!(m.rotation, Rotation::Deg0);
        assert_eq!(m.quality, 0.0);
        assert_eq!(m.num_in_bounds, DB * DB);
    }

    #[test]
    fn rotated_renders_report_their_rotation() {
        let db = three_image_db();
        for rotation in Rotation::ALL {
            let img = render(&rotate_pattern(&corner_pattern(), rotation), 48, 8, 4);
            let h = marker_homography(8, 4);
            let m = match_exhaustive(&img.view(), &h, 127, &db).unwrap();
            assert_eq!(m.index, 1, "rotation {rotation:?}");
            assert_eq!(m.rotation, rotation);
            assert_eq!(m.quality, 0.0);
        }
    }

    #[test]
    fn out_of_bounds_samples_are_excluded() {
        let db = three_image_db();
        // Marker hangs halfway off the left edge of the image.
        let img = render(&corner_pattern(), 48, 8, 4);
        let side = (DB * 4) as f32;
        let h = homography_from_unit_square(&Quad::new([
            nalgebra_point(-16.0, 8.0),
            nalgebra_point(-16.0, 8.0 + side),
            nalgebra_point(-16.0 + side, 8.0),
            nalgebra_point(-16.0 + side, 8.0 + side),
        ]))
        .unwrap();

        let m = match_exhaustive(&img.view(), &h, 127, &db).unwrap();
        assert!(m.num_in_bounds < DB * DB);
        assert!(m.num_in_bounds > 0);
    }

    #[test]
    fn fully_outside_quad_matches_nothing() {
        let db = three_image_db();
        let img = render(&corner_pattern(), 48, 8, 4);
        let h = homography_from_unit_square(&Quad::new([
            nalgebra_point(-200.0, -200.0),
            nalgebra_point(-200.0, -168.0),
            nalgebra_point(-168.0, -200.0),
            nalgebra_point(-168.0, -168.0),
        ]))
        .unwrap();
        assert!(match_exhaustive(&img.view(), &h, 127, &db).is_none());
    }
}
