//! Probe sampling through a homography.
//!
//! All probe reads use round-to-nearest pixel lookup, never interpolation:
//! the decoders were tuned against whole-pixel samples and the fixed-point
//! accumulators depend on exact u8 inputs.

use crate::homography::Homography;
use crate::image::{get_gray, GrayImageView};

/// Fixed-point shift used by weighted probe accumulation.
pub const FRACTIONAL_BITS: u32 = 8;

/// Side length of the square probe grid fed to the recognition backends.
pub const PROBE_GRID_SIZE: usize = 32;

/// Single probe: warp a marker-space point and read the nearest pixel.
/// Out-of-image probes read as 0.
#[inline]
pub fn probe(src: &GrayImageView<'_>, h: &Homography, x: f32, y: f32) -> u8 {
    let (px, py) = h.project_rounded(x, y);
    get_gray(src, px, py)
}

/// Mean over a group of probe points, in integer arithmetic.
pub fn probe_mean(src: &GrayImageView<'_>, h: &Homography, points: &[(f32, f32)]) -> u8 {
    if points.is_empty() {
        return 0;
    }
    let mut acc = 0u32;
    for &(x, y) in points {
        acc += probe(src, h, x, y) as u32;
    }
    (acc / points.len() as u32) as u8
}

/// Weighted probe accumulation: `sum(weight * pixel) >> FRACTIONAL_BITS`.
/// Weights are expected to sum to `1 << FRACTIONAL_BITS`.
pub fn probe_weighted(src: &GrayImageView<'_>, h: &Homography, probes: &[((f32, f32), u16)]) -> u8 {
    let mut acc = 0u32;
    for &((x, y), w) in probes {
        acc += w as u32 * probe(src, h, x, y) as u32;
    }
    (acc >> FRACTIONAL_BITS).min(255) as u8
}

/// Sample an `n x n` grid of averaged probes over the marker interior.
///
/// Each cell reads a 5-point cross (center plus four offsets at a quarter of
/// the cell pitch) so single-pixel noise does not dominate small markers.
/// Output is row-major, `n * n` bytes.
pub fn sample_probe_grid(
    src: &GrayImageView<'_>,
    h: &Homography,
    n: usize,
    out: &mut Vec<u8>,
) {
    out.clear();
    out.reserve(n * n);
    let pitch = 1.0 / n as f32;
    let r = 0.25 * pitch;
    for j in 0..n {
        let cy = (j as f32 + 0.5) * pitch;
        for i in 0..n {
            let cx = (i as f32 + 0.5) * pitch;
            let pts = [
                (cx, cy),
                (cx - r, cy),
                (cx + r, cy),
                (cx, cy - r),
                (cx, cy + r),
            ];
            out.push(probe_mean(src, h, &pts));
        }
    }
}

/// Center-surround illumination normalization for a square probe grid.
///
/// Subtracts a box-blurred copy (window `k = n/2 - 1`, forced odd, border
/// replication) to remove low-frequency shading, then min-max rescales to
/// the full 0..255 range. No-op rescale when the grid is flat.
pub fn normalize_illumination(grid: &mut [u8], n: usize) {
    debug_assert_eq!(grid.len(), n * n);
    if n < 4 {
        return;
    }
    let mut k = n / 2 - 1;
    if k % 2 == 0 {
        k += 1;
    }
    let half = (k / 2) as i32;

    let mut high = vec![0i32; n * n];
    for y in 0..n as i32 {
        for x in 0..n as i32 {
            let mut acc = 0i32;
            for dy in -half..=half {
                for dx in -half..=half {
                    let sx = (x + dx).clamp(0, n as i32 - 1) as usize;
                    let sy = (y + dy).clamp(0, n as i32 - 1) as usize;
                    acc += grid[sy * n + sx] as i32;
                }
            }
            let blurred = acc / (k * k) as i32;
            high[y as usize * n + x as usize] = grid[y as usize * n + x as usize] as i32 - blurred;
        }
    }

    let min = *high.iter().min().unwrap_or(&0);
    let max = *high.iter().max().unwrap_or(&0);
    let range = max - min;
    if range == 0 {
        for v in grid.iter_mut() {
            *v = 128;
        }
        return;
    }
    for (dst, &v) in grid.iter_mut().zip(high.iter()) {
        *dst = ((v - min) * 255 / range) as u8;
    }
}
