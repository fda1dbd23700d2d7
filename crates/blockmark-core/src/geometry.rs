//! Quadrilateral candidates and the reasonableness checks applied to them.
//!
//! Corner order is fixed throughout the workspace:
//! 0 = top-left, 1 = bottom-left, 2 = top-right, 3 = bottom-right.
//! The homography always maps the unit square (0,0),(0,1),(1,0),(1,1) onto
//! the corners in that order.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [Point2<f32>; 4],
}

impl Quad {
    pub fn new(corners: [Point2<f32>; 4]) -> Self {
        Self { corners }
    }

    /// Unit square in canonical corner order.
    pub fn unit() -> Self {
        Self::new([
            Point2::new(0.0, 0.0),
            Point2::new(0.0, 1.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
        ])
    }

    /// Axis-aligned square with the given side length, canonical order.
    pub fn square(side: f32) -> Self {
        Self::new([
            Point2::new(0.0, 0.0),
            Point2::new(0.0, side),
            Point2::new(side, 0.0),
            Point2::new(side, side),
        ])
    }

    /// Apply a corner permutation: `out[i] = self[perm[i]]`.
    pub fn permuted(&self, perm: [usize; 4]) -> Self {
        Self::new([
            self.corners[perm[0]],
            self.corners[perm[1]],
            self.corners[perm[2]],
            self.corners[perm[3]],
        ])
    }

    /// Half-diagonal scale of the quad, used to size refinement derivatives.
    pub fn diagonal_length(&self) -> f32 {
        let d03 = (self.corners[0] - self.corners[3]).norm();
        let d12 = (self.corners[1] - self.corners[2]).norm();
        d03.max(d12) / std::f32::consts::SQRT_2
    }

    /// Signed area magnitude via the shoelace formula over the polygon
    /// TL -> BL -> BR -> TR.
    pub fn area(&self) -> f32 {
        let p = self.polygon();
        let mut acc = 0.0_f32;
        for i in 0..4 {
            let a = p[i];
            let b = p[(i + 1) % 4];
            acc += a.x * b.y - b.x * a.y;
        }
        (0.5 * acc).abs()
    }

    /// Corners in polygon (boundary traversal) order.
    #[inline]
    pub fn polygon(&self) -> [Point2<f32>; 4] {
        [
            self.corners[0],
            self.corners[1],
            self.corners[3],
            self.corners[2],
        ]
    }

    pub fn bounding_box(&self) -> (Point2<f32>, Point2<f32>) {
        let mut min = self.corners[0];
        let mut max = self.corners[0];
        for c in &self.corners[1..] {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        }
        (min, max)
    }

    /// True when the boundary polygon is not simple (crossed corners).
    pub fn corners_disordered(&self) -> bool {
        let p = self.polygon();
        let mut pos = 0;
        let mut neg = 0;
        for i in 0..4 {
            let a = p[i];
            let b = p[(i + 1) % 4];
            let c = p[(i + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            if cross > 0.0 {
                pos += 1;
            } else if cross < 0.0 {
                neg += 1;
            }
        }
        pos != 4 && neg != 4
    }

    /// Check area, diagonal symmetry and distance from the image edge.
    pub fn is_reasonable(&self, params: &QuadCheckParams, width: usize, height: usize) -> QuadCheck {
        let disordered = self.corners_disordered();
        if disordered {
            return QuadCheck {
                reasonable: false,
                corners_disordered: true,
            };
        }

        if self.area() < params.min_quad_area {
            return QuadCheck {
                reasonable: false,
                corners_disordered: false,
            };
        }

        let d03 = (self.corners[0] - self.corners[3]).norm();
        let d12 = (self.corners[1] - self.corners[2]).norm();
        let (short, long) = if d03 < d12 { (d03, d12) } else { (d12, d03) };
        if short <= f32::EPSILON || long / short > params.quad_symmetry_threshold {
            return QuadCheck {
                reasonable: false,
                corners_disordered: false,
            };
        }

        let margin = params.min_distance_from_image_edge;
        for c in &self.corners {
            if c.x < margin
                || c.y < margin
                || c.x > width as f32 - 1.0 - margin
                || c.y > height as f32 - 1.0 - margin
            {
                return QuadCheck {
                    reasonable: false,
                    corners_disordered: false,
                };
            }
        }

        QuadCheck {
            reasonable: true,
            corners_disordered: false,
        }
    }
}

impl std::ops::Index<usize> for Quad {
    type Output = Point2<f32>;

    #[inline]
    fn index(&self, i: usize) -> &Point2<f32> {
        &self.corners[i]
    }
}

impl std::ops::IndexMut<usize> for Quad {
    #[inline]
    fn index_mut(&mut self, i: usize) -> &mut Point2<f32> {
        &mut self.corners[i]
    }
}

#[derive(Clone, Copy, Debug)]
pub struct QuadCheck {
    pub reasonable: bool,
    pub corners_disordered: bool,
}

/// Bounds applied to candidate quads before and after refinement.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadCheckParams {
    /// Minimum area in square pixels.
    pub min_quad_area: f32,
    /// Maximum ratio between the long and short diagonal.
    pub quad_symmetry_threshold: f32,
    /// Minimum corner distance from the image border, in pixels.
    pub min_distance_from_image_edge: f32,
}

impl Default for QuadCheckParams {
    fn default() -> Self {
        Self {
            min_quad_area: 100.0,
            quad_symmetry_threshold: 3.0,
            min_distance_from_image_edge: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_at(x0: f32, y0: f32, side: f32) -> Quad {
        Quad::new([
            Point2::new(x0, y0),
            Point2::new(x0, y0 + side),
            Point2::new(x0 + side, y0),
            Point2::new(x0 + side, y0 + side),
        ])
    }

    #[test]
    fn square_area_and_diagonal() {
        let q = square_at(10.0, 10.0, 20.0);
        assert!((q.area() - 400.0).abs() < 1e-3);
        assert!((q.diagonal_length() - 20.0).abs() < 1e-3);
    }

    #[test]
    fn centered_square_is_reasonable() {
        let q = square_at(20.0, 20.0, 40.0);
        let check = q.is_reasonable(&QuadCheckParams::default(), 100, 100);
        assert!(check.reasonable);
        assert!(!check.corners_disordered);
    }

    #[test]
    fn tiny_quad_is_rejected() {
        let q = square_at(20.0, 20.0, 5.0);
        assert!(!q.is_reasonable(&QuadCheckParams::default(), 100, 100).reasonable);
    }

    #[test]
    fn edge_hugging_quad_is_rejected() {
        let q = square_at(0.0, 0.0, 40.0);
        assert!(!q.is_reasonable(&QuadCheckParams::default(), 100, 100).reasonable);
    }

    #[test]
    fn crossed_corners_are_disordered() {
        // Swap TL and BR so the boundary self-intersects.
        let mut q = square_at(20.0, 20.0, 40.0);
        q.corners.swap(0, 3);
        let check = q.is_reasonable(&QuadCheckParams::default(), 100, 100);
        assert!(!check.reasonable);
        assert!(check.corners_disordered);
    }
}
