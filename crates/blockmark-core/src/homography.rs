use crate::geometry::Quad;
use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

/// Plane-projective map from unit-square marker space into image space.
///
/// Stored as f32 to match the per-marker state it travels with; the 4-point
/// solve itself runs in f64 and rounds once at the end.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f32>,
}

impl Homography {
    pub fn new(h: Matrix3<f32>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f32; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f32; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    /// Warp a marker-space point and round to the nearest integer pixel.
    /// Probe sampling reads whole pixels; no interpolation.
    #[inline]
    pub fn project_rounded(&self, x: f32, y: f32) -> (i32, i32) {
        let v = self.h * Vector3::new(x, y, 1.0);
        let inv_w = 1.0 / v[2];
        (
            (v[0] * inv_w).round() as i32,
            (v[1] * inv_w).round() as i32,
        )
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Image positions of the unit-square corners, closed form from the
    /// matrix columns (canonical order TL, BL, TR, BR).
    pub fn corners(&self) -> Option<Quad> {
        let h = &self.h;
        let mut out = [Point2::new(0.0_f32, 0.0); 4];
        for (i, (x, y)) in [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)]
            .into_iter()
            .enumerate()
        {
            let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
            if w.abs() < 1e-10 {
                return None;
            }
            out[i] = Point2::new(
                (h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)]) / w,
                (h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)]) / w,
            );
        }
        Some(Quad::new(out))
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points4(pts: &[Point2<f32>; 4]) -> ([Point2<f64>; 4], Matrix3<f64>) {
    let n = 4.0_f64;
    let mut cx = 0.0_f64;
    let mut cy = 0.0_f64;
    for p in pts {
        cx += p.x as f64;
        cy += p.y as f64;
    }
    cx /= n;
    cy /= n;

    let mut mean_dist = 0.0_f64;
    for p in pts {
        let dx = p.x as f64 - cx;
        let dy = p.y as f64 - cy;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;

    let t = hartley_normalization(cx, cy, mean_dist);

    let mut out = [Point2::new(0.0_f64, 0.0_f64); 4];
    for (i, p) in pts.iter().enumerate() {
        let v = t * Vector3::new(p.x as f64, p.y as f64, 1.0);
        out[i] = Point2::new(v[0], v[1]);
    }

    (out, t)
}

fn denormalize(hn: Matrix3<f64>, t_src: Matrix3<f64>, t_dst: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let t_dst_inv = t_dst.try_inverse()?;
    let h = t_dst_inv * hn * t_src;
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return None;
    }
    Some(h / s)
}

/// H such that dst ~ H * src, from 4 correspondences in matching corner order.
///
/// Hartley-normalized 8x8 linear system with h33 = 1, solved by LU in f64.
/// `None` on a degenerate configuration (three collinear points, repeated
/// points).
pub fn homography_from_quads(src: &Quad, dst: &Quad) -> Option<Homography> {
    // For each correspondence (x,y) -> (u,v):
    //   h11 x + h12 y + h13 - u h31 x - u h32 y = u
    //   h21 x + h22 y + h23 - v h31 x - v h32 y = v
    let (src_n, t_src) = normalize_points4(&src.corners);
    let (dst_n, t_dst) = normalize_points4(&dst.corners);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let x = src_n[k].x;
        let y = src_n[k].y;
        let u = dst_n[k].x;
        let v = dst_n[k].y;

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;

    let hn = Matrix3::<f64>::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    let h = denormalize(hn, t_src, t_dst)?;
    Some(Homography::new(h.map(|v| v as f32)))
}

/// Homography mapping the unit square onto `corners` (canonical order).
pub fn homography_from_unit_square(corners: &Quad) -> Option<Homography> {
    homography_from_quads(&Quad::unit(), corners)
}
