//! Iterative subpixel quad refinement.
//!
//! The marker's border is modeled as an implicit template: sample points on
//! the outer and inner square edges carry analytic intensity derivatives
//! scaled by the measured contrast and the quad's diagonal. Each iteration
//! warps the samples through the current homography, measures the bilinear
//! image residual against the mid-gray template value, and solves an
//! 8-parameter inverse-compositional update from the normal equations.

use blockmark_core::{GrayImageView, Homography, Quad};
use nalgebra::{Matrix3, SMatrix, SVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    pub max_iterations: usize,
    /// Total template samples, split over the 8 edges (4 outer, 4 inner).
    pub num_samples: usize,
    /// Converged when no corner moves more than this many pixels in one
    /// iteration.
    pub min_corner_change: f32,
    /// The refined quad may not drift further than this from the initial
    /// corners.
    pub max_corner_change: f32,
    /// Border band thickness as a fraction of the marker side; positions the
    /// inner edge samples.
    pub square_width_fraction: f32,
    /// Fraction of each edge to skip at the corners. Zero means sharp
    /// corners, which adds tangential derivatives at the edge endpoints.
    pub rounded_corner_fraction: f32,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            num_samples: 100,
            min_corner_change: 0.005,
            max_corner_change: 5.0,
            square_width_fraction: 0.1,
            rounded_corner_fraction: 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("refinement normal equations were not solvable")]
    Numerical,

    #[error("refined corners moved {moved:.2}px, more than the allowed {allowed:.2}px")]
    ExceededMaxChange { moved: f32, allowed: f32 },
}

#[derive(Clone, Copy, Debug)]
pub struct Refined {
    pub quad: Quad,
    pub homography: Homography,
    pub iterations: usize,
}

/// One template point: marker-space position plus its precomputed Jacobian
/// row against the 8 homography parameters.
struct TemplateSample {
    x: f32,
    y: f32,
    a: [f32; 8],
}

fn jacobian_row(x: f32, y: f32, tx: f32, ty: f32) -> [f32; 8] {
    [
        x * tx,
        y * tx,
        tx,
        x * ty,
        y * ty,
        ty,
        -x * x * tx - x * y * ty,
        -x * y * tx - y * y * ty,
    ]
}

/// Edge samples in marker space with their intensity derivatives.
///
/// Outer edges sit on the unit square boundary, inner edges at the
/// border-band inset; the inner derivatives are the negation of the outer
/// ones since the intensity transition runs the other way.
fn template_samples(params: &RefineParams, deriv: f32) -> Vec<TemplateSample> {
    let n = ((params.num_samples as f32 / 8.0).ceil() as usize).max(2);
    let rc = params.rounded_corner_fraction;
    let sw = params.square_width_fraction;

    let outer_start = rc;
    let outer_inc = (1.0 - 2.0 * rc) / (n - 1) as f32;
    let inner_start = sw.max(rc);
    let inner_inc = (1.0 - 2.0 * inner_start) / (n - 1) as f32;

    // Tangential derivative at the endpoints of a sharp-cornered edge.
    let endpoint = |i: usize, sign: f32| -> f32 {
        if rc != 0.0 {
            0.0
        } else if i == 0 {
            -sign
        } else if i == n - 1 {
            sign
        } else {
            0.0
        }
    };

    let mut out = Vec::with_capacity(8 * n);

    for i in 0..n {
        let t = outer_start + outer_inc * i as f32;
        let tang = endpoint(i, deriv);
        // Outer top, bottom, left, right.
        out.push(TemplateSample {
            x: t,
            y: 0.0,
            a: jacobian_row(t, 0.0, tang, -deriv),
        });
        out.push(TemplateSample {
            x: t,
            y: 1.0,
            a: jacobian_row(t, 1.0, tang, deriv),
        });
        out.push(TemplateSample {
            x: 0.0,
            y: t,
            a: jacobian_row(0.0, t, -deriv, tang),
        });
        out.push(TemplateSample {
            x: 1.0,
            y: t,
            a: jacobian_row(1.0, t, deriv, tang),
        });
    }

    for i in 0..n {
        let t = inner_start + inner_inc * i as f32;
        let tang = endpoint(i, -deriv);
        // Inner top, bottom, left, right; derivatives negated.
        out.push(TemplateSample {
            x: t,
            y: sw,
            a: jacobian_row(t, sw, tang, deriv),
        });
        out.push(TemplateSample {
            x: t,
            y: 1.0 - sw,
            a: jacobian_row(t, 1.0 - sw, tang, -deriv),
        });
        out.push(TemplateSample {
            x: sw,
            y: t,
            a: jacobian_row(sw, t, deriv, tang),
        });
        out.push(TemplateSample {
            x: 1.0 - sw,
            y: t,
            a: jacobian_row(1.0 - sw, t, -deriv, tang),
        });
    }

    out
}

fn max_corner_distance(a: &Quad, b: &Quad) -> f32 {
    (0..4)
        .map(|i| (a.corners[i] - b.corners[i]).norm())
        .fold(0.0, f32::max)
}

/// Refine `initial_quad` and its homography against the image.
///
/// `foreground_gray` and `background_gray` come from the contrast gate; the
/// residual is measured against their midpoint. On a numerical failure or
/// excessive drift the caller keeps the initial quad.
pub fn refine_quadrilateral(
    image: &GrayImageView<'_>,
    initial_quad: &Quad,
    initial_homography: &Homography,
    foreground_gray: f32,
    background_gray: f32,
    params: &RefineParams,
) -> Result<Refined, RefineError> {
    // The initial quad sets the pixel scale of the template derivatives.
    let diagonal = initial_quad.diagonal_length();
    let contrast = (background_gray - foreground_gray) / 255.0;
    let deriv_magnitude = 0.5 * contrast * diagonal;

    let samples = template_samples(params, deriv_magnitude);
    let template_value = 0.5 * (foreground_gray + background_gray);

    let x_max = image.width as f32 - 1.0;
    let y_max = image.height as f32 - 1.0;

    let mut h = initial_homography.h;
    let mut quad = *initial_quad;
    let mut iterations = 0usize;

    for iteration in 0..params.max_iterations {
        let mut ata = SMatrix::<f64, 8, 8>::zeros();
        let mut atb = SVector::<f64, 8>::zeros();

        for s in &samples {
            let denom = h[(2, 0)] * s.x + h[(2, 1)] * s.y + h[(2, 2)];
            let xt = (h[(0, 0)] * s.x + h[(0, 1)] * s.y + h[(0, 2)]) / denom;
            let yt = (h[(1, 0)] * s.x + h[(1, 1)] * s.y + h[(1, 2)]) / denom;

            let x0 = xt.floor();
            let x1 = xt.ceil();
            let y0 = yt.floor();
            let y1 = yt.ceil();
            // NaN projections fail this check too.
            if !(x0 >= 0.0 && x1 <= x_max && y0 >= 0.0 && y1 <= y_max) {
                continue;
            }

            let ax = xt - x0;
            let ay = yt - y0;
            let row0 = y0 as usize * image.width;
            let row1 = y1 as usize * image.width;
            let xi0 = x0 as usize;
            let xi1 = x1 as usize;

            let tl = image.data[row0 + xi0] as f32;
            let tr = image.data[row0 + xi1] as f32;
            let bl = image.data[row1 + xi0] as f32;
            let br = image.data[row1 + xi1] as f32;
            let top = tl + ax * (tr - tl);
            let bottom = bl + ax * (br - bl);
            let interpolated = top + ay * (bottom - top);

            let residual = ((interpolated - template_value) / 255.0) as f64;

            for i in 0..8 {
                let ai = s.a[i] as f64;
                for j in i..8 {
                    ata[(i, j)] += ai * s.a[j] as f64;
                }
                atb[i] += ai * residual;
            }
        }

        for i in 0..8 {
            for j in 0..i {
                ata[(i, j)] = ata[(j, i)];
            }
        }

        let z = ata
            .cholesky()
            .map(|c| c.solve(&atb))
            .ok_or(RefineError::Numerical)?;

        // H <- H * inv(I + dZ), then renormalize h22 to 1.
        let update = Matrix3::new(
            1.0 + z[0] as f32,
            z[1] as f32,
            z[2] as f32,
            z[3] as f32,
            1.0 + z[4] as f32,
            z[5] as f32,
            z[6] as f32,
            z[7] as f32,
            1.0,
        );
        let update_inv = update.try_inverse().ok_or(RefineError::Numerical)?;
        let mut next = h * update_inv;
        let scale = next[(2, 2)];
        if scale.abs() < 1e-12 {
            return Err(RefineError::Numerical);
        }
        if (scale - 1.0).abs() > f32::EPSILON {
            next /= scale;
        }
        h = next;
        iterations = iteration + 1;

        let refined = Homography::new(h)
            .corners()
            .ok_or(RefineError::Numerical)?;
        let change = max_corner_distance(&refined, &quad);
        quad = refined;
        if change < params.min_corner_change {
            break;
        }
    }

    let moved = max_corner_distance(&quad, initial_quad);
    if moved > params.max_corner_change {
        return Err(RefineError::ExceededMaxChange {
            moved,
            allowed: params.max_corner_change,
        });
    }

    Ok(Refined {
        quad,
        homography: Homography::new(h),
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockmark_core::{homography_from_unit_square, GrayImage};
    use nalgebra::Point2;

    const DARK: u8 = 20;
    const BRIGHT: u8 = 230;

    /// Dark border band over a bright background, thickness matching the
    /// default `square_width_fraction`. Pixel values are area-averaged over
    /// a subpixel grid, so the mid-gray transition of each edge lands
    /// exactly on the band's geometric boundary.
    fn bordered_square(img_side: usize, origin: f32, side: f32) -> GrayImage {
        const SUB: usize = 4;
        let mut img = GrayImage::new(img_side, img_side);
        for y in 0..img_side {
            for x in 0..img_side {
                let mut covered = 0usize;
                for sy in 0..SUB {
                    for sx in 0..SUB {
                        let px = x as f32 - 0.5 + (sx as f32 + 0.5) / SUB as f32;
                        let py = y as f32 - 0.5 + (sy as f32 + 0.5) / SUB as f32;
                        let u = (px - origin) / side;
                        let v = (py - origin) / side;
                        if (0.0..=1.0).contains(&u)
                            && (0.0..=1.0).contains(&v)
                            && u.min(v).min(1.0 - u).min(1.0 - v) <= 0.1
                        {
                            covered += 1;
                        }
                    }
                }
                let frac = covered as f32 / (SUB * SUB) as f32;
                let value = BRIGHT as f32 + frac * (DARK as f32 - BRIGHT as f32);
                img.data[y * img_side + x] = value.round() as u8;
            }
        }
        img
    }

    fn square_quad(origin: f32, side: f32) -> Quad {
        Quad::new([
            Point2::new(origin, origin),
            Point2::new(origin, origin + side),
            Point2::new(origin + side, origin),
            Point2::new(origin + side, origin + side),
        ])
    }

    fn shifted(quad: &Quad, dx: f32, dy: f32) -> Quad {
        let mut out = *quad;
        for c in &mut out.corners {
            c.x += dx;
            c.y += dy;
        }
        out
    }

    #[test]
    fn exact_quad_stays_put() {
        let img = bordered_square(120, 20.0, 80.0);
        let truth = square_quad(20.0, 80.0);
        let h = homography_from_unit_square(&truth).unwrap();

        let refined = refine_quadrilateral(
            &img.view(),
            &truth,
            &h,
            DARK as f32,
            BRIGHT as f32,
            &RefineParams::default(),
        )
        .unwrap();

        assert!(
            max_corner_distance(&refined.quad, &truth) < 0.25,
            "corners drifted: {:?}",
            refined.quad
        );
    }

    #[test]
    fn shifted_quad_is_pulled_back() {
        let img = bordered_square(120, 20.0, 80.0);
        let truth = square_quad(20.0, 80.0);
        let start = shifted(&truth, 1.5, 1.0);
        let h = homography_from_unit_square(&start).unwrap();

        let refined = refine_quadrilateral(
            &img.view(),
            &start,
            &h,
            DARK as f32,
            BRIGHT as f32,
            &RefineParams::default(),
        )
        .unwrap();

        let before = max_corner_distance(&start, &truth);
        let after = max_corner_distance(&refined.quad, &truth);
        assert!(
            after < before,
            "error grew from {before:.3} to {after:.3}"
        );
        assert!(after < 1.0, "still {after:.3}px off after refinement");
        assert!(refined.iterations >= 1);
    }

    #[test]
    fn quad_outside_the_image_is_numerical_failure() {
        let img = bordered_square(120, 20.0, 80.0);
        let start = square_quad(-500.0, 80.0);
        let h = homography_from_unit_square(&start).unwrap();

        // Every template sample lands out of bounds, so the normal equations
        // stay singular.
        let err = refine_quadrilateral(
            &img.view(),
            &start,
            &h,
            DARK as f32,
            BRIGHT as f32,
            &RefineParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RefineError::Numerical));
    }

    #[test]
    fn excessive_drift_is_rejected() {
        let img = bordered_square(120, 20.0, 80.0);
        let truth = square_quad(20.0, 80.0);
        let start = shifted(&truth, 1.5, 1.0);
        let h = homography_from_unit_square(&start).unwrap();

        let params = RefineParams {
            max_corner_change: 0.05,
            ..RefineParams::default()
        };
        let err = refine_quadrilateral(
            &img.view(),
            &start,
            &h,
            DARK as f32,
            BRIGHT as f32,
            &params,
        )
        .unwrap_err();
        assert!(matches!(err, RefineError::ExceededMaxChange { .. }));
    }
}
