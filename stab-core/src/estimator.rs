// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Single-scale inverse compositional Lucas-Kanade estimator (§4.D).
//!
//! Refines transform parameters `p` so that `I2(W(x; p)) ~= I1(x)` over a
//! selected point set, either with an ordinary least-squares (quadratic)
//! step or a Lorentzian-robust reweighting. Ported from
//! `original_source/src/ica/inverse_compositional_algorithm.cpp`.

use nalgebra::{DMatrix, DVector};

use crate::image::{bilinear_sample_gray, central_gradient_at, GrayImage};
use crate::linalg;
use crate::transform::{jacobian_row, project, update_transform, Params, TransformKind};

/// Initial robust threshold when annealing (lambda <= 0 in config).
pub const LAMBDA_0: f32 = 100.0;
/// Floor the annealed threshold decays to.
pub const LAMBDA_N: f32 = 0.5;
/// Per-iteration decay factor applied to the annealed threshold.
pub const LAMBDA_RATIO: f32 = 0.5;
/// Default convergence tolerance on the step norm.
pub const TOL: f32 = 1e-3;
/// Default iteration cap.
pub const MAX_ITER: usize = 20;

/// Error weighting function for the estimator's iteration.
#[derive(Debug, Clone, Copy)]
pub enum Robust {
    /// Ordinary least squares; the Hessian is precomputed once.
    Quadratic,
    /// Lorentzian M-estimator. `lambda <= 0.0` anneals from
    /// [`LAMBDA_0`] down to [`LAMBDA_N`]; `lambda > 0.0` holds it fixed.
    Lorentzian { lambda: f32 },
}

/// Per-call estimator configuration.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorConfig {
    pub kind: TransformKind,
    pub tol: f32,
    pub max_iterations: usize,
    pub robust: Robust,
}

impl EstimatorConfig {
    pub fn new(kind: TransformKind, robust: Robust) -> Self {
        EstimatorConfig { kind, tol: TOL, max_iterations: MAX_ITER, robust }
    }
}

/// Select the point set the estimator aligns on: a sparse grid of 11x11
/// blocks for images wider than 64 pixels, otherwise a dense interior
/// rectangle (§4.D).
pub fn select_points(nx: usize, ny: usize) -> Vec<(usize, usize)> {
    let mut points = Vec::new();
    if nx > 64 {
        let radius = 5usize;
        let region = 5usize;
        let border = (nx as f32 / 10.0) as usize;
        let stride = radius * radius;
        if ny > 2 * (border + radius) && nx > 2 * (border + radius) {
            let mut i = border + radius;
            while i < ny - border - radius {
                let mut j = border + radius;
                while j < nx - border - radius {
                    for k in (i - region)..=(i + region) {
                        for l in (j - region)..=(j + region) {
                            points.push((l, k));
                        }
                    }
                    j += stride;
                }
                i += stride;
            }
        }
    } else if nx > 16 && ny > 16 {
        for y in 8..(ny - 8) {
            for x in 8..(nx - 8) {
                points.push((x, y));
            }
        }
    }
    points
}

/// Gradient of `I1` and the steepest-descent image `DIJ`, precomputed
/// once before the iteration loop (§4.D).
struct Precomputed {
    dij: DMatrix<f32>,
}

fn precompute(i1: &GrayImage, points: &[(usize, usize)], kind: TransformKind) -> Precomputed {
    let nparams = kind.nparams();
    let mut dij = DMatrix::zeros(points.len(), nparams);
    for (idx, &(x, y)) in points.iter().enumerate() {
        let (gx, gy) = central_gradient_at(i1, x, y);
        let j = jacobian_row(x as f32, y as f32, kind);
        for k in 0..nparams {
            dij[(idx, k)] = gx * j[(0, k)] + gy * j[(1, k)];
        }
    }
    Precomputed { dij }
}

/// Warp `I2` at each point by `p` and diff against `I1`. `None` marks an
/// out-of-domain sample: the caller masks it out of the accumulation
/// instead of letting it contaminate the sum with a sentinel value
/// (Design Notes §9).
fn warp_differences(
    i1: &GrayImage,
    i2: &GrayImage,
    points: &[(usize, usize)],
    p: &Params,
    kind: TransformKind,
) -> Vec<Option<f32>> {
    points
        .iter()
        .map(|&(x, y)| {
            project(x as f32, y as f32, p, kind)
                .and_then(|(xp, yp)| bilinear_sample_gray(i2, xp, yp))
                .map(|iw| iw - i1.get(x, y))
        })
        .collect()
}

fn hessian_f64(dij: &DMatrix<f32>, weights: Option<&[f32]>) -> DMatrix<f64> {
    let n = dij.nrows();
    let nparams = dij.ncols();
    let mut h = DMatrix::<f64>::zeros(nparams, nparams);
    for i in 0..n {
        let w = weights.map_or(1.0, |w| w[i]) as f64;
        if w == 0.0 {
            continue;
        }
        for k in 0..nparams {
            let dik = dij[(i, k)] as f64;
            for l in 0..nparams {
                h[(k, l)] += w * dik * (dij[(i, l)] as f64);
            }
        }
    }
    h
}

fn independent_vector_f64(dij: &DMatrix<f32>, di: &[f32], weights: Option<&[f32]>) -> DVector<f64> {
    let n = dij.nrows();
    let nparams = dij.ncols();
    let mut b = DVector::<f64>::zeros(nparams);
    for i in 0..n {
        let w = weights.map_or(1.0, |w| w[i]) as f64;
        if w == 0.0 {
            continue;
        }
        for k in 0..nparams {
            b[k] += w * (dij[(i, k)] as f64) * (di[i] as f64);
        }
    }
    b
}

fn solve_step(h_inv: &DMatrix<f64>, b: &DVector<f64>, nparams: usize) -> Params {
    let dp64 = linalg::matvec(h_inv, b);
    DVector::from_iterator(nparams, dp64.iter().map(|&v| v as f32))
}

/// Refine `p0` so that `I2(W(x; p)) ~= I1(x)` at a single pyramid scale.
/// Returns the best-effort parameters reached (§4.D, §7: no error is
/// raised on non-convergence).
pub fn estimate(i1: &GrayImage, i2: &GrayImage, p0: &Params, config: &EstimatorConfig) -> Params {
    let nparams = config.kind.nparams();
    let points = select_points(i1.width, i1.height);
    if points.is_empty() {
        return p0.clone();
    }
    let pre = precompute(i1, &points, config.kind);
    let mut p = p0.clone();

    match config.robust {
        Robust::Quadratic => {
            let h = hessian_f64(&pre.dij, None);
            let h_inv = match linalg::inverse(&h) {
                Some(m) => m,
                None => return p,
            };
            for iter in 0..config.max_iterations {
                let diffs = warp_differences(i1, i2, &points, &p, config.kind);
                if diffs.iter().all(Option::is_none) {
                    break;
                }
                let di: Vec<f32> = diffs.iter().map(|d| d.unwrap_or(0.0)).collect();
                let b = independent_vector_f64(&pre.dij, &di, None);
                let dp = solve_step(&h_inv, &b, nparams);
                let step = dp.norm();
                update_transform(&mut p, &dp, config.kind);
                log::trace!("quadratic iter {}: step {:.6}", iter, step);
                if step < config.tol {
                    break;
                }
            }
        }
        Robust::Lorentzian { lambda } => {
            let mut lambda_it = if lambda > 0.0 { lambda } else { LAMBDA_0 };
            for iter in 0..config.max_iterations {
                let diffs = warp_differences(i1, i2, &points, &p, config.kind);
                if diffs.iter().all(Option::is_none) {
                    break;
                }
                let di: Vec<f32> = diffs.iter().map(|d| d.unwrap_or(0.0)).collect();
                let weight: Vec<f32> = diffs
                    .iter()
                    .map(|d| d.map_or(0.0, |d| 1.0 / (lambda_it * lambda_it + d * d)))
                    .collect();

                if lambda <= 0.0 && lambda_it > LAMBDA_N {
                    lambda_it *= LAMBDA_RATIO;
                    if lambda_it < LAMBDA_N {
                        lambda_it = LAMBDA_N;
                    }
                }

                let h = hessian_f64(&pre.dij, Some(&weight));
                let h_inv = match linalg::inverse(&h) {
                    Some(m) => m,
                    None => break,
                };
                let b = independent_vector_f64(&pre.dij, &di, Some(&weight));
                let dp = solve_step(&h_inv, &b, nparams);
                let step = dp.norm();
                update_transform(&mut p, &dp, config.kind);
                log::trace!("robust iter {}: step {:.6}, lambda {:.3}", iter, step, lambda_it);
                if step < config.tol {
                    break;
                }
            }
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::identity;

    fn synthetic_texture(width: usize, height: usize) -> GrayImage {
        let mut data = vec![0.0f32; width * height];
        for y in 0..height {
            for x in 0..width {
                let fx = x as f32;
                let fy = y as f32;
                data[x + width * y] =
                    128.0 + 60.0 * (fx / 9.3).sin() + 40.0 * (fy / 7.1).cos() + 0.2 * fx - 0.1 * fy;
            }
        }
        GrayImage::new(width, height, data)
    }

    fn translate(img: &GrayImage, dx: f32, dy: f32) -> GrayImage {
        let mut out = GrayImage::zeros(img.width, img.height);
        for y in 0..img.height {
            for x in 0..img.width {
                let uu = x as f32 - dx;
                let vv = y as f32 - dy;
                out.set(x, y, crate::image::bicubic_sample_gray(img, uu, vv).unwrap_or(0.0));
            }
        }
        out
    }

    #[test]
    fn translation_recovery() {
        let i1 = synthetic_texture(96, 96);
        let i2 = translate(&i1, 3.7, -2.1);
        let config = EstimatorConfig::new(TransformKind::Translation, Robust::Quadratic);
        let p = estimate(&i1, &i2, &identity(TransformKind::Translation), &config);
        assert!((p[0] - 3.7).abs() < 0.2, "recovered {:?}", p);
        assert!((p[1] - (-2.1)).abs() < 0.2, "recovered {:?}", p);
    }

    #[test]
    fn identical_frames_stay_near_identity() {
        let i1 = synthetic_texture(96, 96);
        let config = EstimatorConfig::new(TransformKind::Affinity, Robust::Quadratic);
        let p = estimate(&i1, &i1, &identity(TransformKind::Affinity), &config);
        for v in p.iter() {
            assert!(v.abs() < 1e-2, "params {:?}", p);
        }
    }

    #[test]
    fn robust_outperforms_quadratic_under_outliers() {
        let i1 = synthetic_texture(96, 96);
        let mut i2 = translate(&i1, 2.0, 1.0);
        // Inject saturated outliers over 10% of the image.
        for (idx, v) in i2.data.iter_mut().enumerate() {
            if idx % 10 == 0 {
                *v = 255.0;
            }
        }
        let quad = estimate(
            &i1,
            &i2,
            &identity(TransformKind::Translation),
            &EstimatorConfig::new(TransformKind::Translation, Robust::Quadratic),
        );
        let robust = estimate(
            &i1,
            &i2,
            &identity(TransformKind::Translation),
            &EstimatorConfig::new(TransformKind::Translation, Robust::Lorentzian { lambda: 0.0 }),
        );
        let target = DVector::from_vec(vec![2.0f32, 1.0]);
        let quad_err = (&quad - &target).norm();
        let robust_err = (&robust - &target).norm();
        assert!(
            robust_err <= quad_err,
            "robust {} should not be worse than quadratic {}",
            robust_err,
            quad_err
        );
    }
}
