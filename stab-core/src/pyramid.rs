// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Coarse-to-fine driver around the single-scale estimator (§4.E).
//!
//! Builds a Gaussian pyramid for each frame, estimates motion at the
//! coarsest level first, and upsamples the recovered parameters as the
//! initial guess for the next finer level. Ported from
//! `original_source/src/ica/inverse_compositional_algorithm.cpp`'s
//! `pyramidal_inverse_compositional_algorithm`.

use crate::estimator::{estimate, EstimatorConfig, Robust, MAX_ITER, TOL};
use crate::image::{pyramid_downsample, upsample_params, GrayImage};
use crate::transform::{identity, Params, TransformKind};

/// Levels stop being added once the smaller image dimension drops to or
/// below this size.
pub const MIN_D: usize = 50;
/// The finest level used is the first one at or below this size, so a
/// very large input frame does not get estimated at full resolution.
pub const MAX_D: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct PyramidConfig {
    pub kind: TransformKind,
    pub min_d: usize,
    pub max_d: usize,
    pub robust: Robust,
    pub tol: f32,
    pub max_iterations: usize,
}

impl PyramidConfig {
    pub fn new(kind: TransformKind, robust: Robust) -> Self {
        PyramidConfig { kind, min_d: MIN_D, max_d: MAX_D, robust, tol: TOL, max_iterations: MAX_ITER }
    }
}

/// Repeatedly halve `(nx, ny)` until the larger dimension is at or below
/// `max_d`, or halving stops changing the size.
fn shrink_to_max_d(mut nx: usize, mut ny: usize, max_d: usize) -> (usize, usize) {
    while nx.max(ny) > max_d {
        let (nxx, nyy) = crate::image::pyramid_level_size(nx, ny);
        if (nxx, nyy) == (nx, ny) {
            break;
        }
        nx = nxx;
        ny = nyy;
    }
    (nx, ny)
}

/// Number of pyramid levels: coarser levels are added until the smaller
/// dimension would drop to or below `min_d`; levels above `max_d` are
/// skipped so the finest level used starts at a bounded size.
pub fn compute_num_levels(width: usize, height: usize, min_d: usize, max_d: usize) -> usize {
    let (mut nx, mut ny) = shrink_to_max_d(width, height, max_d);

    let mut levels = 1;
    while nx.min(ny) > min_d {
        levels += 1;
        let (nxx, nyy) = crate::image::pyramid_level_size(nx, ny);
        if (nxx, nyy) == (nx, ny) {
            break;
        }
        nx = nxx;
        ny = nyy;
    }
    levels
}

/// Build a pyramid of `levels` images: index 0 is the `max_d`-bounded
/// base level, the last index is the coarsest.
pub fn build_pyramid(img: &GrayImage, levels: usize, max_d: usize) -> Vec<GrayImage> {
    let mut base = img.clone();
    loop {
        let (nxx, nyy) = shrink_to_max_d(base.width, base.height, max_d);
        if (nxx, nyy) == (base.width, base.height) {
            break;
        }
        base = pyramid_downsample(&base);
    }
    let mut pyramid = Vec::with_capacity(levels);
    pyramid.push(base);
    for _ in 1..levels {
        let next = pyramid_downsample(pyramid.last().unwrap());
        pyramid.push(next);
    }
    pyramid
}

/// Estimate motion from `i1` to `i2` coarse-to-fine, returning the
/// finest-level transform parameters (§4.E).
pub fn estimate_motion(i1: &GrayImage, i2: &GrayImage, config: &PyramidConfig) -> Params {
    let levels = compute_num_levels(i1.width, i1.height, config.min_d, config.max_d);
    let pyr1 = build_pyramid(i1, levels, config.max_d);
    let pyr2 = build_pyramid(i2, levels, config.max_d);
    let est_config = EstimatorConfig {
        kind: config.kind,
        tol: config.tol,
        max_iterations: config.max_iterations,
        robust: config.robust,
    };

    let mut p = identity(config.kind);
    for level in (0..pyr1.len()).rev() {
        p = estimate(&pyr1[level], &pyr2[level], &p, &est_config);
        log::debug!("pyramid level {} ({}x{}): params {:?}", level, pyr1[level].width, pyr1[level].height, p);
        if level > 0 {
            let from = (pyr1[level].width, pyr1[level].height);
            let to = (pyr1[level - 1].width, pyr1[level - 1].height);
            p = upsample_params(&p, config.kind, from, to);
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_image_has_single_level() {
        assert_eq!(compute_num_levels(40, 40, MIN_D, MAX_D), 1);
    }

    #[test]
    fn large_image_gets_multiple_levels() {
        let levels = compute_num_levels(800, 600, MIN_D, MAX_D);
        assert!(levels > 1, "expected multiple levels, got {}", levels);
    }

    #[test]
    fn pyramid_dimensions_shrink_monotonically() {
        let img = GrayImage::zeros(256, 256);
        let pyr = build_pyramid(&img, 4, MAX_D);
        for pair in pyr.windows(2) {
            assert!(pair[1].width <= pair[0].width);
            assert!(pair[1].height <= pair[0].height);
        }
    }

    fn synthetic_texture(width: usize, height: usize) -> GrayImage {
        let mut data = vec![0.0f32; width * height];
        for y in 0..height {
            for x in 0..width {
                let fx = x as f32;
                let fy = y as f32;
                data[x + width * y] =
                    128.0 + 60.0 * (fx / 11.0).sin() + 40.0 * (fy / 8.0).cos() + 0.15 * fx - 0.05 * fy;
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
    fn coarse_to_fine_recovers_large_translation() {
        let i1 = synthetic_texture(160, 160);
        let i2 = translate(&i1, 14.0, -9.0);
        let config = PyramidConfig::new(TransformKind::Translation, Robust::Lorentzian { lambda: 0.0 });
        let p = estimate_motion(&i1, &i2, &config);
        assert!((p[0] - 14.0).abs() < 1.0, "recovered {:?}", p);
        assert!((p[1] - (-9.0)).abs() < 1.0, "recovered {:?}", p);
    }
}
