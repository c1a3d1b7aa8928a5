// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image primitives: bicubic/bilinear sampling, gradients, Gaussian
//! blur, and the pyramid downsample/upsample pair used by the pyramidal
//! driver (§4.B).

use crate::transform::{Params, TransformKind};

/// A single-channel floating point image, row-major: `data[x + width*y]`.
#[derive(Debug, Clone)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width * height, "data length must match width*height");
        GrayImage { width, height, data }
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        GrayImage { width, height, data: vec![0.0; width * height] }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[x + self.width * y]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[x + self.width * y] = v;
    }
}

/// A multi-channel floating point image, interleaved pixel-major:
/// `data[(x + width*y)*nz + k]` (§3).
#[derive(Debug, Clone)]
pub struct ColorImage {
    pub width: usize,
    pub height: usize,
    pub nz: usize,
    pub data: Vec<f32>,
}

impl ColorImage {
    pub fn new(width: usize, height: usize, nz: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width * height * nz);
        ColorImage { width, height, nz, data }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, k: usize) -> f32 {
        self.data[(x + self.width * y) * self.nz + k]
    }
}

/// Clamp `v` to `[0, n-1]` (Neumann / reflective-at-the-edge boundary
/// condition used by the bicubic taps).
#[inline]
fn neumann_clamp(v: i32, n: usize) -> usize {
    if v < 0 {
        0
    } else if v as usize >= n {
        n - 1
    } else {
        v as usize
    }
}

/// 1D Catmull-Rom cubic interpolation through 4 control values at
/// parameter `x` in `[0, 1)`.
#[inline]
fn cubic1d(v: [f32; 4], x: f32) -> f32 {
    v[1] + 0.5
        * x
        * (v[2] - v[0] + x * (2.0 * v[0] - 5.0 * v[1] + 4.0 * v[2] - v[3]
            + x * (3.0 * (v[1] - v[2]) + v[3] - v[0])))
}

/// Separable 2D bicubic over a 4x4 Neumann-clamped neighborhood, with
/// `sample(x, y)` providing pixel values.
fn bicubic_core(width: usize, height: usize, uu: f32, vv: f32, sample: impl Fn(usize, usize) -> f32) -> f32 {
    let sx: i32 = if uu < 0.0 { -1 } else { 1 };
    let sy: i32 = if vv < 0.0 { -1 } else { 1 };
    let x = uu as i32;
    let y = vv as i32;
    let xs = [x - sx, x, x + sx, x + 2 * sx].map(|v| neumann_clamp(v, width));
    let ys = [y - sy, y, y + sy, y + 2 * sy].map(|v| neumann_clamp(v, height));
    let tx = uu - x as f32;
    let ty = vv - y as f32;
    let mut v = [0.0f32; 4];
    for (xi, &sx_idx) in xs.iter().enumerate() {
        let row = [
            sample(sx_idx, ys[0]),
            sample(sx_idx, ys[1]),
            sample(sx_idx, ys[2]),
            sample(sx_idx, ys[3]),
        ];
        v[xi] = cubic1d(row, ty);
    }
    cubic1d(v, tx)
}

/// Bicubic sample of a grayscale image at `(uu, vv)`. `None` when the
/// point falls outside `[-1, nx] x [-1, ny]` (§4.B) — the explicit
/// invalid marker replacing the original's `999999.9` sentinel.
pub fn bicubic_sample_gray(img: &GrayImage, uu: f32, vv: f32) -> Option<f32> {
    if uu > img.width as f32 || uu < -1.0 || vv > img.height as f32 || vv < -1.0 {
        return None;
    }
    Some(bicubic_core(img.width, img.height, uu, vv, |x, y| img.get(x, y)))
}

/// Bicubic sample of channel `k` of a color image at `(uu, vv)`. Returns
/// `0.0` for out-of-domain points, per §4.B's color sampler behavior.
pub fn bicubic_sample_color(img: &ColorImage, uu: f32, vv: f32, k: usize) -> f32 {
    if uu > img.width as f32 || uu < -1.0 || vv > img.height as f32 || vv < -1.0 {
        return 0.0;
    }
    bicubic_core(img.width, img.height, uu, vv, |x, y| img.get(x, y, k))
}

/// Bilinear sample of a grayscale image at `(uu, vv)`. `None` outside
/// `[1, nx-2] x [1, ny-2]` (§4.B).
pub fn bilinear_sample_gray(img: &GrayImage, uu: f32, vv: f32) -> Option<f32> {
    if uu < 1.0 || uu > img.width as f32 - 2.0 || vv < 1.0 || vv > img.height as f32 - 2.0 {
        return None;
    }
    let sx: i32 = if uu < 0.0 { -1 } else { 1 };
    let sy: i32 = if vv < 0.0 { -1 } else { 1 };
    let x = uu as i32;
    let y = vv as i32;
    let dx = (x + sx) as usize;
    let dy = (y + sy) as usize;
    let (x, y) = (x as usize, y as usize);

    let p1 = img.get(x, y);
    let p2 = img.get(dx, y);
    let p3 = img.get(x, dy);
    let p4 = img.get(dx, dy);

    let e1 = sx as f32 * (uu - x as f32);
    let e1c = 1.0 - e1;
    let e2 = sy as f32 * (vv - y as f32);
    let e2c = 1.0 - e2;

    let w1 = e1c * p1 + e1 * p2;
    let w2 = e1c * p3 + e1 * p4;
    Some(e2c * w1 + e2 * w2)
}

/// Central-difference gradient at an interior point (caller guarantees
/// `1 <= x <= width-2`, `1 <= y <= height-2`).
pub fn central_gradient_at(img: &GrayImage, x: usize, y: usize) -> (f32, f32) {
    let gx = 0.5 * (img.get(x + 1, y) - img.get(x - 1, y));
    let gy = 0.5 * (img.get(x, y + 1) - img.get(x, y - 1));
    (gx, gy)
}

/// Build a 1D Gaussian kernel with the given `sigma` and window
/// `precision` (in units of sigma, default 4 matching `mask.h`).
fn gaussian_kernel(sigma: f32, precision: f32) -> Vec<f32> {
    let radius = (precision * sigma).ceil().max(1.0) as i32;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f32 * i as f32) / (sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in kernel.iter_mut() {
        *v /= sum;
    }
    kernel
}

/// Separable Gaussian blur with Neumann-clamped borders.
pub fn gaussian_blur(img: &GrayImage, sigma: f32, precision: f32) -> GrayImage {
    let kernel = gaussian_kernel(sigma, precision);
    let radius = (kernel.len() / 2) as i32;

    // Horizontal pass.
    let mut tmp = vec![0.0f32; img.width * img.height];
    for y in 0..img.height {
        for x in 0..img.width {
            let mut acc = 0.0;
            for (ki, k) in kernel.iter().enumerate() {
                let dx = ki as i32 - radius;
                let xx = neumann_clamp(x as i32 + dx, img.width);
                acc += k * img.get(xx, y);
            }
            tmp[x + img.width * y] = acc;
        }
    }

    // Vertical pass.
    let mut out = vec![0.0f32; img.width * img.height];
    for y in 0..img.height {
        for x in 0..img.width {
            let mut acc = 0.0;
            for (ki, k) in kernel.iter().enumerate() {
                let dy = ki as i32 - radius;
                let yy = neumann_clamp(y as i32 + dy, img.height);
                acc += k * tmp[x + img.width * yy];
            }
            out[x + img.width * y] = acc;
        }
    }
    GrayImage::new(img.width, img.height, out)
}

/// Size of the next coarser pyramid level: `floor(n/2 + 0.5)` per axis.
pub fn pyramid_level_size(nx: usize, ny: usize) -> (usize, usize) {
    let nxx = (nx as f32 / 2.0 + 0.5) as usize;
    let nyy = (ny as f32 / 2.0 + 0.5) as usize;
    (nxx.max(1), nyy.max(1))
}

/// Downsample by 2, pre-smoothing with sigma = 0.7*sqrt(3) (§4.B).
pub fn pyramid_downsample(img: &GrayImage) -> GrayImage {
    const ZOOM_SIGMA_ZERO: f32 = 0.7;
    let sigma = ZOOM_SIGMA_ZERO * 3.0f32.sqrt();
    let blurred = gaussian_blur(img, sigma, 4.0);
    let (nxx, nyy) = pyramid_level_size(img.width, img.height);
    let mut data = vec![0.0f32; nxx * nyy];
    for i1 in 0..nyy {
        for j1 in 0..nxx {
            let i2 = (2 * i1).min(img.height - 1);
            let j2 = (2 * j1).min(img.width - 1);
            data[i1 * nxx + j1] = blurred.get(j2, i2);
        }
    }
    GrayImage::new(nxx, nyy, data)
}

/// Upsample transform parameters from a coarser level `(nx, ny)` to a
/// finer level `(nxx, nyy)`. Only the translational components scale, by
/// the larger of the two axis ratios; for homography, the projective
/// row (p6, p7) scales inversely (§4.B).
pub fn upsample_params(p: &Params, kind: TransformKind, from: (usize, usize), to: (usize, usize)) -> Params {
    let (nx, ny) = from;
    let (nxx, nyy) = to;
    let factor_x = nxx as f32 / nx as f32;
    let factor_y = nyy as f32 / ny as f32;
    let nu = factor_x.max(factor_y);
    let mut out = p.clone();
    match kind {
        TransformKind::Homography => {
            out[2] *= nu;
            out[5] *= nu;
            out[6] /= nu;
            out[7] /= nu;
        }
        _ => {
            out[0] *= nu;
            out[1] *= nu;
        }
    }
    out
}
