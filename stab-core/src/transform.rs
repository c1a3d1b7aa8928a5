// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parametric transform algebra shared by the estimator, the pyramidal
//! driver and the stabilizer: projection, composition, inversion,
//! Jacobians and matrix conversions for the five supported transform
//! families.
//!
//! All parametrizations are additive-offset: the zero vector is the
//! identity transform for every [`TransformKind`]. This makes `compose`
//! and `invert` nonlinear even for the affine families.

use nalgebra::{DMatrix, DVector, Matrix3};

/// A transform parameter vector. Its length is `kind.nparams()`.
pub type Params = DVector<f32>;

/// Below this squared determinant, `compose`/`invert`/`update` treat the
/// transform as numerically singular and fall back to the identity.
const DET_SQR_MIN: f32 = 1e-10;

/// The five parametric transform families, fixing the parameter count and
/// layout of the vector each operation below works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// `(tx, ty)`
    Translation,
    /// `(tx, ty, theta)`
    Euclidean,
    /// `(tx, ty, a, b)`, linear part `(1+a, -b; b, 1+a)`
    Similarity,
    /// `(tx, ty, a00, a01, a10, a11)`, linear part `(1+a00, a01; a10, 1+a11)`
    Affinity,
    /// `(h00..h21)`, full 3x3 part is `identity + p` with last row `(p6, p7, 1)`
    Homography,
}

impl TransformKind {
    /// Number of scalar parameters of this transform family.
    pub fn nparams(self) -> usize {
        match self {
            TransformKind::Translation => 2,
            TransformKind::Euclidean => 3,
            TransformKind::Similarity => 4,
            TransformKind::Affinity => 6,
            TransformKind::Homography => 8,
        }
    }

    /// Recover the transform family from a parameter count, as used when a
    /// transform kind is selected by `Np` at the external boundary (§6).
    pub fn from_nparams(n: usize) -> Option<Self> {
        match n {
            2 => Some(TransformKind::Translation),
            3 => Some(TransformKind::Euclidean),
            4 => Some(TransformKind::Similarity),
            6 => Some(TransformKind::Affinity),
            8 => Some(TransformKind::Homography),
            _ => None,
        }
    }
}

/// The identity transform (the zero vector) for `kind`.
pub fn identity(kind: TransformKind) -> Params {
    DVector::zeros(kind.nparams())
}

/// Project point `(x, y)` through the transform `p`.
///
/// Returns `None` for homography transforms whose denominator vanishes at
/// this point (§4.A: "projected point is undefined if d~=0").
pub fn project(x: f32, y: f32, p: &Params, kind: TransformKind) -> Option<(f32, f32)> {
    match kind {
        TransformKind::Translation => Some((x + p[0], y + p[1])),
        TransformKind::Euclidean => {
            let (s, c) = p[2].sin_cos();
            Some((c * x - s * y + p[0], s * x + c * y + p[1]))
        }
        TransformKind::Similarity => Some((
            (1.0 + p[2]) * x - p[3] * y + p[0],
            p[3] * x + (1.0 + p[2]) * y + p[1],
        )),
        TransformKind::Affinity => Some((
            (1.0 + p[2]) * x + p[3] * y + p[0],
            p[4] * x + (1.0 + p[5]) * y + p[1],
        )),
        TransformKind::Homography => {
            let d = p[6] * x + p[7] * y + 1.0;
            if d.abs() < 1e-10 {
                None
            } else {
                Some((
                    ((1.0 + p[0]) * x + p[1] * y + p[2]) / d,
                    (p[3] * x + (1.0 + p[4]) * y + p[5]) / d,
                ))
            }
        }
    }
}

/// The 2 x nparams Jacobian of `W(x, y; p)` with respect to `p`, evaluated
/// at `p = 0`. Parametrizations taken from Szeliski (ch. 6 and 9), as in
/// the original `jacobian()`.
pub fn jacobian_row(x: f32, y: f32, kind: TransformKind) -> DMatrix<f32> {
    let n = kind.nparams();
    let mut j = DMatrix::zeros(2, n);
    match kind {
        TransformKind::Translation => {
            j[(0, 0)] = 1.0;
            j[(1, 1)] = 1.0;
        }
        TransformKind::Euclidean => {
            j[(0, 0)] = 1.0;
            j[(0, 2)] = -y;
            j[(1, 1)] = 1.0;
            j[(1, 2)] = x;
        }
        TransformKind::Similarity => {
            j[(0, 0)] = 1.0;
            j[(0, 2)] = x;
            j[(0, 3)] = -y;
            j[(1, 1)] = 1.0;
            j[(1, 2)] = y;
            j[(1, 3)] = x;
        }
        TransformKind::Affinity => {
            j[(0, 0)] = 1.0;
            j[(0, 2)] = x;
            j[(0, 3)] = y;
            j[(1, 1)] = 1.0;
            j[(1, 4)] = x;
            j[(1, 5)] = y;
        }
        TransformKind::Homography => {
            j[(0, 0)] = x;
            j[(0, 1)] = y;
            j[(0, 2)] = 1.0;
            j[(0, 6)] = -x * x;
            j[(0, 7)] = -x * y;
            j[(1, 3)] = x;
            j[(1, 4)] = y;
            j[(1, 5)] = 1.0;
            j[(1, 6)] = -x * y;
            j[(1, 7)] = -y * y;
        }
    }
    j
}

/// Compose two transforms such that `W(.; p) = W(.; p1) o W(.; p2)`.
///
/// Returns the identity for similarity/affinity/homography when the
/// underlying determinant is numerically singular (§4.A).
pub fn compose(p1: &Params, p2: &Params, kind: TransformKind) -> Params {
    match kind {
        TransformKind::Translation => p1 + p2,
        TransformKind::Euclidean => {
            let (a, b, c, d) = (p1[2].cos(), p1[2].sin(), p1[0], p1[1]);
            let (ap, bp, cp, dp) = (p2[2].cos(), p2[2].sin(), p2[0], p2[1]);
            let cost = a * ap - b * bp;
            let sint = a * bp + b * ap;
            DVector::from_vec(vec![c + cp * a - dp * b, d + dp * a + cp * b, sint.atan2(cost)])
        }
        TransformKind::Similarity => {
            let (a, b, c, d) = (p1[2], p1[3], p1[0], p1[1]);
            let (ap, bp, cp, dp) = (p2[2], p2[3], p2[0], p2[1]);
            DVector::from_vec(vec![
                c - b * dp + cp * (a + 1.0),
                d + b * cp + dp * (a + 1.0),
                -b * bp + (a + 1.0) * (ap + 1.0) - 1.0,
                b * (ap + 1.0) + bp * (a + 1.0),
            ])
        }
        TransformKind::Affinity => {
            let (a, b, c, d, e, f) = (p1[2], p1[3], p1[0], p1[4], p1[5], p1[1]);
            let (ap, bp, cp, dp, ep, fp) = (p2[2], p2[3], p2[0], p2[4], p2[5], p2[1]);
            DVector::from_vec(vec![
                c + b * fp + cp * (a + 1.0),
                f + d * cp + fp * (e + 1.0),
                b * dp + (a + 1.0) * (ap + 1.0) - 1.0,
                b * (ep + 1.0) + bp * (a + 1.0),
                d * (ap + 1.0) + dp * (e + 1.0),
                d * bp + (ep + 1.0) * (e + 1.0) - 1.0,
            ])
        }
        TransformKind::Homography => {
            let (a, b, c, d, e, f, g, h) =
                (p1[0], p1[1], p1[2], p1[3], p1[4], p1[5], p1[6], p1[7]);
            let (ap, bp, cp, dp, ep, fp, gp, hp) =
                (p2[0], p2[1], p2[2], p2[3], p2[4], p2[5], p2[6], p2[7]);
            let det = cp * g + fp * h + 1.0;
            if det * det <= DET_SQR_MIN {
                identity(kind)
            } else {
                DVector::from_vec(vec![
                    (b * dp + c * gp + (a + 1.0) * (ap + 1.0)) / det - 1.0,
                    (c * hp + b * (ep + 1.0) + bp * (a + 1.0)) / det,
                    (c + a * cp + b * fp + cp) / det,
                    (d * (ap + 1.0) + f * gp + dp * (e + 1.0)) / det,
                    (bp * d + f * hp + (ep + 1.0) * (e + 1.0)) / det - 1.0,
                    (f + cp * d + fp * (e + 1.0)) / det,
                    (gp + g * (ap + 1.0) + dp * h) / det,
                    (hp + h * (ep + 1.0) + bp * g) / det,
                ])
            }
        }
    }
}

/// Invert transform `p`: `W(.; invert(p)) = W(.; p)^-1`.
///
/// Returns the identity for similarity/affinity/homography under a
/// numerically singular determinant (§4.A).
pub fn invert(p: &Params, kind: TransformKind) -> Params {
    match kind {
        TransformKind::Translation => -p,
        TransformKind::Euclidean => {
            let (a, b, c) = (p[0], p[1], p[2]);
            DVector::from_vec(vec![-a * c.cos() - b * c.sin(), a * c.sin() - b * c.cos(), -c])
        }
        TransformKind::Similarity => {
            let (a, b, c, d) = (p[2], p[3], p[0], p[1]);
            let det = 2.0 * a + a * a + b * b + 1.0;
            if det * det <= DET_SQR_MIN {
                identity(kind)
            } else {
                DVector::from_vec(vec![
                    (-c - a * c - b * d) / det,
                    (-d - a * d + b * c) / det,
                    (a + 1.0) / det - 1.0,
                    -b / det,
                ])
            }
        }
        TransformKind::Affinity => {
            let (a, b, c, d, e, f) = (p[2], p[3], p[0], p[4], p[5], p[1]);
            let det = a - b * d + e + a * e + 1.0;
            if det * det <= DET_SQR_MIN {
                identity(kind)
            } else {
                DVector::from_vec(vec![
                    (-c + b * f - c * e) / det,
                    (-f - a * f + c * d) / det,
                    (e + 1.0) / det - 1.0,
                    -b / det,
                    -d / det,
                    (a + 1.0) / det - 1.0,
                ])
            }
        }
        TransformKind::Homography => {
            let (a, b, c, d, e, f, g, h) = (p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7]);
            let det = -a + b * d - e - a * e - 1.0;
            if det * det <= DET_SQR_MIN {
                identity(kind)
            } else {
                DVector::from_vec(vec![
                    (f * h - e - 1.0) / det - 1.0,
                    (b - c * h) / det,
                    (c - b * f + c * e) / det,
                    (d - f * g) / det,
                    (-a + c * g - 1.0) / det - 1.0,
                    (f + a * f - c * d) / det,
                    (g - d * h + g * e) / det,
                    (h + a * h - b * g) / det,
                ])
            }
        }
    }
}

/// Update `p` in place with the increment `dp`: `p <- p o dp^-1`,
/// equivalent to but cheaper than `compose(p, invert(dp))`.
///
/// Leaves `p` unchanged under a numerically singular determinant
/// (similarity/affinity/homography only).
pub fn update_transform(p: &mut Params, dp: &Params, kind: TransformKind) {
    match kind {
        TransformKind::Translation => {
            p[0] -= dp[0];
            p[1] -= dp[1];
        }
        TransformKind::Euclidean => {
            let (a, b, c, d) = (dp[2].cos(), dp[2].sin(), dp[0], dp[1]);
            let (ap, bp, cp, dpp) = (p[2].cos(), p[2].sin(), p[0], p[1]);
            let cost = a * ap + b * bp;
            let sint = a * bp - b * ap;
            p[0] = cp - bp * (b * c - a * d) - ap * (a * c + b * d);
            p[1] = dpp - bp * (a * c + b * d) + ap * (b * c - a * d);
            p[2] = sint.atan2(cost);
        }
        TransformKind::Similarity => {
            let (a, b, c, d) = (dp[2], dp[3], dp[0], dp[1]);
            let det = 2.0 * a + a * a + b * b + 1.0;
            if det * det > DET_SQR_MIN {
                let (ap, bp, cp, dpp) = (p[2], p[3], p[0], p[1]);
                p[0] = cp - bp * (-d - a * d + b * c) / det + (ap + 1.0) * (-c - a * c - b * d) / det;
                p[1] = dpp + bp * (-c - a * c - b * d) / det + (ap + 1.0) * (-d - a * d + b * c) / det;
                p[2] = b * bp / det + (a + 1.0) * (ap + 1.0) / det - 1.0;
                p[3] = -b * (ap + 1.0) / det + bp * (a + 1.0) / det;
            }
        }
        TransformKind::Affinity => {
            let (a, b, c, d, e, f) = (dp[2], dp[3], dp[0], dp[4], dp[5], dp[1]);
            let det = a - b * d + e + a * e + 1.0;
            if det * det > DET_SQR_MIN {
                let (ap, bp, cp, dpp, ep, fp) = (p[2], p[3], p[0], p[4], p[5], p[1]);
                p[0] = cp + (-f * bp - a * f * bp + c * d * bp) / det + (ap + 1.0) * (-c + b * f - c * e) / det;
                p[1] = fp + dpp * (-c + b * f - c * e) / det
                    + (-f + c * d - a * f - f * ep - a * f * ep + d * d * ep) / det;
                p[2] = ((1.0 + ap) * (1.0 + e) - d * bp) / det - 1.0;
                p[3] = (bp + a * bp - b - b * ap) / det;
                p[4] = (dpp * (1.0 + e) - d - d * ep) / det;
                p[5] = (a + ep + a * ep + 1.0 - b * dpp) / det - 1.0;
            }
        }
        TransformKind::Homography => {
            let (a, b, c, d, e, f, g, h) = (dp[0], dp[1], dp[2], dp[3], dp[4], dp[5], dp[6], dp[7]);
            let (ap, bp, cp, dpp, ep, fp, gp, hp) =
                (p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7]);
            let det = f * hp + a * f * hp - c * d * hp + gp * (c - b * f + c * e) - a + b * d - e
                - a * e
                - 1.0;
            if det * det > DET_SQR_MIN {
                p[0] = ((d * bp - f * g * bp) + cp * (g - d * h + g * e) + (ap + 1.0) * (f * h - e - 1.0)) / det - 1.0;
                p[1] = (h * cp + a * h * cp - b * g * cp - bp - a * bp + c * g * bp + b - c * h + b * ap - c * h * ap) / det;
                p[2] = (f * bp + a * f * bp - c * d * bp + (ap + 1.0) * (c - b * f + c * e) + cp * (-a + b * d - e - a * e - 1.0)) / det;
                p[3] = (fp * (g - d * h + g * e) + d - f * g + d * ep - f * g * ep + dpp * (f * h - e - 1.0)) / det;
                p[4] = (b * dpp - c * h * dpp + h * fp + a * h * fp - b * g * fp - a + c * g - ep - a * ep + c * g * ep - 1.0) / det - 1.0;
                p[5] = (dpp * (c - b * f + c * e) + f + a * f - c * d + f * ep + a * f * ep - c * d * ep + fp * (-a + b * d - e - a * e - 1.0)) / det;
                p[6] = (d * hp - f * g * hp + g - d * h + g * e + gp * (f * h - e - 1.0)) / det;
                p[7] = (h + a * h - b * g + b * gp - c * h * gp - hp - a * hp + c * g * hp) / det;
            }
        }
    }
}

/// Convert parameters to their 3x3 matrix representation.
pub fn params_to_matrix(p: &Params, kind: TransformKind) -> Matrix3<f32> {
    match kind {
        TransformKind::Translation => Matrix3::new(1.0, 0.0, p[0], 0.0, 1.0, p[1], 0.0, 0.0, 1.0),
        TransformKind::Euclidean => {
            let (s, c) = p[2].sin_cos();
            Matrix3::new(c, -s, p[0], s, c, p[1], 0.0, 0.0, 1.0)
        }
        TransformKind::Similarity => Matrix3::new(
            1.0 + p[2],
            -p[3],
            p[0],
            p[3],
            1.0 + p[2],
            p[1],
            0.0,
            0.0,
            1.0,
        ),
        TransformKind::Affinity => Matrix3::new(
            1.0 + p[2],
            p[3],
            p[0],
            p[4],
            1.0 + p[5],
            p[1],
            0.0,
            0.0,
            1.0,
        ),
        TransformKind::Homography => Matrix3::new(
            1.0 + p[0],
            p[1],
            p[2],
            p[3],
            1.0 + p[4],
            p[5],
            p[6],
            p[7],
            1.0,
        ),
    }
}

/// Convert a 3x3 matrix to its parametric representation, normalizing by
/// `m[2][2]` first.
pub fn matrix_to_params(m: &Matrix3<f32>, kind: TransformKind) -> Params {
    let m = m / m[(2, 2)];
    match kind {
        TransformKind::Translation => DVector::from_vec(vec![m[(0, 2)], m[(1, 2)]]),
        TransformKind::Euclidean => {
            let cost = (m[(0, 0)] + m[(1, 1)]) / 2.0;
            let sint = (m[(1, 0)] - m[(0, 1)]) / 2.0;
            DVector::from_vec(vec![m[(0, 2)], m[(1, 2)], sint.atan2(cost)])
        }
        TransformKind::Similarity => DVector::from_vec(vec![
            m[(0, 2)],
            m[(1, 2)],
            (m[(0, 0)] + m[(1, 1)]) / 2.0 - 1.0,
            (m[(1, 0)] - m[(0, 1)]) / 2.0,
        ]),
        TransformKind::Affinity => DVector::from_vec(vec![
            m[(0, 2)],
            m[(1, 2)],
            m[(0, 0)] - 1.0,
            m[(0, 1)],
            m[(1, 0)],
            m[(1, 1)] - 1.0,
        ]),
        TransformKind::Homography => DVector::from_vec(vec![
            m[(0, 0)] - 1.0,
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)] - 1.0,
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
        ]),
    }
}

/// Solve for the homography mapping four points `(x_i, y_i)` to
/// `(xp_i, yp_i)`, via the direct linear transform. Returns `None` if the
/// 8x8 system is singular.
///
/// This supplements spec.md §4.A with the original's `compute_H`
/// (`original_source/src/ica/matrix.cpp`), handy for constructing a known
/// ground-truth homography in tests.
pub fn compute_h_from_points(src: [(f32, f32); 4], dst: [(f32, f32); 4]) -> Option<Params> {
    let mut a = DMatrix::<f64>::zeros(8, 8);
    let mut b = DVector::<f64>::zeros(8);
    for i in 0..4 {
        let (x, y) = (src[i].0 as f64, src[i].1 as f64);
        let (xp, yp) = (dst[i].0 as f64, dst[i].1 as f64);
        let r0 = 2 * i;
        let r1 = 2 * i + 1;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -xp * x;
        a[(r0, 7)] = -xp * y;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -yp * x;
        a[(r1, 7)] = -yp * y;
        b[r0] = xp;
        b[r1] = yp;
    }
    let a_inv = crate::linalg::inverse(&a)?;
    let sol = crate::linalg::matvec(&a_inv, &b);
    let m = Matrix3::new(
        sol[0] as f32,
        sol[1] as f32,
        sol[2] as f32,
        sol[3] as f32,
        sol[4] as f32,
        sol[5] as f32,
        sol[6] as f32,
        sol[7] as f32,
        1.0,
    );
    Some(matrix_to_params(&m, TransformKind::Homography))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [TransformKind; 5] = [
        TransformKind::Translation,
        TransformKind::Euclidean,
        TransformKind::Similarity,
        TransformKind::Affinity,
        TransformKind::Homography,
    ];

    fn sample_params(kind: TransformKind) -> Params {
        match kind {
            TransformKind::Translation => DVector::from_vec(vec![3.0, -2.0]),
            TransformKind::Euclidean => DVector::from_vec(vec![3.0, -2.0, 0.1]),
            TransformKind::Similarity => DVector::from_vec(vec![3.0, -2.0, 0.05, 0.02]),
            TransformKind::Affinity => DVector::from_vec(vec![3.0, -2.0, 0.05, 0.01, -0.02, 0.03]),
            TransformKind::Homography => {
                DVector::from_vec(vec![0.02, 0.01, 3.0, -0.01, 0.03, -2.0, 0.0005, -0.0003])
            }
        }
    }

    #[test]
    fn identity_round_trip() {
        for &kind in &KINDS {
            let id = identity(kind);
            assert!(invert(&id, kind).iter().all(|&v| v.abs() < 1e-6));
            let p = sample_params(kind);
            assert!((compose(&id, &p, kind) - &p).iter().all(|&v| v.abs() < 1e-4));
            assert!((compose(&p, &id, kind) - &p).iter().all(|&v| v.abs() < 1e-4));
        }
    }

    #[test]
    fn self_inverse() {
        for &kind in &KINDS {
            let p = sample_params(kind);
            let p_inv = invert(&p, kind);
            let round1 = compose(&p, &p_inv, kind);
            let round2 = compose(&p_inv, &p, kind);
            for v in round1.iter() {
                assert!(v.abs() < 1e-4, "kind {:?}: {:?}", kind, round1);
            }
            for v in round2.iter() {
                assert!(v.abs() < 1e-4, "kind {:?}: {:?}", kind, round2);
            }
        }
    }

    #[test]
    fn projection_consistency() {
        for &kind in &KINDS {
            let p1 = sample_params(kind);
            let p2 = sample_params(kind);
            let composed = compose(&p1, &p2, kind);
            let (x, y) = (12.0, 37.0);
            let direct = project(x, y, &composed, kind).unwrap();
            let (x2, y2) = project(x, y, &p2, kind).unwrap();
            let chained = project(x2, y2, &p1, kind).unwrap();
            assert!((direct.0 - chained.0).abs() < 1e-3, "kind {:?}", kind);
            assert!((direct.1 - chained.1).abs() < 1e-3, "kind {:?}", kind);
        }
    }

    #[test]
    fn matrix_round_trip() {
        for &kind in &KINDS {
            let p = sample_params(kind);
            let m = params_to_matrix(&p, kind);
            let p2 = matrix_to_params(&m, kind);
            for (a, b) in p.iter().zip(p2.iter()) {
                assert!((a - b).abs() < 1e-4, "kind {:?}: {} vs {}", kind, a, b);
            }
        }
    }

    #[test]
    fn update_transform_matches_compose_invert() {
        for &kind in &KINDS {
            let mut p = sample_params(kind);
            let dp = DVector::from_iterator(kind.nparams(), (0..kind.nparams()).map(|i| 0.001 * (i as f32 + 1.0)));
            let expected = compose(&p, &invert(&dp, kind), kind);
            update_transform(&mut p, &dp, kind);
            for (a, b) in p.iter().zip(expected.iter()) {
                assert!((a - b).abs() < 1e-3, "kind {:?}: {} vs {}", kind, a, b);
            }
        }
    }

    #[test]
    fn homography_from_four_points() {
        let src = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        let dst = [(1.0, 2.0), (11.0, 1.0), (9.0, 12.0), (-1.0, 9.0)];
        let p = compute_h_from_points(src, dst).expect("non-singular system");
        for (s, d) in src.iter().zip(dst.iter()) {
            let (xp, yp) = project(s.0, s.1, &p, TransformKind::Homography).unwrap();
            assert!((xp - d.0).abs() < 1e-2);
            assert!((yp - d.1).abs() < 1e-2);
        }
    }
}
