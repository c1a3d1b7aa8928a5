// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dense linear solver used by the estimator's Hessian inversion (§4.C).
//!
//! Implemented as explicit Gauss-Jordan elimination with partial pivoting
//! in `f64`, on a `2n`-wide augmented matrix — a direct port of
//! `original_source/src/ica/matrix.cpp::inverse`, kept independent of
//! `nalgebra`'s own inversion so the numerically delicate pivot threshold
//! (`1e-30`) and failure behavior match the source exactly.

use nalgebra::{DMatrix, DVector};

/// Below this pivot magnitude the system is treated as singular.
const PIVOT_MIN: f64 = 1e-30;

/// Invert square matrix `a` by Gauss-Jordan elimination with partial
/// pivoting. Returns `None` if any pivot is smaller than `1e-30` in
/// magnitude, replacing the original's `999999.9`-filled sentinel matrix
/// (Design Notes §9): callers must handle the singular case explicitly.
pub fn inverse(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());

    // Augmented [A | I] matrix, 2n columns wide, row-major like the source.
    let mut t = vec![0.0f64; n * 2 * n];
    for i in 0..n {
        for j in 0..n {
            t[i * 2 * n + j] = a[(i, j)];
        }
        t[i * 2 * n + i + n] = 1.0;
    }

    for i in 0..n {
        // Partial pivot: find the largest magnitude in column i, rows i..n.
        let mut max = t[i * 2 * n + i].abs();
        let mut i_max = i;
        for j in i..n {
            let v = t[j * 2 * n + i].abs();
            if v > max {
                max = v;
                i_max = j;
            }
        }
        if max < PIVOT_MIN {
            return None;
        }
        if i_max > i {
            for k in 0..2 * n {
                t.swap(i * 2 * n + k, i_max * 2 * n + k);
            }
        }
        for j in (i + 1)..n {
            let mul = -t[j * 2 * n + i] / t[i * 2 * n + i];
            for k in i..2 * n {
                let add = mul * t[i * 2 * n + k];
                t[j * 2 * n + k] += add;
            }
        }
    }

    if t[(n - 1) * 2 * n + n - 1].abs() < PIVOT_MIN {
        return None;
    }

    for i in (1..n).rev() {
        for j in (0..i).rev() {
            let mul = -t[j * 2 * n + i] / t[i * 2 * n + i];
            for k in i..2 * n {
                let add = mul * t[i * 2 * n + k];
                t[j * 2 * n + k] += add;
            }
        }
    }

    let mut inv = DMatrix::zeros(n, n);
    for i in 0..n {
        let pivot = t[i * 2 * n + i];
        for j in n..2 * n {
            inv[(i, j - n)] = t[i * 2 * n + j] / pivot;
        }
    }
    Some(inv)
}

/// Dense matrix-vector product `A * b`.
pub fn matvec(a: &DMatrix<f64>, b: &DVector<f64>) -> DVector<f64> {
    a * b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverts_identity() {
        let id = DMatrix::<f64>::identity(4, 4);
        let inv = inverse(&id).unwrap();
        assert!((inv - id).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn inverts_known_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 7.0, 2.0, 6.0]);
        let inv = inverse(&a).unwrap();
        let expected = DMatrix::from_row_slice(2, 2, &[0.6, -0.7, -0.2, 0.4]);
        assert!((inv - expected).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn detects_singular_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(inverse(&a).is_none());
    }

    #[test]
    fn matvec_matches_expectation() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = DVector::from_vec(vec![5.0, 6.0]);
        let result = matvec(&a, &b);
        assert_eq!(result, DVector::from_vec(vec![17.0, 39.0]));
    }
}
