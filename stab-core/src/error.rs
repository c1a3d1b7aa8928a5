// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Construction-time error type for the stabilizer (§7).

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StabilizeError {
    #[error("smoothing sigma must be positive, got {0}")]
    InvalidSigma(f32),

    #[error("pyramid depth bounds are invalid: min_d ({min_d}) must be less than max_d ({max_d})")]
    InvalidPyramidBounds { min_d: usize, max_d: usize },

    #[error(
        "frame dimensions changed mid-stream: expected {expected_width}x{expected_height}, got {got_width}x{got_height}"
    )]
    FrameSizeMismatch { expected_width: usize, expected_height: usize, got_width: usize, got_height: usize },
}
