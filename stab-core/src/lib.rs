// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Online video stabilization: per-frame motion estimation via pyramidal
//! inverse-compositional Lucas-Kanade, trajectory smoothing over a
//! sliding window, and bicubic frame warping.
//!
//! The pipeline is [`transform`] (the parametric motion model) under
//! [`estimator`] (single-scale refinement) under [`pyramid`]
//! (coarse-to-fine), consumed by [`stabilizer`], which owns the ring
//! buffer and produces stabilized output frames.

pub mod error;
pub mod estimator;
pub mod image;
pub mod linalg;
pub mod pyramid;
pub mod stabilizer;
pub mod transform;

pub use error::StabilizeError;
pub use image::{ColorImage, GrayImage};
pub use stabilizer::{Stabilizer, StabilizerConfig};
pub use transform::{Params, TransformKind};
