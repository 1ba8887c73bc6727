// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Self-supervised depth and ego-motion estimation from stereo image sequences.
//!
//! A depth network predicts a depth map for each camera,
//! and a pose network predicts the motion of each camera between two frames.
//! During training, depths are turned into disparities used to warp
//! one camera into the other, and the photometric, disparity and pose
//! consistencies are combined into a single loss.
//!
//! The entry point is [`crate::core::model`], configured with [`Params`].

#![warn(missing_docs)]

pub mod core;
pub mod error;
pub mod misc;

pub use crate::core::model::{Mode, Model, Network, StereoBatch};
pub use crate::core::params::{Params, WrapMode};
pub use crate::error::{Error, Result};
