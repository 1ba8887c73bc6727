// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! View synthesis: turn depth into disparity and warp one camera into the other.
//!
//! Disparities are positive magnitudes in pixels.
//! The stereo direction is carried by the warps:
//! a left pixel at column `x` is seen at `x - d` in the right image.

use candle_core::{Result, Tensor};

use crate::core::params::Params;
use crate::core::sampler::HorizontalSampler;
use crate::misc::type_aliases::Float;

/// `sign * baseline * focal_length / depth`, with depth floored at `min_depth`.
///
/// The model passes `sign = 1` for both cameras since the warp functions carry
/// the stereo direction. `sign = -1` gives signed disparities for other conventions.
pub fn depth_to_disparity(
    depth: &Tensor,
    baseline: Float,
    focal_length: Float,
    sign: Float,
    min_depth: Float,
) -> Result<Tensor> {
    let factor = f64::from(sign * baseline * focal_length);
    depth.maximum(min_depth)?.recip()?.affine(factor, 0.0)
}

/// Inverse of `depth_to_disparity`: `sign * baseline * focal_length / disparity`.
pub fn disparity_to_depth(
    disparity: &Tensor,
    baseline: Float,
    focal_length: Float,
    sign: Float,
) -> Result<Tensor> {
    let factor = f64::from(sign * baseline * focal_length);
    disparity.recip()?.affine(factor, 0.0)
}

/// Reconstruct the left view from a right image and the left disparity.
pub fn generate_image_left<S: HorizontalSampler>(
    sampler: &S,
    img: &Tensor,
    disp: &Tensor,
) -> Result<Tensor> {
    sampler.sample(img, &disp.neg()?)
}

/// Reconstruct the right view from a left image and the right disparity.
pub fn generate_image_right<S: HorizontalSampler>(
    sampler: &S,
    img: &Tensor,
    disp: &Tensor,
) -> Result<Tensor> {
    sampler.sample(img, disp)
}

/// Everything derived from the depth maps in one forward pass.
#[derive(Clone, Debug)]
pub struct ViewSynthesis {
    /// Disparity of the left camera, `[b, 1, h, w]`.
    pub disparity_left: Tensor,
    /// Disparity of the right camera, `[b, 1, h, w]`.
    pub disparity_right: Tensor,
    /// Left image reconstructed from the right image.
    pub left_est: Tensor,
    /// Right image reconstructed from the left image.
    pub right_est: Tensor,
    /// Right disparity seen from the left camera.
    pub right_to_left_disparity: Tensor,
    /// Left disparity seen from the right camera.
    pub left_to_right_disparity: Tensor,
}

impl ViewSynthesis {
    /// Build disparities, reconstructed images and cross-projected disparities.
    pub fn build<S: HorizontalSampler>(
        params: &Params,
        sampler: &S,
        left: &Tensor,
        right: &Tensor,
        depthmap_left: &Tensor,
        depthmap_right: &Tensor,
    ) -> Result<Self> {
        let to_disparity = |depth: &Tensor| {
            depth_to_disparity(
                depth,
                params.baseline,
                params.focal_length,
                1.0,
                params.min_depth,
            )
        };
        let disparity_left = to_disparity(depthmap_left)?;
        let disparity_right = to_disparity(depthmap_right)?;

        let left_est = generate_image_left(sampler, right, &disparity_left)?;
        let right_est = generate_image_right(sampler, left, &disparity_right)?;

        let right_to_left_disparity =
            generate_image_left(sampler, &disparity_right, &disparity_left)?;
        let left_to_right_disparity =
            generate_image_right(sampler, &disparity_left, &disparity_right)?;

        Ok(Self {
            disparity_left,
            disparity_right,
            left_est,
            right_est,
            right_to_left_disparity,
            left_to_right_disparity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::WrapMode;
    use crate::core::sampler::BilinearSampler;
    use candle_core::{DType, Device};
    use quickcheck_macros;

    fn to_vec(x: &Tensor) -> Vec<f32> {
        x.flatten_all().unwrap().to_vec1().unwrap()
    }

    /// Horizontal ramp `[1, 1, h, w]` with value `x` at column `x`.
    #[allow(clippy::cast_precision_loss)]
    fn ramp(h: usize, w: usize) -> Tensor {
        Tensor::arange(0f32, w as f32, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 1, w))
            .unwrap()
            .broadcast_as((1, 1, h, w))
            .unwrap()
            .contiguous()
            .unwrap()
    }

    #[test]
    fn floor_avoids_division_by_zero() {
        let depth = Tensor::new(&[0f32, -1.0, 2.0], &Device::Cpu).unwrap();
        let disparity = to_vec(&depth_to_disparity(&depth, 0.5, 2.0, 1.0, 0.01).unwrap());
        assert!(disparity.iter().all(|d| d.is_finite()));
        approx::assert_relative_eq!(disparity[0], 100.0, epsilon = 1e-3);
        approx::assert_relative_eq!(disparity[2], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn left_and_right_warp_in_opposite_directions() {
        let sampler = BilinearSampler::new(WrapMode::Edge);
        let img = ramp(1, 6);
        let disp = Tensor::ones((1, 1, 1, 6), DType::F32, &Device::Cpu).unwrap();
        let left = to_vec(&generate_image_left(&sampler, &img, &disp).unwrap());
        let right = to_vec(&generate_image_right(&sampler, &img, &disp).unwrap());
        assert_eq!(left, vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(right, vec![1.0, 2.0, 3.0, 4.0, 5.0, 5.0]);
    }

    #[test]
    fn constant_depth_consistent_disparities() {
        let params = Params {
            baseline: 0.5,
            focal_length: 4.0,
            wrap_mode: WrapMode::Edge,
            ..Params::default()
        };
        let sampler = BilinearSampler::new(params.wrap_mode);
        let image = Tensor::rand(0f32, 1.0, (2, 3, 4, 8), &Device::Cpu).unwrap();
        let depth = Tensor::full(2f32, (2, 1, 4, 8), &Device::Cpu).unwrap();
        let views = ViewSynthesis::build(&params, &sampler, &image, &image, &depth, &depth).unwrap();
        assert_eq!(views.left_est.dims(), &[2, 3, 4, 8]);
        assert!(to_vec(&views.disparity_left).iter().all(|&d| d == 1.0));
        // A constant disparity field is left unchanged by the cross projection.
        assert_eq!(to_vec(&views.right_to_left_disparity), to_vec(&views.disparity_left));
        assert_eq!(to_vec(&views.left_to_right_disparity), to_vec(&views.disparity_right));
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn depth_disparity_round_trip(raw: Vec<u16>) -> bool {
        if raw.is_empty() {
            return true;
        }
        let depth: Vec<f32> = raw.iter().map(|&r| 0.01 + f32::from(r) / 100.0).collect();
        let tensor = Tensor::new(depth.as_slice(), &Device::Cpu).unwrap();
        let disparity = depth_to_disparity(&tensor, 0.54, 718.0, 1.0, 1e-3).unwrap();
        let back = to_vec(&disparity_to_depth(&disparity, 0.54, 718.0, 1.0).unwrap());
        depth
            .iter()
            .zip(back.iter())
            .all(|(d, b)| approx::relative_eq!(d, b, max_relative = 1e-5))
    }

    #[quickcheck_macros::quickcheck]
    fn right_then_left_warp_restores_interior(step: u8) -> bool {
        let (h, w) = (2, 16);
        let shift = f32::from(step % 17) / 8.0;
        let sampler = BilinearSampler::new(WrapMode::Edge);
        let img = ramp(h, w);
        let disp = Tensor::full(shift, (1, 1, h, w), &Device::Cpu).unwrap();
        let there = generate_image_right(&sampler, &img, &disp).unwrap();
        let back = generate_image_left(&sampler, &there, &disp).unwrap();
        let original = img.narrow(3, 3, w - 6).unwrap();
        let restored = back.narrow(3, 3, w - 6).unwrap();
        to_vec(&original)
            .iter()
            .zip(to_vec(&restored).iter())
            .all(|(a, b)| (a - b).abs() < 1e-4)
    }
}
