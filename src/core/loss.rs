// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Self-supervised losses.
//!
//! Three families of terms:
//!
//! - photometric: reconstructed images against the observed ones (SSIM and L1),
//! - disparity consistency: each disparity against the other one projected onto it,
//! - pose consistency: left and right cameras undergo the same motion.

use candle_core::{Result, Tensor};

use crate::core::params::Params;
use crate::core::pose_net::EgoMotion;
use crate::core::synthesis::ViewSynthesis;
use crate::error;
use crate::misc::type_aliases::Float;

const C1: f64 = 0.01 * 0.01;
const C2: f64 = 0.03 * 0.03;
const SSIM_DENOMINATOR_FLOOR: f32 = 1e-12;

/// Smallest height and width accepted by `ssim`.
pub const SSIM_MIN_SIZE: usize = 3;

/// Mean over 3x3 windows, stride 1, no padding: `[.., h, w]` -> `[.., h-2, w-2]`.
pub fn box_mean_3x3(x: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    if h < SSIM_MIN_SIZE || w < SSIM_MIN_SIZE {
        candle_core::bail!("3x3 window does not fit in a {}x{} image", h, w);
    }
    let (oh, ow) = (h - 2, w - 2);
    let mut sum = x.narrow(2, 0, oh)?.narrow(3, 0, ow)?;
    for dy in 0..3 {
        for dx in 0..3 {
            if (dy, dx) != (0, 0) {
                sum = (sum + x.narrow(2, dy, oh)?.narrow(3, dx, ow)?)?;
            }
        }
    }
    sum.affine(1.0 / 9.0, 0.0)
}

/// Structural dissimilarity map `(1 - SSIM) / 2`, clamped to [0, 1].
///
/// Statistics are computed over 3x3 windows, so the map is 2 pixels smaller
/// than the inputs in each spatial dimension.
pub fn ssim(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let mu_x = box_mean_3x3(x)?;
    let mu_y = box_mean_3x3(y)?;
    let mu_x_sq = mu_x.sqr()?;
    let mu_y_sq = mu_y.sqr()?;
    let mu_xy = (&mu_x * &mu_y)?;

    let sigma_x = (box_mean_3x3(&x.sqr()?)? - &mu_x_sq)?;
    let sigma_y = (box_mean_3x3(&y.sqr()?)? - &mu_y_sq)?;
    let sigma_xy = (box_mean_3x3(&(x * y)?)? - &mu_xy)?;

    let numerator = (mu_xy.affine(2.0, C1)? * sigma_xy.affine(2.0, C2)?)?;
    let denominator =
        ((mu_x_sq + mu_y_sq)?.affine(1.0, C1)? * (sigma_x + sigma_y)?.affine(1.0, C2)?)?;
    let similarity = (numerator / denominator.maximum(SSIM_DENOMINATOR_FLOOR)?)?;

    similarity.affine(-0.5, 0.5)?.clamp(0f32, 1f32)
}

/// Element-wise absolute difference.
pub fn l1(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    (x - y)?.abs()
}

/// Mean absolute difference, as a scalar tensor.
pub fn mean_abs_diff(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    l1(x, y)?.mean_all()
}

/// Photometric terms of one camera.
#[derive(Clone, Debug)]
pub struct PhotometricLoss {
    /// Absolute difference map.
    pub l1_map: Tensor,
    /// SSIM dissimilarity map.
    pub ssim_map: Tensor,
    /// Mean of `l1_map`.
    pub l1: Tensor,
    /// Mean of `ssim_map`.
    pub ssim: Tensor,
    /// `alpha * ssim + (1 - alpha) * l1`.
    pub combined: Tensor,
}

impl PhotometricLoss {
    /// Compare a reconstructed image with the observed one.
    pub fn new(estimate: &Tensor, observed: &Tensor, alpha: Float) -> Result<Self> {
        let alpha = f64::from(alpha);
        let l1_map = l1(estimate, observed)?;
        let ssim_map = ssim(estimate, observed)?;
        let l1 = l1_map.mean_all()?;
        let ssim = ssim_map.mean_all()?;
        let combined = (ssim.affine(alpha, 0.0)? + l1.affine(1.0 - alpha, 0.0)?)?;
        Ok(Self {
            l1_map,
            ssim_map,
            l1,
            ssim,
            combined,
        })
    }
}

/// All the loss terms of one forward pass.
#[derive(Clone, Debug)]
pub struct Losses {
    /// Photometric terms of the left camera.
    pub left: PhotometricLoss,
    /// Photometric terms of the right camera.
    pub right: PhotometricLoss,
    /// Sum of the left and right photometric losses.
    pub image_loss: Tensor,
    /// Left disparity against the right one projected in the left frame.
    pub disp_loss_left: Tensor,
    /// Right disparity against the left one projected in the right frame.
    pub disp_loss_right: Tensor,
    /// `disp_loss_left + disp_loss_right`.
    pub disp_loss: Tensor,
    /// Mean absolute difference of the translations.
    pub translation_loss: Tensor,
    /// Mean absolute difference of the rotations.
    pub rotation_loss: Tensor,
    /// `translation_loss + rotation_loss`.
    pub pose_loss: Tensor,
    /// Weighted sum of all terms, the quantity to minimize.
    pub total_loss: Tensor,
}

/// Host copies of the scalar losses.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct LossValues {
    /// Photometric loss.
    pub image_loss: Float,
    /// Disparity consistency loss.
    pub disp_loss: Float,
    /// Pose consistency loss.
    pub pose_loss: Float,
    /// Weighted total.
    pub total_loss: Float,
}

impl Losses {
    /// Compose all the loss terms.
    pub fn compose(
        params: &Params,
        left: &Tensor,
        right: &Tensor,
        views: &ViewSynthesis,
        motion_left: &EgoMotion,
        motion_right: &EgoMotion,
    ) -> Result<Self> {
        let alpha = params.alpha_image_loss;
        let photo_left = PhotometricLoss::new(&views.left_est, left, alpha)?;
        let photo_right = PhotometricLoss::new(&views.right_est, right, alpha)?;
        let image_loss = (&photo_left.combined + &photo_right.combined)?;

        let disp_loss_left =
            mean_abs_diff(&views.disparity_left, &views.right_to_left_disparity)?;
        let disp_loss_right =
            mean_abs_diff(&views.disparity_right, &views.left_to_right_disparity)?;
        let disp_loss = (&disp_loss_left + &disp_loss_right)?;

        let translation_loss = mean_abs_diff(&motion_left.translation, &motion_right.translation)?;
        let rotation_loss = mean_abs_diff(&motion_left.rotation, &motion_right.rotation)?;
        let pose_loss = (&translation_loss + &rotation_loss)?;

        let total_loss = ((&image_loss
            + disp_loss.affine(f64::from(params.disp_gradient_loss_weight), 0.0)?)?
            + pose_loss.affine(f64::from(params.lr_loss_weight), 0.0)?)?;

        Ok(Self {
            left: photo_left,
            right: photo_right,
            image_loss,
            disp_loss_left,
            disp_loss_right,
            disp_loss,
            translation_loss,
            rotation_loss,
            pose_loss,
            total_loss,
        })
    }

    /// Copy the main scalars to the host.
    pub fn values(&self) -> Result<LossValues> {
        Ok(LossValues {
            image_loss: self.image_loss.to_scalar()?,
            disp_loss: self.disp_loss.to_scalar()?,
            pose_loss: self.pose_loss.to_scalar()?,
            total_loss: self.total_loss.to_scalar()?,
        })
    }

    /// Fail if the total loss diverged to NaN or infinity.
    pub fn ensure_finite(&self) -> error::Result<LossValues> {
        let values = self.values()?;
        if values.total_loss.is_finite() {
            Ok(values)
        } else {
            log::error!("non finite total loss: {:?}", values);
            Err(error::Error::NonFinite("total_loss"))
        }
    }
}
