// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration of the model and of its losses.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path, str::FromStr};

use crate::error::{Error, Result};
use crate::misc::type_aliases::Float;

/// Boundary handling of the horizontal sampler.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    /// Samples falling outside of the image read zero.
    Border,
    /// Samples are clamped to the first / last column.
    Edge,
    /// Samples wrap around the image width.
    Wrap,
}

impl FromStr for WrapMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "border" => Ok(WrapMode::Border),
            "edge" => Ok(WrapMode::Edge),
            "wrap" | "wrap-around" => Ok(WrapMode::Wrap),
            _ => Err(Error::InvalidWrapMode(s.to_string())),
        }
    }
}

/// Parameters of the model.
///
/// `batch_size`, `num_threads` and `num_epochs` are only carried for the training loop,
/// the model itself never reads them.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Expected input height (informational).
    pub height: usize,
    /// Expected input width (informational).
    pub width: usize,
    /// Distance between the two stereo cameras.
    pub baseline: Float,
    /// Focal length, in pixels.
    pub focal_length: Float,
    /// Number of stereo quadruplets per batch.
    pub batch_size: usize,
    /// Number of data loading threads.
    pub num_threads: usize,
    /// Number of training epochs.
    pub num_epochs: usize,
    /// Boundary handling of the image warps.
    pub wrap_mode: WrapMode,
    /// Transposed convolutions if true,
    /// nearest neighbor upsampling followed by a convolution otherwise.
    pub use_deconv: bool,
    /// Weight of the SSIM term in the photometric loss, in [0, 1].
    pub alpha_image_loss: Float,
    /// Multiplier of the left-right disparity consistency loss.
    pub disp_gradient_loss_weight: Float,
    /// Multiplier of the left-right pose consistency loss.
    pub lr_loss_weight: Float,
    /// Emit image diagnostics in addition to the scalar ones.
    pub full_summary: bool,
    /// Height of the images fed to the pose network.
    pub pose_height: usize,
    /// Width of the images fed to the pose network.
    pub pose_width: usize,
    /// Floor applied to depth before dividing by it.
    pub min_depth: Float,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            height: 256,
            width: 512,
            baseline: 0.54,
            focal_length: 718.856,
            batch_size: 8,
            num_threads: 8,
            num_epochs: 50,
            wrap_mode: WrapMode::Border,
            use_deconv: true,
            alpha_image_loss: 0.85,
            disp_gradient_loss_weight: 1.0,
            lr_loss_weight: 1.0,
            full_summary: false,
            pose_height: 384,
            pose_width: 1280,
            min_depth: 1e-3,
        }
    }
}

impl Params {
    /// Parse parameters from a TOML string.
    /// Missing fields take their default value.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let params: Params = toml::from_str(content)?;
        params.validate()?;
        Ok(params)
    }

    /// Read parameters from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Check that every field used by the model is in its valid range.
    pub fn validate(&self) -> Result<()> {
        positive("baseline", self.baseline)?;
        positive("focal_length", self.focal_length)?;
        positive("min_depth", self.min_depth)?;
        if !(0.0..=1.0).contains(&self.alpha_image_loss) {
            return Err(invalid(
                "alpha_image_loss",
                format!("{} is not in [0, 1]", self.alpha_image_loss),
            ));
        }
        non_negative("disp_gradient_loss_weight", self.disp_gradient_loss_weight)?;
        non_negative("lr_loss_weight", self.lr_loss_weight)?;
        if self.pose_height == 0 || self.pose_width == 0 {
            return Err(invalid(
                "pose_height",
                format!(
                    "pose input size {}x{} is empty",
                    self.pose_height, self.pose_width
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> Error {
    Error::InvalidParams { field, reason }
}

fn positive(field: &'static str, value: Float) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{} is not strictly positive", value)))
    }
}

fn non_negative(field: &'static str, value: Float) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{} is negative or not finite", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(Params::default().validate().is_ok());
    }

    #[test]
    fn alpha_out_of_range() {
        let params = Params {
            alpha_image_loss: 1.5,
            ..Params::default()
        };
        match params.validate() {
            Err(Error::InvalidParams { field, .. }) => assert_eq!(field, "alpha_image_loss"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn zero_baseline_rejected() {
        let params = Params {
            baseline: 0.0,
            ..Params::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn toml_with_partial_fields() {
        let params = Params::from_toml_str(
            r#"
            baseline = 0.3
            wrap_mode = "edge"
            use_deconv = false
            "#,
        )
        .unwrap();
        assert_eq!(params.baseline, 0.3);
        assert_eq!(params.wrap_mode, WrapMode::Edge);
        assert!(!params.use_deconv);
        assert_eq!(params.pose_width, Params::default().pose_width);
    }

    #[test]
    fn toml_invalid_values_rejected() {
        assert!(Params::from_toml_str("lr_loss_weight = -1.0").is_err());
        assert!(Params::from_toml_str("wrap_mode = \"mirror\"").is_err());
    }

    #[test]
    fn wrap_mode_from_str() {
        assert_eq!("border".parse::<WrapMode>().unwrap(), WrapMode::Border);
        assert_eq!("wrap-around".parse::<WrapMode>().unwrap(), WrapMode::Wrap);
        assert!("reflect".parse::<WrapMode>().is_err());
    }
}
