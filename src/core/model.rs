// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Assembly of the full model for one forward pass.
//!
//! A `Network` owns the depth and pose sub-networks. It is built once from a
//! `VarBuilder` and borrowed by every `Model`, so the left and right cameras,
//! as well as several model replicas, all use the same weights.
//!
//! ```no_run
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use undeepvo::core::model::{Mode, Model, Network, StereoBatch};
//! use undeepvo::core::params::Params;
//!
//! # fn main() -> undeepvo::error::Result<()> {
//! let params = Params::default();
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let network = Network::new(&params, vb.pp("model"))?;
//!
//! let frame = || Tensor::zeros((1, 3, 256, 512), DType::F32, &Device::Cpu);
//! let inputs = StereoBatch::new(frame()?, frame()?, frame()?, frame()?)?;
//! let model = Model::new(params, Mode::Train, inputs, &network, 0)?;
//! model.total_loss()?.backward()?;
//! # Ok(())
//! # }
//! ```

use candle_core::Tensor;
use candle_nn::VarBuilder;
use std::str::FromStr;

use crate::core::depth_net::DepthNet;
use crate::core::diagnostics::Diagnostics;
use crate::core::loss::{Losses, SSIM_MIN_SIZE};
use crate::core::params::Params;
use crate::core::pose_net::{EgoMotion, PoseNet};
use crate::core::sampler::BilinearSampler;
use crate::core::synthesis::ViewSynthesis;
use crate::error::{Error, Result};

/// What a forward pass builds.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Predictions, view synthesis, losses and diagnostics.
    Train,
    /// Predictions only.
    Test,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

/// The four images of a stereo pair at two consecutive times.
#[derive(Clone, Debug)]
pub struct StereoBatch {
    /// Left image at time t.
    pub left: Tensor,
    /// Right image at time t.
    pub right: Tensor,
    /// Left image at time t+1.
    pub left_next: Tensor,
    /// Right image at time t+1.
    pub right_next: Tensor,
}

impl StereoBatch {
    /// Check that all images are `[b, 3, h, w]` with the same non-empty shape.
    pub fn new(left: Tensor, right: Tensor, left_next: Tensor, right_next: Tensor) -> Result<Self> {
        let dims = check_image("left", &left)?;
        for (name, image) in &[
            ("right", &right),
            ("left_next", &left_next),
            ("right_next", &right_next),
        ] {
            if image.dims() != dims.as_slice() {
                return Err(Error::ShapeMismatch {
                    input: *name,
                    expected: format!("{:?} like `left`", dims),
                    actual: image.dims().to_vec(),
                });
            }
        }
        Ok(Self {
            left,
            right,
            left_next,
            right_next,
        })
    }

    /// `(batch, height, width)` of the images.
    pub fn dims(&self) -> (usize, usize, usize) {
        let dims = self.left.dims();
        (dims[0], dims[2], dims[3])
    }
}

fn check_image(input: &'static str, image: &Tensor) -> Result<Vec<usize>> {
    let dims = image.dims();
    let valid = dims.len() == 4 && dims[1] == 3 && dims.iter().all(|&d| d > 0);
    if valid {
        Ok(dims.to_vec())
    } else {
        Err(Error::ShapeMismatch {
            input,
            expected: "[batch, 3, height, width] with non-zero sizes".to_string(),
            actual: dims.to_vec(),
        })
    }
}

/// Depth and pose sub-networks sharing one set of weights.
#[derive(Debug)]
pub struct Network {
    depth: DepthNet,
    pose: PoseNet,
}

/// Raw predictions of the network for a stereo batch.
#[derive(Clone, Debug)]
pub struct Predictions {
    /// Depth of the left image, `[b, 1, h, w]`.
    pub depthmap_left: Tensor,
    /// Depth of the right image, `[b, 1, h, w]`.
    pub depthmap_right: Tensor,
    /// Motion of the left camera from t to t+1.
    pub motion_left: EgoMotion,
    /// Motion of the right camera from t to t+1.
    pub motion_right: EgoMotion,
}

impl Network {
    /// Create (or load, depending on the `VarBuilder` backend) all weights.
    pub fn new(params: &Params, vb: VarBuilder) -> Result<Self> {
        params.validate()?;
        let depth = DepthNet::new(params.use_deconv, params.min_depth, vb.pp("depth"))?;
        let pose = PoseNet::new((params.pose_height, params.pose_width), vb.pp("pose"))?;
        Ok(Self { depth, pose })
    }

    /// Run each sub-network on both cameras.
    pub fn forward(&self, inputs: &StereoBatch) -> Result<Predictions> {
        Ok(Predictions {
            depthmap_left: self.depth.forward(&inputs.left)?,
            depthmap_right: self.depth.forward(&inputs.right)?,
            motion_left: self.pose.forward(&inputs.left, &inputs.left_next)?,
            motion_right: self.pose.forward(&inputs.right, &inputs.right_next)?,
        })
    }
}

/// Tensors only built in train mode.
#[derive(Clone, Debug)]
struct TrainOutputs {
    views: ViewSynthesis,
    losses: Losses,
    diagnostics: Diagnostics,
}

/// One forward pass of the model on a stereo batch.
#[derive(Clone, Debug)]
pub struct Model {
    params: Params,
    mode: Mode,
    model_index: usize,
    inputs: StereoBatch,
    predictions: Predictions,
    train: Option<TrainOutputs>,
}

impl Model {
    /// Run the network, then in train mode synthesize views and compose the losses.
    pub fn new(
        params: Params,
        mode: Mode,
        inputs: StereoBatch,
        network: &Network,
        model_index: usize,
    ) -> Result<Self> {
        params.validate()?;
        let (batch, height, width) = inputs.dims();
        if mode == Mode::Train && (height < SSIM_MIN_SIZE || width < SSIM_MIN_SIZE) {
            return Err(Error::ShapeMismatch {
                input: "left",
                expected: format!(
                    "height and width of at least {} in train mode",
                    SSIM_MIN_SIZE
                ),
                actual: inputs.left.dims().to_vec(),
            });
        }
        if (height, width) != (params.height, params.width) {
            log::warn!(
                "model_{}: input size {}x{} differs from configured {}x{}",
                model_index,
                height,
                width,
                params.height,
                params.width
            );
        }
        log::debug!(
            "model_{}: {:?} pass on a batch of {} {}x{} images",
            model_index,
            mode,
            batch,
            height,
            width
        );

        let predictions = network.forward(&inputs)?;
        let train = match mode {
            Mode::Test => None,
            Mode::Train => Some(build_train_outputs(
                &params,
                model_index,
                &inputs,
                &predictions,
            )?),
        };
        Ok(Self {
            params,
            mode,
            model_index,
            inputs,
            predictions,
            train,
        })
    }

    /// Parameters the model was built with.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Mode the model was built in.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Index of this replica.
    pub fn model_index(&self) -> usize {
        self.model_index
    }

    /// Input images.
    pub fn inputs(&self) -> &StereoBatch {
        &self.inputs
    }

    /// All raw predictions.
    pub fn predictions(&self) -> &Predictions {
        &self.predictions
    }

    /// Depth of the left image.
    pub fn depthmap_left(&self) -> &Tensor {
        &self.predictions.depthmap_left
    }

    /// Depth of the right image.
    pub fn depthmap_right(&self) -> &Tensor {
        &self.predictions.depthmap_right
    }

    /// Translation of the left camera, `[b, 3]`.
    pub fn translation_left(&self) -> &Tensor {
        &self.predictions.motion_left.translation
    }

    /// Rotation of the left camera, `[b, 3]`.
    pub fn rotation_left(&self) -> &Tensor {
        &self.predictions.motion_left.rotation
    }

    /// Translation of the right camera, `[b, 3]`.
    pub fn translation_right(&self) -> &Tensor {
        &self.predictions.motion_right.translation
    }

    /// Rotation of the right camera, `[b, 3]`.
    pub fn rotation_right(&self) -> &Tensor {
        &self.predictions.motion_right.rotation
    }

    fn train_outputs(&self, what: &'static str) -> Result<&TrainOutputs> {
        self.train.as_ref().ok_or(Error::TrainOnly(what))
    }

    /// Disparities, reconstructed images and cross-projected disparities.
    pub fn synthesis(&self) -> Result<&ViewSynthesis> {
        Ok(&self.train_outputs("synthesis")?.views)
    }

    /// All loss terms.
    pub fn losses(&self) -> Result<&Losses> {
        Ok(&self.train_outputs("losses")?.losses)
    }

    /// The scalar to minimize.
    pub fn total_loss(&self) -> Result<&Tensor> {
        Ok(&self.train_outputs("total_loss")?.losses.total_loss)
    }

    /// Scalars and images for the external logger.
    pub fn diagnostics(&self) -> Result<&Diagnostics> {
        Ok(&self.train_outputs("diagnostics")?.diagnostics)
    }
}

fn build_train_outputs(
    params: &Params,
    model_index: usize,
    inputs: &StereoBatch,
    predictions: &Predictions,
) -> Result<TrainOutputs> {
    let sampler = BilinearSampler::new(params.wrap_mode);
    let views = ViewSynthesis::build(
        params,
        &sampler,
        &inputs.left,
        &inputs.right,
        &predictions.depthmap_left,
        &predictions.depthmap_right,
    )?;
    let losses = Losses::compose(
        params,
        &inputs.left,
        &inputs.right,
        &views,
        &predictions.motion_left,
        &predictions.motion_right,
    )?;
    let diagnostics = Diagnostics::collect(
        model_index,
        params,
        &inputs.left,
        &inputs.right,
        &views,
        &losses,
    )?;
    Ok(TrainOutputs {
        views,
        losses,
        diagnostics,
    })
}
