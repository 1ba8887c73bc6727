// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Encoder-decoder network predicting a dense depth map from one image.
//!
//! Seven stages halve the resolution in the encoder,
//! seven stages double it back in the decoder.
//! Each decoder stage, except the last one, is concatenated with the encoder stage
//! of the same resolution (skip connection). The deepest encoder output is never a skip.
//!
//! Any input size is accepted: when an encoder stage halves an odd size,
//! the matching upsampled tensor has one row/column too many and is cropped.

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::core::layers::{Activation, ConvBlock, SameConv2d, UpConv2d};
use crate::core::scale;
use crate::misc::type_aliases::Float;

/// `(channels, kernel_size)` of the encoder stages.
pub const ENCODER_STAGES: [(usize, usize); 7] = [
    (32, 7),
    (64, 5),
    (128, 3),
    (256, 3),
    (512, 3),
    (512, 3),
    (512, 3),
];

/// Channels of the decoder stages, from the deepest to the output.
pub const DECODER_STAGES: [usize; 7] = [512, 512, 256, 128, 64, 32, 1];

const DECODER_KERNEL: usize = 3;
const IMAGE_CHANNELS: usize = 3;

/// One decoder stage: upsample, concatenate the skip, fuse.
#[derive(Debug)]
struct DecoderStage {
    up: UpConv2d,
    fuse: SameConv2d,
}

impl DecoderStage {
    fn new(
        in_channels: usize,
        out_channels: usize,
        skip_channels: usize,
        use_deconv: bool,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let up = if use_deconv {
            UpConv2d::deconv(
                in_channels,
                out_channels,
                DECODER_KERNEL,
                Activation::Linear,
                vb.pp("upconv"),
            )?
        } else {
            UpConv2d::resize(
                in_channels,
                out_channels,
                DECODER_KERNEL,
                Activation::Linear,
                vb.pp("upconv"),
            )?
        };
        let fuse = SameConv2d::new(
            out_channels + skip_channels,
            out_channels,
            DECODER_KERNEL,
            1,
            activation,
            vb.pp("iconv"),
        )?;
        Ok(Self { up, fuse })
    }

    fn forward(&self, xs: &Tensor, skip: Option<&Tensor>) -> Result<Tensor> {
        let up = self.up.forward(xs)?;
        let merged = match skip {
            Some(skip) => {
                let (_, _, h, w) = skip.dims4()?;
                let up = scale::crop_odd(&up, h, w)?;
                Tensor::cat(&[&up, skip], 1)?
            }
            None => up,
        };
        self.fuse.forward(&merged)
    }
}

/// Depth prediction network.
#[derive(Debug)]
pub struct DepthNet {
    encoder: Vec<ConvBlock>,
    decoder: Vec<DecoderStage>,
    min_depth: Float,
}

impl DepthNet {
    /// Register all weights under `vb`.
    ///
    /// The last decoder convolution goes through a softplus
    /// and the result is floored at `min_depth`, so the depth is strictly positive.
    pub fn new(use_deconv: bool, min_depth: Float, vb: VarBuilder) -> Result<Self> {
        let mut encoder = Vec::with_capacity(ENCODER_STAGES.len());
        let mut in_channels = IMAGE_CHANNELS;
        for (i, &(channels, kernel)) in ENCODER_STAGES.iter().enumerate() {
            let vb = vb.pp(format!("encoder{}", i + 1));
            encoder.push(ConvBlock::new(in_channels, channels, kernel, Activation::Elu, vb)?);
            in_channels = channels;
        }

        // Skips are consumed from the deepest one, the bottleneck excluded.
        let skip_channels = ENCODER_STAGES
            .iter()
            .rev()
            .skip(1)
            .map(|&(channels, _)| channels)
            .chain(std::iter::once(0));
        let mut decoder = Vec::with_capacity(DECODER_STAGES.len());
        let last = DECODER_STAGES.len() - 1;
        for (i, (&channels, skip)) in DECODER_STAGES.iter().zip(skip_channels).enumerate() {
            let activation = if i == last {
                Activation::Softplus
            } else {
                Activation::Elu
            };
            let vb = vb.pp(format!("decoder{}", DECODER_STAGES.len() - i));
            decoder.push(DecoderStage::new(
                in_channels,
                channels,
                skip,
                use_deconv,
                activation,
                vb,
            )?);
            in_channels = channels;
        }

        Ok(Self {
            encoder,
            decoder,
            min_depth,
        })
    }

    /// Depth map `[b, 1, h, w]` of an image `[b, 3, h, w]`.
    pub fn forward(&self, image: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = image.dims4()?;
        let mut skips = Vec::with_capacity(self.encoder.len());
        let mut xs = image.clone();
        for stage in &self.encoder {
            xs = stage.forward(&xs)?;
            skips.push(xs.clone());
        }
        // The bottleneck is the decoder input, not a skip.
        skips.pop();

        for stage in &self.decoder {
            xs = stage.forward(&xs, skips.pop().as_ref())?;
        }
        let depth = scale::crop_odd(&xs, h, w)?;
        depth.maximum(self.min_depth)
    }
}
