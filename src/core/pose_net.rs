// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Network predicting the camera motion between two consecutive images.
//!
//! Both images are resized to a fixed resolution so that the dense layers
//! have a fixed input size whatever the resolution of the dataset.

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use crate::core::layers::{Activation, SameConv2d};
use crate::core::scale;
use crate::misc::type_aliases::{Float, Iso3, Vec3};

/// `(channels, kernel_size)` of the stride 2 convolutions.
pub const ENCODER_LAYERS: [(usize, usize); 7] = [
    (16, 7),
    (32, 5),
    (64, 3),
    (128, 3),
    (256, 3),
    (256, 3),
    (512, 3),
];

/// Width of the hidden dense layers.
pub const HIDDEN_UNITS: usize = 512;

const INPUT_CHANNELS: usize = 6;
const DENSE_ACTIVATION: Activation = Activation::Linear;

/// Translation and rotation predicted for each element of a batch.
#[derive(Clone, Debug)]
pub struct EgoMotion {
    /// `[b, 3]` translation.
    pub translation: Tensor,
    /// `[b, 3]` rotation as a scaled axis (axis-angle) vector.
    pub rotation: Tensor,
}

impl EgoMotion {
    /// Rigid body motion of each element of the batch.
    pub fn to_isometries(&self) -> Result<Vec<Iso3>> {
        let translations: Vec<Vec<Float>> = self.translation.to_vec2()?;
        let rotations: Vec<Vec<Float>> = self.rotation.to_vec2()?;
        Ok(translations
            .iter()
            .zip(rotations.iter())
            .map(|(t, r)| Iso3::new(Vec3::from_column_slice(t), Vec3::from_column_slice(r)))
            .collect())
    }
}

/// Three dense layers, the last one producing a 3-vector.
#[derive(Debug)]
struct DenseHead {
    layers: Vec<Linear>,
}

impl DenseHead {
    fn new(in_features: usize, vb: VarBuilder) -> Result<Self> {
        let layers = vec![
            linear(in_features, HIDDEN_UNITS, vb.pp("fc1"))?,
            linear(HIDDEN_UNITS, HIDDEN_UNITS, vb.pp("fc2"))?,
            linear(HIDDEN_UNITS, 3, vb.pp("fc3"))?,
        ];
        Ok(Self { layers })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut xs = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if i < last {
                xs = DENSE_ACTIVATION.apply(&xs)?;
            }
        }
        Ok(xs)
    }
}

/// Pose prediction network.
#[derive(Debug)]
pub struct PoseNet {
    input_size: (usize, usize),
    encoder: Vec<SameConv2d>,
    translation: DenseHead,
    rotation: DenseHead,
}

impl PoseNet {
    /// Register all weights under `vb`.
    /// Images are resized to `input_size = (height, width)` before the encoder.
    pub fn new(input_size: (usize, usize), vb: VarBuilder) -> Result<Self> {
        let mut encoder = Vec::with_capacity(ENCODER_LAYERS.len());
        let mut in_channels = INPUT_CHANNELS;
        for (i, &(channels, kernel)) in ENCODER_LAYERS.iter().enumerate() {
            encoder.push(SameConv2d::new(
                in_channels,
                channels,
                kernel,
                2,
                Activation::Relu,
                vb.pp(format!("conv{}", i + 1)),
            )?);
            in_channels = channels;
        }
        let features = flattened_features(input_size);
        log::debug!(
            "pose network: {:?} inputs flatten to {} features",
            input_size,
            features
        );
        Ok(Self {
            input_size,
            encoder,
            translation: DenseHead::new(features, vb.pp("translation"))?,
            rotation: DenseHead::new(features, vb.pp("rotation"))?,
        })
    }

    /// Motion from `image` to `image_next`, both `[b, 3, h, w]`.
    pub fn forward(&self, image: &Tensor, image_next: &Tensor) -> Result<EgoMotion> {
        let (height, width) = self.input_size;
        let image = scale::resize_area(image, height, width)?;
        let image_next = scale::resize_area(image_next, height, width)?;
        let mut xs = Tensor::cat(&[&image, &image_next], 1)?;
        for conv in &self.encoder {
            xs = conv.forward(&xs)?;
        }
        let features = xs.flatten_from(1)?;
        Ok(EgoMotion {
            translation: self.translation.forward(&features)?,
            rotation: self.rotation.forward(&features)?,
        })
    }
}

/// Size of the encoder output once flattened, for a given input size.
pub fn flattened_features((height, width): (usize, usize)) -> usize {
    let halve = |size| {
        ENCODER_LAYERS
            .iter()
            .fold(size, |s, _| scale::same_output_size(s, 2))
    };
    let channels = ENCODER_LAYERS[ENCODER_LAYERS.len() - 1].0;
    channels * halve(height) * halve(width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn canonical_resolution_features() {
        assert_eq!(flattened_features((384, 1280)), 15360);
        assert_eq!(flattened_features((128, 128)), 512);
        assert_eq!(flattened_features((100, 200)), 512 * 2);
    }

    #[test]
    fn output_shapes_independent_of_input_size() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = PoseNet::new((64, 128), vb.pp("pose")).unwrap();
        for &(h, w) in &[(50, 70), (64, 128), (130, 31)] {
            let a = Tensor::rand(0f32, 1.0, (2, 3, h, w), &Device::Cpu).unwrap();
            let b = Tensor::rand(0f32, 1.0, (2, 3, h, w), &Device::Cpu).unwrap();
            let motion = net.forward(&a, &b).unwrap();
            assert_eq!(motion.translation.dims(), &[2, 3]);
            assert_eq!(motion.rotation.dims(), &[2, 3]);
        }
    }

    #[test]
    fn heads_have_disjoint_weights() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _net = PoseNet::new((128, 128), vb).unwrap();
        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("translation.fc1.weight"));
        assert!(data.contains_key("rotation.fc1.weight"));
        // 7 convs and 2 x 3 dense layers, each with weight and bias.
        assert_eq!(data.len(), 2 * (7 + 6));
    }

    #[test]
    fn isometries_from_predictions() {
        let device = Device::Cpu;
        let motion = EgoMotion {
            translation: Tensor::new(&[[1f32, 2.0, 3.0]], &device).unwrap(),
            rotation: Tensor::new(&[[0f32, 0.0, std::f32::consts::FRAC_PI_2]], &device).unwrap(),
        };
        let isometries = motion.to_isometries().unwrap();
        assert_eq!(isometries.len(), 1);
        let iso = isometries[0];
        approx::assert_relative_eq!(iso.translation.vector, Vec3::new(1.0, 2.0, 3.0));
        let x_axis = iso.rotation * Vec3::x();
        approx::assert_relative_eq!(x_axis, Vec3::y(), epsilon = 1e-6);
    }
}
