// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Convolution building blocks shared by the depth and pose networks.
//!
//! Every layer receives its activation explicitly, there is no default.

use candle_core::{Module, Result, Tensor};
use candle_nn::{
    conv2d, conv_transpose2d, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    VarBuilder,
};

use crate::core::scale;

/// Non linearity applied at the output of a layer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Activation {
    /// Exponential linear unit, with alpha = 1.
    Elu,
    /// Rectified linear unit.
    Relu,
    /// `ln(1 + exp(x))`, strictly positive.
    Softplus,
    /// Identity.
    Linear,
}

impl Activation {
    /// Apply the activation to a tensor.
    pub fn apply(self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Activation::Elu => xs.elu(1.0),
            Activation::Relu => xs.relu(),
            Activation::Softplus => softplus(xs),
            Activation::Linear => Ok(xs.clone()),
        }
    }
}

/// Stable softplus: `max(x, 0) + ln(1 + exp(-|x|))`.
pub fn softplus(xs: &Tensor) -> Result<Tensor> {
    let max_part = xs.maximum(0f32)?;
    let log_part = (xs.abs()?.neg()?.exp()? + 1.0)?.log()?;
    max_part + log_part
}

/// Convolution with "same" padding: output size is `ceil(input / stride)`.
#[derive(Debug)]
pub struct SameConv2d {
    conv: Conv2d,
    kernel_size: usize,
    stride: usize,
    activation: Activation,
}

impl SameConv2d {
    /// Create the layer and register its weights under `vb`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv2dConfig {
            stride,
            ..Default::default()
        };
        let conv = conv2d(in_channels, out_channels, kernel_size, cfg, vb)?;
        Ok(Self {
            conv,
            kernel_size,
            stride,
            activation,
        })
    }
}

impl Module for SameConv2d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let padded = scale::pad_same(xs, self.kernel_size, self.stride)?;
        self.activation.apply(&self.conv.forward(&padded)?)
    }
}

/// Doubling of the spatial resolution.
#[derive(Debug)]
pub enum UpConv2d {
    /// Transposed convolution of stride 2.
    Deconv(ConvTranspose2d, Activation),
    /// Nearest neighbor upsampling followed by a stride 1 convolution.
    Resize(SameConv2d),
}

impl UpConv2d {
    /// Transposed convolution producing exactly twice the input size.
    pub fn deconv(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        // out = 2 * in requires 2 * padding - output_padding = kernel_size - 2.
        let (padding, output_padding) = if kernel_size % 2 == 1 {
            ((kernel_size - 1) / 2, 1)
        } else {
            ((kernel_size - 2) / 2, 0)
        };
        let cfg = ConvTranspose2dConfig {
            padding,
            output_padding,
            stride: 2,
            dilation: 1,
        };
        let deconv = conv_transpose2d(in_channels, out_channels, kernel_size, cfg, vb)?;
        Ok(UpConv2d::Deconv(deconv, activation))
    }

    /// Nearest neighbor upsampling then convolution.
    pub fn resize(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv = SameConv2d::new(in_channels, out_channels, kernel_size, 1, activation, vb)?;
        Ok(UpConv2d::Resize(conv))
    }
}

impl Module for UpConv2d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            UpConv2d::Deconv(deconv, activation) => activation.apply(&deconv.forward(xs)?),
            UpConv2d::Resize(conv) => conv.forward(&scale::upsample_nn(xs, 2)?),
        }
    }
}

/// Two convolutions, stride 1 then stride 2, halving the resolution.
#[derive(Debug)]
pub struct ConvBlock {
    conv1: SameConv2d,
    conv2: SameConv2d,
}

impl ConvBlock {
    /// Create a block with weights under `vb.pp("conv1")` and `vb.pp("conv2")`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv1 = SameConv2d::new(
            in_channels,
            out_channels,
            kernel_size,
            1,
            activation,
            vb.pp("conv1"),
        )?;
        let conv2 = SameConv2d::new(
            out_channels,
            out_channels,
            kernel_size,
            2,
            activation,
            vb.pp("conv2"),
        )?;
        Ok(Self { conv1, conv2 })
    }
}

impl Module for ConvBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.conv2.forward(&self.conv1.forward(xs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn vb(varmap: &VarMap) -> VarBuilder {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    #[test]
    fn softplus_is_positive_and_matches() {
        let xs = Tensor::new(&[-30f32, -1.0, 0.0, 1.0, 30.0], &Device::Cpu).unwrap();
        let ys: Vec<f32> = softplus(&xs).unwrap().to_vec1().unwrap();
        assert!(ys.iter().all(|&y| y > 0.0));
        approx::assert_relative_eq!(ys[2], 2f32.ln(), epsilon = 1e-6);
        approx::assert_relative_eq!(ys[4], 30.0, epsilon = 1e-5);
        approx::assert_relative_eq!(ys[1], (1.0 + (-1f32).exp()).ln(), epsilon = 1e-6);
    }

    #[test]
    fn same_conv_sizes() {
        let varmap = VarMap::new();
        let conv = SameConv2d::new(3, 4, 7, 2, Activation::Elu, vb(&varmap)).unwrap();
        let xs = Tensor::zeros((1, 3, 13, 10), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(conv.forward(&xs).unwrap().dims(), &[1, 4, 7, 5]);
    }

    #[test]
    fn both_upsampling_paths_double() {
        let varmap = VarMap::new();
        let xs = Tensor::zeros((2, 4, 3, 5), DType::F32, &Device::Cpu).unwrap();
        let deconv = UpConv2d::deconv(4, 2, 3, Activation::Linear, vb(&varmap).pp("a")).unwrap();
        let resize = UpConv2d::resize(4, 2, 3, Activation::Linear, vb(&varmap).pp("b")).unwrap();
        assert_eq!(deconv.forward(&xs).unwrap().dims(), &[2, 2, 6, 10]);
        assert_eq!(resize.forward(&xs).unwrap().dims(), &[2, 2, 6, 10]);
    }

    #[test]
    fn even_kernel_deconv_doubles() {
        let varmap = VarMap::new();
        let xs = Tensor::zeros((1, 2, 4, 4), DType::F32, &Device::Cpu).unwrap();
        let deconv = UpConv2d::deconv(2, 2, 4, Activation::Linear, vb(&varmap)).unwrap();
        assert_eq!(deconv.forward(&xs).unwrap().dims(), &[1, 2, 8, 8]);
    }
}
