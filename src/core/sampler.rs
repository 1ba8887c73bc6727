// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Differentiable horizontal resampling of images.
//!
//! For rectified stereo pairs, corresponding points only move along rows,
//! so warping reduces to a 1D bilinear interpolation along the width axis:
//!
//! `out(x, y) = img(x + shift(x, y), y)`

use candle_core::{DType, Result, Tensor};

use crate::core::params::WrapMode;

/// Resample an image along its rows.
pub trait HorizontalSampler {
    /// Sample `image` (`[b, c, h, w]`) at columns `x + shift`.
    /// `shift` is `[b, 1, h, w]` (shared by all channels) or `[b, c, h, w]`, in pixels.
    fn sample(&self, image: &Tensor, shift: &Tensor) -> Result<Tensor>;
}

/// Bilinear horizontal sampler.
///
/// Gradients flow to both the sampled image and the shift field.
#[derive(Copy, Clone, Debug)]
pub struct BilinearSampler {
    wrap_mode: WrapMode,
}

impl BilinearSampler {
    /// Sampler with the given boundary handling.
    pub fn new(wrap_mode: WrapMode) -> Self {
        Self { wrap_mode }
    }

    /// Values of `image` at integer columns `xs` (detached, float valued).
    #[allow(clippy::cast_precision_loss)]
    fn gather_columns(&self, image: &Tensor, xs: &Tensor) -> Result<Tensor> {
        let (b, c, h, w) = image.dims4()?;
        let last = (w - 1) as f32;
        let (index, valid) = match self.wrap_mode {
            WrapMode::Border => {
                let inside = (xs.ge(0f32)?.to_dtype(DType::F32)?
                    * xs.le(last)?.to_dtype(DType::F32)?)?;
                (xs.clamp(0f32, last)?, Some(inside))
            }
            WrapMode::Edge => (xs.clamp(0f32, last)?, None),
            WrapMode::Wrap => {
                let width = w as f64;
                let turns = xs.affine(1.0 / width, 0.0)?.floor()?.affine(width, 0.0)?;
                ((xs - turns)?.clamp(0f32, last)?, None)
            }
        };
        let index = index
            .to_dtype(DType::U32)?
            .broadcast_as((b, c, h, w))?
            .contiguous()?;
        let values = image.contiguous()?.gather(&index, 3)?;
        match valid {
            Some(inside) => values.broadcast_mul(&inside),
            None => Ok(values),
        }
    }
}

impl HorizontalSampler for BilinearSampler {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&self, image: &Tensor, shift: &Tensor) -> Result<Tensor> {
        let (b, c, h, w) = image.dims4()?;
        let (sb, sc, sh, sw) = shift.dims4()?;
        if (sb, sh, sw) != (b, h, w) || (sc != 1 && sc != c) {
            candle_core::bail!(
                "shift field {:?} does not match image {:?}",
                shift.dims(),
                image.dims()
            );
        }
        let columns = Tensor::arange(0f32, w as f32, image.device())?.reshape((1, 1, 1, w))?;
        let xs = shift.broadcast_add(&columns)?;

        // Integer neighbors carry no gradient, the interpolation weights do.
        let x0 = xs.detach().floor()?;
        let x1 = (&x0 + 1.0)?;
        let w1 = (&xs - &x0)?;
        let w0 = w1.affine(-1.0, 1.0)?;

        let v0 = self.gather_columns(image, &x0)?.broadcast_mul(&w0)?;
        let v1 = self.gather_columns(image, &x1)?.broadcast_mul(&w1)?;
        v0 + v1
    }
}
