// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resizing, padding and gradient helpers on `[batch, channels, height, width]` tensors.
//!
//! Everything here is built from differentiable tensor operations
//! so it can sit anywhere in the forward pass.

use candle_core::{Device, Result, Tensor};

use crate::misc::type_aliases::{DMat, Float};

/// Area (box) weights mapping `src` samples onto `dst` samples.
///
/// Row `i` holds the overlap of output cell `i` with every input cell,
/// normalized so each row sums to 1. Works for both down and up sampling.
#[allow(clippy::cast_precision_loss)]
pub fn area_weights(src: usize, dst: usize) -> DMat {
    let scale = src as f64 / dst as f64;
    DMat::from_fn(dst, src, |i, j| {
        let start = i as f64 * scale;
        let end = start + scale;
        let overlap = end.min(j as f64 + 1.0) - start.max(j as f64);
        (overlap.max(0.0) / scale) as Float
    })
}

/// Upload a host matrix as a row-major 2D tensor.
fn to_tensor(mat: &DMat, device: &Device) -> Result<Tensor> {
    // nalgebra is column major, so the transpose buffer is the row-major one.
    let (rows, cols) = mat.shape();
    Tensor::from_slice(mat.transpose().as_slice(), (rows, cols), device)
}

/// Resize by averaging over covered areas (like `resize_area`).
pub fn resize_area(x: &Tensor, height: usize, width: usize) -> Result<Tensor> {
    let (b, c, h, w) = x.dims4()?;
    if (h, w) == (height, width) {
        return Ok(x.clone());
    }
    let device = x.device();
    // Shapes (w, width) and (h, height): applied on the right of each row.
    let cols = to_tensor(&area_weights(w, width).transpose(), device)?;
    let rows = to_tensor(&area_weights(h, height).transpose(), device)?;

    let x = x.contiguous()?.reshape((b * c * h, w))?.matmul(&cols)?;
    let x = x.reshape((b, c, h, width))?.transpose(2, 3)?.contiguous()?;
    let x = x.reshape((b * c * width, h))?.matmul(&rows)?;
    x.reshape((b, c, width, height))?.transpose(2, 3)?.contiguous()
}

/// Successive half resolutions of an image, the first level being the image itself.
/// Stops before `num_scales` if one dimension would reach zero.
pub fn scale_pyramid(img: &Tensor, num_scales: usize) -> Result<Vec<Tensor>> {
    let (_, _, h, w) = img.dims4()?;
    let mut pyramid = vec![img.clone()];
    for level in 1..num_scales {
        let ratio = 1 << level;
        let (nh, nw) = (h / ratio, w / ratio);
        if nh == 0 || nw == 0 {
            break;
        }
        pyramid.push(resize_area(img, nh, nw)?);
    }
    Ok(pyramid)
}

/// Nearest neighbor upsampling by an integer ratio.
pub fn upsample_nn(x: &Tensor, ratio: usize) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    x.upsample_nearest2d(h * ratio, w * ratio)
}

/// Horizontal differences `x[.., j] - x[.., j + 1]`, one column narrower.
pub fn gradient_x(x: &Tensor) -> Result<Tensor> {
    let w = x.dim(3)?;
    x.narrow(3, 0, w - 1)? - x.narrow(3, 1, w - 1)?
}

/// Vertical differences `x[.., i, ..] - x[.., i + 1, ..]`, one row shorter.
pub fn gradient_y(x: &Tensor) -> Result<Tensor> {
    let h = x.dim(2)?;
    x.narrow(2, 0, h - 1)? - x.narrow(2, 1, h - 1)?
}

/// Drop the last row (column) of `x` if the reference height (width) is odd.
///
/// A stride 2 convolution maps an odd size `2k+1` to `k+1`,
/// which upsamples back to `2k+2`: one too many.
pub fn crop_odd(x: &Tensor, ref_height: usize, ref_width: usize) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let x = if ref_height % 2 == 1 {
        x.narrow(2, 0, h - 1)?
    } else {
        x.clone()
    };
    if ref_width % 2 == 1 {
        x.narrow(3, 0, w - 1)
    } else {
        Ok(x)
    }
}

/// Output size of a "same" convolution.
pub fn same_output_size(size: usize, stride: usize) -> usize {
    (size + stride - 1) / stride
}

/// `(before, after)` zero padding of a "same" convolution.
/// The odd extra pixel goes after.
pub fn same_padding(size: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out = same_output_size(size, stride);
    let total = ((out - 1) * stride + kernel).saturating_sub(size);
    (total / 2, total - total / 2)
}

/// Zero pad height and width so that a valid convolution behaves as a "same" one.
pub fn pad_same(x: &Tensor, kernel: usize, stride: usize) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let (top, bottom) = same_padding(h, kernel, stride);
    let (left, right) = same_padding(w, kernel, stride);
    x.pad_with_zeros(2, top, bottom)?
        .pad_with_zeros(3, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx;
    use quickcheck_macros;

    fn ramp(h: usize, w: usize) -> Tensor {
        Tensor::arange(0f32, (h * w) as f32, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, h, w))
            .unwrap()
    }

    fn values(x: &Tensor) -> Vec<Float> {
        x.flatten_all().unwrap().to_vec1().unwrap()
    }

    #[test]
    fn halving_averages_blocks() {
        let x = ramp(2, 4);
        // 0 1 2 3
        // 4 5 6 7
        let half = resize_area(&x, 1, 2).unwrap();
        assert_eq!(half.dims(), &[1, 1, 1, 2]);
        let v = values(&half);
        approx::assert_relative_eq!(v[0], 2.5, epsilon = 1e-5);
        approx::assert_relative_eq!(v[1], 4.5, epsilon = 1e-5);
    }

    #[test]
    fn constant_image_unchanged() {
        let x = Tensor::full(0.7f32, (2, 3, 15, 22), &Device::Cpu).unwrap();
        let resized = resize_area(&x, 8, 31).unwrap();
        assert_eq!(resized.dims(), &[2, 3, 8, 31]);
        for v in values(&resized) {
            approx::assert_relative_eq!(v, 0.7, epsilon = 1e-5);
        }
    }

    #[test]
    fn upsampling_replicates() {
        let x = ramp(1, 2);
        let up = resize_area(&x, 2, 4).unwrap();
        assert_eq!(values(&up), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn pyramid_levels() {
        let img = Tensor::ones((2, 3, 20, 12), candle_core::DType::F32, &Device::Cpu).unwrap();
        let pyramid = scale_pyramid(&img, 4).unwrap();
        let dims: Vec<_> = pyramid.iter().map(|l| l.dims4().unwrap()).collect();
        assert_eq!(dims, vec![(2, 3, 20, 12), (2, 3, 10, 6), (2, 3, 5, 3), (2, 3, 2, 1)]);
        assert_eq!(scale_pyramid(&img, 10).unwrap().len(), 4);
    }

    #[test]
    fn gradients_of_ramp() {
        let x = ramp(3, 4);
        assert!(values(&gradient_x(&x).unwrap()).iter().all(|&g| g == -1.0));
        assert!(values(&gradient_y(&x).unwrap()).iter().all(|&g| g == -4.0));
        assert_eq!(gradient_x(&x).unwrap().dims(), &[1, 1, 3, 3]);
        assert_eq!(gradient_y(&x).unwrap().dims(), &[1, 1, 2, 4]);
    }

    #[test]
    fn crop_only_odd_sides() {
        let x = ramp(6, 8);
        assert_eq!(crop_odd(&x, 5, 8).unwrap().dims(), &[1, 1, 5, 8]);
        assert_eq!(crop_odd(&x, 6, 7).unwrap().dims(), &[1, 1, 6, 7]);
        assert_eq!(crop_odd(&x, 6, 8).unwrap().dims(), &[1, 1, 6, 8]);
    }

    #[test]
    fn same_padding_values() {
        assert_eq!(same_padding(7, 3, 1), (1, 1));
        assert_eq!(same_padding(8, 3, 2), (0, 1));
        assert_eq!(same_padding(7, 7, 2), (3, 3));
        assert_eq!(same_padding(101, 7, 1), (3, 3));
    }

    #[test]
    fn upsample_nn_doubles() {
        let up = upsample_nn(&ramp(2, 3), 2).unwrap();
        assert_eq!(up.dims(), &[1, 1, 4, 6]);
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn area_weights_rows_sum_to_one(src: u8, dst: u8) -> bool {
        let (src, dst) = (src as usize % 64 + 1, dst as usize % 64 + 1);
        area_weights(src, dst)
            .row_iter()
            .all(|row| (row.sum() - 1.0).abs() < 1e-4)
    }

    #[quickcheck_macros::quickcheck]
    fn pad_same_gives_ceil_size(size: u8, kernel: u8, stride: bool) -> bool {
        let size = size as usize % 50 + 1;
        let kernel = 2 * (kernel as usize % 4) + 1;
        let stride = if stride { 2 } else { 1 };
        let (before, after) = same_padding(size, kernel, stride);
        let padded = size + before + after;
        (padded - kernel) / stride + 1 == same_output_size(size, stride)
    }
}
