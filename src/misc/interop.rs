// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between the image and tensor types.
//!
//! Tensors hold batches `[b, c, h, w]` of values in `[0, 1]`.

use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::misc::type_aliases::Float;

/// Stack RGB images of identical size into a `[b, 3, h, w]` tensor in `[0, 1]`.
pub fn tensor_from_rgb(images: &[RgbImage], device: &Device) -> Result<Tensor> {
    let (width, height) = match images.first() {
        Some(img) => img.dimensions(),
        None => {
            return Err(Error::ShapeMismatch {
                input: "images",
                expected: "at least one image".to_string(),
                actual: vec![0],
            })
        }
    };
    let (h, w) = (height as usize, width as usize);
    let mut data = Vec::with_capacity(images.len() * 3 * h * w);
    for img in images {
        if img.dimensions() != (width, height) {
            return Err(Error::ShapeMismatch {
                input: "images",
                expected: format!("{}x{} like the first image", h, w),
                actual: vec![img.height() as usize, img.width() as usize],
            });
        }
        // Planar layout: all red values, then green, then blue.
        for channel in 0..3 {
            data.extend(img.pixels().map(|p| Float::from(p.0[channel]) / 255.0));
        }
    }
    Ok(Tensor::from_vec(data, (images.len(), 3, h, w), device)?)
}

/// Convert each element of a `[b, c, h, w]` tensor into an image.
///
/// Three channels give RGB images, one channel gives gray images.
/// Values are expected in `[0, 1]` and are clamped.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn images_from_tensor(tensor: &Tensor) -> Result<Vec<DynamicImage>> {
    let (batch_size, channels, height, width) = tensor.dims4()?;
    if channels != 1 && channels != 3 {
        return Err(Error::ShapeMismatch {
            input: "tensor",
            expected: "[batch, 1 or 3, height, width]".to_string(),
            actual: tensor.dims().to_vec(),
        });
    }
    let to_u8 = |v: Float| (v.max(0.0).min(1.0) * 255.0).round() as u8;
    let tensor = tensor.to_dtype(DType::F32)?;
    let batch = (0..batch_size)
        .map(|i| tensor.get(i)?.to_vec3::<Float>())
        .collect::<candle_core::Result<Vec<_>>>()?;
    let (w, h) = (width as u32, height as u32);
    let images = batch
        .iter()
        .map(|planes| {
            if channels == 1 {
                DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| {
                    Luma([to_u8(planes[0][y as usize][x as usize])])
                }))
            } else {
                let (r, g, b) = (&planes[0], &planes[1], &planes[2]);
                DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
                    let (x, y) = (x as usize, y as usize);
                    Rgb([to_u8(r[y][x]), to_u8(g[y][x]), to_u8(b[y][x])])
                }))
            }
        })
        .collect();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = if (x + y) % 2 == 0 { 255 } else { 0 };
            Rgb([v, (x * 10) as u8, (y * 20) as u8])
        })
    }

    #[test]
    fn rgb_round_trip() {
        let img = checkerboard(5, 3);
        let tensor = tensor_from_rgb(&[img.clone(), img.clone()], &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[2, 3, 3, 5]);
        let back = images_from_tensor(&tensor).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].to_rgb8(), img);
        assert_eq!(back[0].to_rgb8(), img);
    }

    #[test]
    fn planar_layout() {
        let img = RgbImage::from_pixel(2, 1, Rgb([255, 0, 51]));
        let tensor = tensor_from_rgb(&[img], &Device::Cpu).unwrap();
        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![1.0, 1.0, 0.0, 0.0, 0.2, 0.2]);
    }

    #[test]
    fn gray_and_clamped() {
        let tensor = Tensor::new(&[[[[-1f32, 0.5, 2.0]]]], &Device::Cpu).unwrap();
        let images = images_from_tensor(&tensor).unwrap();
        let gray = images[0].to_luma8();
        assert_eq!(gray.into_raw(), vec![0, 128, 255]);
    }

    #[test]
    fn bad_inputs() {
        assert!(tensor_from_rgb(&[], &Device::Cpu).is_err());
        let sizes = [checkerboard(2, 2), checkerboard(3, 2)];
        assert!(tensor_from_rgb(&sizes, &Device::Cpu).is_err());
        let two_channels = Tensor::zeros((1, 2, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(images_from_tensor(&two_channels).is_err());
    }
}
