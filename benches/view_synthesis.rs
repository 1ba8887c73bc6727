// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use candle_core::{Device, Tensor};
use criterion::{criterion_group, criterion_main, Criterion};
use undeepvo::core::params::WrapMode;
use undeepvo::core::sampler::{BilinearSampler, HorizontalSampler};
use undeepvo::core::{loss, scale};

fn criterion_benchmark(c: &mut Criterion) {
    let device = Device::Cpu;
    let image = Tensor::rand(0f32, 1.0, (4, 3, 256, 512), &device).unwrap();
    let other = Tensor::rand(0f32, 1.0, (4, 3, 256, 512), &device).unwrap();
    let disparity = Tensor::rand(0f32, 20.0, (4, 1, 256, 512), &device).unwrap();

    c.bench_function("bilinear sampler 4x3x256x512", |b| {
        let sampler = BilinearSampler::new(WrapMode::Border);
        b.iter(|| sampler.sample(&image, &disparity).unwrap())
    });
    c.bench_function("ssim 4x3x256x512", |b| {
        b.iter(|| loss::ssim(&image, &other).unwrap())
    });
    c.bench_function("resize_area 256x512 to 384x1280", |b| {
        b.iter(|| scale::resize_area(&image, 384, 1280).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
