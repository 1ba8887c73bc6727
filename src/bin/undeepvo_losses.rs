// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use image::imageops::FilterType;
use std::{env, error::Error, path::Path, path::PathBuf};
use undeepvo::core::model::{Mode, Model, Network, StereoBatch};
use undeepvo::core::params::Params;
use undeepvo::misc::interop;

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if let Err(error) = my_run(&args) {
        eprintln!("{}", error);
        std::process::exit(1);
    }
}

const USAGE: &str = "Usage: ./undeepvo_losses left right left_next right_next [params.toml] [weights.safetensors]";

/// Command line arguments.
struct Args {
    images: [PathBuf; 4],
    params: Option<PathBuf>,
    weights: Option<PathBuf>,
}

fn my_run(args: &[String]) -> Result<(), Box<dyn Error>> {
    // Check that the arguments are correct.
    let args = check_args(args)?;

    // Configuration, defaults if no file is given.
    let params = match &args.params {
        Some(path) => Params::load(path)?,
        None => Params::default(),
    };
    log::info!("{:?}", params);

    // Build the network, with fresh weights unless a checkpoint is given.
    let device = Device::Cpu;
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let network = Network::new(&params, vb.pp("model"))?;
    if let Some(path) = &args.weights {
        varmap.load(path)?;
        log::info!("weights loaded from {}", path.display());
    }

    // Load the four frames at the configured resolution.
    let frames = args
        .images
        .iter()
        .map(|path| read_frame(path, &params, &device))
        .collect::<Result<Vec<_>, _>>()?;
    let inputs = StereoBatch::new(
        frames[0].clone(),
        frames[1].clone(),
        frames[2].clone(),
        frames[3].clone(),
    )?;

    // Single training forward pass.
    let model = Model::new(params, Mode::Train, inputs, &network, 0)?;
    let values = model.losses()?.ensure_finite()?;
    model.diagnostics()?.log();
    let predictions = model.predictions();
    for (camera, motion) in &[
        ("left", &predictions.motion_left),
        ("right", &predictions.motion_right),
    ] {
        for iso in motion.to_isometries()? {
            log::info!("{} camera motion: {}", camera, iso);
        }
    }
    println!(
        "image_loss {} disp_loss {} pose_loss {} total_loss {}",
        values.image_loss, values.disp_loss, values.pose_loss, values.total_loss
    );
    Ok(())
}

// HELPERS #####################################################################

/// Verify that command line arguments are correct.
fn check_args(args: &[String]) -> Result<Args, String> {
    let optional = |arg: Option<&String>| arg.map(PathBuf::from);
    match args {
        [_, left, right, left_next, right_next, rest @ ..] if rest.len() <= 2 => {
            let images = [
                PathBuf::from(left),
                PathBuf::from(right),
                PathBuf::from(left_next),
                PathBuf::from(right_next),
            ];
            if let Some(missing) = images.iter().find(|p| !p.is_file()) {
                return Err(format!("The file {} does not exist", missing.display()));
            }
            Ok(Args {
                images,
                params: optional(rest.first()),
                weights: optional(rest.get(1)),
            })
        }
        _ => Err(USAGE.to_string()),
    }
}

/// Read an image as a `[1, 3, h, w]` tensor at the configured resolution.
#[allow(clippy::cast_possible_truncation)]
fn read_frame(
    path: &Path,
    params: &Params,
    device: &Device,
) -> Result<candle_core::Tensor, Box<dyn Error>> {
    let img = image::open(path)?.resize_exact(
        params.width as u32,
        params.height as u32,
        FilterType::Triangle,
    );
    Ok(interop::tensor_from_rgb(&[img.to_rgb8()], device)?)
}
