// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Named scalars and images exposed to an external logger.
//!
//! Every entry lives in a namespace specific to a model replica,
//! `model_{index}`, so that several replicas can report side by side.

use candle_core::{Result, Tensor};

use crate::core::loss::Losses;
use crate::core::params::Params;
use crate::core::scale;
use crate::core::synthesis::ViewSynthesis;
use crate::misc::type_aliases::Float;

/// Maximum number of batch elements kept in an image entry.
pub const MAX_OUTPUTS: usize = 4;

/// Value of a diagnostic entry.
#[derive(Clone, Debug)]
pub enum Summary {
    /// A single number.
    Scalar(Float),
    /// A batch of images `[n, c, h, w]` with `n <= MAX_OUTPUTS`.
    Images(Tensor),
}

/// Diagnostics of one model replica.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    namespace: String,
    entries: Vec<(String, Summary)>,
}

impl Diagnostics {
    /// Empty diagnostics for the replica `model_index`.
    pub fn new(model_index: usize) -> Self {
        Self {
            namespace: format!("model_{}", model_index),
            entries: Vec::new(),
        }
    }

    /// Gather the diagnostics of a forward pass.
    ///
    /// Loss scalars are always present. Images and disparity smoothness
    /// are only added if `params.full_summary` is set.
    pub fn collect(
        model_index: usize,
        params: &Params,
        left: &Tensor,
        right: &Tensor,
        views: &ViewSynthesis,
        losses: &Losses,
    ) -> Result<Self> {
        let mut diagnostics = Self::new(model_index);
        let values = losses.values()?;
        diagnostics.push_scalar("image_loss", values.image_loss);
        diagnostics.push_scalar("disp_loss", values.disp_loss);
        diagnostics.push_scalar("pose_loss", values.pose_loss);
        diagnostics.push_scalar("total_loss", values.total_loss);

        if params.full_summary {
            diagnostics.push_scalar(
                "disp_smoothness_left",
                smoothness(&views.disparity_left)?,
            );
            diagnostics.push_scalar(
                "disp_smoothness_right",
                smoothness(&views.disparity_right)?,
            );
            diagnostics.push_images("left_est", &views.left_est)?;
            diagnostics.push_images("right_est", &views.right_est)?;
            diagnostics.push_images("ssim_left", &losses.left.ssim_map)?;
            diagnostics.push_images("ssim_right", &losses.right.ssim_map)?;
            diagnostics.push_images("l1_left", &losses.left.l1_map)?;
            diagnostics.push_images("l1_right", &losses.right.l1_map)?;
            diagnostics.push_images("left", left)?;
            diagnostics.push_images("right", right)?;
        }
        Ok(diagnostics)
    }

    /// Add a scalar entry.
    pub fn push_scalar(&mut self, name: &str, value: Float) {
        self.entries.push((name.to_string(), Summary::Scalar(value)));
    }

    /// Add an image entry, keeping only the first `MAX_OUTPUTS` batch elements.
    pub fn push_images(&mut self, name: &str, images: &Tensor) -> Result<()> {
        let kept = images.dim(0)?.min(MAX_OUTPUTS);
        let images = images.narrow(0, 0, kept)?.detach();
        self.entries.push((name.to_string(), Summary::Images(images)));
        Ok(())
    }

    /// Namespace of this replica, `model_{index}`.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fully qualified name of an entry.
    pub fn tag(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }

    /// Entry with the given (unqualified) name.
    pub fn get(&self, name: &str) -> Option<&Summary> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, summary)| summary)
    }

    /// Value of a scalar entry.
    pub fn scalar(&self, name: &str) -> Option<Float> {
        match self.get(name) {
            Some(Summary::Scalar(value)) => Some(*value),
            _ => None,
        }
    }

    /// All entries with their qualified names, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (String, &Summary)> + '_ {
        self.entries
            .iter()
            .map(move |(name, summary)| (self.tag(name), summary))
    }

    /// Log every scalar entry at info level.
    pub fn log(&self) {
        for (tag, summary) in self.iter() {
            if let Summary::Scalar(value) = summary {
                log::info!("{}: {}", tag, value);
            }
        }
    }
}

/// Mean absolute horizontal plus vertical gradient of a disparity map.
fn smoothness(disparity: &Tensor) -> Result<Float> {
    let gx = scale::gradient_x(disparity)?.abs()?.mean_all()?;
    let gy = scale::gradient_y(disparity)?.abs()?.mean_all()?;
    (gx + gy)?.to_scalar()
}
