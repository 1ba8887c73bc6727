// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type shared by the whole crate.

use thiserror::Error;

/// Result alias using the crate `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while building or evaluating a model.
#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the tensor backend.
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// A configuration field is out of its valid range.
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParams {
        /// Name of the offending field.
        field: &'static str,
        /// Human readable explanation.
        reason: String,
    },

    /// An input tensor does not have the expected shape.
    #[error("shape mismatch for `{input}`: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        /// Name of the offending input.
        input: &'static str,
        /// Description of the expected shape.
        expected: String,
        /// Actual dimensions.
        actual: Vec<usize>,
    },

    /// Losses, view synthesis and diagnostics only exist in train mode.
    #[error("`{0}` is only built in train mode")]
    TrainOnly(&'static str),

    /// Mode string other than "train" or "test".
    #[error("unknown mode `{0}`, expected \"train\" or \"test\"")]
    InvalidMode(String),

    /// Boundary handling string other than the supported ones.
    #[error("unknown wrap mode `{0}`, expected \"border\", \"edge\" or \"wrap\"")]
    InvalidWrapMode(String),

    /// A loss evaluated to NaN or infinity.
    #[error("`{0}` is not finite")]
    NonFinite(&'static str),

    /// Failed to read a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a TOML configuration.
    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failed to decode or encode an image.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
