// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core functionalities of the depth and ego-motion networks.

pub mod depth_net;
pub mod diagnostics;
pub mod layers;
pub mod loss;
pub mod model;
pub mod params;
pub mod pose_net;
pub mod sampler;
pub mod scale;
pub mod synthesis;
