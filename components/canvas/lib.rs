/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Lifecycle management for GPU-or-software backed 2D canvas surfaces: a
//! deferred paint recording buffer, a pluggable resource-provider seam, and
//! the layer bridge that flushes recordings, hibernates hidden surfaces, and
//! packages frames for the compositor.

#![deny(unsafe_code)]

mod layer_bridge;
mod recording;
mod resource_provider;
mod software;

pub use layer_bridge::{
    AccelerationHint, AccelerationMode, Canvas2dLayerBridge, HibernationEvent, HibernationLogger,
};
pub use recording::{DrawOp, PaintRecord, PaintRecorder, RecordingError};
pub use resource_provider::{
    CanvasColorParams, CanvasResourceProvider, ColorSpace, OpacityMode, RasterQueryId,
    ResourceProviderFactory,
};
pub use software::{SoftwareProviderFactory, SoftwareResourceProvider};
