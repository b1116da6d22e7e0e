/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The seam between the layer bridge and whatever owns the actual pixel
//! storage, GPU texture or CPU bitmap.

use std::time::Duration;

use euclid::default::{Point2D, Size2D};
use pixels::{AlphaMode, Color, PixelFormat, Snapshot};
use serde::{Deserialize, Serialize};

use crate::recording::PaintRecord;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ColorSpace {
    Srgb,
    LinearRgb,
    DisplayP3,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OpacityMode {
    Opaque,
    NonOpaque,
}

/// Color configuration of a canvas surface. Immutable for the lifetime of a
/// bridge.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CanvasColorParams {
    pub color_space: ColorSpace,
    pub pixel_format: PixelFormat,
    pub opacity_mode: OpacityMode,
}

impl Default for CanvasColorParams {
    fn default() -> CanvasColorParams {
        CanvasColorParams {
            color_space: ColorSpace::Srgb,
            pixel_format: PixelFormat::RGBA8,
            opacity_mode: OpacityMode::NonOpaque,
        }
    }
}

impl CanvasColorParams {
    pub fn alpha_mode(&self) -> AlphaMode {
        match self.opacity_mode {
            OpacityMode::Opaque => AlphaMode::Opaque,
            OpacityMode::NonOpaque => AlphaMode::Unpremultiplied,
        }
    }
}

/// Identifies an in-flight GPU-side raster duration query.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RasterQueryId(pub u64);

/// The backing store behind a canvas surface. Owned exclusively by the
/// bridge; the compositor only ever sees snapshots packaged as transferable
/// resources.
///
/// All failures are reported as `None`/`false` return values. A provider
/// whose GPU context has been lost reports `is_valid() == false` and is
/// dropped and recreated by the bridge, never repaired.
pub trait CanvasResourceProvider {
    fn size(&self) -> Size2D<u32>;

    fn is_accelerated(&self) -> bool;

    /// Validity check, run by the bridge before every use. Software
    /// providers are always valid; accelerated providers become invalid on
    /// context loss.
    fn is_valid(&self) -> bool;

    fn clear(&mut self, color: Color);

    /// Rasters a finished recording into the backing store.
    fn apply_record(&mut self, record: &PaintRecord);

    /// Reads back the current contents. None on readback failure.
    fn snapshot(&mut self) -> Option<Snapshot>;

    /// Direct raster write, bypassing the recording path. `pixels` rows are
    /// `row_bytes` apart; the destination rectangle is clipped to the
    /// surface. Returns false if nothing was written.
    fn write_pixels(
        &mut self,
        source_size: Size2D<u32>,
        pixels: &[u8],
        row_bytes: usize,
        origin: Point2D<i32>,
    ) -> bool;

    /// Starts a GPU-side timing query for the raster about to be submitted.
    /// Providers without timing support return None.
    fn begin_raster_query(&mut self) -> Option<RasterQueryId> {
        None
    }

    /// Retires finished timing queries. Unfinished queries stay pending.
    fn poll_raster_queries(&mut self) -> Vec<(RasterQueryId, Duration)> {
        Vec::new()
    }

    /// Throttles a producer that is outrunning the compositor. Accelerated
    /// providers block here until the GPU catches up; software providers
    /// are naturally paced and do nothing.
    fn rate_limit(&mut self) {}
}

/// Creates backing stores on demand. The bridge calls this lazily on first
/// draw and again after context loss. Returning None signals allocation
/// failure; the bridge degrades instead of propagating an error.
pub trait ResourceProviderFactory {
    fn create_provider(
        &mut self,
        size: Size2D<u32>,
        color_params: &CanvasColorParams,
        accelerated: bool,
    ) -> Option<Box<dyn CanvasResourceProvider>>;
}
