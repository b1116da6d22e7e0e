/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! CPU bitmap backing store. Used when acceleration is disabled, as the
//! fallback when GPU allocation fails, and for background rendering while a
//! surface is hidden.

use euclid::default::{Point2D, Rect, Size2D};
use log::warn;
use pixels::{self, Color, PixelFormat, Snapshot, compute_rgba8_byte_length_if_within_limit};

use crate::recording::{DrawOp, PaintRecord};
use crate::resource_provider::{
    CanvasColorParams, CanvasResourceProvider, ResourceProviderFactory,
};

/// Straight-alpha RGBA8 pixel storage with just enough raster capability to
/// execute recorded draw ops.
pub struct SoftwareResourceProvider {
    size: Size2D<u32>,
    color_params: CanvasColorParams,
    data: Vec<u8>,
}

impl SoftwareResourceProvider {
    pub fn new(
        size: Size2D<u32>,
        color_params: CanvasColorParams,
    ) -> Option<SoftwareResourceProvider> {
        let byte_length = compute_rgba8_byte_length_if_within_limit(
            size.width as usize,
            size.height as usize,
        )?;
        Some(SoftwareResourceProvider {
            size,
            color_params,
            data: vec![0; byte_length],
        })
    }

    fn fill_rect(&mut self, rect: &Rect<f32>, color: Color) {
        let rect = rect.round();
        let Some(clipped) = pixels::clip(
            Point2D::new(rect.origin.x as i32, rect.origin.y as i32),
            Size2D::new(rect.size.width as u32, rect.size.height as u32),
            self.size,
        ) else {
            return;
        };
        let row_length = self.size.width as usize * 4;
        for y in clipped.origin.y..clipped.origin.y + clipped.size.height {
            let row_start = y as usize * row_length + clipped.origin.x as usize * 4;
            for pixel in self.data[row_start..row_start + clipped.size.width as usize * 4]
                .chunks_mut(4)
            {
                blend_src_over(pixel, color);
            }
        }
    }
}

/// Source-over for a single straight-alpha pixel.
fn blend_src_over(dest: &mut [u8], src: Color) {
    if src.alpha == 255 {
        dest.copy_from_slice(&[src.red, src.green, src.blue, 255]);
        return;
    }
    if src.alpha == 0 {
        return;
    }
    let sa = src.alpha as u32;
    let da = dest[3] as u32;
    let out_a = sa + da * (255 - sa) / 255;
    if out_a == 0 {
        dest.copy_from_slice(&[0, 0, 0, 0]);
        return;
    }
    let blend = |s: u8, d: u8| -> u8 {
        ((s as u32 * sa * 255 + d as u32 * da * (255 - sa)) / (255 * out_a)) as u8
    };
    dest[0] = blend(src.red, dest[0]);
    dest[1] = blend(src.green, dest[1]);
    dest[2] = blend(src.blue, dest[2]);
    dest[3] = out_a as u8;
}

impl CanvasResourceProvider for SoftwareResourceProvider {
    fn size(&self) -> Size2D<u32> {
        self.size
    }

    fn is_accelerated(&self) -> bool {
        false
    }

    fn is_valid(&self) -> bool {
        // CPU storage cannot be lost out from under us.
        true
    }

    fn clear(&mut self, color: Color) {
        for pixel in self.data.chunks_mut(4) {
            pixel.copy_from_slice(&[color.red, color.green, color.blue, color.alpha]);
        }
    }

    fn apply_record(&mut self, record: &PaintRecord) {
        for op in record.ops() {
            match *op {
                DrawOp::Clear(color) => self.clear(color),
                DrawOp::FillRect(rect, color) => self.fill_rect(&rect, color),
            }
        }
    }

    fn snapshot(&mut self) -> Option<Snapshot> {
        Snapshot::from_vec(
            self.size,
            PixelFormat::RGBA8,
            self.color_params.alpha_mode(),
            self.data.clone(),
        )
    }

    fn write_pixels(
        &mut self,
        source_size: Size2D<u32>,
        pixels: &[u8],
        row_bytes: usize,
        origin: Point2D<i32>,
    ) -> bool {
        if row_bytes < source_size.width as usize * 4 {
            warn!("write_pixels with short rows rejected");
            return false;
        }
        let Some(clipped) = pixels::clip(origin, source_size, self.size) else {
            return false;
        };
        // Rows and columns of the source that were clipped away.
        let skipped_x = (clipped.origin.x as i32 - origin.x) as usize;
        let skipped_y = (clipped.origin.y as i32 - origin.y) as usize;
        let copied = clipped.size.width as usize * 4;
        let dest_row_length = self.size.width as usize * 4;
        for row in 0..clipped.size.height as usize {
            let src_start = (skipped_y + row) * row_bytes + skipped_x * 4;
            let Some(src) = pixels.get(src_start..src_start + copied) else {
                warn!("write_pixels source buffer too small");
                return false;
            };
            let dest_start = (clipped.origin.y as usize + row) * dest_row_length +
                clipped.origin.x as usize * 4;
            self.data[dest_start..dest_start + copied].copy_from_slice(src);
        }
        true
    }
}

/// Factory for embedders with no GPU integration: every accelerated request
/// fails, which makes the bridge fall back to software.
#[derive(Default)]
pub struct SoftwareProviderFactory;

impl ResourceProviderFactory for SoftwareProviderFactory {
    fn create_provider(
        &mut self,
        size: Size2D<u32>,
        color_params: &CanvasColorParams,
        accelerated: bool,
    ) -> Option<Box<dyn CanvasResourceProvider>> {
        if accelerated {
            return None;
        }
        SoftwareResourceProvider::new(size, *color_params)
            .map(|provider| Box::new(provider) as Box<dyn CanvasResourceProvider>)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pixel_at(provider: &mut SoftwareResourceProvider, x: u32, y: u32) -> [u8; 4] {
        let snapshot = provider.snapshot().unwrap();
        let offset = ((y * snapshot.size().width + x) * 4) as usize;
        snapshot.data()[offset..offset + 4].try_into().unwrap()
    }

    #[test]
    fn test_fill_rect_clips_to_surface() {
        let mut provider =
            SoftwareResourceProvider::new(Size2D::new(4, 4), CanvasColorParams::default())
                .unwrap();
        let mut record = crate::PaintRecorder::new();
        record.start();
        record
            .record(DrawOp::FillRect(
                Rect::new(Point2D::new(2.0, 2.0), Size2D::new(10.0, 10.0)),
                Color::WHITE,
            ))
            .unwrap();
        provider.apply_record(&record.finish().unwrap());
        assert_eq!(pixel_at(&mut provider, 3, 3), [255, 255, 255, 255]);
        assert_eq!(pixel_at(&mut provider, 1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_opaque_fill_overwrites() {
        let mut provider =
            SoftwareResourceProvider::new(Size2D::new(2, 2), CanvasColorParams::default())
                .unwrap();
        provider.clear(Color::WHITE);
        provider.fill_rect(
            &Rect::new(Point2D::new(0.0, 0.0), Size2D::new(2.0, 2.0)),
            Color::rgba(10, 20, 30, 255),
        );
        assert_eq!(pixel_at(&mut provider, 0, 0), [10, 20, 30, 255]);
    }

    #[test]
    fn test_translucent_fill_blends() {
        let mut provider =
            SoftwareResourceProvider::new(Size2D::new(1, 1), CanvasColorParams::default())
                .unwrap();
        provider.clear(Color::BLACK);
        provider.fill_rect(
            &Rect::new(Point2D::new(0.0, 0.0), Size2D::new(1.0, 1.0)),
            Color::rgba(255, 255, 255, 128),
        );
        let pixel = pixel_at(&mut provider, 0, 0);
        // Half white over black stays fully opaque and lands mid-gray.
        assert_eq!(pixel[3], 255);
        assert!(pixel[0] > 120 && pixel[0] < 136, "got {}", pixel[0]);
    }

    #[test]
    fn test_write_pixels_negative_origin() {
        let mut provider =
            SoftwareResourceProvider::new(Size2D::new(4, 4), CanvasColorParams::default())
                .unwrap();
        let source = vec![9u8; 2 * 2 * 4];
        assert!(provider.write_pixels(
            Size2D::new(2, 2),
            &source,
            2 * 4,
            Point2D::new(-1, -1)
        ));
        assert_eq!(pixel_at(&mut provider, 0, 0), [9, 9, 9, 9]);
        assert_eq!(pixel_at(&mut provider, 1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_write_pixels_fully_outside_fails() {
        let mut provider =
            SoftwareResourceProvider::new(Size2D::new(4, 4), CanvasColorParams::default())
                .unwrap();
        let source = vec![9u8; 4];
        assert!(!provider.write_pixels(
            Size2D::new(1, 1),
            &source,
            4,
            Point2D::new(10, 10)
        ));
    }

    #[test]
    fn test_factory_refuses_accelerated() {
        let mut factory = SoftwareProviderFactory;
        assert!(
            factory
                .create_provider(Size2D::new(4, 4), &CanvasColorParams::default(), true)
                .is_none()
        );
        assert!(
            factory
                .create_provider(Size2D::new(4, 4), &CanvasColorParams::default(), false)
                .is_some()
        );
    }
}
