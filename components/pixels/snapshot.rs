/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::io::Cursor;

use euclid::default::{Rect, Size2D};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{AlphaMode, Multiply, PixelFormat, copy_rgba8_image, transform_inplace};

/// An immutable, CPU-side copy of the pixel contents of a canvas surface.
///
/// Both supported formats are four bytes per pixel, so `data` always has
/// length `width * height * 4`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Snapshot {
    size: Size2D<u32>,
    data: Vec<u8>,
    format: PixelFormat,
    alpha_mode: AlphaMode,
}

impl Snapshot {
    pub fn empty() -> Snapshot {
        Snapshot {
            size: Size2D::zero(),
            data: vec![],
            format: PixelFormat::RGBA8,
            alpha_mode: AlphaMode::Unpremultiplied,
        }
    }

    pub fn from_vec(
        size: Size2D<u32>,
        format: PixelFormat,
        alpha_mode: AlphaMode,
        data: Vec<u8>,
    ) -> Option<Snapshot> {
        if data.len() != size.area() as usize * 4 {
            debug!(
                "Snapshot buffer length {} does not match size {:?}",
                data.len(),
                size
            );
            return None;
        }
        Some(Snapshot {
            size,
            data,
            format,
            alpha_mode,
        })
    }

    pub fn size(&self) -> Size2D<u32> {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn alpha_mode(&self) -> AlphaMode {
        self.alpha_mode
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Extracts a copy of the given sub-rectangle, which must lie within the
    /// snapshot bounds.
    pub fn get_rect(&self, rect: Rect<u32>) -> Snapshot {
        assert!(Rect::from_size(self.size).contains_rect(&rect));
        if rect.is_empty() {
            return Snapshot::empty();
        }
        let mut data = vec![0; rect.size.area() as usize * 4];
        copy_rgba8_image(
            self.size,
            rect,
            &self.data,
            rect.size,
            Rect::from_size(rect.size),
            &mut data,
        );
        Snapshot {
            size: rect.size,
            data,
            format: self.format,
            alpha_mode: self.alpha_mode,
        }
    }

    /// Rewrites the buffer in place to the requested format and alpha mode.
    pub fn transform(&mut self, format: PixelFormat, alpha_mode: AlphaMode) {
        let swap_rb = format != self.format;
        let multiply = match (self.alpha_mode, alpha_mode) {
            (AlphaMode::Unpremultiplied, AlphaMode::Premultiplied) => Multiply::PreMultiply,
            (AlphaMode::Premultiplied, AlphaMode::Unpremultiplied) => Multiply::UnMultiply,
            _ => Multiply::None,
        };
        let clear_alpha =
            alpha_mode == AlphaMode::Opaque && self.alpha_mode != AlphaMode::Opaque;
        transform_inplace(&mut self.data, multiply, swap_rb, clear_alpha);
        self.format = format;
        self.alpha_mode = alpha_mode;
    }

    /// Encodes the snapshot as a PNG, the compressed form used for canvas
    /// hibernation. Returns None on encoder failure or empty input.
    pub fn encode_png(&self) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }
        let mut rgba = self.clone();
        rgba.transform(PixelFormat::RGBA8, rgba.alpha_mode());
        let mut bytes = Vec::new();
        if let Err(error) = PngEncoder::new(&mut bytes).write_image(
            rgba.data(),
            rgba.size().width,
            rgba.size().height,
            ExtendedColorType::Rgba8,
        ) {
            debug!("PNG encoding error: {error}");
            return None;
        }
        Some(bytes)
    }

    /// Decodes a PNG produced by [`Snapshot::encode_png`].
    pub fn decode_png(bytes: &[u8], alpha_mode: AlphaMode) -> Option<Snapshot> {
        let reader = ImageReader::with_format(Cursor::new(bytes), ImageFormat::Png);
        let image = match reader.decode() {
            Ok(image) => image,
            Err(error) => {
                debug!("PNG decoding error: {error}");
                return None;
            },
        };
        let rgba = image.into_rgba8();
        let size = Size2D::new(rgba.width(), rgba.height());
        Snapshot::from_vec(size, PixelFormat::RGBA8, alpha_mode, rgba.into_vec())
    }
}

#[cfg(test)]
mod test {
    use euclid::default::{Point2D, Rect, Size2D};

    use super::*;

    fn checkerboard(size: Size2D<u32>) -> Snapshot {
        let mut data = vec![0; size.area() as usize * 4];
        for y in 0..size.height {
            for x in 0..size.width {
                let offset = ((y * size.width + x) * 4) as usize;
                let on = (x + y) % 2 == 0;
                data[offset] = if on { 255 } else { 0 };
                data[offset + 3] = 255;
            }
        }
        Snapshot::from_vec(size, PixelFormat::RGBA8, AlphaMode::Unpremultiplied, data).unwrap()
    }

    #[test]
    fn test_from_vec_rejects_bad_length() {
        assert!(
            Snapshot::from_vec(
                Size2D::new(2, 2),
                PixelFormat::RGBA8,
                AlphaMode::Unpremultiplied,
                vec![0; 3],
            )
            .is_none()
        );
    }

    #[test]
    fn test_get_rect() {
        let snapshot = checkerboard(Size2D::new(4, 4));
        let sub = snapshot.get_rect(Rect::new(Point2D::new(1, 1), Size2D::new(2, 2)));
        assert_eq!(sub.size(), Size2D::new(2, 2));
        // (1, 1) is an "on" checkerboard cell.
        assert_eq!(&sub.data()[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_png_round_trip_is_lossless() {
        let snapshot = checkerboard(Size2D::new(7, 5));
        let png = snapshot.encode_png().unwrap();
        let decoded = Snapshot::decode_png(&png, AlphaMode::Unpremultiplied).unwrap();
        assert_eq!(decoded.size(), snapshot.size());
        assert_eq!(decoded.data(), snapshot.data());
    }

    #[test]
    fn test_encode_empty_fails() {
        assert!(Snapshot::empty().encode_png().is_none());
    }
}
