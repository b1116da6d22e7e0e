/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

mod snapshot;

use euclid::default::{Point2D, Rect, Size2D};
use serde::{Deserialize, Serialize};
pub use snapshot::*;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PixelFormat {
    /// RGB + alpha, 8 bits per channel
    RGBA8,
    /// BGR + alpha, 8 bits per channel
    BGRA8,
}

/// How the alpha channel of a pixel buffer is to be interpreted.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AlphaMode {
    /// Alpha is known to be 255 everywhere.
    Opaque,
    /// Color channels are multiplied by alpha.
    Premultiplied,
    /// Color channels are independent of alpha.
    Unpremultiplied,
}

/// An 8-bit straight-alpha RGBA color, the unit of recorded canvas paint.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(red: u8, green: u8, blue: u8, alpha: u8) -> Color {
        Color {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub fn is_opaque(&self) -> bool {
        self.alpha == 255
    }
}

/// Computes image byte length, returning None if overflow occurred or the
/// total length exceeds the maximum image allocation size (2^31-1 ~ 2GB).
pub fn compute_rgba8_byte_length_if_within_limit(width: usize, height: usize) -> Option<usize> {
    const MAX_IMAGE_BYTE_LENGTH: usize = 2147483647;

    4usize
        .checked_mul(width)
        .and_then(|v| v.checked_mul(height))
        .filter(|v| *v <= MAX_IMAGE_BYTE_LENGTH)
}

/// Copies a rectangle of RGBA8 pixels from `src_pixels` into `dest_pixels`,
/// row by row. The rectangles must have equal sizes and lie within their
/// respective buffers.
pub fn copy_rgba8_image(
    src_size: Size2D<u32>,
    src_rect: Rect<u32>,
    src_pixels: &[u8],
    dest_size: Size2D<u32>,
    dest_rect: Rect<u32>,
    dest_pixels: &mut [u8],
) {
    assert!(Rect::from_size(src_size).contains_rect(&src_rect));
    assert!(Rect::from_size(dest_size).contains_rect(&dest_rect));
    assert_eq!(src_rect.size, dest_rect.size);

    if src_size == dest_size && src_rect == dest_rect {
        dest_pixels.copy_from_slice(src_pixels);
        return;
    }

    let row_bytes = src_rect.size.width as usize * 4;
    for row in 0..src_rect.size.height as usize {
        let src_offset =
            ((src_rect.origin.y as usize + row) * src_size.width as usize +
                src_rect.origin.x as usize) *
                4;
        let dest_offset =
            ((dest_rect.origin.y as usize + row) * dest_size.width as usize +
                dest_rect.origin.x as usize) *
                4;
        dest_pixels[dest_offset..dest_offset + row_bytes]
            .copy_from_slice(&src_pixels[src_offset..src_offset + row_bytes]);
    }
}

/// Clips a destination rectangle (which may have a negative origin) against
/// a surface, returning the in-bounds portion or None if nothing remains.
pub fn clip(
    mut origin: Point2D<i32>,
    mut size: Size2D<u32>,
    surface: Size2D<u32>,
) -> Option<Rect<u32>> {
    if origin.x < 0 {
        size.width = size.width.saturating_sub(-origin.x as u32);
        origin.x = 0;
    }
    if origin.y < 0 {
        size.height = size.height.saturating_sub(-origin.y as u32);
        origin.y = 0;
    }
    let origin = Point2D::new(origin.x as u32, origin.y as u32);
    Rect::new(origin, size)
        .intersection(&Rect::from_size(surface))
        .filter(|rect| !rect.is_empty())
}

/// Returns a*b/255, rounding any fractional bits to nearest integer to reduce
/// the loss of precision across repeated alpha (un)premultiply operations.
#[inline(always)]
pub fn multiply_u8_color(a: u8, b: u8) -> u8 {
    let c = a as u32 * b as u32 + 128;
    ((c + (c >> 8)) >> 8) as u8
}

#[repr(u8)]
pub enum Multiply {
    None = 0,
    PreMultiply = 1,
    UnMultiply = 2,
}

pub fn transform_inplace(pixels: &mut [u8], multiply: Multiply, swap_rb: bool, clear_alpha: bool) {
    match (multiply, swap_rb, clear_alpha) {
        (Multiply::None, true, true) => generic_transform_inplace::<0, true, true>(pixels),
        (Multiply::None, true, false) => generic_transform_inplace::<0, true, false>(pixels),
        (Multiply::None, false, true) => generic_transform_inplace::<0, false, true>(pixels),
        (Multiply::None, false, false) => generic_transform_inplace::<0, false, false>(pixels),
        (Multiply::PreMultiply, true, true) => generic_transform_inplace::<1, true, true>(pixels),
        (Multiply::PreMultiply, true, false) => generic_transform_inplace::<1, true, false>(pixels),
        (Multiply::PreMultiply, false, true) => generic_transform_inplace::<1, false, true>(pixels),
        (Multiply::PreMultiply, false, false) => {
            generic_transform_inplace::<1, false, false>(pixels)
        },
        (Multiply::UnMultiply, true, true) => generic_transform_inplace::<2, true, true>(pixels),
        (Multiply::UnMultiply, true, false) => generic_transform_inplace::<2, true, false>(pixels),
        (Multiply::UnMultiply, false, true) => generic_transform_inplace::<2, false, true>(pixels),
        (Multiply::UnMultiply, false, false) => {
            generic_transform_inplace::<2, false, false>(pixels)
        },
    }
}

pub fn generic_transform_inplace<
    const MULTIPLY: u8, // 1 premultiply, 2 unmultiply
    const SWAP_RB: bool,
    const CLEAR_ALPHA: bool,
>(
    pixels: &mut [u8],
) {
    for rgba in pixels.chunks_mut(4) {
        match MULTIPLY {
            1 => {
                let a = rgba[3];
                rgba[0] = multiply_u8_color(rgba[0], a);
                rgba[1] = multiply_u8_color(rgba[1], a);
                rgba[2] = multiply_u8_color(rgba[2], a);
            },
            2 => {
                let a = rgba[3] as u32;
                if a > 0 {
                    rgba[0] = (rgba[0] as u32 * 255 / a) as u8;
                    rgba[1] = (rgba[1] as u32 * 255 / a) as u8;
                    rgba[2] = (rgba[2] as u32 * 255 / a) as u8;
                }
            },
            _ => {},
        }
        if SWAP_RB {
            rgba.swap(0, 2);
        }
        if CLEAR_ALPHA {
            rgba[3] = u8::MAX;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_byte_length_limits() {
        assert_eq!(
            compute_rgba8_byte_length_if_within_limit(10, 10),
            Some(400)
        );
        assert_eq!(compute_rgba8_byte_length_if_within_limit(usize::MAX, 2), None);
        assert_eq!(
            compute_rgba8_byte_length_if_within_limit(1 << 20, 1 << 20),
            None
        );
    }

    #[test]
    fn test_clip_negative_origin() {
        let clipped = clip(
            Point2D::new(-2, -3),
            Size2D::new(10, 10),
            Size2D::new(8, 8),
        )
        .unwrap();
        assert_eq!(clipped, Rect::new(Point2D::new(0, 0), Size2D::new(8, 7)));
    }

    #[test]
    fn test_clip_outside_surface() {
        assert!(clip(Point2D::new(20, 0), Size2D::new(4, 4), Size2D::new(8, 8)).is_none());
    }

    #[test]
    fn test_transform_premultiplies() {
        let mut pixels = [255, 0, 255, 128];
        transform_inplace(&mut pixels, Multiply::PreMultiply, false, false);
        assert_eq!(pixels, [128, 0, 128, 128]);
    }

    #[test]
    fn test_transform_swaps_and_clears_alpha() {
        let mut pixels = [10, 20, 30, 128];
        transform_inplace(&mut pixels, Multiply::None, true, true);
        assert_eq!(pixels, [30, 20, 10, 255]);
    }

    #[test]
    fn test_copy_subrect() {
        let src = vec![7u8; 4 * 4 * 4];
        let mut dest = vec![0u8; 8 * 8 * 4];
        copy_rgba8_image(
            Size2D::new(4, 4),
            Rect::new(Point2D::new(0, 0), Size2D::new(2, 2)),
            &src,
            Size2D::new(8, 8),
            Rect::new(Point2D::new(1, 1), Size2D::new(2, 2)),
            &mut dest,
        );
        // One copied pixel and one untouched neighbour.
        assert_eq!(&dest[(8 + 1) * 4..(8 + 2) * 4], &[7, 7, 7, 7]);
        assert_eq!(&dest[..4], &[0, 0, 0, 0]);
    }
}
