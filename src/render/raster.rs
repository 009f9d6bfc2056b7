//! # Monochrome Rasterizer
//!
//! Converts a source image into a strictly 1-bit row matrix sized for the
//! label.
//!
//! ## Pipeline
//!
//! ```text
//! source image ──► nearest-neighbour sample ──► luminance < 128 ? ink : paper
//!  (any size)        to target width × height      (per pixel, no dithering)
//! ```
//!
//! Each output pixel depends only on one source pixel, so two calls with the
//! same input produce bit-identical rows. Transparent pixels are paper.
//!
//! ## Example
//!
//! ```
//! use image::{DynamicImage, GrayImage, Luma};
//! use labelwire::render::raster::rasterize;
//!
//! let black = DynamicImage::ImageLuma8(GrayImage::from_pixel(240, 96, Luma([0])));
//! let rows = rasterize(&black, 96, 96).unwrap();
//!
//! assert_eq!(rows.len(), 96);
//! assert!(rows.iter().all(|r| r.bits.len() == 96 && r.bits.iter().all(|&b| b)));
//! ```

use image::{DynamicImage, GenericImageView};

use crate::error::RasterError;

/// Luminance midpoint; darker pixels become ink
pub const INK_THRESHOLD: u8 = 128;

/// One horizontal line of the label, one bool per dot (`true` = ink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoRow {
    pub index: u16,
    pub bits: Vec<bool>,
}

impl MonoRow {
    pub fn new(index: u16, bits: Vec<bool>) -> Self {
        Self { index, bits }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.bits.len()
    }

    /// True if no dot in the row is inked
    pub fn is_blank(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }
}

/// Threshold `image` into exactly `height` rows of exactly `width` dots.
///
/// ## Errors
///
/// [`RasterError::InvalidDimensions`] if the target or source has a zero
/// dimension, or the height does not fit a 16-bit row index.
pub fn rasterize(
    image: &DynamicImage,
    width: u32,
    height: u32,
) -> Result<Vec<MonoRow>, RasterError> {
    let (src_w, src_h) = image.dimensions();
    if width == 0 || height == 0 || src_w == 0 || src_h == 0 || height > u16::MAX as u32 + 1 {
        return Err(RasterError::InvalidDimensions { width, height });
    }

    let rgba = image.to_rgba8();
    let rows = (0..height)
        .map(|y| {
            let sy = (y as u64 * src_h as u64 / height as u64) as u32;
            let bits = (0..width)
                .map(|x| {
                    let sx = (x as u64 * src_w as u64 / width as u64) as u32;
                    is_ink(rgba.get_pixel(sx, sy).0)
                })
                .collect();
            MonoRow::new(y as u16, bits)
        })
        .collect();

    Ok(rows)
}

/// Ink decision for one RGBA pixel.
///
/// Uses integer Rec. 601 luma; alpha below 50% reads as paper.
#[inline]
pub fn is_ink([r, g, b, a]: [u8; 4]) -> bool {
    if a < 128 {
        return false;
    }
    let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
    luma < INK_THRESHOLD as u32
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use pretty_assertions::assert_eq;

    fn gray(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([value])))
    }

    #[test]
    fn test_row_count_and_width() {
        let img = gray(37, 11, 0);
        for (w, h) in [(1, 1), (8, 3), (96, 96), (13, 200), (240, 96)] {
            let rows = rasterize(&img, w, h).unwrap();
            assert_eq!(rows.len(), h as usize);
            for (i, row) in rows.iter().enumerate() {
                assert_eq!(row.index as usize, i);
                assert_eq!(row.width(), w as usize);
            }
        }
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let img = gray(10, 10, 0);
        assert_eq!(
            rasterize(&img, 0, 10),
            Err(RasterError::InvalidDimensions { width: 0, height: 10 })
        );
        assert_eq!(
            rasterize(&img, 10, 0),
            Err(RasterError::InvalidDimensions { width: 10, height: 0 })
        );
    }

    #[test]
    fn test_empty_source_rejected() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        assert!(rasterize(&img, 8, 8).is_err());
    }

    #[test]
    fn test_threshold_midpoint() {
        assert!(rasterize(&gray(4, 4, 127), 4, 4).unwrap()[0].bits[0]);
        assert!(!rasterize(&gray(4, 4, 128), 4, 4).unwrap()[0].bits[0]);
        assert!(rasterize(&gray(4, 4, 255), 4, 4).unwrap()[3].is_blank());
    }

    #[test]
    fn test_transparent_is_paper() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let rows = rasterize(&img, 4, 4).unwrap();
        assert!(rows.iter().all(MonoRow::is_blank));
    }

    #[test]
    fn test_left_half_black_scaled() {
        let mut src = GrayImage::from_pixel(10, 2, Luma([255]));
        for y in 0..2 {
            for x in 0..5 {
                src.put_pixel(x, y, Luma([0]));
            }
        }
        let rows = rasterize(&DynamicImage::ImageLuma8(src), 20, 4).unwrap();
        for row in &rows {
            let expected: Vec<bool> = (0..20).map(|x| x < 10).collect();
            assert_eq!(row.bits, expected);
        }
    }

    #[test]
    fn test_deterministic() {
        let mut src = RgbaImage::new(31, 17);
        for (x, y, p) in src.enumerate_pixels_mut() {
            *p = Rgba([(x * 8) as u8, (y * 15) as u8, ((x + y) * 4) as u8, 255]);
        }
        let img = DynamicImage::ImageRgba8(src);
        assert_eq!(rasterize(&img, 50, 20).unwrap(), rasterize(&img, 50, 20).unwrap());
    }
}
