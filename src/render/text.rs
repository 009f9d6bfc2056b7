//! # Label Text Rendering
//!
//! Draws short label text (dates, names) into a white bitmap of the label's
//! size, using the Spleen bitmap fonts.
//!
//! ## Fitting
//!
//! The largest face that fits is used, tried in this order:
//!
//! | Face | Glyph size |
//! |------|------------|
//! | Spleen 12x24 ×3 | 36 × 72 |
//! | Spleen 12x24 ×2 | 24 × 48 |
//! | Spleen 12x24 | 12 × 24 |
//! | Spleen 6x12 | 6 × 12 |
//!
//! A face fits when every line leaves at least [`SIDE_MARGIN`] dots of
//! horizontal slack and all lines fit the label height. Text is centered in
//! both directions. If nothing fits, the smallest face is used and clipped.

use image::{DynamicImage, GrayImage, Luma};
use spleen_font::{FONT_6X12, FONT_12X24, PSF2Font};

use crate::error::RasterError;

/// Horizontal slack required for a face to fit
pub const SIDE_MARGIN: u32 = 5;

/// Turns label text into a bitmap of exactly `width` × `height` pixels.
pub trait LabelRenderer: Send + Sync {
    fn render(&self, text: &str, width: u32, height: u32) -> Result<DynamicImage, RasterError>;
}

/// Bitmap font faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Small,
    Large,
}

impl Face {
    fn data(self) -> &'static [u8] {
        match self {
            Face::Small => FONT_6X12,
            Face::Large => FONT_12X24,
        }
    }

    fn cell(self) -> (u32, u32) {
        match self {
            Face::Small => (6, 12),
            Face::Large => (12, 24),
        }
    }
}

/// Face and integer scale factor
const CANDIDATES: [(Face, u32); 4] = [
    (Face::Large, 3),
    (Face::Large, 2),
    (Face::Large, 1),
    (Face::Small, 1),
];

/// # Bitmap Font Renderer
///
/// ```
/// use labelwire::render::text::{BitmapFontRenderer, LabelRenderer};
///
/// let image = BitmapFontRenderer.render("Fri Oct 16", 240, 96).unwrap();
/// assert_eq!((image.width(), image.height()), (240, 96));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BitmapFontRenderer;

impl LabelRenderer for BitmapFontRenderer {
    fn render(&self, text: &str, width: u32, height: u32) -> Result<DynamicImage, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidDimensions { width, height });
        }

        let lines: Vec<&str> = text.lines().collect();
        let columns = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
        let (face, scale) = pick_face(columns, lines.len() as u32, width, height);

        let mut canvas = GrayImage::from_pixel(width, height, Luma([255]));
        let (cell_w, cell_h) = face.cell();
        let (glyph_w, glyph_h) = (cell_w * scale, cell_h * scale);

        let block_h = glyph_h * lines.len() as u32;
        let top = (height as i64 - block_h as i64) / 2;

        let mut font = PSF2Font::new(face.data())
            .map_err(|_| RasterError::Font(format!("spleen {}x{} glyph table", cell_w, cell_h)))?;

        for (line_no, line) in lines.iter().enumerate() {
            let line_w = glyph_w * line.chars().count() as u32;
            let left = (width as i64 - line_w as i64) / 2;
            let y0 = top + (line_no as u32 * glyph_h) as i64;

            for (col, ch) in line.chars().enumerate() {
                let x0 = left + (col as u32 * glyph_w) as i64;
                let mut utf8 = [0u8; 4];
                let Some(glyph) = font.glyph_for_utf8(ch.encode_utf8(&mut utf8).as_bytes()) else {
                    continue;
                };
                for (gy, row) in glyph.enumerate() {
                    for (gx, on) in row.enumerate() {
                        if on {
                            let x = x0 + (gx as u32 * scale) as i64;
                            let y = y0 + (gy as u32 * scale) as i64;
                            fill(&mut canvas, x, y, scale);
                        }
                    }
                }
            }
        }

        Ok(DynamicImage::ImageLuma8(canvas))
    }
}

/// Largest candidate face that fits `columns` × `lines` characters.
fn pick_face(columns: u32, lines: u32, width: u32, height: u32) -> (Face, u32) {
    CANDIDATES
        .iter()
        .copied()
        .find(|&(face, scale)| {
            let (cell_w, cell_h) = face.cell();
            columns * cell_w * scale + SIDE_MARGIN <= width && lines * cell_h * scale <= height
        })
        .unwrap_or((Face::Small, 1))
}

/// Ink a `scale` × `scale` block, clipped to the canvas.
fn fill(canvas: &mut GrayImage, x: i64, y: i64, scale: u32) {
    let (w, h) = canvas.dimensions();
    for dy in 0..scale as i64 {
        for dx in 0..scale as i64 {
            let (px, py) = (x + dx, y + dy);
            if px >= 0 && py >= 0 && px < w as i64 && py < h as i64 {
                canvas.put_pixel(px as u32, py as u32, Luma([0]));
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
