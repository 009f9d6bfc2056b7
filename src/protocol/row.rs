//! # Bitmap Row Encoding
//!
//! Turns one [`MonoRow`] into the payload of a print-row command (`0x85`).
//!
//! ## Payload Layout
//!
//! ```text
//! ┌────────────┬──────┬──────┬──────┬──────┬──────────────────────┐
//! │ row_index  │ seg0 │ seg1 │ seg2 │ 0x01 │ packed bits          │
//! │ 2 bytes BE │  1   │  1   │  1   │  1   │ ceil(width / 8)      │
//! └────────────┴──────┴──────┴──────┴──────┴──────────────────────┘
//! ```
//!
//! ## Naive Encoding
//!
//! The firmware accepts per-third segment markers that let it skip blank
//! regions of the print head. This encoder does not inspect the row: the
//! markers always describe the three head sections (`width / 3` each, any
//! remainder going to the leading sections) and the whole packed row is
//! always sent.
//!
//! ## Bit Packing
//!
//! - Bit 7 (MSB) = leftmost dot
//! - 1 = ink, 0 = paper
//! - The final byte is zero padded; padding is never ink
//!
//! ```text
//! width 12:  ████░░░░ ████····   (· = padding)
//!            0xF0      0xF0
//! ```

use crate::error::CodecError;
use crate::protocol::packet::MAX_PAYLOAD;
use crate::render::raster::MonoRow;

/// Color depth byte; always monochrome
pub const COLOR_DEPTH_MONO: u8 = 0x01;

/// Bytes before the packed bits (index, three markers, depth)
pub const ROW_HEADER_LEN: usize = 6;

/// Widest row whose payload still fits one packet
pub const MAX_ROW_DOTS: usize = (MAX_PAYLOAD - ROW_HEADER_LEN) * 8;

/// Decoded form of a print-row payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPayload {
    pub row_index: u16,
    pub segment_markers: [u8; 3],
    pub color_depth: u8,
    pub packed_bits: Vec<u8>,
}

impl RowPayload {
    /// Serialize to the bytes carried inside the packet.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ROW_HEADER_LEN + self.packed_bits.len());
        buf.extend_from_slice(&self.row_index.to_be_bytes());
        buf.extend_from_slice(&self.segment_markers);
        buf.push(self.color_depth);
        buf.extend_from_slice(&self.packed_bits);
        buf
    }
}

/// Encode one row.
///
/// ## Errors
///
/// [`CodecError::PayloadTooLarge`] if the row is wider than [`MAX_ROW_DOTS`].
pub fn encode_row(row: &MonoRow) -> Result<RowPayload, CodecError> {
    if row.width() > MAX_ROW_DOTS {
        return Err(CodecError::PayloadTooLarge(
            ROW_HEADER_LEN + row.width().div_ceil(8),
        ));
    }

    Ok(RowPayload {
        row_index: row.index,
        segment_markers: segment_markers(row.width()),
        color_depth: COLOR_DEPTH_MONO,
        packed_bits: pack_row(&row.bits),
    })
}

/// Encode a full matrix, top to bottom.
pub fn encode_rows(rows: &[MonoRow]) -> Result<Vec<RowPayload>, CodecError> {
    rows.iter().map(encode_row).collect()
}

/// Widths of the three print-head sections for a row of `width` dots.
///
/// ```
/// use labelwire::protocol::row::segment_markers;
///
/// assert_eq!(segment_markers(96), [32, 32, 32]);
/// assert_eq!(segment_markers(100), [34, 33, 33]);
/// ```
pub fn segment_markers(width: usize) -> [u8; 3] {
    let base = width / 3;
    let extra = width % 3;
    let mut markers = [0u8; 3];
    for (i, marker) in markers.iter_mut().enumerate() {
        let section = base + usize::from(i < extra);
        *marker = section.min(u8::MAX as usize) as u8;
    }
    markers
}

/// Pack a row of dots into bytes, MSB first.
///
/// ```
/// use labelwire::protocol::row::pack_row;
///
/// let row = vec![true, true, false, false, true, false, true, false];
/// assert_eq!(pack_row(&row), vec![0b11001010]);
/// ```
pub fn pack_row(pixels: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; pixels.len().div_ceil(8)];

    for (i, &pixel) in pixels.iter().enumerate() {
        if pixel {
            bytes[i / 8] |= 1 << (7 - (i % 8));
        }
    }

    bytes
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_solid_row_96() {
        let row = MonoRow::new(0, vec![true; 96]);
        let payload = encode_row(&row).unwrap();
        let mut expected = vec![0x00, 0x00, 0x20, 0x20, 0x20, 0x01];
        expected.extend([0xFF; 12]);
        assert_eq!(payload.to_bytes(), expected);
    }

    #[test]
    fn test_row_index_big_endian() {
        let row = MonoRow::new(0x0102, vec![false; 8]);
        let bytes = encode_row(&row).unwrap().to_bytes();
        assert_eq!(&bytes[..2], &[0x01, 0x02]);
    }

    #[test]
    fn test_markers_ignore_content() {
        let blank = encode_row(&MonoRow::new(3, vec![false; 96])).unwrap();
        let solid = encode_row(&MonoRow::new(3, vec![true; 96])).unwrap();
        assert_eq!(blank.segment_markers, solid.segment_markers);
        assert_eq!(blank.packed_bits, vec![0u8; 12]);
    }

    #[test]
    fn test_padding_never_ink() {
        let row = MonoRow::new(0, vec![true; 12]);
        let payload = encode_row(&row).unwrap();
        assert_eq!(payload.packed_bits, vec![0xFF, 0xF0]);
    }

    #[test]
    fn test_single_dot_positions() {
        let mut bits = vec![false; 16];
        bits[0] = true;
        bits[15] = true;
        assert_eq!(pack_row(&bits), vec![0x80, 0x01]);
    }

    #[test]
    fn test_segment_markers_remainders() {
        assert_eq!(segment_markers(0), [0, 0, 0]);
        assert_eq!(segment_markers(1), [1, 0, 0]);
        assert_eq!(segment_markers(98), [33, 33, 32]);
        assert_eq!(segment_markers(1992), [255, 255, 255]);
    }

    #[test]
    fn test_deterministic_encoding() {
        let bits: Vec<bool> = (0..250).map(|i| i % 3 == 0 || i % 7 == 0).collect();
        let row = MonoRow::new(42, bits);
        assert_eq!(
            encode_row(&row).unwrap().to_bytes(),
            encode_row(&row).unwrap().to_bytes()
        );
    }

    #[test]
    fn test_max_width() {
        let row = MonoRow::new(0, vec![true; MAX_ROW_DOTS]);
        assert_eq!(encode_row(&row).unwrap().to_bytes().len(), MAX_PAYLOAD);

        let row = MonoRow::new(0, vec![true; MAX_ROW_DOTS + 1]);
        assert_eq!(
            encode_row(&row),
            Err(CodecError::PayloadTooLarge(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn test_encode_rows_keeps_order() {
        let rows: Vec<MonoRow> = (0..5).map(|i| MonoRow::new(i, vec![i % 2 == 0; 8])).collect();
        let payloads = encode_rows(&rows).unwrap();
        let indices: Vec<u16> = payloads.iter().map(|p| p.row_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(payloads[0].packed_bits, vec![0xFF]);
        assert_eq!(payloads[1].packed_bits, vec![0x00]);
    }
}
