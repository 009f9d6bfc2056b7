//! # Packet Framing
//!
//! Every exchange with the printer is a self-framed, checksummed packet.
//!
//! ## Wire Layout
//!
//! ```text
//! ┌───────┬─────┬─────┬───────────────┬──────────┬───────┐
//! │ 55 55 │ cmd │ len │ payload[len]  │ checksum │ AA AA │
//! └───────┴─────┴─────┴───────────────┴──────────┴───────┘
//!   2       1     1     0..=255         1          2
//! ```
//!
//! The checksum is the XOR fold of `cmd`, `len` and every payload byte.
//!
//! ## Example
//!
//! ```
//! use labelwire::protocol::packet;
//!
//! let bytes = packet::encode(0xDC, &[0x01]).unwrap();
//! assert_eq!(bytes, vec![0x55, 0x55, 0xDC, 0x01, 0x01, 0xDC, 0xAA, 0xAA]);
//!
//! let decoded = packet::decode(&bytes).unwrap();
//! assert_eq!(decoded.command, 0xDC);
//! assert_eq!(decoded.payload, vec![0x01]);
//! ```
//!
//! Decoding is a pure function of one complete frame. Locating frames inside
//! a byte stream is the caller's job; [`frame_len`] reports a frame's total
//! size as soon as its 4-byte prefix is known.

use crate::error::CodecError;

/// Header marker
pub const HEADER: [u8; 2] = [0x55, 0x55];

/// Footer marker
pub const FOOTER: [u8; 2] = [0xAA, 0xAA];

/// Largest payload the length byte can describe
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Header + command + length + checksum + footer
pub const OVERHEAD: usize = 7;

/// Bytes needed before the frame length is known (header, command, length)
pub const PREFIX_LEN: usize = 4;

/// One decoded protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet, rejecting payloads the length byte cannot carry.
    pub fn new(command: u8, payload: Vec<u8>) -> Result<Self, CodecError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { command, payload })
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self.command, &self.payload)
    }

    /// First payload byte interpreted as a boolean acknowledgement.
    pub fn is_ack(&self) -> bool {
        self.payload.first().is_some_and(|&b| b != 0)
    }
}

/// Compute the XOR checksum over command, length and payload.
pub fn checksum(command: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(command ^ payload.len() as u8, |acc, &b| acc ^ b)
}

/// Frame a command and payload.
///
/// ## Errors
///
/// [`CodecError::PayloadTooLarge`] if the payload exceeds 255 bytes.
pub fn encode(command: u8, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(payload.len() + OVERHEAD);
    buf.extend_from_slice(&HEADER);
    buf.push(command);
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
    buf.push(checksum(command, payload));
    buf.extend_from_slice(&FOOTER);
    Ok(buf)
}

/// Parse exactly one complete frame.
///
/// ## Errors
///
/// - [`CodecError::Framing`]: too short, or markers not at their offsets
/// - [`CodecError::LengthMismatch`]: length byte disagrees with the frame size
/// - [`CodecError::Checksum`]: recomputed checksum differs
pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
    if bytes.len() < OVERHEAD {
        return Err(CodecError::Framing(format!(
            "frame is {} bytes, minimum is {}",
            bytes.len(),
            OVERHEAD
        )));
    }
    if bytes[..2] != HEADER {
        return Err(CodecError::Framing(format!(
            "bad header {:02x} {:02x}",
            bytes[0], bytes[1]
        )));
    }

    let declared = bytes[3] as usize;
    let available = bytes.len() - OVERHEAD;
    if declared != available {
        return Err(CodecError::LengthMismatch {
            declared,
            available,
        });
    }

    let end = bytes.len();
    if bytes[end - 2..] != FOOTER {
        return Err(CodecError::Framing(format!(
            "bad footer {:02x} {:02x}",
            bytes[end - 2],
            bytes[end - 1]
        )));
    }

    let command = bytes[2];
    let payload = &bytes[PREFIX_LEN..PREFIX_LEN + declared];
    let actual = bytes[PREFIX_LEN + declared];
    let expected = checksum(command, payload);
    if actual != expected {
        return Err(CodecError::Checksum { expected, actual });
    }

    Ok(Packet {
        command,
        payload: payload.to_vec(),
    })
}

/// Total frame length, once the first [`PREFIX_LEN`] bytes are available.
///
/// Returns `None` if fewer than four bytes are given. The header is not
/// validated here.
pub fn frame_len(prefix: &[u8]) -> Option<usize> {
    prefix.get(3).map(|&len| len as usize + OVERHEAD)
}

/// Position of the next header marker in a receive buffer.
pub fn find_header(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER.len()).position(|w| w == HEADER)
}

// ============================================================================
// TESTS
// ============================================================================
