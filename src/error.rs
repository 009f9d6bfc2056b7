//! # Error Types
//!
//! This module defines error types used throughout the labelwire library.
//!
//! Each layer has its own enum so callers can match on exactly the failures
//! that layer can produce:
//!
//! | Layer | Error |
//! |-------|-------|
//! | Packet framing, row encoding | [`CodecError`] |
//! | Rasterizing | [`RasterError`] |
//! | Opening a channel | [`ConnectError`] |
//! | Command exchange | [`SessionError`] |
//! | Label width lookup | [`WidthError`] |
//!
//! [`LabelwireError`] wraps all of them at the binary and server edge.

use std::time::Duration;

use thiserror::Error;

/// Malformed or corrupted packet, or a payload that cannot be framed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Payload longer than the one-byte length field can describe
    #[error("payload too large: {0} bytes (max 255)")]
    PayloadTooLarge(usize),

    /// Header or footer markers missing at the expected offsets
    #[error("framing error: {0}")]
    Framing(String),

    /// Length byte disagrees with the bytes actually available
    #[error("length mismatch: length byte says {declared}, frame carries {available}")]
    LengthMismatch { declared: usize, available: usize },

    /// Recomputed checksum differs from the transmitted one
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    Checksum { expected: u8, actual: u8 },
}

/// Rasterizer input errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RasterError {
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("unreadable font: {0}")]
    Font(String),
}

/// Typed denial returned when a channel to the printer cannot be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("printer is not paired")]
    NotPaired,

    #[error("bluetooth adapter is off")]
    AdapterOff,

    #[error("permission denied opening the printer channel")]
    PermissionDenied,

    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),
}

/// Failure of a single command exchange on a [`PrinterSession`].
///
/// [`PrinterSession`]: crate::printer::PrinterSession
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Response arrived but failed framing or checksum validation
    #[error("corrupt response: {0}")]
    Corrupt(CodecError),

    #[error("unexpected response to command 0x{command:02x}: {detail}")]
    Unexpected { command: u8, detail: String },

    /// Device answered with a negative acknowledgement
    #[error("device rejected command 0x{0:02x}")]
    Rejected(u8),

    /// Request could not be framed
    #[error("cannot encode request: {0}")]
    Encode(CodecError),
}

impl SessionError {
    /// Errors after which the session is known to be disconnected.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::ChannelClosed(_))
    }
}

/// Label width lookup failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WidthError {
    #[error("no label width known for code {0}")]
    NotFound(String),

    #[error("width lookup failed: {0}")]
    Lookup(String),

    #[error("width cache error: {0}")]
    Cache(String),
}

/// Main error type for labelwire operations
#[derive(Debug, Error)]
pub enum LabelwireError {
    /// Transport-level errors (device setup, I/O)
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Print job ended in a terminal failure
    #[error("Print failed: {0}")]
    Job(String),

    /// Image processing error
    #[error("Image error: {0}")]
    Image(String),

    /// Invalid configuration or arguments
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
