//! # Printer Transport Layer
//!
//! This module defines the byte-channel boundary the session talks through,
//! plus the backends that implement it.
//!
//! ## Available Transports
//!
//! - [`rfcomm`]: Bluetooth RFCOMM TTY (`/dev/rfcommN`, Linux)
//! - [`loopback`]: in-memory printer emulator for tests and dry runs
//!
//! ## Contract
//!
//! A [`Channel`] is an ordered, reliable duplex byte stream. It has no
//! framing of its own; the session finds packet boundaries. Reads may return
//! any number of bytes and must be cancel-safe, since the session wraps them
//! in timeouts. Writes are only ever cancelled together with the session.

pub mod loopback;
pub mod rfcomm;

use std::io;

use async_trait::async_trait;

use crate::error::ConnectError;

pub use loopback::{LoopbackConnector, LoopbackDevice};
pub use rfcomm::RfcommConnector;

/// Open duplex byte stream to one printer.
#[async_trait]
pub trait Channel: Send {
    /// Write every byte of `data`, in order.
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read whatever is available into `buf`. `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the channel. Called at most once.
    async fn close(&mut self) -> io::Result<()>;
}

/// Opens channels by printer address.
///
/// This is the capability boundary: adapter state, pairing and permissions
/// are resolved here and reported as a typed [`ConnectError`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn Channel>, ConnectError>;
}
