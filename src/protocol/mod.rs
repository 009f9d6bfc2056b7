//! # Label Printer Protocol
//!
//! Pure, stateless transforms between printer concepts and wire bytes.
//!
//! ## Module Structure
//!
//! - [`packet`]: packet framing and XOR checksum
//! - [`commands`]: command identifiers, request builders, response parsers
//! - [`row`]: bitmap row payloads (naive encoding)
//!
//! ## Usage Example
//!
//! ```
//! use labelwire::protocol::{commands::Command, packet, row};
//! use labelwire::render::raster::MonoRow;
//!
//! let mono = MonoRow::new(0, vec![true; 96]);
//! let payload = row::encode_row(&mono).unwrap();
//! let frame = packet::encode(Command::PrintBitmapRow.id(), &payload.to_bytes()).unwrap();
//!
//! assert_eq!(&frame[..4], &[0x55, 0x55, 0x85, 0x12]);
//! assert_eq!(frame[frame.len() - 3], 0xB6);
//! ```

pub mod commands;
pub mod packet;
pub mod row;

pub use commands::{Command, HeartbeatStatus, RfidInfo};
pub use packet::Packet;
pub use row::RowPayload;
