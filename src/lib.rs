//! # labelwire - Thermal Label Printer Library
//!
//! labelwire drives Niimbot-style thermal label printers over Bluetooth
//! RFCOMM. It provides:
//!
//! - **Protocol implementation**: packet framing, command payloads and row encoding
//! - **Rendering**: 1-bit rasterization and bitmap-font text labels
//! - **Session**: one request in flight, response matching, failure tracking
//! - **Print jobs**: the begin/rows/finalize sequence with retries and cancellation
//! - **Label widths**: RFID tag lookup backed by a local cache and a cloud template service
//! - **HTTP API** and a once-a-day date printer
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use labelwire::{
//!     printer::{CancelToken, CoordinatorConfig, JobOptions, LabelContent, PrinterSession, SessionConfig},
//!     transport::RfcommConnector,
//!     width::FixedWidth,
//!     PrintJobCoordinator,
//! };
//!
//! # async fn demo() -> Result<(), labelwire::LabelwireError> {
//! let session = Arc::new(PrinterSession::new(RfcommConnector, SessionConfig::default()));
//! session.connect("03:00:00:12:34:56").await?;
//!
//! // Every label code resolves to a 30mm roll
//! let coordinator = PrintJobCoordinator::new(
//!     session,
//!     Arc::new(FixedWidth(30)),
//!     CoordinatorConfig::default(),
//! );
//!
//! let options = JobOptions { barcode: Some("6972842743596".into()), ..JobOptions::default() };
//! let result = coordinator
//!     .print(LabelContent::Text("Fri Oct 16".into()), &options, &CancelToken::new())
//!     .await;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Packet codec, commands, row encoding |
//! | [`render`] | Rasterization and text rendering |
//! | [`transport`] | Byte channels: RFCOMM and loopback |
//! | [`printer`] | Printer models, session, job coordinator |
//! | [`width`] | Label code to width resolution |
//! | [`autoprint`] | Once-a-day date label printing |
//! | [`server`] | HTTP API |
//! | [`error`] | Error types |
//!
//! ## Supported Printers
//!
//! Currently tested with:
//! - Niimbot D110 (12-15mm labels, 203 DPI, Bluetooth)

pub mod autoprint;
pub mod error;
pub mod printer;
pub mod protocol;
pub mod render;
pub mod server;
pub mod transport;
pub mod width;

// Re-exports for convenience
pub use error::LabelwireError;
pub use printer::{PrintJobCoordinator, PrinterConfig, PrinterSession};
