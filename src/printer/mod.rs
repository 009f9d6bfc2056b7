//! # Printer Module
//!
//! Everything that talks to one physical printer.
//!
//! ## Modules
//!
//! - [`config`]: Printer hardware specifications and print defaults
//! - [`session`]: Connection owner and single-flight command exchange
//! - [`job`]: Print job pipeline (width, rasterize, encode, send, finalize)

pub mod config;
pub mod job;
pub mod session;

pub use config::PrinterConfig;
pub use job::{
    CancelToken, CoordinatorConfig, JobFailure, JobOptions, JobProgress, JobState, LabelContent,
    PrintJobCoordinator, PrintResult,
};
pub use session::{PrinterSession, SessionConfig, SessionState};
