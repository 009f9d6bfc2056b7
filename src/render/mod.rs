//! # Rendering Module
//!
//! Turns label content into the 1-bit row matrix the printer consumes.
//!
//! ## Modules
//!
//! - [`raster`]: Nearest-neighbour resampling and fixed-threshold binarization
//! - [`text`]: Bitmap-font text labels
//!
//! ## Usage Example
//!
//! ```
//! use labelwire::render::raster::rasterize;
//! use labelwire::render::text::{BitmapFontRenderer, LabelRenderer};
//!
//! let image = BitmapFontRenderer.render("Fri Oct 16", 96, 96).unwrap();
//! let rows = rasterize(&image, 96, 96).unwrap();
//!
//! assert_eq!(rows.len(), 96);
//! assert!(rows.iter().any(|row| !row.is_blank()));
//! ```

pub mod raster;
pub mod text;
