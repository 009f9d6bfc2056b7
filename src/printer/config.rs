//! # Printer Configuration
//!
//! Hardware specifications and print defaults for supported label printers.
//!
//! ## Supported Printers
//!
//! | Model | Head (dots) | Resolution | Default label |
//! |-------|-------------|------------|---------------|
//! | D110 | 96 | 203 DPI | 96 × 96 dots |
//!
//! ## Usage
//!
//! ```
//! use labelwire::printer::PrinterConfig;
//!
//! let config = PrinterConfig::D110;
//! assert_eq!(config.mm_to_dots(12), 96);
//! ```

/// # Printer Configuration
///
/// ## Physical Properties
///
/// - **head_dots**: Width of the print head in dots
/// - **dpi**: Resolution in dots per inch
/// - **dots_per_mm**: Integer conversion factor used for label widths
///
/// ## Defaults
///
/// - **default_width_dots**: Width used when no label code is known
/// - **default_height_dots**: Rows per label
/// - **density**: Print darkness (1-5)
/// - **label_type**: 1 = gap, 2 = black mark, 3 = continuous
///
/// ## Calculations
///
/// ```text
/// dots_per_mm = 203 / 25.4 ≈ 8
/// 12mm label  = 12 × 8 = 96 dots
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrinterConfig {
    /// Printer model name
    pub name: &'static str,

    /// Print head width in dots
    pub head_dots: u32,

    /// Resolution in dots per inch
    pub dpi: u32,

    /// Dots per millimeter (rounded)
    pub dots_per_mm: u32,

    /// Label width when no code identifies the roll
    pub default_width_dots: u32,

    /// Label height in rows
    pub default_height_dots: u32,

    /// Print darkness
    pub density: u8,

    /// Label media type
    pub label_type: u8,
}

impl PrinterConfig {
    /// # Niimbot D110 Configuration
    ///
    /// Handheld 12-15mm label printer, Bluetooth SPP.
    ///
    /// | Property | Value |
    /// |----------|-------|
    /// | Print head | 96 dots (12mm) |
    /// | Resolution | 203 DPI |
    /// | Interface | Bluetooth |
    pub const D110: Self = Self {
        name: "Niimbot D110",
        head_dots: 96,
        dpi: 203,
        dots_per_mm: 8,
        default_width_dots: 96,
        default_height_dots: 96,
        density: 2,
        label_type: 1,
    };

    /// Convert a label width in millimeters to dots. `None` on overflow.
    #[inline]
    pub fn mm_to_dots(&self, mm: u32) -> Option<u32> {
        mm.checked_mul(self.dots_per_mm)
    }

    /// Convert dots to millimeters
    #[inline]
    pub fn dots_to_mm(&self, dots: u32) -> f32 {
        dots as f32 / self.dots_per_mm as f32
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self::D110
    }
}

// ============================================================================
// TESTS
// ============================================================================
