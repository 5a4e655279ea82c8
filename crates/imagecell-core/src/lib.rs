//! # imagecell-core
//!
//! In-memory spreadsheet model shared by the imagecell readers, writer and
//! converter.
//!
//! - [`CellValue`] - what a cell holds (text, number, boolean, error, formula)
//! - [`CellAddress`] and [`CellRange`] - A1-style addressing
//! - [`Worksheet`] - cells, row/column dimensions, merged ranges and embedded images
//! - [`Workbook`] - ordered worksheets plus the parts carried through untouched
//! - [`ImagePlacement`] - a picture anchored at a cell
//! - [`CarriedXml`] - package XML kept verbatim for the output
//!
//! ## Example
//!
//! ```rust
//! use imagecell_core::{CellValue, Workbook};
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//!
//! sheet.set_cell_value("A1", "Hello").unwrap();
//! sheet.set_cell_formula("B1", "=IMAGE(\"http://x/img.png\")").unwrap();
//! sheet.set_cell_value_at(1, 0, CellValue::Number(3.5)).unwrap();
//! ```

pub mod carried;
pub mod cell;
pub mod error;
pub mod image;
pub mod workbook;
pub mod worksheet;

pub use carried::{CarriedXml, ExternalLink, XmlElement};
pub use cell::{
    CellAddress, CellData, CellError, CellRange, CellValue, ColumnInfo, SharedString,
};
pub use error::{Error, Result};
pub use image::ImagePlacement;
pub use workbook::{Workbook, WorkbookSettings};
pub use worksheet::Worksheet;

/// Maximum number of rows in a worksheet (Excel limit)
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a worksheet (Excel limit)
pub const MAX_COLS: u16 = 16_384;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// Row height in points used when a row has no explicit height
pub const DEFAULT_ROW_HEIGHT: f64 = 15.0;

/// Column width in characters used when a column has no explicit width
pub const DEFAULT_COLUMN_WIDTH: f64 = 8.43;
