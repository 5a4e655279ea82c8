//! # imagecell
//!
//! Rewrites `=@IMAGE("url")` spreadsheet formulas.
//!
//! Excel's implicit-intersection form `=@IMAGE(...)` is not understood by
//! older readers. This crate finds those cells in an XLSX or XLS document and
//! either normalizes them to `=IMAGE("url")` or downloads each image and
//! embeds it as a picture anchored at the cell, falling back to the
//! normalized formula when that fails. Every matched cell produces a
//! [`ChangeRecord`].
//!
//! ## Features
//!
//! - Read XLSX and legacy XLS (BIFF8) documents, write XLSX
//! - Text-only normalization or image embedding
//! - Per-cell change log with failure causes, serializable with serde
//! - Pluggable image sources through [`ImageSource`]
//!
//! ## Example
//!
//! ```rust
//! use imagecell::prelude::*;
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//! sheet.set_cell_formula("A1", "=@IMAGE(\"http://x/img.png\")").unwrap();
//!
//! let changes = workbook
//!     .rewrite_image_formulas(&ConvertOptions::text_only())
//!     .unwrap();
//!
//! assert_eq!(changes.len(), 1);
//! assert_eq!(changes[0].action, ChangeAction::FormulaReplaced);
//! assert_eq!(
//!     workbook.worksheet(0).unwrap().get_value("A1").unwrap().text(),
//!     Some("=IMAGE(\"http://x/img.png\")")
//! );
//! ```

pub mod change;
pub mod convert;
pub mod document;
pub mod error;
pub mod fetch;
pub mod matcher;
pub mod prelude;
pub mod report;
pub mod rewrite;

// Re-export conversion types
pub use change::{ChangeAction, ChangeRecord, ChangeStatus, FailureCause};
pub use convert::{
    convert, convert_with, Conversion, ConversionMode, ConvertOptions, ImageFormula,
    WorkbookImageExt, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_IMAGE_SIZE, DEFAULT_USER_AGENT,
    MAX_MAX_IMAGE_SIZE, MIN_MAX_IMAGE_SIZE,
};
pub use document::{open_workbook, save_workbook, DocumentFormat};
pub use error::{ConvertError, ConvertResult, EmbedError, FetchError};
pub use fetch::{FetchedImage, HttpImageFetcher, ImageSource};
pub use matcher::{contains_image_formula, find_image_url, normalize_formulas};
pub use report::{output_file_name, summarize, SheetSummary};
pub use rewrite::{rewrite_as_formula, rewrite_as_image, ImageFit};

// Re-export core types
pub use imagecell_core::{
    CarriedXml, CellAddress, CellData, CellError, CellRange, CellValue, ColumnInfo,
    ImagePlacement, Workbook, WorkbookSettings, Worksheet,
};

// Re-export I/O types
pub use imagecell_xls::{XlsError, XlsReader};
pub use imagecell_xlsx::{XlsxError, XlsxReader, XlsxWriter};
