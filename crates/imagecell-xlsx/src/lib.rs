//! # imagecell-xlsx
//!
//! XLSX (Office Open XML) reader and writer for imagecell.
//!
//! The writer emits a drawing part per worksheet that carries images, with
//! one `xl/media/imageN.<ext>` per placement. Workbook and worksheet elements
//! the model does not cover are carried from the source as raw XML.

pub mod error;
pub mod reader;
pub mod writer;

mod drawing;
mod parts;

pub use error::{XlsxError, XlsxResult};
pub use reader::XlsxReader;
pub use writer::XlsxWriter;
