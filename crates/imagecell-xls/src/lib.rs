//! # imagecell-xls
//!
//! Read-only XLS (BIFF8) support for imagecell.
//!
//! Legacy workbooks are loaded into the same [`imagecell_core::Workbook`]
//! model as XLSX files so they can be rewritten and saved as XLSX.

pub mod biff;
pub mod error;
pub mod reader;

pub use error::{XlsError, XlsResult};
pub use reader::XlsReader;
