//! Cell-related types
//!
//! - [`CellValue`] - the value stored in a cell
//! - [`CellAddress`] / [`CellRange`] - where a cell lives ("A1", "A1:B10")
//! - [`CellData`] - value plus the source style index

mod address;
mod storage;
mod value;

pub use address::{CellAddress, CellRange};
pub use storage::{CellData, CellStorage, ColumnInfo};
pub use value::{CellError, CellValue, SharedString};
