//! Prelude module - common imports for imagecell users
//!
//! ```rust
//! use imagecell::prelude::*;
//! ```

// Conversion
pub use crate::{convert, convert_with, Conversion, ConversionMode, ConvertOptions};

// Change log
pub use crate::{ChangeAction, ChangeRecord, ChangeStatus, FailureCause};

// Errors
pub use crate::{ConvertError, ConvertResult, FetchError};

// Image sources
pub use crate::{FetchedImage, ImageSource};

// Core types
pub use crate::{CellAddress, CellValue, Workbook, Worksheet};

// Extension traits
pub use crate::WorkbookImageExt;
