//! Error types for conversion

use thiserror::Error;

/// Result type for conversions
pub type ConvertResult<T> = std::result::Result<T, ConvertError>;

/// Fatal conversion errors. Nothing is produced when one of these occurs.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The input is not a readable spreadsheet document
    #[error("Could not read spreadsheet: {0}")]
    Parse(String),

    /// The converted workbook could not be serialized
    #[error("Could not write spreadsheet: {0}")]
    Write(#[from] imagecell_xlsx::XlsxError),

    /// Options out of range or unusable
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

/// Why an image could not be obtained for a cell.
///
/// Recoverable: the cell falls back to the normalized formula.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection, timeout or non-success HTTP status
    #[error("Download failed: {0}")]
    Network(String),

    /// The payload does not decode as a supported image
    #[error("Invalid image format: {0}")]
    InvalidImage(String),
}

/// A fetched image could not be attached to the sheet.
///
/// Recoverable: the cell falls back to the normalized formula.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EmbedError(pub String);

impl From<imagecell_core::Error> for EmbedError {
    fn from(err: imagecell_core::Error) -> Self {
        EmbedError(err.to_string())
    }
}
