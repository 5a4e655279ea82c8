//! Embedded images

use crate::cell::CellAddress;
use crate::error::{Error, Result};

/// A picture anchored with its top-left corner at a cell.
///
/// Converted images are PNG; pictures read from a source package keep their
/// original encoding. `width` and `height` are the displayed size in pixels,
/// which may differ from the pixel size encoded in `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlacement {
    anchor: CellAddress,
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl ImagePlacement {
    /// Create a placement; both dimensions must be non-zero and the payload
    /// non-empty.
    pub fn new(anchor: CellAddress, data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidImage("empty image payload".into()));
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage(format!(
                "image size {}x{} has a zero dimension",
                width, height
            )));
        }
        Ok(Self {
            anchor,
            data,
            width,
            height,
        })
    }

    /// Cell holding the top-left corner
    pub fn anchor(&self) -> CellAddress {
        self.anchor
    }

    /// Encoded image bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Displayed width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Displayed height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }
}
