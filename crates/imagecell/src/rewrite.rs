//! Cell rewriting: normalized formula text or an embedded picture.

use imagecell_core::{CellAddress, CellValue, ImagePlacement, Worksheet};

use crate::error::EmbedError;
use crate::fetch::FetchedImage;
use crate::matcher::normalize_formulas;

/// Points of row height per image pixel
pub const ROW_POINTS_PER_PIXEL: f64 = 0.75;

/// Characters of column width per image pixel
pub const COLUMN_CHARS_PER_PIXEL: f64 = 0.15;

/// Replace every `@IMAGE` formula in the cell with `=IMAGE("url")`.
///
/// Text starting with `=` is stored as a formula, anything else as a string.
/// Returns the new cell text.
pub fn rewrite_as_formula(sheet: &mut Worksheet, addr: CellAddress, original: &str) -> String {
    let normalized = normalize_formulas(original);
    let value = if normalized.starts_with('=') {
        CellValue::formula(normalized.as_str())
    } else {
        CellValue::string(normalized.as_str())
    };
    if !sheet.replace_value_at(addr.row, addr.col, value) {
        log::warn!("{}!{addr}: cell vanished before rewrite", sheet.name());
    }
    normalized
}

/// Clear the cell and anchor `image` at it, scaled to fit `max_size`.
///
/// Width and height are clamped independently. The row and column grow to
/// hold the picture but never shrink. The sheet is unchanged on failure.
pub fn rewrite_as_image(
    sheet: &mut Worksheet,
    addr: CellAddress,
    image: FetchedImage,
    max_size: u32,
) -> Result<ImageFit, EmbedError> {
    let width = image.width.min(max_size);
    let height = image.height.min(max_size);

    let placement = ImagePlacement::new(addr, image.png, width, height)?;
    sheet.add_image(placement)?;
    sheet.clear_value_at(addr.row, addr.col);

    let row_height = height as f64 * ROW_POINTS_PER_PIXEL;
    let column_width = width as f64 * COLUMN_CHARS_PER_PIXEL;
    sheet.grow_row_height(addr.row, row_height);
    sheet.grow_column_width(addr.col, column_width);

    Ok(ImageFit { width, height })
}

/// Final pixel size of an embedded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFit {
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagecell_core::{CellData, DEFAULT_COLUMN_WIDTH, DEFAULT_ROW_HEIGHT};
    use pretty_assertions::assert_eq;

    fn fetched(width: u32, height: u32) -> FetchedImage {
        FetchedImage {
            png: vec![0x89, b'P', b'N', b'G'],
            width,
            height,
        }
    }

    fn sheet_with(addr: &str, text: &str) -> (Worksheet, CellAddress) {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_value(addr, text).unwrap();
        (ws, CellAddress::parse(addr).unwrap())
    }

    #[test]
    fn test_formula_rewrite() {
        let (mut ws, addr) = sheet_with("A1", "=@IMAGE('http://x/img.png')");
        let text = rewrite_as_formula(&mut ws, addr, "=@IMAGE('http://x/img.png')");

        assert_eq!(text, "=IMAGE(\"http://x/img.png\")");
        let value = ws.get_value("A1").unwrap();
        assert!(value.is_formula());
        assert_eq!(value.text(), Some("=IMAGE(\"http://x/img.png\")"));
    }

    #[test]
    fn test_formula_rewrite_inside_text_stays_string() {
        let original = "see =@IMAGE(\"u\") here";
        let (mut ws, addr) = sheet_with("B2", original);
        rewrite_as_formula(&mut ws, addr, original);

        assert_eq!(ws.get_value("B2").unwrap().as_string(), Some("see =IMAGE(\"u\") here"));
    }

    #[test]
    fn test_formula_rewrite_keeps_style() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_data_at(0, 0, CellData::with_style(CellValue::string("=@IMAGE(\"u\")"), 4))
            .unwrap();
        rewrite_as_formula(&mut ws, CellAddress::new(0, 0), "=@IMAGE(\"u\")");
        assert_eq!(ws.cell_at(0, 0).unwrap().style_index, 4);
    }

    #[test]
    fn test_image_rewrite_clamps_each_axis() {
        let (mut ws, addr) = sheet_with("C3", "=@IMAGE(\"u\")");
        let fit = rewrite_as_image(&mut ws, addr, fetched(400, 200), 100).unwrap();

        assert_eq!(fit, ImageFit { width: 100, height: 100 });
        assert!(ws.get_value("C3").unwrap().is_empty());
        assert_eq!(ws.images().len(), 1);
        let placement = ws.image_at(2, 2).unwrap();
        assert_eq!((placement.width(), placement.height()), (100, 100));
        assert!((ws.row_height(2) - 75.0).abs() < 1e-9);
        assert!((ws.column_width(2) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_image_rewrite_never_shrinks() {
        let (mut ws, addr) = sheet_with("A1", "=@IMAGE(\"u\")");
        ws.set_row_height(0, 300.0);
        ws.set_column_width(0, 80.0);

        rewrite_as_image(&mut ws, addr, fetched(10, 10), 200).unwrap();
        assert_eq!(ws.row_height(0), 300.0);
        assert_eq!(ws.column_width(0), 80.0);

        // Small images leave default dimensions alone
        let (mut ws, addr) = sheet_with("A1", "=@IMAGE(\"u\")");
        rewrite_as_image(&mut ws, addr, fetched(10, 10), 200).unwrap();
        assert_eq!(ws.row_height(0), DEFAULT_ROW_HEIGHT);
        assert_eq!(ws.column_width(0), DEFAULT_COLUMN_WIDTH);
    }

    #[test]
    fn test_image_rewrite_failure_leaves_cell() {
        let (mut ws, addr) = sheet_with("A1", "=@IMAGE(\"u\")");
        let err = rewrite_as_image(&mut ws, addr, fetched(0, 10), 200).unwrap_err();

        assert!(!err.0.is_empty());
        assert!(ws.images().is_empty());
        assert_eq!(ws.get_value("A1").unwrap().as_string(), Some("=@IMAGE(\"u\")"));
    }
}
