//! Worksheet type

use std::collections::{BTreeMap, BTreeSet};

use crate::carried::CarriedXml;
use crate::cell::{CellAddress, CellData, CellRange, CellStorage, CellValue, ColumnInfo};
use crate::error::{Error, Result};
use crate::image::ImagePlacement;
use crate::{MAX_COLS, MAX_ROWS};

/// A worksheet (single sheet in a workbook)
#[derive(Debug)]
pub struct Worksheet {
    /// Sheet name
    name: String,
    /// Cell storage
    cells: CellStorage,
    /// Sheet is visible
    visible: bool,
    /// Embedded pictures, in insertion order
    images: Vec<ImagePlacement>,
    /// Unmodeled worksheet XML, such as sheet views and data validations
    carried: CarriedXml,
}

impl Worksheet {
    /// Create a new worksheet with the given name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            cells: CellStorage::new(),
            visible: true,
            images: Vec::new(),
            carried: CarriedXml::default(),
        }
    }

    /// Get the sheet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the sheet name
    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// Check if the sheet is visible
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Set sheet visibility
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Worksheet XML carried from the source package
    pub fn carried(&self) -> &CarriedXml {
        &self.carried
    }

    /// Mutable access to the carried worksheet XML
    pub fn carried_mut(&mut self) -> &mut CarriedXml {
        &mut self.carried
    }

    // === Cell Access ===

    /// Get a cell by address string (e.g., "A1")
    pub fn cell(&self, address: &str) -> Result<Option<&CellData>> {
        let addr = CellAddress::parse(address)?;
        Ok(self.cells.get(addr.row, addr.col))
    }

    /// Get a cell by row and column indices
    pub fn cell_at(&self, row: u32, col: u16) -> Option<&CellData> {
        self.cells.get(row, col)
    }

    /// Get cell value (convenience method)
    pub fn get_value(&self, address: &str) -> Result<CellValue> {
        let addr = CellAddress::parse(address)?;
        Ok(self.get_value_at(addr.row, addr.col))
    }

    /// Get cell value by indices
    pub fn get_value_at(&self, row: u32, col: u16) -> CellValue {
        self.cells
            .get(row, col)
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    // === Cell Modification ===

    /// Set a cell value by address string
    pub fn set_cell_value<V: Into<CellValue>>(&mut self, address: &str, value: V) -> Result<()> {
        let addr = CellAddress::parse(address)?;
        self.set_cell_value_at(addr.row, addr.col, value)
    }

    /// Set a cell value by row and column indices, keeping its style
    pub fn set_cell_value_at<V: Into<CellValue>>(
        &mut self,
        row: u32,
        col: u16,
        value: V,
    ) -> Result<()> {
        self.validate_cell_position(row, col)?;
        self.cells.set_value(row, col, value.into());
        Ok(())
    }

    /// Set a cell formula by address string
    pub fn set_cell_formula(&mut self, address: &str, formula: &str) -> Result<()> {
        let addr = CellAddress::parse(address)?;
        self.set_cell_formula_at(addr.row, addr.col, formula)
    }

    /// Set a cell formula by row and column indices
    pub fn set_cell_formula_at(&mut self, row: u32, col: u16, formula: &str) -> Result<()> {
        let formula = if formula.starts_with('=') {
            formula.to_string()
        } else {
            format!("={}", formula)
        };
        self.set_cell_value_at(row, col, CellValue::formula(formula))
    }

    /// Store a complete cell (value and style) as read from a file
    pub fn set_cell_data_at(&mut self, row: u32, col: u16, data: CellData) -> Result<()> {
        self.validate_cell_position(row, col)?;
        self.cells.set(row, col, data);
        Ok(())
    }

    /// Replace the value of a stored cell, keeping its style.
    ///
    /// Returns `false` and changes nothing if no cell is stored there.
    pub fn replace_value_at(&mut self, row: u32, col: u16, value: CellValue) -> bool {
        match self.cells.get_mut(row, col) {
            Some(cell) => {
                cell.value = value;
                true
            }
            None => false,
        }
    }

    /// Empty a cell's value, keeping its formatting
    pub fn clear_value_at(&mut self, row: u32, col: u16) {
        self.cells.set_value(row, col, CellValue::Empty);
    }

    /// Bounds of all stored cells
    pub fn used_range(&self) -> Option<CellRange> {
        self.cells
            .used_bounds()
            .map(|(min_row, min_col, max_row, max_col)| {
                CellRange::from_indices(min_row, min_col, max_row, max_col)
            })
    }

    // === Row/Column Operations ===

    /// Get row height in points
    pub fn row_height(&self, row: u32) -> f64 {
        self.cells.row_height(row)
    }

    /// Set row height in points
    pub fn set_row_height(&mut self, row: u32, height: f64) {
        self.cells.set_row_height(row, height);
    }

    /// Raise a row to at least `min_height` points. Never lowers it.
    ///
    /// Returns `true` if the height changed.
    pub fn grow_row_height(&mut self, row: u32, min_height: f64) -> bool {
        if min_height > self.row_height(row) {
            self.cells.set_row_height(row, min_height);
            true
        } else {
            false
        }
    }

    /// Check if row is hidden
    pub fn is_row_hidden(&self, row: u32) -> bool {
        self.cells.is_row_hidden(row)
    }

    /// Set row hidden state
    pub fn set_row_hidden(&mut self, row: u32, hidden: bool) {
        self.cells.set_row_hidden(row, hidden);
    }

    /// Get column width in characters
    pub fn column_width(&self, col: u16) -> f64 {
        self.cells.column_width(col)
    }

    /// Set column width in characters
    pub fn set_column_width(&mut self, col: u16, width: f64) {
        self.cells.set_column_width(col, width);
    }

    /// Widen a column to at least `min_width` characters. Never narrows it.
    ///
    /// Returns `true` if the width changed.
    pub fn grow_column_width(&mut self, col: u16, min_width: f64) -> bool {
        if min_width > self.column_width(col) {
            self.cells.set_column_width(col, min_width);
            true
        } else {
            false
        }
    }

    /// Check if column is hidden
    pub fn is_column_hidden(&self, col: u16) -> bool {
        self.cells.is_column_hidden(col)
    }

    /// Set column hidden state
    pub fn set_column_hidden(&mut self, col: u16, hidden: bool) {
        self.cells.set_column_hidden(col, hidden);
    }

    /// Row height overrides (row index → points)
    pub fn custom_row_heights(&self) -> &BTreeMap<u32, f64> {
        self.cells.custom_row_heights()
    }

    /// Hidden row indices
    pub fn hidden_rows(&self) -> &BTreeSet<u32> {
        self.cells.hidden_rows()
    }

    /// Settings of one column
    pub fn column_info(&self, col: u16) -> ColumnInfo {
        self.cells.column_info(col)
    }

    /// Replace the width, hidden flag and style of one column
    pub fn set_column_info(&mut self, col: u16, info: ColumnInfo) -> Result<()> {
        self.validate_cell_position(0, col)?;
        self.cells.set_column_info(col, info);
        Ok(())
    }

    /// Columns that differ from the default (column index → settings)
    pub fn columns(&self) -> &BTreeMap<u16, ColumnInfo> {
        self.cells.columns()
    }

    // === Merged Cells ===

    /// Get merged regions
    pub fn merged_regions(&self) -> &[CellRange] {
        self.cells.merged_regions()
    }

    /// Merge cells
    pub fn merge_cells(&mut self, range: &CellRange) -> Result<()> {
        if self
            .cells
            .merged_regions()
            .iter()
            .any(|existing| range.overlaps(existing))
        {
            return Err(Error::MergedCellConflict(range.to_string()));
        }
        self.cells.add_merged_region(*range);
        Ok(())
    }

    // === Images ===

    /// Attach an image to this sheet.
    ///
    /// Fails if the anchor is outside the grid or another image already
    /// sits at the same cell.
    pub fn add_image(&mut self, image: ImagePlacement) -> Result<()> {
        let anchor = image.anchor();
        self.validate_cell_position(anchor.row, anchor.col)?;
        if self.image_at(anchor.row, anchor.col).is_some() {
            return Err(Error::AnchorOccupied(anchor.to_string()));
        }
        self.images.push(image);
        Ok(())
    }

    /// Images attached to this sheet
    pub fn images(&self) -> &[ImagePlacement] {
        &self.images
    }

    /// The image anchored at a cell, if any
    pub fn image_at(&self, row: u32, col: u16) -> Option<&ImagePlacement> {
        let at = CellAddress::new(row, col);
        self.images.iter().find(|img| img.anchor() == at)
    }

    // === Iteration ===

    /// Get the number of stored cells
    pub fn cell_count(&self) -> usize {
        self.cells.cell_count()
    }

    /// Check if the worksheet has no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate over all stored cells, row by row
    pub fn iter_cells(&self) -> impl Iterator<Item = (u32, u16, &CellData)> {
        self.cells.iter()
    }

    /// Iterate over the cells of one row
    pub fn iter_row(&self, row: u32) -> impl Iterator<Item = (u16, &CellData)> {
        self.cells.iter_row(row)
    }

    /// Row indices that hold at least one cell
    pub fn row_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.cells.row_indices()
    }

    fn validate_cell_position(&self, row: u32, col: u16) -> Result<()> {
        if row >= MAX_ROWS {
            return Err(Error::RowOutOfBounds(row, MAX_ROWS - 1));
        }
        if col >= MAX_COLS {
            return Err(Error::ColumnOutOfBounds(col, MAX_COLS - 1));
        }
        Ok(())
    }
}
