//! Sparse cell storage
//!
//! Only non-empty cells are kept, in a row-major `BTreeMap` so iteration
//! follows the order cells are scanned and written.

use std::collections::{BTreeMap, BTreeSet};

use super::CellValue;
use crate::cell::{CellAddress, CellRange};
use crate::{DEFAULT_COLUMN_WIDTH, DEFAULT_ROW_HEIGHT};

/// Complete data for a single cell
#[derive(Debug, Clone, PartialEq)]
pub struct CellData {
    /// The cell's value
    pub value: CellValue,
    /// Style (xf) index from the source document, 0 for the default style
    pub style_index: u32,
}

impl CellData {
    /// Create a new cell with a value and default style
    pub fn new(value: CellValue) -> Self {
        Self {
            value,
            style_index: 0,
        }
    }

    /// Create a new cell with a value and style
    pub fn with_style(value: CellValue, style_index: u32) -> Self {
        Self { value, style_index }
    }

    /// No value and default style
    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.style_index == 0
    }
}

/// Width, visibility and default style of one column
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColumnInfo {
    /// Width in characters, `None` for the sheet default
    pub width: Option<f64>,
    /// The width was set by hand rather than fitted to the content
    pub custom_width: bool,
    pub hidden: bool,
    /// Style (xf) index applied to empty cells of the column
    pub style_index: u32,
}

impl ColumnInfo {
    /// Nothing differs from a fresh column
    pub fn is_default(&self) -> bool {
        self.width.is_none() && !self.hidden && self.style_index == 0
    }
}

/// Row-major sparse storage for one worksheet
///
/// Structure: `BTreeMap<row_index, BTreeMap<col_index, CellData>>`, plus the
/// row/column dimension overrides and merged regions that belong to the grid.
#[derive(Debug, Default)]
pub struct CellStorage {
    rows: BTreeMap<u32, BTreeMap<u16, CellData>>,
    /// Row heights in points that differ from the default
    row_heights: BTreeMap<u32, f64>,
    hidden_rows: BTreeSet<u32>,
    /// Columns with a width, hidden flag or style that differs from the default
    columns: BTreeMap<u16, ColumnInfo>,
    merged_regions: Vec<CellRange>,
}

impl CellStorage {
    /// Create a new empty cell storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cell
    pub fn get(&self, row: u32, col: u16) -> Option<&CellData> {
        self.rows.get(&row).and_then(|r| r.get(&col))
    }

    /// Get a cell mutably
    pub fn get_mut(&mut self, row: u32, col: u16) -> Option<&mut CellData> {
        self.rows.get_mut(&row).and_then(|r| r.get_mut(&col))
    }

    /// Store a cell. Empty data removes the cell.
    pub fn set(&mut self, row: u32, col: u16, data: CellData) {
        if data.is_empty() {
            self.remove(row, col);
        } else {
            self.rows.entry(row).or_default().insert(col, data);
        }
    }

    /// Replace just the value, keeping the style index
    pub fn set_value(&mut self, row: u32, col: u16, value: CellValue) {
        let style_index = self.get(row, col).map(|c| c.style_index).unwrap_or(0);
        self.set(row, col, CellData::with_style(value, style_index));
    }

    /// Remove a cell
    pub fn remove(&mut self, row: u32, col: u16) -> Option<CellData> {
        let row_map = self.rows.get_mut(&row)?;
        let removed = row_map.remove(&col);
        if row_map.is_empty() {
            self.rows.remove(&row);
        }
        removed
    }

    /// Number of stored cells
    pub fn cell_count(&self) -> usize {
        self.rows.values().map(|r| r.len()).sum()
    }

    /// Check if storage holds no cells
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bounds of stored cells as (min_row, min_col, max_row, max_col)
    pub fn used_bounds(&self) -> Option<(u32, u16, u32, u16)> {
        let min_row = *self.rows.keys().next()?;
        let max_row = *self.rows.keys().next_back()?;

        let (min_col, max_col) = self
            .rows
            .values()
            .filter_map(|cols| Some((*cols.keys().next()?, *cols.keys().next_back()?)))
            .fold((u16::MAX, 0u16), |(lo, hi), (first, last)| {
                (lo.min(first), hi.max(last))
            });

        Some((min_row, min_col, max_row, max_col))
    }

    /// Iterate over all cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (u32, u16, &CellData)> {
        self.rows
            .iter()
            .flat_map(|(&row, cols)| cols.iter().map(move |(&col, data)| (row, col, data)))
    }

    /// Iterate over cells in one row
    pub fn iter_row(&self, row: u32) -> impl Iterator<Item = (u16, &CellData)> {
        self.rows
            .get(&row)
            .into_iter()
            .flat_map(|cols| cols.iter().map(|(&col, data)| (col, data)))
    }

    /// Row indices that hold at least one cell
    pub fn row_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.keys().copied()
    }

    /// Effective row height in points
    pub fn row_height(&self, row: u32) -> f64 {
        self.row_heights
            .get(&row)
            .copied()
            .unwrap_or(DEFAULT_ROW_HEIGHT)
    }

    /// Set a row height; the default height clears the override
    pub fn set_row_height(&mut self, row: u32, height: f64) {
        if (height - DEFAULT_ROW_HEIGHT).abs() < 0.001 {
            self.row_heights.remove(&row);
        } else {
            self.row_heights.insert(row, height);
        }
    }

    /// Check if row is hidden
    pub fn is_row_hidden(&self, row: u32) -> bool {
        self.hidden_rows.contains(&row)
    }

    /// Set row hidden state
    pub fn set_row_hidden(&mut self, row: u32, hidden: bool) {
        if hidden {
            self.hidden_rows.insert(row);
        } else {
            self.hidden_rows.remove(&row);
        }
    }

    /// Effective column width in characters
    pub fn column_width(&self, col: u16) -> f64 {
        self.columns
            .get(&col)
            .and_then(|info| info.width)
            .unwrap_or(DEFAULT_COLUMN_WIDTH)
    }

    /// Set a column width by hand; the default width clears the override
    pub fn set_column_width(&mut self, col: u16, width: f64) {
        let mut info = self.column_info(col);
        if (width - DEFAULT_COLUMN_WIDTH).abs() < 0.001 {
            info.width = None;
            info.custom_width = false;
        } else {
            info.width = Some(width);
            info.custom_width = true;
        }
        self.set_column_info(col, info);
    }

    /// Check if column is hidden
    pub fn is_column_hidden(&self, col: u16) -> bool {
        self.columns.get(&col).map_or(false, |info| info.hidden)
    }

    /// Set column hidden state
    pub fn set_column_hidden(&mut self, col: u16, hidden: bool) {
        let mut info = self.column_info(col);
        info.hidden = hidden;
        self.set_column_info(col, info);
    }

    /// Settings of one column, default if none were stored
    pub fn column_info(&self, col: u16) -> ColumnInfo {
        self.columns.get(&col).copied().unwrap_or_default()
    }

    /// Replace the settings of one column
    pub fn set_column_info(&mut self, col: u16, info: ColumnInfo) {
        if info.is_default() {
            self.columns.remove(&col);
        } else {
            self.columns.insert(col, info);
        }
    }

    /// Row height overrides (row index → points)
    pub fn custom_row_heights(&self) -> &BTreeMap<u32, f64> {
        &self.row_heights
    }

    /// Hidden row indices
    pub fn hidden_rows(&self) -> &BTreeSet<u32> {
        &self.hidden_rows
    }

    /// Columns that differ from the default, by index
    pub fn columns(&self) -> &BTreeMap<u16, ColumnInfo> {
        &self.columns
    }

    /// Merged regions
    pub fn merged_regions(&self) -> &[CellRange] {
        &self.merged_regions
    }

    /// Add a merged region
    pub fn add_merged_region(&mut self, range: CellRange) {
        self.merged_regions.push(range);
    }

    /// Check if a cell is part of a merged region
    pub fn is_merged(&self, row: u32, col: u16) -> bool {
        let addr = CellAddress::new(row, col);
        self.merged_regions.iter().any(|r| r.contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_cells_not_stored() {
        let mut storage = CellStorage::new();

        storage.set(0, 0, CellData::new(CellValue::Number(42.0)));
        assert_eq!(storage.cell_count(), 1);

        storage.set(0, 0, CellData::new(CellValue::Empty));
        assert_eq!(storage.cell_count(), 0);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_set_value_keeps_style() {
        let mut storage = CellStorage::new();
        storage.set(2, 3, CellData::with_style(CellValue::string("x"), 7));

        storage.set_value(2, 3, CellValue::Empty);
        let cell = storage.get(2, 3).unwrap();
        assert!(cell.value.is_empty());
        assert_eq!(cell.style_index, 7);
    }

    #[test]
    fn test_used_bounds() {
        let mut storage = CellStorage::new();
        assert!(storage.used_bounds().is_none());

        storage.set(5, 3, CellData::new(CellValue::Number(1.0)));
        storage.set(10, 7, CellData::new(CellValue::Number(2.0)));
        storage.set(2, 1, CellData::new(CellValue::Number(3.0)));

        assert_eq!(storage.used_bounds(), Some((2, 1, 10, 7)));
    }

    #[test]
    fn test_dimensions() {
        let mut storage = CellStorage::new();
        assert_eq!(storage.row_height(0), DEFAULT_ROW_HEIGHT);
        assert_eq!(storage.column_width(0), DEFAULT_COLUMN_WIDTH);

        storage.set_row_height(5, 30.0);
        storage.set_column_width(3, 20.0);
        storage.set_row_hidden(10, true);
        storage.set_column_hidden(5, true);

        assert_eq!(storage.row_height(5), 30.0);
        assert_eq!(storage.column_width(3), 20.0);
        assert!(storage.is_row_hidden(10));
        assert!(storage.is_column_hidden(5));

        storage.set_row_height(5, DEFAULT_ROW_HEIGHT);
        assert!(storage.custom_row_heights().is_empty());
    }

    #[test]
    fn test_column_info() {
        let mut storage = CellStorage::new();
        storage.set_column_info(
            4,
            ColumnInfo {
                width: Some(12.0),
                custom_width: false,
                hidden: false,
                style_index: 3,
            },
        );
        storage.set_column_hidden(4, true);

        assert_eq!(
            storage.column_info(4),
            ColumnInfo {
                width: Some(12.0),
                custom_width: false,
                hidden: true,
                style_index: 3,
            }
        );

        // Setting a width by hand marks it custom
        storage.set_column_width(4, 30.0);
        assert!(storage.column_info(4).custom_width);

        storage.set_column_info(4, ColumnInfo::default());
        assert!(storage.columns().is_empty());
        assert_eq!(storage.column_info(9), ColumnInfo::default());
    }

    #[test]
    fn test_row_major_iteration() {
        let mut storage = CellStorage::new();
        storage.set(1, 0, CellData::new(CellValue::Number(3.0)));
        storage.set(0, 1, CellData::new(CellValue::Number(2.0)));
        storage.set(0, 0, CellData::new(CellValue::Number(1.0)));

        let order: Vec<_> = storage.iter().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0)]);
    }
}
