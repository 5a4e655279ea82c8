//! Workbook type - the main document structure

use crate::carried::CarriedXml;
use crate::error::{Error, Result};
use crate::worksheet::Worksheet;
use crate::MAX_SHEET_NAME_LEN;

/// A workbook (spreadsheet document)
///
/// Holds the worksheets in tab order, workbook settings, and the raw package
/// parts that are carried from the source file to the output unchanged.
#[derive(Debug, Default)]
pub struct Workbook {
    /// Worksheets in the workbook
    worksheets: Vec<Worksheet>,
    /// Workbook settings
    settings: WorkbookSettings,
    /// `xl/styles.xml` from the source package; cell style indices refer to it
    styles_part: Option<Vec<u8>>,
    /// `xl/theme/theme1.xml` from the source package
    theme_part: Option<Vec<u8>>,
    /// Unmodeled `xl/workbook.xml` content, such as defined names
    carried: CarriedXml,
}

impl Workbook {
    /// Create a new workbook with one empty worksheet named "Sheet1"
    pub fn new() -> Self {
        Self {
            worksheets: vec![Worksheet::new("Sheet1")],
            ..Self::default()
        }
    }

    /// Create an empty workbook with no worksheets
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of worksheets
    pub fn sheet_count(&self) -> usize {
        self.worksheets.len()
    }

    /// Check if the workbook has no worksheets
    pub fn is_empty(&self) -> bool {
        self.worksheets.is_empty()
    }

    /// Get a worksheet by index
    pub fn worksheet(&self, index: usize) -> Option<&Worksheet> {
        self.worksheets.get(index)
    }

    /// Get a mutable worksheet by index
    pub fn worksheet_mut(&mut self, index: usize) -> Option<&mut Worksheet> {
        self.worksheets.get_mut(index)
    }

    /// Get a worksheet by name
    pub fn worksheet_by_name(&self, name: &str) -> Option<&Worksheet> {
        self.worksheets.iter().find(|ws| ws.name() == name)
    }

    /// Get a mutable worksheet by name
    pub fn worksheet_by_name_mut(&mut self, name: &str) -> Option<&mut Worksheet> {
        self.worksheets.iter_mut().find(|ws| ws.name() == name)
    }

    /// Iterate over all worksheets
    pub fn worksheets(&self) -> impl Iterator<Item = &Worksheet> {
        self.worksheets.iter()
    }

    /// Iterate over all worksheets mutably
    pub fn worksheets_mut(&mut self) -> impl Iterator<Item = &mut Worksheet> {
        self.worksheets.iter_mut()
    }

    /// Add a new worksheet with the next free "SheetN" name
    pub fn add_worksheet(&mut self) -> Result<usize> {
        let name = self.generate_sheet_name();
        self.add_worksheet_with_name(&name)
    }

    /// Add a new worksheet with specified name
    pub fn add_worksheet_with_name(&mut self, name: &str) -> Result<usize> {
        self.validate_sheet_name(name)?;
        self.worksheets.push(Worksheet::new(name));
        Ok(self.worksheets.len() - 1)
    }

    /// Total number of embedded images across all sheets
    pub fn image_count(&self) -> usize {
        self.worksheets.iter().map(|ws| ws.images().len()).sum()
    }

    /// Get workbook settings
    pub fn settings(&self) -> &WorkbookSettings {
        &self.settings
    }

    /// Get mutable workbook settings
    pub fn settings_mut(&mut self) -> &mut WorkbookSettings {
        &mut self.settings
    }

    /// Raw stylesheet carried from the source package
    pub fn styles_part(&self) -> Option<&[u8]> {
        self.styles_part.as_deref()
    }

    /// Carry a raw stylesheet to the output
    pub fn set_styles_part(&mut self, xml: Vec<u8>) {
        self.styles_part = Some(xml);
    }

    /// Raw theme carried from the source package
    pub fn theme_part(&self) -> Option<&[u8]> {
        self.theme_part.as_deref()
    }

    /// Carry a raw theme to the output
    pub fn set_theme_part(&mut self, xml: Vec<u8>) {
        self.theme_part = Some(xml);
    }

    /// Workbook XML carried from the source package
    pub fn carried(&self) -> &CarriedXml {
        &self.carried
    }

    /// Mutable access to the carried workbook XML
    pub fn carried_mut(&mut self) -> &mut CarriedXml {
        &mut self.carried
    }

    fn validate_sheet_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidSheetName("Sheet name cannot be empty".into()));
        }
        if name.chars().count() > MAX_SHEET_NAME_LEN {
            return Err(Error::InvalidSheetName(format!(
                "Sheet name too long (max {} characters)",
                MAX_SHEET_NAME_LEN
            )));
        }

        const INVALID_CHARS: &[char] = &[':', '\\', '/', '?', '*', '[', ']'];
        if let Some(c) = name.chars().find(|c| INVALID_CHARS.contains(c)) {
            return Err(Error::InvalidSheetName(format!(
                "Sheet name cannot contain '{}'",
                c
            )));
        }

        // Excel compares sheet names case-insensitively
        let name_lower = name.to_lowercase();
        if self
            .worksheets
            .iter()
            .any(|ws| ws.name().to_lowercase() == name_lower)
        {
            return Err(Error::DuplicateSheetName(name.into()));
        }

        Ok(())
    }

    fn generate_sheet_name(&self) -> String {
        (self.worksheets.len() + 1..)
            .map(|n| format!("Sheet{}", n))
            .find(|name| self.validate_sheet_name(name).is_ok())
            .unwrap_or_else(|| "Sheet".to_string())
    }
}

/// Workbook-level settings
#[derive(Debug, Clone, Default)]
pub struct WorkbookSettings {
    /// Date system: false = 1900 (Windows), true = 1904 (Mac)
    pub date_1904: bool,
}
