//! Workbook conversion
//!
//! Walks every sheet in order and every cell in row-major order, rewriting
//! each `=@IMAGE("url")` cell either as a normalized `=IMAGE("url")` formula
//! or as an embedded picture, and records one [`ChangeRecord`] per match.
//!
//! # Example
//!
//! ```rust,no_run
//! use imagecell::prelude::*;
//!
//! let input = std::fs::read("catalog.xlsx").unwrap();
//! let result = convert(&input, &ConvertOptions::text_only()).unwrap();
//! for change in &result.changes {
//!     println!("{}!{}: {} ({})", change.sheet, change.cell, change.action, change.status);
//! }
//! std::fs::write("catalog_formulas_fixed.xlsx", &result.output).unwrap();
//! ```

use std::time::Duration;

use imagecell_core::{CellAddress, Workbook, Worksheet};
use serde::Serialize;

use crate::change::{ChangeAction, ChangeRecord, ChangeStatus, FailureCause};
use crate::document::{open_workbook, save_workbook};
use crate::error::{ConvertError, ConvertResult, EmbedError, FetchError};
use crate::fetch::{HttpImageFetcher, ImageSource};
use crate::matcher::find_image_url;
use crate::rewrite::{rewrite_as_formula, rewrite_as_image, ImageFit};

/// Default upper bound for each side of an embedded image, in pixels
pub const DEFAULT_MAX_IMAGE_SIZE: u32 = 200;

/// Smallest accepted `max_image_size`
pub const MIN_MAX_IMAGE_SIZE: u32 = 50;

/// Largest accepted `max_image_size`
pub const MAX_MAX_IMAGE_SIZE: u32 = 500;

/// Default per-download timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default User-Agent sent with image downloads
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// How matched cells are rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    /// Only normalize `=@IMAGE(...)` to `=IMAGE(...)`
    TextOnly,
    /// Download and embed each image, normalizing the formula on failure
    #[default]
    EmbedImages,
}

/// Options for a conversion
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub mode: ConversionMode,
    /// Upper bound for each side of an embedded image in pixels (50-500)
    pub max_image_size: u32,
    /// Timeout for each image download
    pub fetch_timeout: Duration,
    /// User-Agent header for image downloads
    pub user_agent: String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            mode: ConversionMode::default(),
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ConvertOptions {
    /// Normalize formulas without downloading anything
    pub fn text_only() -> Self {
        Self {
            mode: ConversionMode::TextOnly,
            ..Self::default()
        }
    }

    /// Embed images no larger than `max_image_size` pixels per side
    pub fn embed_images(max_image_size: u32) -> Self {
        Self {
            mode: ConversionMode::EmbedImages,
            max_image_size,
            ..Self::default()
        }
    }

    /// Check the options for the selected mode.
    ///
    /// The image size bound only matters when embedding.
    pub fn validate(&self) -> ConvertResult<()> {
        if self.mode == ConversionMode::EmbedImages
            && !(MIN_MAX_IMAGE_SIZE..=MAX_MAX_IMAGE_SIZE).contains(&self.max_image_size)
        {
            return Err(ConvertError::InvalidOptions(format!(
                "max image size must be between {MIN_MAX_IMAGE_SIZE} and {MAX_MAX_IMAGE_SIZE} pixels, got {}",
                self.max_image_size
            )));
        }
        Ok(())
    }
}

/// A converted document
#[derive(Debug, Clone)]
pub struct Conversion {
    /// The rewritten workbook as XLSX bytes
    pub output: Vec<u8>,
    /// One record per matched cell, in processing order
    pub changes: Vec<ChangeRecord>,
}

/// A cell holding an `@IMAGE` formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFormula {
    pub sheet: String,
    pub address: CellAddress,
    /// Full cell text
    pub text: String,
    /// URL from the first match
    pub url: String,
}

/// Extension trait for Workbook to find and rewrite `@IMAGE` formulas
pub trait WorkbookImageExt {
    /// Every cell with an `@IMAGE` formula, in processing order
    fn image_formulas(&self) -> Vec<ImageFormula>;

    /// Rewrite all `@IMAGE` formulas, downloading images over HTTP
    fn rewrite_image_formulas(&mut self, options: &ConvertOptions)
        -> ConvertResult<Vec<ChangeRecord>>;

    /// Rewrite all `@IMAGE` formulas, taking images from `source`
    fn rewrite_image_formulas_with(
        &mut self,
        options: &ConvertOptions,
        source: &dyn ImageSource,
    ) -> ConvertResult<Vec<ChangeRecord>>;
}

impl WorkbookImageExt for Workbook {
    fn image_formulas(&self) -> Vec<ImageFormula> {
        self.worksheets()
            .flat_map(|sheet| {
                collect_matches(sheet)
                    .into_iter()
                    .map(move |m| ImageFormula {
                        sheet: sheet.name().to_string(),
                        address: m.address,
                        text: m.text,
                        url: m.url,
                    })
            })
            .collect()
    }

    fn rewrite_image_formulas(
        &mut self,
        options: &ConvertOptions,
    ) -> ConvertResult<Vec<ChangeRecord>> {
        options.validate()?;
        match options.mode {
            ConversionMode::TextOnly => Converter::new(options, None).run(self),
            ConversionMode::EmbedImages => {
                let fetcher = HttpImageFetcher::from_options(options)?;
                Converter::new(options, Some(&fetcher)).run(self)
            }
        }
    }

    fn rewrite_image_formulas_with(
        &mut self,
        options: &ConvertOptions,
        source: &dyn ImageSource,
    ) -> ConvertResult<Vec<ChangeRecord>> {
        options.validate()?;
        Converter::new(options, Some(source)).run(self)
    }
}

/// Convert a spreadsheet document, downloading images over HTTP.
///
/// Accepts XLSX or XLS bytes; the output is always XLSX.
pub fn convert(input: &[u8], options: &ConvertOptions) -> ConvertResult<Conversion> {
    options.validate()?;
    let mut workbook = open_workbook(input)?;
    let changes = workbook.rewrite_image_formulas(options)?;
    finish(&workbook, changes)
}

/// Convert a spreadsheet document, taking images from `source`.
pub fn convert_with(
    input: &[u8],
    options: &ConvertOptions,
    source: &dyn ImageSource,
) -> ConvertResult<Conversion> {
    options.validate()?;
    let mut workbook = open_workbook(input)?;
    let changes = workbook.rewrite_image_formulas_with(options, source)?;
    finish(&workbook, changes)
}

fn finish(workbook: &Workbook, changes: Vec<ChangeRecord>) -> ConvertResult<Conversion> {
    let output = save_workbook(workbook)?;
    Ok(Conversion { output, changes })
}

/// A matched cell, captured before any mutation
struct CellMatch {
    address: CellAddress,
    text: String,
    url: String,
}

fn collect_matches(sheet: &Worksheet) -> Vec<CellMatch> {
    sheet
        .iter_cells()
        .filter_map(|(row, col, cell)| {
            let text = cell.value.text()?;
            let url = find_image_url(text)?;
            Some(CellMatch {
                address: CellAddress::new(row, col),
                text: text.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

/// Result of the fetch and embed stages for one cell
enum EmbedOutcome {
    Inserted(ImageFit),
    DownloadFailed(FetchError),
    InsertionFailed(EmbedError),
}

/// The conversion engine
struct Converter<'a> {
    options: &'a ConvertOptions,
    source: Option<&'a dyn ImageSource>,
}

impl<'a> Converter<'a> {
    fn new(options: &'a ConvertOptions, source: Option<&'a dyn ImageSource>) -> Self {
        Self { options, source }
    }

    fn run(&self, workbook: &mut Workbook) -> ConvertResult<Vec<ChangeRecord>> {
        let mut changes = Vec::new();

        for sheet in workbook.worksheets_mut() {
            let matches = collect_matches(sheet);
            for m in matches {
                log::debug!("{}!{}: found @IMAGE formula for {}", sheet.name(), m.address, m.url);
                changes.push(self.process_cell(sheet, m)?);
            }
        }

        let failed = changes.iter().filter(|c| !c.is_success()).count();
        log::info!(
            "converted {} @IMAGE formulas ({} succeeded, {} fell back)",
            changes.len(),
            changes.len() - failed,
            failed
        );
        Ok(changes)
    }

    fn process_cell(&self, sheet: &mut Worksheet, m: CellMatch) -> ConvertResult<ChangeRecord> {
        let (action, status) = match (self.options.mode, self.source) {
            (ConversionMode::TextOnly, _) => {
                rewrite_as_formula(sheet, m.address, &m.text);
                (ChangeAction::FormulaReplaced, ChangeStatus::Success)
            }
            (ConversionMode::EmbedImages, Some(source)) => {
                let outcome = self.embed(sheet, &m, source);
                Self::settle(sheet, &m, outcome)
            }
            (ConversionMode::EmbedImages, None) => {
                return Err(ConvertError::InvalidOptions(
                    "image embedding needs an image source".to_string(),
                ))
            }
        };

        Ok(ChangeRecord::new(
            sheet.name(),
            m.address.to_string(),
            m.text,
            m.url,
            action,
            status,
        ))
    }

    /// Fetch, then embed. The fetched buffers are released on return.
    fn embed(&self, sheet: &mut Worksheet, m: &CellMatch, source: &dyn ImageSource) -> EmbedOutcome {
        let image = match source.fetch(&m.url) {
            Ok(image) => image,
            Err(e) => return EmbedOutcome::DownloadFailed(e),
        };
        match rewrite_as_image(sheet, m.address, image, self.options.max_image_size) {
            Ok(fit) => EmbedOutcome::Inserted(fit),
            Err(e) => EmbedOutcome::InsertionFailed(e),
        }
    }

    /// Turn a stage outcome into the logged action, falling back to the
    /// normalized formula on any failure.
    fn settle(
        sheet: &mut Worksheet,
        m: &CellMatch,
        outcome: EmbedOutcome,
    ) -> (ChangeAction, ChangeStatus) {
        let (action, cause, detail) = match outcome {
            EmbedOutcome::Inserted(fit) => {
                log::debug!(
                    "{}!{}: inserted {}x{} image",
                    sheet.name(),
                    m.address,
                    fit.width,
                    fit.height
                );
                return (ChangeAction::ImageInserted, ChangeStatus::Success);
            }
            EmbedOutcome::DownloadFailed(e) => {
                let cause = match e {
                    FetchError::Network(_) => FailureCause::Network,
                    FetchError::InvalidImage(_) => FailureCause::InvalidImage,
                };
                (ChangeAction::DownloadFailed, cause, e.to_string())
            }
            EmbedOutcome::InsertionFailed(e) => {
                (ChangeAction::InsertionFailed, FailureCause::Embed, e.to_string())
            }
        };

        log::warn!("{}!{}: {detail}; using IMAGE formula", sheet.name(), m.address);
        rewrite_as_formula(sheet, m.address, &m.text);
        (action, ChangeStatus::Error { cause, detail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedImage;
    use imagecell_core::CellValue;
    use pretty_assertions::assert_eq;

    struct Fixed(Result<FetchedImage, FetchError>);

    impl ImageSource for Fixed {
        fn fetch(&self, _url: &str) -> Result<FetchedImage, FetchError> {
            self.0.clone()
        }
    }

    fn workbook_with(cells: &[(&str, &str)]) -> Workbook {
        let mut wb = Workbook::new();
        let sheet = wb.worksheet_mut(0).unwrap();
        for (addr, text) in cells {
            sheet.set_cell_value(addr, *text).unwrap();
        }
        wb
    }

    #[test]
    fn test_options_validation() {
        assert!(ConvertOptions::default().validate().is_ok());
        assert!(ConvertOptions::embed_images(50).validate().is_ok());
        assert!(ConvertOptions::embed_images(500).validate().is_ok());
        assert!(matches!(
            ConvertOptions::embed_images(49).validate(),
            Err(ConvertError::InvalidOptions(_))
        ));
        assert!(ConvertOptions::embed_images(501).validate().is_err());

        // Only checked when embedding
        let mut text = ConvertOptions::text_only();
        text.max_image_size = 5;
        assert!(text.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let options = ConvertOptions::default();
        assert_eq!(options.mode, ConversionMode::EmbedImages);
        assert_eq!(options.max_image_size, 200);
        assert_eq!(options.fetch_timeout, Duration::from_secs(10));
        assert!(options.user_agent.contains("Chrome/91"));
    }

    #[test]
    fn test_image_formulas_in_row_major_order() {
        let mut wb = workbook_with(&[
            ("B2", "=@IMAGE(\"u3\")"),
            ("A1", "=@IMAGE(\"u1\")"),
            ("C1", "=@IMAGE('u2')"),
            ("A3", "plain"),
        ]);
        let second = wb.add_worksheet_with_name("Second").unwrap();
        wb.worksheet_mut(second)
            .unwrap()
            .set_cell_formula("A1", "=@IMAGE(\"u4\")")
            .unwrap();

        let found: Vec<_> = wb
            .image_formulas()
            .into_iter()
            .map(|f| (f.sheet, f.address.to_string(), f.url))
            .collect();
        assert_eq!(
            found,
            vec![
                ("Sheet1".to_string(), "A1".to_string(), "u1".to_string()),
                ("Sheet1".to_string(), "C1".to_string(), "u2".to_string()),
                ("Sheet1".to_string(), "B2".to_string(), "u3".to_string()),
                ("Second".to_string(), "A1".to_string(), "u4".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_only_never_fetches() {
        struct Panics;
        impl ImageSource for Panics {
            fn fetch(&self, _url: &str) -> Result<FetchedImage, FetchError> {
                panic!("text-only conversion must not fetch");
            }
        }

        let mut wb = workbook_with(&[("A1", "=@IMAGE(\"http://x/img.png\")")]);
        let changes = wb
            .rewrite_image_formulas_with(&ConvertOptions::text_only(), &Panics)
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::FormulaReplaced);
        assert_eq!(
            wb.worksheet(0).unwrap().get_value("A1").unwrap().text(),
            Some("=IMAGE(\"http://x/img.png\")")
        );
    }

    #[test]
    fn test_invalid_image_falls_back() {
        let mut wb = workbook_with(&[("A1", "=@IMAGE(\"http://x/page.html\")")]);
        let source = Fixed(Err(FetchError::InvalidImage("unsupported format".into())));
        let changes = wb
            .rewrite_image_formulas_with(&ConvertOptions::embed_images(200), &source)
            .unwrap();

        let change = &changes[0];
        assert_eq!(change.action, ChangeAction::DownloadFailed);
        assert_eq!(change.cause, Some(FailureCause::InvalidImage));
        assert_eq!(
            change.status.to_string(),
            "Error: Invalid image format: unsupported format"
        );
        assert!(wb.worksheet(0).unwrap().images().is_empty());
    }

    #[test]
    fn test_embed_failure_falls_back() {
        // A zero-sized image cannot be placed
        let source = Fixed(Ok(FetchedImage {
            png: vec![1, 2, 3],
            width: 0,
            height: 10,
        }));
        let mut wb = workbook_with(&[("D4", "=@IMAGE(\"u\")")]);
        let changes = wb
            .rewrite_image_formulas_with(&ConvertOptions::embed_images(200), &source)
            .unwrap();

        assert_eq!(changes[0].action, ChangeAction::InsertionFailed);
        assert_eq!(changes[0].cause, Some(FailureCause::Embed));
        let value = wb.worksheet(0).unwrap().get_value("D4").unwrap();
        assert_eq!(value, CellValue::formula("=IMAGE(\"u\")"));
    }

    #[test]
    fn test_invalid_options_rejected_before_work() {
        let mut wb = workbook_with(&[("A1", "=@IMAGE(\"u\")")]);
        let source = Fixed(Err(FetchError::Network("unused".into())));
        let err = wb
            .rewrite_image_formulas_with(&ConvertOptions::embed_images(10), &source)
            .unwrap_err();

        assert!(matches!(err, ConvertError::InvalidOptions(_)));
        assert_eq!(
            wb.worksheet(0).unwrap().get_value("A1").unwrap().as_string(),
            Some("=@IMAGE(\"u\")")
        );
    }
}
