//! Summaries and output naming for a finished conversion

use serde::Serialize;

use crate::change::ChangeRecord;
use crate::convert::ConversionMode;

/// Per-sheet success and error counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetSummary {
    pub sheet: String,
    pub successful: usize,
    pub errors: usize,
    pub total: usize,
}

/// Count outcomes per sheet, in the order sheets first appear in `changes`.
pub fn summarize(changes: &[ChangeRecord]) -> Vec<SheetSummary> {
    let mut summaries: Vec<SheetSummary> = Vec::new();

    for change in changes {
        let idx = match summaries.iter().position(|s| s.sheet == change.sheet) {
            Some(idx) => idx,
            None => {
                summaries.push(SheetSummary {
                    sheet: change.sheet.clone(),
                    successful: 0,
                    errors: 0,
                    total: 0,
                });
                summaries.len() - 1
            }
        };

        let summary = &mut summaries[idx];
        if change.is_success() {
            summary.successful += 1;
        } else {
            summary.errors += 1;
        }
        summary.total += 1;
    }

    summaries
}

/// Name for the converted file.
///
/// Inserts `_with_images` or `_formulas_fixed` before the last extension.
/// Output is always XLSX, so an `.xls` extension becomes `.xlsx`.
pub fn output_file_name(original: &str, mode: ConversionMode) -> String {
    let suffix = match mode {
        ConversionMode::EmbedImages => "_with_images",
        ConversionMode::TextOnly => "_formulas_fixed",
    };

    match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = if ext.eq_ignore_ascii_case("xls") {
                "xlsx"
            } else {
                ext
            };
            format!("{stem}{suffix}.{ext}")
        }
        _ => format!("{original}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeAction, ChangeStatus, FailureCause};
    use pretty_assertions::assert_eq;

    fn record(sheet: &str, ok: bool) -> ChangeRecord {
        let status = if ok {
            ChangeStatus::Success
        } else {
            ChangeStatus::Error {
                cause: FailureCause::InvalidImage,
                detail: "Invalid image format: bad".into(),
            }
        };
        ChangeRecord::new(
            sheet,
            "A1".into(),
            "=@IMAGE(\"u\")".into(),
            "u".into(),
            ChangeAction::ImageInserted,
            status,
        )
    }

    #[test]
    fn test_summarize_groups_by_sheet_in_order() {
        let changes = vec![
            record("Products", true),
            record("Archive", false),
            record("Products", false),
            record("Products", true),
        ];

        let summary = summarize(&changes);
        assert_eq!(
            summary,
            vec![
                SheetSummary {
                    sheet: "Products".into(),
                    successful: 2,
                    errors: 1,
                    total: 3,
                },
                SheetSummary {
                    sheet: "Archive".into(),
                    successful: 0,
                    errors: 1,
                    total: 1,
                },
            ]
        );
        assert!(summarize(&[]).is_empty());
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(
            output_file_name("catalog.xlsx", ConversionMode::EmbedImages),
            "catalog_with_images.xlsx"
        );
        assert_eq!(
            output_file_name("catalog.xlsx", ConversionMode::TextOnly),
            "catalog_formulas_fixed.xlsx"
        );
        assert_eq!(
            output_file_name("old.report.XLS", ConversionMode::TextOnly),
            "old.report_formulas_fixed.xlsx"
        );
        assert_eq!(
            output_file_name("noext", ConversionMode::EmbedImages),
            "noext_with_images"
        );
        assert_eq!(
            output_file_name(".hidden", ConversionMode::EmbedImages),
            ".hidden_with_images"
        );
    }
}
