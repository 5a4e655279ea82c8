//! The change log produced by a conversion

use std::fmt;

use serde::{Serialize, Serializer};

/// What was done to a matched cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeAction {
    /// Text-only mode: the formula was normalized
    #[serde(rename = "Formula replaced")]
    FormulaReplaced,
    /// The picture was embedded and the cell cleared
    #[serde(rename = "Image inserted")]
    ImageInserted,
    /// The download failed, so the formula was normalized instead
    #[serde(rename = "Formula replaced (download failed)")]
    DownloadFailed,
    /// Embedding failed, so the formula was normalized instead
    #[serde(rename = "Formula replaced (image insertion failed)")]
    InsertionFailed,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::FormulaReplaced => "Formula replaced",
            ChangeAction::ImageInserted => "Image inserted",
            ChangeAction::DownloadFailed => "Formula replaced (download failed)",
            ChangeAction::InsertionFailed => "Formula replaced (image insertion failed)",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage of the pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Connection, timeout or HTTP status
    Network,
    /// The download was not a decodable image
    InvalidImage,
    /// The image could not be attached to the sheet
    Embed,
}

/// Outcome of processing one cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    Success,
    Error { cause: FailureCause, detail: String },
}

impl ChangeStatus {
    /// Check if the cell was processed without falling back
    pub fn is_success(&self) -> bool {
        matches!(self, ChangeStatus::Success)
    }

    /// The failing stage, if any
    pub fn cause(&self) -> Option<FailureCause> {
        match self {
            ChangeStatus::Success => None,
            ChangeStatus::Error { cause, .. } => Some(*cause),
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeStatus::Success => f.write_str("Success"),
            ChangeStatus::Error { detail, .. } => write!(f, "Error: {detail}"),
        }
    }
}

impl Serialize for ChangeStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One entry per matched cell, in sheet then row-major order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    /// Sheet name
    pub sheet: String,
    /// A1-style address
    pub cell: String,
    /// Cell text before the rewrite
    pub original: String,
    pub action: ChangeAction,
    /// URL taken from the first match in the cell
    pub url: String,
    pub status: ChangeStatus,
    /// Failing stage, for callers that want more than the status text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
}

impl ChangeRecord {
    pub(crate) fn new(
        sheet: &str,
        cell: String,
        original: String,
        url: String,
        action: ChangeAction,
        status: ChangeStatus,
    ) -> Self {
        let cause = status.cause();
        Self {
            sheet: sheet.to_string(),
            cell,
            original,
            action,
            url,
            status,
            cause,
        }
    }

    /// Check if the cell was processed without falling back
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
