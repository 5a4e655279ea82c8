//! Shared formula expansion
//!
//! Excel stores a block of copied formulas once, on the top-left cell
//! (`<f t="shared" ref="B1:B9" si="0">A1*2</f>`), and leaves the other cells
//! with only the group index (`<f t="shared" si="0"/>`). Each dependent gets
//! the master's text with relative references moved by its offset.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use imagecell_core::{CellAddress, MAX_COLS, MAX_ROWS};

static CELL_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)([A-Za-z]{1,3})(\$?)(\d+)").expect("valid regex"));

/// Master formula of one shared group
struct SharedMaster {
    anchor: CellAddress,
    text: String,
}

/// Shared formula groups of one worksheet, keyed by `si`
#[derive(Default)]
pub(super) struct SharedFormulas {
    masters: HashMap<u32, SharedMaster>,
}

impl SharedFormulas {
    /// Record the master of group `index`, found at `anchor`
    pub(super) fn define(&mut self, index: u32, anchor: CellAddress, text: &str) {
        self.masters.insert(
            index,
            SharedMaster {
                anchor,
                text: text.to_string(),
            },
        );
    }

    /// Formula text of group `index` as seen from `at`
    pub(super) fn expand(&self, index: u32, at: CellAddress) -> Option<String> {
        let master = self.masters.get(&index)?;
        let row_delta = at.row as i64 - master.anchor.row as i64;
        let col_delta = at.col as i64 - master.anchor.col as i64;
        if row_delta == 0 && col_delta == 0 {
            return Some(master.text.clone());
        }
        Some(shift_references(&master.text, row_delta, col_delta))
    }
}

/// Move every relative A1 reference in `formula` by the given offsets.
///
/// `$`-anchored parts stay put, string literals and quoted sheet names are
/// left alone, and a reference pushed off the grid becomes `#REF!`.
pub(super) fn shift_references(formula: &str, row_delta: i64, col_delta: i64) -> String {
    let mut out = String::with_capacity(formula.len() + 8);
    let mut rest = formula;

    while let Some(pos) = rest.find(&['"', '\''][..]) {
        out.push_str(&shift_segment(&rest[..pos], row_delta, col_delta));
        let quoted_len = quoted_length(&rest[pos..]);
        out.push_str(&rest[pos..pos + quoted_len]);
        rest = &rest[pos + quoted_len..];
    }
    out.push_str(&shift_segment(rest, row_delta, col_delta));
    out
}

/// Byte length of the quoted run at the start of `s`, doubled quotes included
fn quoted_length(s: &str) -> usize {
    let bytes = s.as_bytes();
    let quote = bytes[0];
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Shift references in a stretch of formula text holding no quotes
fn shift_segment(segment: &str, row_delta: i64, col_delta: i64) -> String {
    CELL_REFERENCE
        .replace_all(segment, |caps: &Captures| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
            let before = segment[..start].chars().next_back();
            let after = segment[end..].chars().next();

            // Part of a name, a function call, or a sheet prefix
            let inside_name =
                before.map_or(false, |c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'));
            let not_a_reference = after.map_or(false, |c| matches!(c, '(' | '!' | '_' | '.'));
            if inside_name || not_a_reference {
                return whole.to_string();
            }

            shift_reference(caps, row_delta, col_delta).unwrap_or_else(|| whole.to_string())
        })
        .into_owned()
}

/// Shift one matched reference; `None` if it is not a valid cell address
fn shift_reference(caps: &Captures, row_delta: i64, col_delta: i64) -> Option<String> {
    let col_absolute = &caps[1] == "$";
    let row_absolute = &caps[3] == "$";
    let col = CellAddress::letters_to_column(&caps[2]).ok()? as i64;
    let row: i64 = caps[4].parse().ok()?;
    if row == 0 || row > MAX_ROWS as i64 {
        return None;
    }

    let new_col = if col_absolute { col } else { col + col_delta };
    let new_row = if row_absolute { row } else { row + row_delta };
    if new_col < 0 || new_col >= MAX_COLS as i64 || new_row < 1 || new_row > MAX_ROWS as i64 {
        return Some("#REF!".to_string());
    }

    Some(format!(
        "{}{}{}{}",
        &caps[1],
        CellAddress::column_to_letters(new_col as u16),
        &caps[3],
        new_row
    ))
}
