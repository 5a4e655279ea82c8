//! XLS (BIFF8) reader.
//!
//! Opens a Compound File Binary (CFB/OLE2) container, reads the `Workbook`
//! stream, parses BIFF8 records, and populates an `imagecell_core::Workbook`.
//!
//! Only what the rewriter and the XLSX writer need is kept: cell values,
//! formula results, row heights, column widths, hidden flags and merges.
//! Formula token streams are not decompiled, so formula cells carry their
//! cached result as a plain value.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use imagecell_core::{CellAddress, CellError, CellRange, CellValue, Workbook, Worksheet};

use crate::biff::parser::{read_bytes8, read_f64, read_rk, read_u16, read_u32, read_u8};
use crate::biff::records;
use crate::biff::strings::{parse_sst, read_short_string, read_unicode_string};
use crate::biff::{self, BiffRecord};
use crate::error::{XlsError, XlsResult};

/// XLS file reader.
pub struct XlsReader;

/// Metadata for a sheet parsed from the BOUNDSHEET record.
#[derive(Debug)]
struct SheetInfo {
    /// Sheet visibility: 0 = visible, 1 = hidden, 2 = very hidden.
    visibility: u8,
    /// Sheet type: 0 = worksheet, 2 = chart, 6 = macro/VBA.
    sheet_type: u8,
    name: String,
}

impl XlsReader {
    /// Read an XLS file from a filesystem path.
    pub fn read_file<P: AsRef<Path>>(path: P) -> XlsResult<Workbook> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::read(file)
    }

    /// Read an XLS file from any `Read + Seek` source.
    pub fn read<R: Read + Seek>(reader: R) -> XlsResult<Workbook> {
        let mut cfb = cfb::CompoundFile::open(reader)?;

        let stream_path = if cfb.exists("/Workbook") {
            "/Workbook"
        } else if cfb.exists("/Book") {
            "/Book"
        } else {
            return Err(XlsError::InvalidFormat(
                "no Workbook or Book stream found in CFB".into(),
            ));
        };

        let mut stream_data = Vec::new();
        {
            let mut stream = cfb.open_stream(stream_path)?;
            stream.read_to_end(&mut stream_data)?;
        }

        let mut cursor = Cursor::new(&stream_data);
        let all_records = biff::read_all_records(&mut cursor)?;

        // Phase 1: workbook globals
        let mut sst: Vec<String> = Vec::new();
        let mut sheets: Vec<SheetInfo> = Vec::new();
        let mut date_1904 = false;
        let mut globals_end: Option<usize> = None;
        let mut in_globals = false;

        for (idx, rec) in all_records.iter().enumerate() {
            match rec.record_type {
                records::BOF if !in_globals => {
                    let (version, dt) = biff::parse_bof(&rec.data)?;
                    if dt != records::BOF_WORKBOOK_GLOBALS {
                        return Err(XlsError::InvalidFormat(format!(
                            "stream starts with substream type 0x{dt:04X}, expected workbook globals"
                        )));
                    }
                    if version != records::BIFF8_VERSION {
                        return Err(XlsError::UnsupportedVersion(format!(
                            "expected BIFF8 (0x0600), got 0x{version:04X}"
                        )));
                    }
                    in_globals = true;
                }
                records::EOF if in_globals => {
                    globals_end = Some(idx);
                    break;
                }
                records::SST if in_globals => {
                    sst = parse_sst(&rec.data, &rec.continue_offsets)?;
                }
                records::BOUNDSHEET if in_globals => {
                    sheets.push(Self::parse_boundsheet(&rec.data)?);
                }
                records::DATEMODE if in_globals => {
                    let mut off = 0;
                    date_1904 = read_u16(&rec.data, &mut off).unwrap_or(0) == 1;
                }
                _ => {}
            }
        }

        let Some(globals_end) = globals_end else {
            return Err(XlsError::InvalidFormat(
                "no complete workbook globals substream found".into(),
            ));
        };

        let mut workbook = Workbook::empty();
        workbook.settings_mut().date_1904 = date_1904;

        // Phase 2: one BOF..EOF substream per BOUNDSHEET entry, in order
        let groups = Self::split_sheet_records(&all_records[globals_end + 1..]);
        if groups.len() < sheets.len() {
            log::warn!(
                "workbook declares {} sheets but only {} substreams were found",
                sheets.len(),
                groups.len()
            );
        }

        for (biff_idx, info) in sheets.iter().enumerate() {
            if info.sheet_type != records::SHEET_TYPE_WORKSHEET {
                log::debug!("skipping non-worksheet sheet '{}'", info.name);
                continue;
            }

            let idx = workbook.add_worksheet_with_name(&info.name)?;
            let Some(ws) = workbook.worksheet_mut(idx) else {
                continue;
            };
            ws.set_visible(info.visibility == 0);

            if let Some(sheet_records) = groups.get(biff_idx) {
                Self::parse_sheet_records(sheet_records, ws, &sst)?;
            }
        }

        if workbook.is_empty() {
            return Err(XlsError::InvalidFormat("workbook has no worksheets".into()));
        }

        Ok(workbook)
    }

    /// Parse a BOUNDSHEET record body.
    fn parse_boundsheet(data: &[u8]) -> XlsResult<SheetInfo> {
        let mut offset = 0;
        let _stream_offset = read_u32(data, &mut offset)?;
        let visibility = read_u8(data, &mut offset)? & 0x03;
        let sheet_type = read_u8(data, &mut offset)?;
        let name = read_short_string(data, &mut offset)?;

        Ok(SheetInfo {
            visibility,
            sheet_type,
            name,
        })
    }

    /// Split records into per-sheet groups (each top-level BOF..EOF pair is
    /// one sheet; nested substreams such as embedded charts are absorbed).
    fn split_sheet_records(records: &[BiffRecord]) -> Vec<Vec<&BiffRecord>> {
        let mut groups: Vec<Vec<&BiffRecord>> = Vec::new();
        let mut current: Option<Vec<&BiffRecord>> = None;
        let mut depth = 0usize;

        for rec in records {
            match rec.record_type {
                records::BOF => {
                    if depth == 0 {
                        current = Some(Vec::new());
                    }
                    depth += 1;
                }
                records::EOF => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                    }
                }
                _ => {
                    if depth == 1 {
                        if let Some(ref mut group) = current {
                            group.push(rec);
                        }
                    }
                }
            }
        }

        groups
    }

    /// Parse the records of one worksheet substream.
    fn parse_sheet_records(
        records: &[&BiffRecord],
        ws: &mut Worksheet,
        sst: &[String],
    ) -> XlsResult<()> {
        // A FORMULA with a string result is followed by a STRING record
        let mut pending_string: Option<(u32, u16)> = None;

        for rec in records {
            let result = match rec.record_type {
                records::LABELSST => Self::parse_labelsst(&rec.data, ws, sst),
                records::LABEL => Self::parse_label(&rec.data, ws),
                records::NUMBER => Self::parse_number(&rec.data, ws),
                records::RK => Self::parse_rk(&rec.data, ws),
                records::MULRK => Self::parse_mulrk(&rec.data, ws),
                records::BOOLERR => Self::parse_boolerr(&rec.data, ws),
                records::FORMULA => {
                    Self::parse_formula(&rec.data, ws).map(|pending| pending_string = pending)
                }
                records::STRING => match pending_string.take() {
                    Some((row, col)) => Self::parse_formula_string(&rec.data, ws, row, col),
                    None => Ok(()),
                },
                records::MERGECELLS => Self::parse_mergecells(&rec.data, ws),
                records::ROW => Self::parse_row(&rec.data, ws),
                records::COLINFO => Self::parse_colinfo(&rec.data, ws),
                _ => continue,
            };

            if let Err(e) = result {
                match e {
                    XlsError::Parse(msg) => log::warn!(
                        "skipping malformed record 0x{:04X} at offset {} in '{}': {msg}",
                        rec.record_type,
                        rec.stream_offset,
                        ws.name()
                    ),
                    other => return Err(other),
                }
            }
        }

        Ok(())
    }

    /// Read the row/col/xf prefix shared by all single-cell records.
    fn read_cell_header(data: &[u8], off: &mut usize) -> XlsResult<(u32, u16)> {
        let row = read_u16(data, off)? as u32;
        let col = read_u16(data, off)?;
        let _xf = read_u16(data, off)?;
        Ok((row, col))
    }

    // ── Cell record parsers ──────────────────────────────────────────────

    /// LABELSST: row(2) + col(2) + xf(2) + sst_index(4)
    fn parse_labelsst(data: &[u8], ws: &mut Worksheet, sst: &[String]) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::read_cell_header(data, &mut off)?;
        let sst_idx = read_u32(data, &mut off)? as usize;

        match sst.get(sst_idx) {
            Some(s) => ws.set_cell_value_at(row, col, CellValue::string(s.as_str()))?,
            None => log::warn!(
                "{}: SST index {sst_idx} out of range ({} strings)",
                CellAddress::new(row, col),
                sst.len()
            ),
        }
        Ok(())
    }

    /// LABEL: row(2) + col(2) + xf(2) + unicode_string
    fn parse_label(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::read_cell_header(data, &mut off)?;
        let text = read_unicode_string(data, &mut off)?;
        ws.set_cell_value_at(row, col, CellValue::string(text))?;
        Ok(())
    }

    /// NUMBER: row(2) + col(2) + xf(2) + f64(8)
    fn parse_number(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::read_cell_header(data, &mut off)?;
        let value = read_f64(data, &mut off)?;
        ws.set_cell_value_at(row, col, CellValue::Number(value))?;
        Ok(())
    }

    /// RK: row(2) + col(2) + xf(2) + rk(4)
    fn parse_rk(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::read_cell_header(data, &mut off)?;
        let value = read_rk(data, &mut off)?;
        ws.set_cell_value_at(row, col, CellValue::Number(value))?;
        Ok(())
    }

    /// MULRK: row(2) + first_col(2) + [xf(2) + rk(4)]* + last_col(2)
    fn parse_mulrk(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        if data.len() < 6 {
            return Err(XlsError::Parse("MULRK record too short".into()));
        }
        let mut off = 0;
        let row = read_u16(data, &mut off)? as u32;
        let first_col = read_u16(data, &mut off)?;

        let last_col = u16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        let rk_data_end = data.len() - 2;

        let mut col = first_col;
        while off + 6 <= rk_data_end && col <= last_col {
            let _xf = read_u16(data, &mut off)?;
            let value = read_rk(data, &mut off)?;
            ws.set_cell_value_at(row, col, CellValue::Number(value))?;
            col += 1;
        }

        Ok(())
    }

    /// BOOLERR: row(2) + col(2) + xf(2) + value(1) + is_error(1)
    fn parse_boolerr(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let (row, col) = Self::read_cell_header(data, &mut off)?;
        let val = read_u8(data, &mut off)?;
        let is_error = read_u8(data, &mut off)?;

        let value = if is_error != 0 {
            CellValue::Error(CellError::from_code(val).unwrap_or(CellError::Value))
        } else {
            CellValue::Boolean(val != 0)
        };
        ws.set_cell_value_at(row, col, value)?;
        Ok(())
    }

    /// FORMULA: row(2) + col(2) + xf(2) + result(8) + options(2) + reserved(4) + tokens
    ///
    /// Stores the cached result. Returns the cell position when the result is
    /// a string, which arrives in the following STRING record.
    fn parse_formula(data: &[u8], ws: &mut Worksheet) -> XlsResult<Option<(u32, u16)>> {
        let mut off = 0;
        let (row, col) = Self::read_cell_header(data, &mut off)?;
        let result = read_bytes8(data, &mut off)?;

        // Bytes 6-7 == 0xFFFF mark a non-numeric result
        if result[6] != 0xFF || result[7] != 0xFF {
            ws.set_cell_value_at(row, col, CellValue::Number(f64::from_le_bytes(result)))?;
            return Ok(None);
        }

        match result[0] {
            0x00 => return Ok(Some((row, col))),
            0x01 => ws.set_cell_value_at(row, col, CellValue::Boolean(result[2] != 0))?,
            0x02 => {
                let err = CellError::from_code(result[2]).unwrap_or(CellError::Value);
                ws.set_cell_value_at(row, col, CellValue::Error(err))?;
            }
            // 0x03 is an empty-string result
            _ => {}
        }
        Ok(None)
    }

    /// STRING: cached string result of the preceding FORMULA.
    fn parse_formula_string(data: &[u8], ws: &mut Worksheet, row: u32, col: u16) -> XlsResult<()> {
        let mut off = 0;
        let text = read_unicode_string(data, &mut off)?;
        ws.set_cell_value_at(row, col, CellValue::string(text))?;
        Ok(())
    }

    // ── Structural record parsers ────────────────────────────────────────

    /// MERGECELLS: count(2) + [first_row(2) + last_row(2) + first_col(2) + last_col(2)]*
    fn parse_mergecells(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let count = read_u16(data, &mut off)? as usize;

        for _ in 0..count {
            let first_row = read_u16(data, &mut off)? as u32;
            let last_row = read_u16(data, &mut off)? as u32;
            let first_col = read_u16(data, &mut off)?;
            let last_col = read_u16(data, &mut off)?;

            let range = CellRange::new(
                CellAddress::new(first_row, first_col),
                CellAddress::new(last_row, last_col),
            );
            if let Err(e) = ws.merge_cells(&range) {
                log::warn!("ignoring merge {range} in '{}': {e}", ws.name());
            }
        }

        Ok(())
    }

    /// ROW: row(2) + first_col(2) + last_col_plus1(2) + height(2) + reserved(4) + options(4)
    fn parse_row(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let row = read_u16(data, &mut off)? as u32;
        let _first_col = read_u16(data, &mut off)?;
        let _last_col_plus1 = read_u16(data, &mut off)?;
        let raw_height = read_u16(data, &mut off)?;
        off += 4;
        let options = read_u32(data, &mut off)?;

        let height_pt = (raw_height & 0x7FFF) as f64 / 20.0;
        let hidden = (options & 0x20) != 0;
        let custom_height = (options & 0x40) != 0;

        if hidden {
            ws.set_row_hidden(row, true);
        }
        if custom_height && height_pt > 0.0 {
            ws.set_row_height(row, height_pt);
        }
        Ok(())
    }

    /// COLINFO: first_col(2) + last_col(2) + width(2) + xf(2) + options(2) + reserved(2)
    fn parse_colinfo(data: &[u8], ws: &mut Worksheet) -> XlsResult<()> {
        let mut off = 0;
        let first_col = read_u16(data, &mut off)?;
        let last_col = read_u16(data, &mut off)?;
        let raw_width = read_u16(data, &mut off)?;
        let _xf = read_u16(data, &mut off)?;
        let options = read_u16(data, &mut off)?;

        let hidden = (options & 0x0001) != 0;
        let width_chars = raw_width as f64 / 256.0;

        // The last COLINFO often spans to column 255 or beyond; clamp to the grid
        let last_col = last_col.min(imagecell_core::MAX_COLS - 1);
        for col in first_col..=last_col {
            if hidden {
                ws.set_column_hidden(col, true);
            }
            if width_chars > 0.0 {
                ws.set_column_width(col, width_chars);
            }
        }
        Ok(())
    }
}
