//! BIFF8 Unicode string decoding.
//!
//! BIFF8 strings have a layered encoding:
//! - Header: char_count (2 bytes) + flags (1 byte)
//! - Flags bit 0 (`fHighByte`): 0 = compressed Latin-1, 1 = uncompressed UTF-16LE
//! - Flags bit 2 (`fExtSt`): extended string data follows (Asian phonetic)
//! - Flags bit 3 (`fRichSt`): rich text run array follows
//! - If fRichSt: 2-byte run count follows the flags
//! - If fExtSt: 4-byte extended data size follows
//! - Then the character data, the rich text runs and the extended data
//!
//! In the SST, character data can span CONTINUE records. Each continuation
//! that splits a string starts with a fresh flags byte, so the encoding can
//! switch between compressed and uncompressed mid-string.

use super::parser::{read_u16, read_u32, read_u8};
use crate::error::{XlsError, XlsResult};

/// Read a BIFF8 "short" string (1-byte length prefix, used in BOUNDSHEET).
pub fn read_short_string(data: &[u8], offset: &mut usize) -> XlsResult<String> {
    let char_count = read_u8(data, offset)? as u16;
    let flags = read_u8(data, offset)?;
    read_character_data(data, offset, char_count, flags, &[])
}

/// Read a BIFF8 Unicode string with a 2-byte length prefix (LABEL, STRING).
pub fn read_unicode_string(data: &[u8], offset: &mut usize) -> XlsResult<String> {
    read_split_string(data, offset, &[])
}

/// Read a 2-byte-length string whose character data may cross any of the
/// CONTINUE `boundaries` (ascending offsets into `data`).
fn read_split_string(data: &[u8], offset: &mut usize, boundaries: &[usize]) -> XlsResult<String> {
    let char_count = read_u16(data, offset)?;
    let flags = read_u8(data, offset)?;

    let is_rich = (flags & 0x08) != 0;
    let has_ext = (flags & 0x04) != 0;

    let run_count = if is_rich { read_u16(data, offset)? } else { 0 };
    let ext_size = if has_ext { read_u32(data, offset)? } else { 0 };

    let text = read_character_data(data, offset, char_count, flags, boundaries)?;

    // Rich text runs are 4 bytes each (char_pos u16 + font_idx u16)
    *offset += run_count as usize * 4;
    *offset += ext_size as usize;

    Ok(text)
}

fn read_character_data(
    data: &[u8],
    offset: &mut usize,
    char_count: u16,
    mut flags: u8,
    boundaries: &[usize],
) -> XlsResult<String> {
    let mut units: Vec<u16> = Vec::with_capacity(char_count as usize);
    let mut remaining = char_count as usize;

    loop {
        if *offset > data.len() {
            return Err(XlsError::Parse(format!(
                "string starts past end of data at offset {}",
                *offset
            )));
        }
        let segment_end = boundaries
            .iter()
            .copied()
            .find(|&b| b >= *offset)
            .unwrap_or(data.len())
            .min(data.len());
        let wide = (flags & 0x01) != 0;
        let width = if wide { 2 } else { 1 };
        let take = ((segment_end.saturating_sub(*offset)) / width).min(remaining);

        let bytes = &data[*offset..*offset + take * width];
        if wide {
            units.extend(bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])));
        } else {
            units.extend(bytes.iter().map(|&b| b as u16));
        }
        *offset += take * width;
        remaining -= take;

        if remaining == 0 {
            break;
        }
        if segment_end >= data.len() {
            return Err(XlsError::Parse(format!(
                "string data too short: {remaining} of {char_count} characters missing at offset {}",
                *offset
            )));
        }

        // Character data continues in the next record behind a new flags byte
        *offset = segment_end;
        flags = read_u8(data, offset)?;
    }

    String::from_utf16(&units).map_err(|e| XlsError::Parse(format!("invalid UTF-16 string: {e}")))
}

/// Parse the Shared String Table from its merged body.
///
/// The SST body starts with:
/// - `total_strings` (4 bytes, u32): total string refs in the workbook
/// - `unique_strings` (4 bytes, u32): number of entries in this table
/// - Then `unique_strings` Unicode string entries
///
/// A truncated table is tolerated: the strings decoded so far are returned.
pub fn parse_sst(data: &[u8], continue_offsets: &[usize]) -> XlsResult<Vec<String>> {
    let mut offset = 0;

    let _total_strings = read_u32(data, &mut offset)?;
    let unique_count = read_u32(data, &mut offset)? as usize;

    let mut strings = Vec::with_capacity(unique_count.min(data.len()));

    for i in 0..unique_count {
        match read_split_string(data, &mut offset, continue_offsets) {
            Ok(s) => strings.push(s),
            Err(e) => {
                log::warn!("SST parse error at string {i}/{unique_count}: {e}");
                break;
            }
        }
    }

    Ok(strings)
}
