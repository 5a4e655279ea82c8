//! XLSX reader

mod carry;
mod shared_formula;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::drawing::{emu_to_px, media_format, read_pictures};
use crate::error::{XlsxError, XlsxResult};
use crate::parts::{
    attr_value, carries_workbook_element, carries_worksheet_element, parse_relationships,
    part_dir, rels_path_for, Relationship,
};
use carry::{carry_root_attributes, ElementCapture};
use imagecell_core::{
    CarriedXml, CellAddress, CellData, CellError, CellRange, CellValue, ColumnInfo, ExternalLink,
    ImagePlacement, Workbook, Worksheet,
};
use shared_formula::SharedFormulas;

const REL_WORKSHEET: &str = "/worksheet";
const REL_STYLES: &str = "/styles";
const REL_THEME: &str = "/theme";
const REL_HYPERLINK: &str = "/hyperlink";
const REL_DRAWING: &str = "/drawing";
const REL_IMAGE: &str = "/image";

/// Decode Excel's `_xHHHH_` escape sequences in strings.
///
/// Excel uses this format to encode special characters in XML:
/// - `_x000d_` = CR (carriage return)
/// - `_x000a_` = LF (line feed)
/// - `_x0009_` = Tab
/// - `_x005f_` = Underscore (escaped underscore)
fn decode_excel_escapes(s: &str) -> String {
    if !s.contains("_x") {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find("_x") {
        result.push_str(&rest[..pos]);
        let candidate = &rest[pos..];
        let decoded = candidate
            .get(2..6)
            .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .filter(|_| candidate.as_bytes().get(6) == Some(&b'_'))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);

        match decoded {
            Some(c) => {
                result.push(c);
                rest = &candidate[7..];
            }
            None => {
                result.push('_');
                rest = &candidate[1..];
            }
        }
    }

    result.push_str(rest);
    result
}

/// Parse an XML boolean attribute ("1"/"true")
fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Sheet entry from `xl/workbook.xml`
struct SheetEntry {
    name: String,
    r_id: String,
    hidden: bool,
}

/// What `xl/workbook.xml` holds besides the sheets' cells
#[derive(Default)]
struct WorkbookXml {
    sheets: Vec<SheetEntry>,
    date_1904: bool,
    carried: CarriedXml,
}

/// Parts referenced from `xl/_rels/workbook.xml.rels`
#[derive(Default)]
struct WorkbookParts {
    sheets: HashMap<String, String>,
    styles: Option<String>,
    theme: Option<String>,
}

/// In-progress `<c>` element
#[derive(Default)]
struct PendingCell {
    reference: Option<String>,
    cell_type: Option<String>,
    style: u32,
    value: Option<String>,
    formula: Option<String>,
    /// `si` of a shared formula group
    shared_index: Option<u32>,
    /// The cell holds the group's master text (`ref` is present)
    shared_master: bool,
}

impl PendingCell {
    fn from_attrs(e: &BytesStart) -> Self {
        let mut cell = PendingCell::default();
        for attr in e.attributes().flatten() {
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            match attr.key.as_ref() {
                b"r" => cell.reference = Some(value.into_owned()),
                b"t" => cell.cell_type = Some(value.into_owned()),
                b"s" => cell.style = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        cell
    }

    /// Record the `t`/`ref`/`si` attributes of the cell's `<f>`
    fn apply_formula_attrs(&mut self, e: &BytesStart) {
        if attr_value(e, b"t").as_deref() != Some("shared") {
            return;
        }
        self.shared_index = attr_value(e, b"si").and_then(|si| si.parse().ok());
        self.shared_master = attr_value(e, b"ref").is_some();
    }
}

/// XLSX file reader
pub struct XlsxReader;

impl XlsxReader {
    /// Read a workbook from a file path
    pub fn read_file<P: AsRef<Path>>(path: P) -> XlsxResult<Workbook> {
        let file = File::open(path)?;
        Self::read(BufReader::new(file))
    }

    /// Read a workbook from a reader
    pub fn read<R: Read + Seek>(reader: R) -> XlsxResult<Workbook> {
        let mut archive = zip::ZipArchive::new(reader)?;

        if archive.by_name("[Content_Types].xml").is_err() {
            return Err(XlsxError::InvalidFormat(
                "Missing [Content_Types].xml".into(),
            ));
        }

        let shared_strings = Self::read_shared_strings(&mut archive)?;
        let workbook_xml = Self::read_workbook_xml(&mut archive)?;
        let parts = Self::read_workbook_rels(&mut archive)?;

        let mut workbook = Workbook::empty();
        workbook.settings_mut().date_1904 = workbook_xml.date_1904;
        *workbook.carried_mut() = workbook_xml.carried;

        // Cell style indices are kept verbatim, so the stylesheet travels with them
        let styles_path = parts.styles.as_deref().unwrap_or("xl/styles.xml");
        if let Some(xml) = Self::read_raw_part(&mut archive, styles_path)? {
            workbook.set_styles_part(xml);
        }
        if let Some(theme_path) = parts.theme.as_deref() {
            if let Some(xml) = Self::read_raw_part(&mut archive, theme_path)? {
                workbook.set_theme_part(xml);
            }
        }

        for entry in &workbook_xml.sheets {
            let Some(path) = parts.sheets.get(&entry.r_id) else {
                log::warn!(
                    "sheet '{}' references missing relationship {}",
                    entry.name,
                    entry.r_id
                );
                continue;
            };
            let sheet_idx = workbook.add_worksheet_with_name(&entry.name)?;
            let worksheet = workbook
                .worksheet_mut(sheet_idx)
                .ok_or_else(|| XlsxError::InvalidFormat("worksheet vanished".into()))?;
            worksheet.set_visible(!entry.hidden);
            Self::read_worksheet(&mut archive, path, worksheet, &shared_strings)?;
        }

        if workbook.is_empty() {
            workbook.add_worksheet()?;
        }

        Ok(workbook)
    }

    /// Read the shared strings table
    fn read_shared_strings<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
    ) -> XlsxResult<Vec<String>> {
        let mut strings = Vec::new();

        let file = match archive.by_name("xl/sharedStrings.xml") {
            Ok(f) => f,
            Err(_) => return Ok(strings),
        };

        let mut xml_reader = Reader::from_reader(BufReader::new(file));

        let mut buf = Vec::new();
        let mut current = String::new();
        let mut in_si = false;
        let mut in_t = false;
        // Phonetic runs (<rPh>) are annotations, not part of the text
        let mut in_phonetic = false;

        loop {
            match xml_reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"si" => {
                        in_si = true;
                        current.clear();
                    }
                    b"rPh" => in_phonetic = true,
                    b"t" if in_si && !in_phonetic => in_t = true,
                    _ => {}
                },
                Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                    strings.push(String::new());
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"si" => {
                        strings.push(decode_excel_escapes(&current));
                        in_si = false;
                    }
                    b"rPh" => in_phonetic = false,
                    b"t" => in_t = false,
                    _ => {}
                },
                Ok(Event::Text(e)) if in_t => {
                    current.push_str(&e.unescape()?);
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(XlsxError::Xml(e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(strings)
    }

    /// Read `xl/workbook.xml`: sheet entries in tab order, the date system,
    /// and the elements carried verbatim
    fn read_workbook_xml<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
    ) -> XlsxResult<WorkbookXml> {
        let file = archive
            .by_name("xl/workbook.xml")
            .map_err(|_| XlsxError::MissingPart("xl/workbook.xml".into()))?;

        let mut xml_reader = Reader::from_reader(BufReader::new(file));

        let mut buf = Vec::new();
        let mut workbook = WorkbookXml::default();
        let mut depth = 0usize;
        let mut capture: Option<ElementCapture> = None;
        // Workbook-level relationships (external references, pivot caches) are not carried
        let no_links = HashSet::new();

        loop {
            let event = xml_reader.read_event_into(&mut buf)?;

            if let Some(active) = capture.as_mut() {
                if active.feed(event, &no_links)? {
                    let finished = capture.take().and_then(ElementCapture::finish);
                    workbook.carried.elements.extend(finished);
                }
                buf.clear();
                continue;
            }

            if depth == 1 {
                if let Some(mut active) = ElementCapture::begin(&event, carries_workbook_element) {
                    if active.feed(event, &no_links)? {
                        workbook.carried.elements.extend(active.finish());
                    } else {
                        capture = Some(active);
                    }
                    buf.clear();
                    continue;
                }
            }

            match event {
                Event::Start(e) => {
                    if depth == 0 {
                        carry_root_attributes(&e, &mut workbook.carried);
                    }
                    depth += 1;
                    Self::read_workbook_element(&e, &mut workbook);
                }
                Event::Empty(e) => Self::read_workbook_element(&e, &mut workbook),
                Event::End(_) => depth = depth.saturating_sub(1),
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(workbook)
    }

    /// `<sheet>` entries and `<workbookPr>` settings
    fn read_workbook_element(e: &BytesStart, workbook: &mut WorkbookXml) {
        match e.local_name().as_ref() {
            b"sheet" => {
                let name = attr_value(e, b"name");
                let r_id = attr_value(e, b"r:id");
                let hidden = attr_value(e, b"state").map_or(false, |state| state != "visible");
                match (name, r_id) {
                    (Some(name), Some(r_id)) => {
                        workbook.sheets.push(SheetEntry { name, r_id, hidden })
                    }
                    _ => log::warn!("skipping <sheet> without name or r:id"),
                }
            }
            b"workbookPr" => {
                workbook.date_1904 = attr_value(e, b"date1904").map_or(false, |v| is_truthy(&v));
            }
            _ => {}
        }
    }

    /// Read `xl/_rels/workbook.xml.rels` to locate worksheets, styles and theme
    fn read_workbook_rels<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
    ) -> XlsxResult<WorkbookParts> {
        let xml = Self::read_raw_part(archive, "xl/_rels/workbook.xml.rels")?
            .ok_or_else(|| XlsxError::MissingPart("xl/_rels/workbook.xml.rels".into()))?;

        let mut parts = WorkbookParts::default();
        for rel in parse_relationships(&xml, "xl")? {
            if rel.external {
                continue;
            }
            if rel.is(REL_WORKSHEET) {
                parts.sheets.insert(rel.id, rel.target);
            } else if rel.is(REL_STYLES) {
                parts.styles = Some(rel.target);
            } else if rel.is(REL_THEME) {
                parts.theme = Some(rel.target);
            }
        }

        Ok(parts)
    }

    /// Relationships of a part, empty if it has none
    fn read_part_relationships<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
        part: &str,
    ) -> XlsxResult<Vec<Relationship>> {
        match Self::read_raw_part(archive, &rels_path_for(part))? {
            Some(xml) => parse_relationships(&xml, part_dir(part)),
            None => Ok(Vec::new()),
        }
    }

    /// Read a part's bytes, `None` if the archive does not contain it
    fn read_raw_part<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
        path: &str,
    ) -> XlsxResult<Option<Vec<u8>>> {
        let mut file = match archive.by_name(path) {
            Ok(f) => f,
            Err(_) => return Ok(None),
        };
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    /// Read a worksheet from the archive: cells, dimensions, merged ranges,
    /// carried elements and the pictures of its drawing
    fn read_worksheet<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
        path: &str,
        worksheet: &mut Worksheet,
        shared_strings: &[String],
    ) -> XlsxResult<()> {
        let relationships = Self::read_part_relationships(archive, path)?;
        let links: Vec<ExternalLink> = relationships
            .iter()
            .filter(|rel| rel.external && rel.is(REL_HYPERLINK))
            .map(|rel| ExternalLink {
                id: rel.id.clone(),
                rel_type: rel.rel_type.clone(),
                target: rel.target.clone(),
            })
            .collect();
        let link_ids: HashSet<String> = links.iter().map(|link| link.id.clone()).collect();
        worksheet.carried_mut().external_links = links;

        let file = archive
            .by_name(path)
            .map_err(|_| XlsxError::MissingPart(path.to_string()))?;

        let mut xml_reader = Reader::from_reader(BufReader::new(file));

        let mut buf = Vec::new();
        let mut depth = 0usize;
        let mut capture: Option<ElementCapture> = None;
        let mut shared_formulas = SharedFormulas::default();
        let mut drawing_id: Option<String> = None;
        let mut cell: Option<PendingCell> = None;
        let mut in_value = false;
        let mut in_formula = false;
        let mut in_inline_str = false;
        let mut in_inline_text = false;
        let mut in_phonetic = false;

        loop {
            let event = xml_reader.read_event_into(&mut buf)?;

            if let Some(active) = capture.as_mut() {
                if active.feed(event, &link_ids)? {
                    let finished = capture.take().and_then(ElementCapture::finish);
                    worksheet.carried_mut().elements.extend(finished);
                }
                buf.clear();
                continue;
            }

            if depth == 1 {
                if let Some(mut active) = ElementCapture::begin(&event, carries_worksheet_element) {
                    if active.feed(event, &link_ids)? {
                        worksheet.carried_mut().elements.extend(active.finish());
                    } else {
                        capture = Some(active);
                    }
                    buf.clear();
                    continue;
                }
            }

            match event {
                Event::Start(e) => {
                    if depth == 0 {
                        carry_root_attributes(&e, worksheet.carried_mut());
                    }
                    depth += 1;
                    match e.local_name().as_ref() {
                        b"row" => Self::apply_row_attrs(&e, worksheet),
                        b"c" => cell = Some(PendingCell::from_attrs(&e)),
                        b"v" if cell.is_some() => in_value = true,
                        b"f" => {
                            if let Some(pending) = cell.as_mut() {
                                pending.apply_formula_attrs(&e);
                                in_formula = true;
                            }
                        }
                        b"is" if cell.is_some() => in_inline_str = true,
                        b"rPh" if in_inline_str => in_phonetic = true,
                        b"t" if in_inline_str && !in_phonetic => in_inline_text = true,
                        _ => {}
                    }
                }
                Event::End(e) => {
                    depth = depth.saturating_sub(1);
                    match e.local_name().as_ref() {
                        b"c" => {
                            if let Some(pending) = cell.take() {
                                Self::process_cell(
                                    worksheet,
                                    pending,
                                    shared_strings,
                                    &mut shared_formulas,
                                )?;
                            }
                        }
                        b"v" => in_value = false,
                        b"f" => in_formula = false,
                        b"is" => in_inline_str = false,
                        b"rPh" => in_phonetic = false,
                        b"t" => in_inline_text = false,
                        _ => {}
                    }
                }
                Event::Text(e) => {
                    if let Some(pending) = cell.as_mut() {
                        if in_value {
                            pending.value = Some(e.unescape()?.into_owned());
                        } else if in_formula {
                            pending
                                .formula
                                .get_or_insert_with(String::new)
                                .push_str(&e.unescape()?);
                        } else if in_inline_text {
                            pending
                                .value
                                .get_or_insert_with(String::new)
                                .push_str(&e.unescape()?);
                            pending.cell_type = Some("inlineStr".to_string());
                        }
                    }
                }
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"row" => Self::apply_row_attrs(&e, worksheet),
                    b"col" => Self::apply_col_attrs(&e, worksheet),
                    b"c" => {
                        // Value-less cell, usually kept only for its style
                        Self::process_cell(
                            worksheet,
                            PendingCell::from_attrs(&e),
                            shared_strings,
                            &mut shared_formulas,
                        )?;
                    }
                    // Dependent of a shared formula group
                    b"f" => {
                        if let Some(pending) = cell.as_mut() {
                            pending.apply_formula_attrs(&e);
                        }
                    }
                    b"mergeCell" => {
                        if let Some(reference) = attr_value(&e, b"ref") {
                            match CellRange::parse(&reference) {
                                Ok(range) => {
                                    if let Err(err) = worksheet.merge_cells(&range) {
                                        log::warn!("ignoring merged range {}: {}", reference, err);
                                    }
                                }
                                Err(err) => {
                                    log::warn!("ignoring merged range {}: {}", reference, err)
                                }
                            }
                        }
                    }
                    b"drawing" if depth == 1 => drawing_id = attr_value(&e, b"r:id"),
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        // Releases the archive for the drawing parts
        drop(xml_reader);

        if let Some(id) = drawing_id {
            match relationships.iter().find(|rel| rel.id == id && rel.is(REL_DRAWING)) {
                Some(rel) if !rel.external => Self::read_drawing(archive, &rel.target, worksheet)?,
                _ => log::warn!(
                    "sheet '{}' references missing drawing relationship {}",
                    worksheet.name(),
                    id
                ),
            }
        }

        Ok(())
    }

    /// Attach the pictures of a source drawing part to the sheet.
    ///
    /// Pictures that cannot be resolved are skipped with a warning.
    fn read_drawing<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
        path: &str,
        worksheet: &mut Worksheet,
    ) -> XlsxResult<()> {
        let Some(xml) = Self::read_raw_part(archive, path)? else {
            log::warn!("drawing part {} is missing", path);
            return Ok(());
        };
        let pictures = read_pictures(&xml)?;
        if pictures.is_empty() {
            return Ok(());
        }
        let relationships = Self::read_part_relationships(archive, path)?;

        for picture in pictures {
            let media = relationships
                .iter()
                .find(|rel| rel.id == picture.embed && rel.is(REL_IMAGE) && !rel.external);
            let Some(media) = media else {
                log::warn!("{}: picture at {} has no image part", path, picture.anchor);
                continue;
            };
            let Some(data) = Self::read_raw_part(archive, &media.target)? else {
                log::warn!("{}: image part {} is missing", path, media.target);
                continue;
            };
            if media_format(&data).is_none() {
                log::warn!("{}: unsupported image format in {}", path, media.target);
                continue;
            }

            let width = emu_to_px(picture.width_emu);
            let height = emu_to_px(picture.height_emu);
            let placed = ImagePlacement::new(picture.anchor, data, width, height)
                .and_then(|placement| worksheet.add_image(placement));
            if let Err(err) = placed {
                log::warn!("{}: skipping picture at {}: {}", path, picture.anchor, err);
            }
        }

        log::debug!(
            "read {} picture(s) from {} for sheet '{}'",
            worksheet.images().len(),
            path,
            worksheet.name()
        );
        Ok(())
    }

    /// Apply `<row r ht customHeight hidden>` to the sheet
    fn apply_row_attrs(e: &BytesStart, worksheet: &mut Worksheet) {
        let mut row_num: Option<u32> = None;
        let mut height: Option<f64> = None;
        let mut custom_height = false;
        let mut hidden = false;

        for attr in e.attributes().flatten() {
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            match attr.key.as_ref() {
                b"r" => row_num = value.parse().ok(),
                b"ht" => height = value.parse().ok(),
                b"customHeight" => custom_height = is_truthy(&value),
                b"hidden" => hidden = is_truthy(&value),
                _ => {}
            }
        }

        let Some(row_idx) = row_num.and_then(|r| r.checked_sub(1)) else {
            return;
        };
        if custom_height {
            if let Some(h) = height {
                worksheet.set_row_height(row_idx, h);
            }
        }
        if hidden {
            worksheet.set_row_hidden(row_idx, true);
        }
    }

    /// Apply `<col min max width customWidth hidden style>` to the sheet
    fn apply_col_attrs(e: &BytesStart, worksheet: &mut Worksheet) {
        let mut col_min: Option<u16> = None;
        let mut col_max: Option<u16> = None;
        let mut info = ColumnInfo::default();

        for attr in e.attributes().flatten() {
            let Ok(value) = attr.unescape_value() else {
                continue;
            };
            match attr.key.as_ref() {
                b"min" => col_min = value.parse().ok(),
                b"max" => col_max = value.parse().ok(),
                b"width" => info.width = value.parse().ok(),
                b"customWidth" => info.custom_width = is_truthy(&value),
                b"hidden" => info.hidden = is_truthy(&value),
                b"style" => info.style_index = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        let (Some(min), Some(max)) = (col_min, col_max) else {
            return;
        };
        // min/max are 1-based and may span the whole sheet
        let max = max.min(imagecell_core::MAX_COLS);
        for col in min.max(1)..=max {
            if let Err(err) = worksheet.set_column_info(col - 1, info) {
                log::warn!("ignoring column {}: {}", col, err);
            }
        }
    }

    /// Convert a finished `<c>` element into a cell on the sheet
    fn process_cell(
        worksheet: &mut Worksheet,
        cell: PendingCell,
        shared_strings: &[String],
        shared_formulas: &mut SharedFormulas,
    ) -> XlsxResult<()> {
        let Some(reference) = cell.reference.as_deref() else {
            log::warn!("skipping <c> without a cell reference");
            return Ok(());
        };
        let addr = CellAddress::parse(reference).map_err(|e| {
            XlsxError::Parse(format!("Invalid cell reference '{}': {}", reference, e))
        })?;

        let formula = match (cell.formula, cell.shared_index) {
            (Some(text), Some(index)) if cell.shared_master => {
                shared_formulas.define(index, addr, &text);
                Some(text)
            }
            (Some(text), _) => Some(text),
            (None, Some(index)) => {
                let expanded = shared_formulas.expand(index, addr);
                if expanded.is_none() {
                    log::warn!(
                        "{}!{}: shared formula group {} has no master, keeping the cached value",
                        worksheet.name(),
                        addr,
                        index
                    );
                }
                expanded
            }
            (None, None) => None,
        };

        let cell_type = cell.cell_type.as_deref();
        let value = match (formula, cell.value.as_deref()) {
            (Some(formula), cached) => {
                let cached = cached
                    .map(|v| Self::typed_value(cell_type, v, shared_strings))
                    .transpose()?;
                let text = format!("={}", formula);
                match cached {
                    Some(cached) => CellValue::formula_with_cached(text, cached),
                    None => CellValue::formula(text),
                }
            }
            (None, Some(raw)) => Self::typed_value(cell_type, raw, shared_strings)?,
            (None, None) => CellValue::Empty,
        };

        worksheet.set_cell_data_at(addr.row, addr.col, CellData::with_style(value, cell.style))?;
        Ok(())
    }

    /// Interpret a `<v>` payload according to the cell's `t` attribute
    fn typed_value(
        cell_type: Option<&str>,
        raw: &str,
        shared_strings: &[String],
    ) -> XlsxResult<CellValue> {
        let value = match cell_type {
            Some("s") => {
                let idx: usize = raw.trim().parse().map_err(|_| {
                    XlsxError::Parse(format!("Invalid shared string index: {}", raw))
                })?;
                let s = shared_strings.get(idx).ok_or_else(|| {
                    XlsxError::Parse(format!("Shared string index {} out of bounds", idx))
                })?;
                CellValue::string(s.as_str())
            }
            Some("b") => CellValue::Boolean(is_truthy(raw.trim())),
            Some("e") => CellError::parse(raw)
                .map(CellValue::Error)
                .unwrap_or_else(|| CellValue::string(raw)),
            Some("inlineStr") | Some("str") => CellValue::string(decode_excel_escapes(raw)),
            None | Some("n") => match raw.trim().parse::<f64>() {
                Ok(n) => CellValue::Number(n),
                Err(_) => CellValue::string(raw),
            },
            Some(_) => CellValue::string(raw),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Write};

    #[test]
    fn test_decode_excel_escapes() {
        assert_eq!(decode_excel_escapes("hello_x000d_world"), "hello\rworld");
        assert_eq!(decode_excel_escapes("col1_x0009_col2"), "col1\tcol2");
        assert_eq!(
            decode_excel_escapes("line1_x000D__x000A_line2"),
            "line1\r\nline2"
        );
        assert_eq!(decode_excel_escapes("under_x005f_score"), "under_score");
        assert_eq!(decode_excel_escapes("plain text"), "plain text");
    }

    #[test]
    fn test_decode_excel_escapes_partial_sequence() {
        assert_eq!(decode_excel_escapes("_x00"), "_x00");
        assert_eq!(decode_excel_escapes("_x000d"), "_x000d");
        assert_eq!(decode_excel_escapes("a_xzzzz_b"), "a_xzzzz_b");
    }

    const WORKBOOK_XML: &str = r#"<?xml version="1.0"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><workbookPr date1904="1"/><sheets><sheet name="Data &amp; Images" sheetId="1" r:id="rId1"/><sheet name="Hidden" sheetId="2" state="hidden" r:id="rId2"/></sheets></workbook>"#;

    fn build_package(sheet_xml: &str, shared_strings: Option<&str>) -> Vec<u8> {
        build_package_with(WORKBOOK_XML, sheet_xml, shared_strings, &[])
    }

    fn build_package_with(
        workbook_xml: &str,
        sheet_xml: &str,
        shared_strings: Option<&str>,
        extra_parts: &[(&str, &[u8])],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();

            zip.start_file("[Content_Types].xml", options).unwrap();
            zip.write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#).unwrap();

            zip.start_file("xl/workbook.xml", options).unwrap();
            zip.write_all(workbook_xml.as_bytes()).unwrap();

            zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
            zip.write_all(br#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#).unwrap();

            zip.start_file("xl/styles.xml", options).unwrap();
            zip.write_all(b"<styleSheet/>").unwrap();

            if let Some(sst) = shared_strings {
                zip.start_file("xl/sharedStrings.xml", options).unwrap();
                zip.write_all(sst.as_bytes()).unwrap();
            }

            zip.start_file("xl/worksheets/sheet1.xml", options).unwrap();
            zip.write_all(sheet_xml.as_bytes()).unwrap();

            zip.start_file("xl/worksheets/sheet2.xml", options).unwrap();
            zip.write_all(br#"<worksheet><sheetData/></worksheet>"#).unwrap();

            for (name, content) in extra_parts {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content).unwrap();
            }

            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_read_cells_dimensions_and_parts() {
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<cols><col min="2" max="3" width="20.5" customWidth="1"/><col min="5" max="5" width="9" hidden="1"/><col min="7" max="8" width="11" style="3"/></cols>
<sheetData>
<row r="1" ht="30" customHeight="1"><c r="A1" t="s" s="2"><v>0</v></c><c r="B1"><v>42.5</v></c><c r="C1" t="b"><v>1</v></c></row>
<row r="2"><c r="A2"><f>SUM(B1:B1)</f><v>42.5</v></c><c r="B2" t="str"><f>"x"&amp;"y"</f><v>xy</v></c><c r="C2" t="e"><v>#N/A</v></c></row>
<row r="3" hidden="1"><c r="A3" t="inlineStr"><is><t xml:space="preserve"> =@IMAGE('http://x/a.png') </t></is></c><c r="B3" s="4"/></row>
<row r="7" ht="45" customHeight="1"/>
</sheetData>
<mergeCells count="1"><mergeCell ref="D1:E2"/></mergeCells>
</worksheet>"#;
        let sst = r#"<sst><si><t>=@IMAGE("http://x/img.png")</t></si><si><r><t>rich</t></r><r><t> text</t></r><rPh><t>ignored</t></rPh></si></sst>"#;

        let workbook = XlsxReader::read(Cursor::new(build_package(sheet, Some(sst)))).unwrap();

        assert_eq!(workbook.sheet_count(), 2);
        assert!(workbook.settings().date_1904);
        assert_eq!(workbook.styles_part(), Some(&b"<styleSheet/>"[..]));

        let ws = workbook.worksheet(0).unwrap();
        assert_eq!(ws.name(), "Data & Images");
        assert!(ws.is_visible());
        assert!(!workbook.worksheet(1).unwrap().is_visible());

        let a1 = ws.cell("A1").unwrap().unwrap();
        assert_eq!(a1.value.as_string(), Some("=@IMAGE(\"http://x/img.png\")"));
        assert_eq!(a1.style_index, 2);
        assert_eq!(ws.get_value("B1").unwrap(), CellValue::Number(42.5));
        assert_eq!(ws.get_value("C1").unwrap(), CellValue::Boolean(true));

        let a2 = ws.get_value("A2").unwrap();
        assert_eq!(a2.formula_text(), Some("=SUM(B1:B1)"));
        assert_eq!(a2.cached_value(), Some(&CellValue::Number(42.5)));
        let b2 = ws.get_value("B2").unwrap();
        assert_eq!(b2.formula_text(), Some("=\"x\"&\"y\""));
        assert_eq!(b2.cached_value(), Some(&CellValue::string("xy")));
        assert_eq!(ws.get_value("C2").unwrap(), CellValue::Error(CellError::Na));

        assert_eq!(
            ws.get_value("A3").unwrap().as_string(),
            Some(" =@IMAGE('http://x/a.png') ")
        );
        let b3 = ws.cell("B3").unwrap().unwrap();
        assert!(b3.value.is_empty());
        assert_eq!(b3.style_index, 4);

        assert!((ws.row_height(0) - 30.0).abs() < 0.001);
        assert!((ws.row_height(6) - 45.0).abs() < 0.001);
        assert!(ws.is_row_hidden(2));
        assert!((ws.column_width(1) - 20.5).abs() < 0.001);
        assert!((ws.column_width(2) - 20.5).abs() < 0.001);
        assert!(ws.is_column_hidden(4));
        assert!(ws.column_info(1).custom_width);
        assert_eq!(
            ws.column_info(4),
            ColumnInfo {
                width: Some(9.0),
                custom_width: false,
                hidden: true,
                style_index: 0,
            }
        );
        assert_eq!(ws.column_info(7).style_index, 3);
        assert!(!ws.column_info(7).custom_width);
        assert_eq!(ws.columns().len(), 5);
        assert_eq!(ws.merged_regions()[0].to_string(), "D1:E2");
    }

    #[test]
    fn test_shared_formula_dependents_are_expanded() {
        let sheet = r#"<worksheet><sheetData>
<row r="1"><c r="A1"><v>5</v></c><c r="B1"><f t="shared" ref="B1:C2" si="0">A1*2</f><v>10</v></c><c r="C1"><f t="shared" si="0"/><v>20</v></c></row>
<row r="2"><c r="A2"><v>6</v></c><c r="B2"><f t="shared" si="0"/><v>12</v></c><c r="C2"><f t="shared" si="7"/><v>3</v></c></row>
</sheetData></worksheet>"#;

        let workbook = XlsxReader::read(Cursor::new(build_package(sheet, None))).unwrap();
        let ws = workbook.worksheet(0).unwrap();

        assert_eq!(ws.get_value("B1").unwrap().formula_text(), Some("=A1*2"));
        let c1 = ws.get_value("C1").unwrap();
        assert_eq!(c1.formula_text(), Some("=B1*2"));
        assert_eq!(c1.cached_value(), Some(&CellValue::Number(20.0)));
        let b2 = ws.get_value("B2").unwrap();
        assert_eq!(b2.formula_text(), Some("=A2*2"));
        assert_eq!(b2.cached_value(), Some(&CellValue::Number(12.0)));
        // No master for group 7: the cached value stands
        assert_eq!(ws.get_value("C2").unwrap(), CellValue::Number(3.0));
    }

    #[test]
    fn test_read_carried_xml_links_and_pictures() {
        let workbook_xml = r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:mc="http://schemas.openxmlformats.org/markup-compatibility/2006" mc:Ignorable="x15"><bookViews><workbookView activeTab="0"/></bookViews><sheets><sheet name="S" sheetId="1" r:id="rId1"/><sheet name="Hidden" sheetId="2" r:id="rId2"/></sheets><externalReferences><externalReference r:id="rId9"/></externalReferences><definedNames><definedName name="Total">S!$A$1</definedName></definedNames><calcPr calcId="191029"/></workbook>"#;
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:x14ac="http://schemas.microsoft.com/office/spreadsheetml/2009/9/ac"><dimension ref="A1"/><sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews><sheetData><row r="1"><c r="A1"><v>1</v></c></row></sheetData><hyperlinks><hyperlink ref="A1" r:id="rId2"/></hyperlinks><pageSetup orientation="landscape" r:id="rId3"/><drawing r:id="rId1"/><legacyDrawing r:id="rId4"/></worksheet>"#;
        let sheet_rels: &[u8] = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com/a?b=1&amp;c=2" TargetMode="External"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/printerSettings" Target="../printerSettings/printerSettings1.bin"/></Relationships>"#;
        let jpeg: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];
        let images = vec![ImagePlacement::new(CellAddress::new(2, 1), jpeg.to_vec(), 40, 30).unwrap()];
        let drawing = crate::drawing::drawing_xml(&images);
        let drawing_rels: &[u8] = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image1.jpeg"/></Relationships>"#;

        let package = build_package_with(
            workbook_xml,
            sheet,
            None,
            &[
                ("xl/worksheets/_rels/sheet1.xml.rels", sheet_rels),
                ("xl/drawings/drawing1.xml", drawing.as_bytes()),
                ("xl/drawings/_rels/drawing1.xml.rels", drawing_rels),
                ("xl/media/image1.jpeg", jpeg),
            ],
        );
        let workbook = XlsxReader::read(Cursor::new(package)).unwrap();

        let names: Vec<&str> = workbook.carried().elements.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["bookViews", "definedNames", "calcPr"]);
        assert_eq!(
            workbook.carried().element("definedNames").unwrap().xml(),
            r#"<definedNames><definedName name="Total">S!$A$1</definedName></definedNames>"#
        );
        assert!(workbook
            .carried()
            .root_attributes
            .contains(&("mc:Ignorable".to_string(), "x15".to_string())));

        let ws = workbook.worksheet(0).unwrap();
        let carried = ws.carried();
        let names: Vec<&str> = carried.elements.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["sheetViews", "hyperlinks", "pageSetup"]);
        assert_eq!(
            carried.element("pageSetup").unwrap().xml(),
            r#"<pageSetup orientation="landscape"/>"#
        );
        assert_eq!(carried.external_links.len(), 1);
        assert_eq!(carried.external_links[0].target, "https://example.com/a?b=1&c=2");
        assert_eq!(
            carried.root_attributes,
            vec![(
                "xmlns:x14ac".to_string(),
                "http://schemas.microsoft.com/office/spreadsheetml/2009/9/ac".to_string()
            )]
        );

        assert_eq!(ws.images().len(), 1);
        let picture = &ws.images()[0];
        assert_eq!(picture.anchor(), CellAddress::new(2, 1));
        assert_eq!((picture.width(), picture.height()), (40, 30));
        assert_eq!(picture.data(), jpeg);
    }

    #[test]
    fn test_rich_shared_string_concatenates_runs() {
        let sheet = r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>1</v></c></row></sheetData></worksheet>"#;
        let sst = r#"<sst><si><t>first</t></si><si><r><t>rich</t></r><r><t xml:space="preserve"> text</t></r><rPh><t>ignored</t></rPh></si></sst>"#;

        let workbook = XlsxReader::read(Cursor::new(build_package(sheet, Some(sst)))).unwrap();
        let ws = workbook.worksheet(0).unwrap();
        assert_eq!(ws.get_value("A1").unwrap().as_string(), Some("rich text"));
    }

    #[test]
    fn test_missing_content_types_is_invalid() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.start_file("hello.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"hi").unwrap();
            zip.finish().unwrap();
        }
        assert!(matches!(
            XlsxReader::read(Cursor::new(buf)),
            Err(XlsxError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_bad_shared_string_index_is_parse_error() {
        let sheet = r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>9</v></c></row></sheetData></worksheet>"#;
        let result = XlsxReader::read(Cursor::new(build_package(sheet, None)));
        assert!(matches!(result, Err(XlsxError::Parse(_))));
    }
}
