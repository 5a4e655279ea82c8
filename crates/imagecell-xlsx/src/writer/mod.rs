//! XLSX writer

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::drawing::{drawing_rels_xml, drawing_xml, media_extension, media_format};
use crate::error::XlsxResult;
use crate::parts::{workbook_rank, worksheet_rank};
use imagecell_core::{
    CarriedXml, CellAddress, CellData, CellValue, ColumnInfo, ExternalLink, Workbook, Worksheet,
    DEFAULT_COLUMN_WIDTH,
};

/// Stylesheet written when the workbook carries none from its source:
/// one font, the two mandatory fills, one border and a single cell format.
const DEFAULT_STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
    <fonts count="1"><font><sz val="11"/><name val="Calibri"/><family val="2"/></font></fonts>
    <fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>
    <borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
    <cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
    <cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>
    <cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>
</styleSheet>"#;

/// Where a sheet's drawing and media parts land in the package
#[derive(Debug, Clone, Copy)]
struct SheetDrawing {
    /// 1-based drawing part number
    drawing: usize,
    /// 1-based media number of the sheet's first image
    first_media: usize,
}

/// Drawing numbering for every sheet, computed once before writing
struct PackageLayout {
    drawings: Vec<Option<SheetDrawing>>,
}

impl PackageLayout {
    fn plan(workbook: &Workbook) -> Self {
        let mut next_drawing = 1;
        let mut next_media = 1;
        let drawings = workbook
            .worksheets()
            .map(|sheet| {
                if sheet.images().is_empty() {
                    return None;
                }
                let planned = SheetDrawing {
                    drawing: next_drawing,
                    first_media: next_media,
                };
                next_drawing += 1;
                next_media += sheet.images().len();
                Some(planned)
            })
            .collect();
        Self { drawings }
    }

    fn has_media(&self) -> bool {
        self.drawings.iter().any(Option::is_some)
    }

    fn drawing_numbers(&self) -> impl Iterator<Item = usize> + '_ {
        self.drawings.iter().flatten().map(|d| d.drawing)
    }
}

/// Media extensions in use, each with its content type, in first-use order
fn media_defaults(workbook: &Workbook) -> Vec<(&'static str, &'static str)> {
    let mut defaults: Vec<(&'static str, &'static str)> = Vec::new();
    for image in workbook.worksheets().flat_map(|sheet| sheet.images()) {
        let format = media_format(image.data()).unwrap_or(("png", "image/png"));
        if !defaults.contains(&format) {
            defaults.push(format);
        }
    }
    defaults
}

/// First `rIdN` not taken by a carried relationship
fn free_relationship_id(carried: &CarriedXml) -> String {
    (1..)
        .map(|n| format!("rId{}", n))
        .find(|id| carried.link_ids().all(|taken| taken != id.as_str()))
        .unwrap_or_else(|| "rId1".to_string())
}

/// XLSX file writer
pub struct XlsxWriter;

impl XlsxWriter {
    /// Write a workbook to a file path
    pub fn write_file<P: AsRef<Path>>(workbook: &Workbook, path: P) -> XlsxResult<()> {
        let file = File::create(path)?;
        Self::write(workbook, file)
    }

    /// Serialize a workbook into an in-memory XLSX package
    pub fn write_to_vec(workbook: &Workbook) -> XlsxResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        Self::write(workbook, &mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Write a workbook to a writer
    pub fn write<W: Write + Seek>(workbook: &Workbook, writer: W) -> XlsxResult<()> {
        let mut zip = ZipWriter::new(writer);
        let layout = PackageLayout::plan(workbook);
        // Style indices only mean something next to the stylesheet they came from
        let keep_styles = workbook.styles_part().is_some();

        Self::write_content_types(&mut zip, workbook, &layout)?;
        Self::write_root_rels(&mut zip)?;
        Self::write_workbook_xml(&mut zip, workbook)?;
        Self::write_workbook_rels(&mut zip, workbook)?;
        Self::write_styles_xml(&mut zip, workbook)?;
        if let Some(theme) = workbook.theme_part() {
            Self::write_part(&mut zip, "xl/theme/theme1.xml", theme)?;
        }

        for (i, sheet) in workbook.worksheets().enumerate() {
            let drawing = layout.drawings.get(i).copied().flatten();
            let drawing_id = drawing.map(|_| free_relationship_id(sheet.carried()));
            Self::write_worksheet(&mut zip, sheet, i, drawing_id.as_deref(), keep_styles)?;

            let drawing_rel = drawing_id.as_deref().zip(drawing.map(|d| d.drawing));
            let links = &sheet.carried().external_links;
            if drawing_rel.is_some() || !links.is_empty() {
                Self::write_worksheet_rels(&mut zip, i, drawing_rel, links)?;
            }
            if let Some(drawing) = drawing {
                Self::write_drawing(&mut zip, sheet, drawing)?;
            }
        }

        zip.finish()?;
        Ok(())
    }

    fn write_part<W: Write + Seek>(
        zip: &mut ZipWriter<W>,
        name: &str,
        content: &[u8],
    ) -> XlsxResult<()> {
        zip.start_file(name, SimpleFileOptions::default())?;
        zip.write_all(content)?;
        Ok(())
    }

    fn write_content_types<W: Write + Seek>(
        zip: &mut ZipWriter<W>,
        workbook: &Workbook,
        layout: &PackageLayout,
    ) -> XlsxResult<()> {
        let mut content = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
    <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
    <Default Extension="xml" ContentType="application/xml"/>"#,
        );

        if layout.has_media() {
            for (extension, content_type) in media_defaults(workbook) {
                content.push_str(&format!(
                    r#"
    <Default Extension="{}" ContentType="{}"/>"#,
                    extension, content_type
                ));
            }
        }

        content.push_str(
            r#"
    <Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
    <Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
        );

        if workbook.theme_part().is_some() {
            content.push_str(
                r#"
    <Override PartName="/xl/theme/theme1.xml" ContentType="application/vnd.openxmlformats-officedocument.theme+xml"/>"#,
            );
        }

        for i in 0..workbook.sheet_count() {
            content.push_str(&format!(
                r#"
    <Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                i + 1
            ));
        }

        for n in layout.drawing_numbers() {
            content.push_str(&format!(
                r#"
    <Override PartName="/xl/drawings/drawing{}.xml" ContentType="application/vnd.openxmlformats-officedocument.drawing+xml"/>"#,
                n
            ));
        }

        content.push_str("\n</Types>");
        Self::write_part(zip, "[Content_Types].xml", content.as_bytes())
    }

    fn write_root_rels<W: Write + Seek>(zip: &mut ZipWriter<W>) -> XlsxResult<()> {
        let content = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
    <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#;
        Self::write_part(zip, "_rels/.rels", content.as_bytes())
    }

    fn write_workbook_xml<W: Write + Seek>(
        zip: &mut ZipWriter<W>,
        workbook: &Workbook,
    ) -> XlsxResult<()> {
        let carried = workbook.carried();
        let mut content = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"{}>"#,
            Self::root_attributes(carried)
        );

        let mut elements: Vec<(usize, String)> = carried
            .elements
            .iter()
            .map(|e| (Self::rank(workbook_rank, e.name()), e.xml().to_string()))
            .collect();

        if workbook.settings().date_1904 {
            elements.push((
                Self::rank(workbook_rank, "workbookPr"),
                "<workbookPr date1904=\"1\"/>".to_string(),
            ));
        }

        let mut sheets = String::from("<sheets>");
        for (i, sheet) in workbook.worksheets().enumerate() {
            let state = if sheet.is_visible() {
                ""
            } else {
                r#" state="hidden""#
            };
            sheets.push_str(&format!(
                r#"
        <sheet name="{}" sheetId="{}"{} r:id="rId{}"/>"#,
                Self::escape_xml(sheet.name()),
                i + 1,
                state,
                i + 1
            ));
        }
        sheets.push_str("\n    </sheets>");
        elements.push((Self::rank(workbook_rank, "sheets"), sheets));

        elements.sort_by_key(|(rank, _)| *rank);
        for (_, xml) in elements {
            content.push_str("\n    ");
            content.push_str(&xml);
        }
        content.push_str("\n</workbook>");

        Self::write_part(zip, "xl/workbook.xml", content.as_bytes())
    }

    /// Schema position of a top-level element; unknown names go last
    fn rank(rank_of: fn(&str) -> Option<usize>, name: &str) -> usize {
        rank_of(name).unwrap_or(usize::MAX)
    }

    /// Carried root attributes, each with a leading space
    fn root_attributes(carried: &CarriedXml) -> String {
        carried
            .root_attributes
            .iter()
            .map(|(key, value)| format!(" {}=\"{}\"", key, Self::escape_xml(value)))
            .collect()
    }

    fn write_workbook_rels<W: Write + Seek>(
        zip: &mut ZipWriter<W>,
        workbook: &Workbook,
    ) -> XlsxResult<()> {
        let mut content = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );

        let sheet_count = workbook.sheet_count();
        for i in 0..sheet_count {
            content.push_str(&format!(
                r#"
    <Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i + 1,
                i + 1
            ));
        }

        content.push_str(&format!(
            r#"
    <Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
            sheet_count + 1
        ));

        if workbook.theme_part().is_some() {
            content.push_str(&format!(
                r#"
    <Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme" Target="theme/theme1.xml"/>"#,
                sheet_count + 2
            ));
        }

        content.push_str("\n</Relationships>");
        Self::write_part(zip, "xl/_rels/workbook.xml.rels", content.as_bytes())
    }

    fn write_styles_xml<W: Write + Seek>(
        zip: &mut ZipWriter<W>,
        workbook: &Workbook,
    ) -> XlsxResult<()> {
        let styles = workbook
            .styles_part()
            .unwrap_or(DEFAULT_STYLES_XML.as_bytes());
        Self::write_part(zip, "xl/styles.xml", styles)
    }

    fn write_worksheet<W: Write + Seek>(
        zip: &mut ZipWriter<W>,
        sheet: &Worksheet,
        index: usize,
        drawing_id: Option<&str>,
        keep_styles: bool,
    ) -> XlsxResult<()> {
        let carried = sheet.carried();
        let mut content = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"{}>"#,
            Self::root_attributes(carried)
        );

        // Top-level elements in schema order: rebuilt ones and carried ones
        let mut elements: Vec<(usize, String)> = carried
            .elements
            .iter()
            .map(|e| (Self::rank(worksheet_rank, e.name()), e.xml().to_string()))
            .collect();

        if let Some(cols) = Self::cols_xml(sheet, keep_styles) {
            elements.push((Self::rank(worksheet_rank, "cols"), cols));
        }
        elements.push((
            Self::rank(worksheet_rank, "sheetData"),
            Self::sheet_data_xml(sheet, keep_styles),
        ));

        let merged_regions = sheet.merged_regions();
        if !merged_regions.is_empty() {
            let mut merges = format!("<mergeCells count=\"{}\">", merged_regions.len());
            for range in merged_regions {
                merges.push_str(&format!("\n        <mergeCell ref=\"{}\"/>", range));
            }
            merges.push_str("\n    </mergeCells>");
            elements.push((Self::rank(worksheet_rank, "mergeCells"), merges));
        }

        if let Some(id) = drawing_id {
            elements.push((
                Self::rank(worksheet_rank, "drawing"),
                format!("<drawing r:id=\"{}\"/>", id),
            ));
        }

        elements.sort_by_key(|(rank, _)| *rank);
        for (_, xml) in elements {
            content.push_str("\n    ");
            content.push_str(&xml);
        }
        content.push_str("\n</worksheet>");

        Self::write_part(
            zip,
            &format!("xl/worksheets/sheet{}.xml", index + 1),
            content.as_bytes(),
        )
    }

    /// `<sheetData>`: rows carrying cells, a custom height, or the hidden flag
    fn sheet_data_xml(sheet: &Worksheet, keep_styles: bool) -> String {
        let mut content = String::from("<sheetData>");

        let rows: BTreeSet<u32> = sheet
            .row_indices()
            .chain(sheet.custom_row_heights().keys().copied())
            .chain(sheet.hidden_rows().iter().copied())
            .collect();

        for row in rows {
            let mut row_attrs = format!("r=\"{}\"", row + 1);
            if let Some(height) = sheet.custom_row_heights().get(&row) {
                row_attrs.push_str(&format!(" ht=\"{}\" customHeight=\"1\"", height));
            }
            if sheet.is_row_hidden(row) {
                row_attrs.push_str(" hidden=\"1\"");
            }

            let mut cells = String::new();
            for (col, cell) in sheet.iter_row(row) {
                Self::write_cell(&mut cells, CellAddress::new(row, col), cell, keep_styles);
            }

            if cells.is_empty() {
                content.push_str(&format!("\n        <row {}/>", row_attrs));
            } else {
                content.push_str(&format!("\n        <row {}>{}\n        </row>", row_attrs, cells));
            }
        }

        content.push_str("\n    </sheetData>");
        content
    }

    /// `<cols>`: one entry per run of adjacent columns with equal settings
    fn cols_xml(sheet: &Worksheet, keep_styles: bool) -> Option<String> {
        let mut runs: Vec<(u16, u16, ColumnInfo)> = Vec::new();
        for (&col, &info) in sheet.columns() {
            match runs.last_mut() {
                Some((_, last, run_info)) if *last + 1 == col && *run_info == info => *last = col,
                _ => runs.push((col, col, info)),
            }
        }
        if runs.is_empty() {
            return None;
        }

        let mut content = String::from("<cols>");
        for (first, last, info) in runs {
            let mut attrs = format!(
                "min=\"{}\" max=\"{}\" width=\"{}\"",
                first + 1,
                last + 1,
                info.width.unwrap_or(DEFAULT_COLUMN_WIDTH)
            );
            if keep_styles && info.style_index != 0 {
                attrs.push_str(&format!(" style=\"{}\"", info.style_index));
            }
            if info.hidden {
                attrs.push_str(" hidden=\"1\"");
            }
            if info.custom_width {
                attrs.push_str(" customWidth=\"1\"");
            }
            content.push_str(&format!("\n        <col {}/>", attrs));
        }
        content.push_str("\n    </cols>");
        Some(content)
    }

    fn write_cell(content: &mut String, addr: CellAddress, cell: &CellData, keep_styles: bool) {
        let style_attr = if keep_styles && cell.style_index != 0 {
            format!(" s=\"{}\"", cell.style_index)
        } else {
            String::new()
        };

        match &cell.value {
            CellValue::Number(n) => {
                content.push_str(&format!(
                    "\n            <c r=\"{}\"{}><v>{}</v></c>",
                    addr, style_attr, n
                ));
            }
            CellValue::String(s) => {
                content.push_str(&format!(
                    "\n            <c r=\"{}\"{} t=\"inlineStr\"><is>{}</is></c>",
                    addr,
                    style_attr,
                    Self::text_element(s.as_str())
                ));
            }
            CellValue::Boolean(b) => {
                content.push_str(&format!(
                    "\n            <c r=\"{}\"{} t=\"b\"><v>{}</v></c>",
                    addr,
                    style_attr,
                    u8::from(*b)
                ));
            }
            CellValue::Error(e) => {
                content.push_str(&format!(
                    "\n            <c r=\"{}\"{} t=\"e\"><v>{}</v></c>",
                    addr,
                    style_attr,
                    Self::escape_xml(e.as_str())
                ));
            }
            CellValue::Formula { text, cached_value } => {
                let formula_text = text.strip_prefix('=').unwrap_or(text);
                let (type_attr, cached) = match cached_value.as_deref() {
                    Some(CellValue::Number(n)) => ("", format!("<v>{}</v>", n)),
                    Some(CellValue::String(s)) => (
                        " t=\"str\"",
                        format!("<v>{}</v>", Self::escape_xml(s.as_str())),
                    ),
                    Some(CellValue::Boolean(b)) => (" t=\"b\"", format!("<v>{}</v>", u8::from(*b))),
                    Some(CellValue::Error(e)) => (" t=\"e\"", format!("<v>{}</v>", e.as_str())),
                    _ => ("", String::new()),
                };
                content.push_str(&format!(
                    "\n            <c r=\"{}\"{}{}><f>{}</f>{}</c>",
                    addr,
                    style_attr,
                    type_attr,
                    Self::escape_xml(formula_text),
                    cached
                ));
            }
            CellValue::Empty => {
                // Style-only cells keep their formatting
                if !style_attr.is_empty() {
                    content.push_str(&format!("\n            <c r=\"{}\"{}/>", addr, style_attr));
                }
            }
        }
    }

    /// Worksheet relationships: the drawing and carried external links
    fn write_worksheet_rels<W: Write + Seek>(
        zip: &mut ZipWriter<W>,
        sheet_index: usize,
        drawing: Option<(&str, usize)>,
        links: &[ExternalLink],
    ) -> XlsxResult<()> {
        let mut content = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );

        if let Some((id, number)) = drawing {
            content.push_str(&format!(
                r#"
    <Relationship Id="{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing{}.xml"/>"#,
                id, number
            ));
        }
        for link in links {
            content.push_str(&format!(
                r#"
    <Relationship Id="{}" Type="{}" Target="{}" TargetMode="External"/>"#,
                Self::escape_xml(&link.id),
                Self::escape_xml(&link.rel_type),
                Self::escape_xml(&link.target)
            ));
        }

        content.push_str("\n</Relationships>");
        Self::write_part(
            zip,
            &format!("xl/worksheets/_rels/sheet{}.xml.rels", sheet_index + 1),
            content.as_bytes(),
        )
    }

    /// Drawing part, its relationships, and one media part per image
    fn write_drawing<W: Write + Seek>(
        zip: &mut ZipWriter<W>,
        sheet: &Worksheet,
        layout: SheetDrawing,
    ) -> XlsxResult<()> {
        let images = sheet.images();

        Self::write_part(
            zip,
            &format!("xl/drawings/drawing{}.xml", layout.drawing),
            drawing_xml(images).as_bytes(),
        )?;
        Self::write_part(
            zip,
            &format!("xl/drawings/_rels/drawing{}.xml.rels", layout.drawing),
            drawing_rels_xml(images, layout.first_media).as_bytes(),
        )?;

        for (i, image) in images.iter().enumerate() {
            Self::write_part(
                zip,
                &format!(
                    "xl/media/image{}.{}",
                    layout.first_media + i,
                    media_extension(image)
                ),
                image.data(),
            )?;
        }

        log::debug!(
            "wrote drawing{} with {} image(s) for sheet '{}'",
            layout.drawing,
            images.len(),
            sheet.name()
        );
        Ok(())
    }

    /// `<t>` element for a string, preserving edge whitespace
    fn text_element(s: &str) -> String {
        let encoded = Self::encode_excel_escapes(s);
        let preserve = s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace);
        if preserve {
            format!("<t xml:space=\"preserve\">{}</t>", Self::escape_xml(&encoded))
        } else {
            format!("<t>{}</t>", Self::escape_xml(&encoded))
        }
    }

    /// Encode characters XML cannot carry as Excel `_xHHHH_` sequences, and
    /// escape literal underscores that would otherwise decode as one.
    fn encode_excel_escapes(s: &str) -> Cow<'_, str> {
        let needs_escape = |rest: &str| {
            rest.len() >= 7
                && rest.as_bytes()[1] == b'x'
                && rest.as_bytes()[2..6].iter().all(u8::is_ascii_hexdigit)
                && rest.as_bytes()[6] == b'_'
        };

        if !s
            .char_indices()
            .any(|(i, c)| Self::is_xml_control(c) || (c == '_' && needs_escape(&s[i..])))
        {
            return Cow::Borrowed(s);
        }

        let mut out = String::with_capacity(s.len() + 8);
        for (i, c) in s.char_indices() {
            if Self::is_xml_control(c) {
                out.push_str(&format!("_x{:04X}_", c as u32));
            } else if c == '_' && needs_escape(&s[i..]) {
                out.push_str("_x005F_");
            } else {
                out.push(c);
            }
        }
        Cow::Owned(out)
    }

    fn is_xml_control(c: char) -> bool {
        c < ' ' && c != '\t' && c != '\n'
    }

    fn escape_xml(s: &str) -> String {
        s.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&apos;")
    }
}
