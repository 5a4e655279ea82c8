//! Package plumbing shared by the reader and writer
//!
//! Relationship parts, target resolution, and the schema order of the
//! top-level elements in `workbook.xml` and the worksheet parts.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::XlsxResult;

/// Order of the children of `<worksheet>` (CT_Worksheet)
const WORKSHEET_ORDER: &[&str] = &[
    "sheetPr",
    "dimension",
    "sheetViews",
    "sheetFormatPr",
    "cols",
    "sheetData",
    "sheetCalcPr",
    "sheetProtection",
    "protectedRanges",
    "scenarios",
    "autoFilter",
    "sortState",
    "dataConsolidate",
    "customSheetViews",
    "mergeCells",
    "phoneticPr",
    "conditionalFormatting",
    "dataValidations",
    "hyperlinks",
    "printOptions",
    "pageMargins",
    "pageSetup",
    "headerFooter",
    "rowBreaks",
    "colBreaks",
    "customProperties",
    "cellWatches",
    "ignoredErrors",
    "smartTags",
    "drawing",
    "legacyDrawing",
    "legacyDrawingHF",
    "drawingHF",
    "picture",
    "oleObjects",
    "controls",
    "webPublishItems",
    "tableParts",
    "extLst",
];

/// Worksheet children rebuilt from the model instead of carried
const WORKSHEET_MODELED: &[&str] = &["dimension", "cols", "sheetData", "mergeCells", "drawing"];

/// Order of the children of `<workbook>` (CT_Workbook)
const WORKBOOK_ORDER: &[&str] = &[
    "fileVersion",
    "fileSharing",
    "workbookPr",
    "workbookProtection",
    "bookViews",
    "sheets",
    "functionGroups",
    "externalReferences",
    "definedNames",
    "calcPr",
    "oleSize",
    "customWorkbookViews",
    "pivotCaches",
    "smartTagPr",
    "smartTagTypes",
    "webPublishing",
    "fileRecoveryPr",
    "webPublishObjects",
    "extLst",
];

/// Workbook children rebuilt from the model instead of carried
const WORKBOOK_MODELED: &[&str] = &["workbookPr", "sheets"];

/// Position of a worksheet child in document order
pub(crate) fn worksheet_rank(name: &str) -> Option<usize> {
    WORKSHEET_ORDER.iter().position(|n| *n == name)
}

/// Position of a workbook child in document order
pub(crate) fn workbook_rank(name: &str) -> Option<usize> {
    WORKBOOK_ORDER.iter().position(|n| *n == name)
}

/// Worksheet children read verbatim for the output
pub(crate) fn carries_worksheet_element(name: &[u8]) -> bool {
    std::str::from_utf8(name).map_or(false, |name| {
        worksheet_rank(name).is_some() && !WORKSHEET_MODELED.contains(&name)
    })
}

/// Workbook children read verbatim for the output
pub(crate) fn carries_workbook_element(name: &[u8]) -> bool {
    std::str::from_utf8(name).map_or(false, |name| {
        workbook_rank(name).is_some() && !WORKBOOK_MODELED.contains(&name)
    })
}

/// Unescaped value of one attribute
pub(crate) fn attr_value(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

/// One `<Relationship>` of a `.rels` part
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relationship {
    pub id: String,
    pub rel_type: String,
    /// Package path for internal targets, the raw URI for external ones
    pub target: String,
    pub external: bool,
}

impl Relationship {
    /// Relationship type ends with `/suffix`, such as `/worksheet`
    pub fn is(&self, suffix: &str) -> bool {
        self.rel_type.ends_with(suffix)
    }
}

/// `xl/worksheets/sheet1.xml` → `xl/worksheets/_rels/sheet1.xml.rels`
pub(crate) fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Directory holding a part, the base for its relative targets
pub(crate) fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Resolve a relationship target against the directory of its source part
pub(crate) fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(rooted) = target.strip_prefix('/') {
        return rooted.to_string();
    }

    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Parse a relationships part, resolving internal targets against `base_dir`
pub(crate) fn parse_relationships(xml: &[u8], base_dir: &str) -> XlsxResult<Vec<Relationship>> {
    let mut xml_reader = Reader::from_reader(xml);
    xml_reader.trim_text(true);

    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match xml_reader.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attr_value(&e, b"Id");
                let target = attr_value(&e, b"Target");
                let rel_type = attr_value(&e, b"Type");
                let external = attr_value(&e, b"TargetMode").as_deref() == Some("External");

                match (id, target, rel_type) {
                    (Some(id), Some(target), Some(rel_type)) => {
                        let target = if external {
                            target
                        } else {
                            resolve_target(base_dir, &target)
                        };
                        relationships.push(Relationship {
                            id,
                            rel_type,
                            target,
                            external,
                        });
                    }
                    _ => log::warn!("skipping incomplete <Relationship>"),
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("xl", "/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(
            resolve_target("xl/drawings", "../media/image1.jpeg"),
            "xl/media/image1.jpeg"
        );
        assert_eq!(resolve_target("xl/worksheets", "./sheet3.xml"), "xl/worksheets/sheet3.xml");
    }

    #[test]
    fn test_rels_path_and_dir() {
        assert_eq!(
            rels_path_for("xl/worksheets/sheet1.xml"),
            "xl/worksheets/_rels/sheet1.xml.rels"
        );
        assert_eq!(part_dir("xl/drawings/drawing1.xml"), "xl/drawings");
        assert_eq!(part_dir("workbook.xml"), "");
    }

    #[test]
    fn test_parse_relationships() {
        let xml = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com/?a=1&amp;b=2" TargetMode="External"/>
<Relationship Id="rId3" Target="broken.xml"/>
</Relationships>"#;

        let rels = parse_relationships(xml, "xl/worksheets").unwrap();
        assert_eq!(rels.len(), 2);
        assert!(rels[0].is("/drawing"));
        assert_eq!(rels[0].target, "xl/drawings/drawing1.xml");
        assert!(!rels[0].external);
        assert!(rels[1].external);
        assert_eq!(rels[1].target, "https://example.com/?a=1&b=2");
    }

    #[test]
    fn test_element_rules() {
        assert!(carries_worksheet_element(b"dataValidations"));
        assert!(carries_worksheet_element(b"sheetViews"));
        assert!(!carries_worksheet_element(b"sheetData"));
        assert!(!carries_worksheet_element(b"drawing"));
        assert!(!carries_worksheet_element(b"AlternateContent"));
        assert!(carries_workbook_element(b"definedNames"));
        assert!(!carries_workbook_element(b"sheets"));
        assert!(worksheet_rank("hyperlinks") < worksheet_rank("drawing"));
        assert!(workbook_rank("bookViews") < workbook_rank("sheets"));
    }
}
