//! Verbatim copies of top-level elements the model does not cover

use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::writer::Writer;

use crate::error::XlsxResult;
use imagecell_core::{CarriedXml, XmlElement};

/// Attributes of the part's root element worth keeping: namespace
/// declarations and markup-compatibility hints
pub(super) fn carry_root_attributes(e: &BytesStart, carried: &mut CarriedXml) {
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" || key == "xmlns:r" {
            continue;
        }
        if !(key.starts_with("xmlns:") || key.starts_with("mc:")) {
            continue;
        }
        if let Ok(value) = attr.unescape_value() {
            carried.root_attributes.push((key, value.into_owned()));
        }
    }
}

/// Copy of one element in progress, fed every event until it closes.
///
/// `r:id` references must resolve to a relationship the output keeps;
/// `pageSetup` loses a dangling printer-settings reference, any other element
/// holding one is dropped.
pub(super) struct ElementCapture {
    name: String,
    depth: usize,
    writer: Writer<Vec<u8>>,
    dangling: Option<String>,
}

impl ElementCapture {
    /// Start a copy if `event` opens an element that `carries` accepts
    pub(super) fn begin(event: &Event, carries: fn(&[u8]) -> bool) -> Option<Self> {
        match event {
            Event::Start(e) | Event::Empty(e) if carries(e.local_name().as_ref()) => {
                Some(Self::new(e))
            }
            _ => None,
        }
    }

    fn new(e: &BytesStart) -> Self {
        Self {
            name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            depth: 0,
            writer: Writer::new(Vec::new()),
            dangling: None,
        }
    }

    /// Copy the next event; `true` once the element is complete
    pub(super) fn feed(
        &mut self,
        event: Event<'_>,
        link_ids: &HashSet<String>,
    ) -> XlsxResult<bool> {
        let event = match event {
            Event::Start(e) => {
                self.depth += 1;
                Event::Start(self.check_links(e, link_ids))
            }
            Event::Empty(e) => Event::Empty(self.check_links(e, link_ids)),
            Event::End(e) => {
                self.depth = self.depth.saturating_sub(1);
                Event::End(e)
            }
            other => other,
        };
        self.writer.write_event(event)?;
        Ok(self.depth == 0)
    }

    fn check_links<'a>(&mut self, e: BytesStart<'a>, link_ids: &HashSet<String>) -> BytesStart<'a> {
        let Some(id) = crate::parts::attr_value(&e, b"r:id") else {
            return e;
        };
        if link_ids.contains(&id) {
            return e;
        }
        if e.local_name().as_ref() == b"pageSetup" {
            let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
            let mut stripped = BytesStart::new(name);
            stripped.extend_attributes(
                e.attributes()
                    .flatten()
                    .filter(|attr| attr.key.as_ref() != b"r:id"),
            );
            return stripped;
        }
        self.dangling.get_or_insert(id);
        e
    }

    /// The finished element, `None` if it referenced a part left behind
    pub(super) fn finish(self) -> Option<XmlElement> {
        if let Some(id) = self.dangling {
            log::debug!("dropping <{}>: relationship {} is not carried", self.name, id);
            return None;
        }
        let xml = String::from_utf8_lossy(&self.writer.into_inner()).into_owned();
        Some(XmlElement::new(self.name, xml))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::reader::Reader;

    fn capture(xml: &str, link_ids: &[&str]) -> Option<XmlElement> {
        let link_ids: HashSet<String> = link_ids.iter().map(|s| s.to_string()).collect();
        let mut reader = Reader::from_str(xml);
        let mut active: Option<ElementCapture> = None;
        loop {
            let event = reader.read_event().unwrap();
            if matches!(event, Event::Eof) {
                return None;
            }
            if active.is_none() {
                active = ElementCapture::begin(&event, |_| true);
            }
            let Some(capture) = active.as_mut() else {
                continue;
            };
            if capture.feed(event, &link_ids).unwrap() {
                return active.take().and_then(ElementCapture::finish);
            }
        }
    }

    #[test]
    fn test_capture_keeps_nested_markup() {
        let xml = r#"<dataValidations count="1"><dataValidation type="list" sqref="A1:A9"><formula1>"a,b"</formula1></dataValidation></dataValidations>"#;
        let element = capture(xml, &[]).unwrap();
        assert_eq!(element.name(), "dataValidations");
        assert_eq!(element.xml(), xml);
    }

    #[test]
    fn test_capture_empty_element() {
        let element = capture(r#"<pageMargins left="0.7" right="0.7"/>"#, &[]).unwrap();
        assert_eq!(element.xml(), r#"<pageMargins left="0.7" right="0.7"/>"#);
    }

    #[test]
    fn test_capture_checks_relationships() {
        let links = r#"<hyperlinks><hyperlink ref="A1" r:id="rId2"/></hyperlinks>"#;
        assert!(capture(links, &["rId2"]).is_some());
        assert!(capture(links, &[]).is_none());

        let setup = capture(r#"<pageSetup orientation="landscape" r:id="rId1"/>"#, &[]).unwrap();
        assert_eq!(setup.xml(), r#"<pageSetup orientation="landscape"/>"#);
    }
}
