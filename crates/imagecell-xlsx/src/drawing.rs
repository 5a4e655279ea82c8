//! DrawingML parts for embedded pictures
//!
//! Each worksheet with images gets one `xl/drawings/drawingN.xml` holding a
//! `oneCellAnchor` per picture, and a relationships part pointing every
//! anchor at its `xl/media/imageM.<ext>`. Pictures in source drawings are read
//! back from one- and two-cell anchors; charts and shapes are not.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::XlsxResult;
use crate::parts::attr_value;
use imagecell_core::{CellAddress, ImagePlacement};

/// DrawingML length units per screen pixel (96 dpi)
pub(crate) const EMU_PER_PIXEL: u64 = 9525;

/// Convert a pixel length to EMU
pub(crate) fn px_to_emu(px: u32) -> u64 {
    px as u64 * EMU_PER_PIXEL
}

/// Convert an EMU length to whole pixels, never rounding a visible length to 0
pub(crate) fn emu_to_px(emu: u64) -> u32 {
    let px = (emu + EMU_PER_PIXEL / 2) / EMU_PER_PIXEL;
    match px {
        0 if emu > 0 => 1,
        px => px.min(u32::MAX as u64) as u32,
    }
}

/// File extension and content type for an image payload, by signature
pub(crate) fn media_format(data: &[u8]) -> Option<(&'static str, &'static str)> {
    let format = if data.starts_with(b"\x89PNG") {
        ("png", "image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        ("jpeg", "image/jpeg")
    } else if data.starts_with(b"GIF8") {
        ("gif", "image/gif")
    } else if data.starts_with(b"BM") {
        ("bmp", "image/bmp")
    } else if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
        ("tiff", "image/tiff")
    } else {
        return None;
    };
    Some(format)
}

/// Media extension written for an image; converted images are always PNG
pub(crate) fn media_extension(image: &ImagePlacement) -> &'static str {
    media_format(image.data()).map_or("png", |(ext, _)| ext)
}

/// Build `xl/drawings/drawingN.xml` for a sheet's images.
///
/// The n-th image (0-based) references relationship `rId{n+1}`.
pub(crate) fn drawing_xml(images: &[ImagePlacement]) -> String {
    let mut content = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
    );

    for (i, image) in images.iter().enumerate() {
        let anchor = image.anchor();
        let cx = px_to_emu(image.width());
        let cy = px_to_emu(image.height());
        let id = i + 1;

        content.push_str(&format!(
            r#"
    <xdr:oneCellAnchor>
        <xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>
        <xdr:ext cx="{cx}" cy="{cy}"/>
        <xdr:pic>
            <xdr:nvPicPr>
                <xdr:cNvPr id="{id}" name="Image {id}" descr="{cell}"/>
                <xdr:cNvPicPr><a:picLocks noChangeAspect="1"/></xdr:cNvPicPr>
            </xdr:nvPicPr>
            <xdr:blipFill>
                <a:blip r:embed="rId{id}"/>
                <a:stretch><a:fillRect/></a:stretch>
            </xdr:blipFill>
            <xdr:spPr>
                <a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>
                <a:prstGeom prst="rect"><a:avLst/></a:prstGeom>
            </xdr:spPr>
        </xdr:pic>
        <xdr:clientData/>
    </xdr:oneCellAnchor>"#,
            col = anchor.col,
            row = anchor.row,
            cx = cx,
            cy = cy,
            id = id,
            cell = anchor,
        ));
    }

    content.push_str("\n</xdr:wsDr>");
    content
}

/// Build `xl/drawings/_rels/drawingN.xml.rels`.
///
/// `first_media` is the 1-based number of the first image's media part.
pub(crate) fn drawing_rels_xml(images: &[ImagePlacement], first_media: usize) -> String {
    let mut content = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );

    for (i, image) in images.iter().enumerate() {
        content.push_str(&format!(
            r#"
    <Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image{}.{}"/>"#,
            i + 1,
            first_media + i,
            media_extension(image)
        ));
    }

    content.push_str("\n</Relationships>");
    content
}

/// A picture found in a source drawing part
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourcePicture {
    pub anchor: CellAddress,
    /// Relationship id of the image part (`r:embed`)
    pub embed: String,
    pub width_emu: u64,
    pub height_emu: u64,
}

/// Anchor being read
#[derive(Default)]
struct PendingAnchor {
    col: Option<u16>,
    row: Option<u32>,
    size: Option<(u64, u64)>,
    is_picture: bool,
    embed: Option<String>,
}

impl PendingAnchor {
    /// Extent from `xdr:ext` or the picture's `a:ext`, whichever comes first
    fn take_extent(&mut self, e: &BytesStart) {
        if self.size.is_some() {
            return;
        }
        let cx = attr_value(e, b"cx").and_then(|v| v.parse().ok());
        let cy = attr_value(e, b"cy").and_then(|v| v.parse().ok());
        if let (Some(cx), Some(cy)) = (cx, cy) {
            self.size = Some((cx, cy));
        }
    }

    fn into_picture(self) -> Option<SourcePicture> {
        if !self.is_picture {
            log::debug!("skipping drawing anchor without a picture");
            return None;
        }
        match (self.col, self.row, self.size, self.embed) {
            (Some(col), Some(row), Some((cx, cy)), Some(embed)) => Some(SourcePicture {
                anchor: CellAddress::new(row, col),
                embed,
                width_emu: cx,
                height_emu: cy,
            }),
            _ => {
                log::warn!("skipping picture without a cell anchor, extent or image reference");
                None
            }
        }
    }
}

#[derive(Clone, Copy)]
enum AnchorField {
    Col,
    Row,
}

/// Pictures anchored to cells in a source `xl/drawings/drawingN.xml`
pub(crate) fn read_pictures(xml: &[u8]) -> XlsxResult<Vec<SourcePicture>> {
    let mut xml_reader = Reader::from_reader(xml);
    xml_reader.trim_text(true);

    let mut buf = Vec::new();
    let mut pictures = Vec::new();
    let mut anchor: Option<PendingAnchor> = None;
    let mut in_from = false;
    let mut field: Option<AnchorField> = None;

    loop {
        match xml_reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"oneCellAnchor" | b"twoCellAnchor" => anchor = Some(PendingAnchor::default()),
                b"from" => in_from = anchor.is_some(),
                b"col" if in_from => field = Some(AnchorField::Col),
                b"row" if in_from => field = Some(AnchorField::Row),
                b"pic" => {
                    if let Some(pending) = anchor.as_mut() {
                        pending.is_picture = true;
                    }
                }
                b"blip" => {
                    if let Some(pending) = anchor.as_mut() {
                        pending.embed = pending.embed.take().or_else(|| attr_value(&e, b"r:embed"));
                    }
                }
                b"ext" => {
                    if let Some(pending) = anchor.as_mut() {
                        pending.take_extent(&e);
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if let Some(pending) = anchor.as_mut() {
                    match e.local_name().as_ref() {
                        b"ext" => pending.take_extent(&e),
                        b"blip" => {
                            pending.embed =
                                pending.embed.take().or_else(|| attr_value(&e, b"r:embed"));
                        }
                        _ => {}
                    }
                }
            }
            Event::Text(t) => {
                if let (Some(field), Some(pending)) = (field, anchor.as_mut()) {
                    let text = t.unescape()?;
                    match field {
                        AnchorField::Col => pending.col = text.trim().parse().ok(),
                        AnchorField::Row => pending.row = text.trim().parse().ok(),
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"from" => in_from = false,
                b"col" | b"row" => field = None,
                b"oneCellAnchor" | b"twoCellAnchor" => {
                    if let Some(picture) = anchor.take().and_then(PendingAnchor::into_picture) {
                        pictures.push(picture);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(pictures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagecell_core::CellAddress;

    #[test]
    fn test_emu_conversion() {
        assert_eq!(px_to_emu(0), 0);
        assert_eq!(px_to_emu(1), 9525);
        assert_eq!(px_to_emu(200), 1_905_000);
    }

    #[test]
    fn test_drawing_xml_anchors_each_image() {
        let images = vec![
            ImagePlacement::new(CellAddress::new(0, 0), vec![1], 100, 50).unwrap(),
            ImagePlacement::new(CellAddress::new(4, 2), vec![1], 10, 20).unwrap(),
        ];
        let xml = drawing_xml(&images);

        assert_eq!(xml.matches("<xdr:oneCellAnchor>").count(), 2);
        assert!(xml.contains("<xdr:col>2</xdr:col>"));
        assert!(xml.contains("<xdr:row>4</xdr:row>"));
        assert!(xml.contains(r#"<xdr:ext cx="952500" cy="476250"/>"#));
        assert!(xml.contains(r#"r:embed="rId2""#));
        assert!(xml.contains(r#"descr="C5""#));
    }

    #[test]
    fn test_drawing_rels_number_media_globally() {
        let png = vec![0x89, b'P', b'N', b'G'];
        let images = vec![
            ImagePlacement::new(CellAddress::new(0, 0), png.clone(), 1, 1).unwrap(),
            ImagePlacement::new(CellAddress::new(1, 0), png, 1, 1).unwrap(),
        ];
        let rels = drawing_rels_xml(&images, 3);
        assert!(rels.contains(r#"Id="rId1""#));
        assert!(rels.contains("../media/image3.png"));
        assert!(rels.contains("../media/image4.png"));
        assert!(!rels.contains("image5"));
    }

    #[test]
    fn test_media_format_by_signature() {
        assert_eq!(media_format(b"\x89PNG\r\n"), Some(("png", "image/png")));
        assert_eq!(media_format(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(("jpeg", "image/jpeg")));
        assert_eq!(media_format(b"GIF89a"), Some(("gif", "image/gif")));
        assert_eq!(media_format(b"<svg/>"), None);
    }

    #[test]
    fn test_emu_to_px() {
        assert_eq!(emu_to_px(952_500), 100);
        assert_eq!(emu_to_px(9_000), 1);
        assert_eq!(emu_to_px(1), 1);
        assert_eq!(emu_to_px(0), 0);
    }

    #[test]
    fn test_read_pictures_from_anchors() {
        let xml = br#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<xdr:twoCellAnchor editAs="oneCell">
  <xdr:from><xdr:col>3</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>7</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>
  <xdr:to><xdr:col>5</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>12</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to>
  <xdr:pic>
    <xdr:nvPicPr><xdr:cNvPr id="2" name="Logo"/><xdr:cNvPicPr/></xdr:nvPicPr>
    <xdr:blipFill><a:blip r:embed="rId7"><a:extLst><a:ext uri="{28A0092B-C50C-407E-A947-70E740481C1C}"/></a:extLst></a:blip></xdr:blipFill>
    <xdr:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="1905000" cy="952500"/></a:xfrm></xdr:spPr>
  </xdr:pic>
  <xdr:clientData/>
</xdr:twoCellAnchor>
<xdr:twoCellAnchor>
  <xdr:from><xdr:col>0</xdr:col><xdr:row>0</xdr:row></xdr:from>
  <xdr:to><xdr:col>2</xdr:col><xdr:row>2</xdr:row></xdr:to>
  <xdr:graphicFrame><a:graphic/></xdr:graphicFrame>
  <xdr:clientData/>
</xdr:twoCellAnchor>
</xdr:wsDr>"#;

        let images = vec![ImagePlacement::new(CellAddress::new(1, 1), vec![1], 32, 16).unwrap()];
        let written = drawing_xml(&images);
        let pictures = read_pictures(written.as_bytes()).unwrap();
        assert_eq!(
            pictures,
            vec![SourcePicture {
                anchor: CellAddress::new(1, 1),
                embed: "rId1".into(),
                width_emu: px_to_emu(32),
                height_emu: px_to_emu(16),
            }]
        );

        let pictures = read_pictures(xml).unwrap();
        assert_eq!(
            pictures,
            vec![SourcePicture {
                anchor: CellAddress::new(7, 3),
                embed: "rId7".into(),
                width_emu: 1_905_000,
                height_emu: 952_500,
            }]
        );
    }
}
