//! Loading and saving workbooks from raw bytes

use std::io::Cursor;

use imagecell_core::Workbook;
use imagecell_xls::XlsReader;
use imagecell_xlsx::{XlsxReader, XlsxWriter};

use crate::error::{ConvertError, ConvertResult};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const CFB_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Container format of a spreadsheet document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Zipped Office Open XML
    Xlsx,
    /// BIFF8 in an OLE2 compound file
    Xls,
}

impl DocumentFormat {
    /// Identify the container from its leading bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(ZIP_MAGIC) {
            Some(DocumentFormat::Xlsx)
        } else if bytes.starts_with(CFB_MAGIC) {
            Some(DocumentFormat::Xls)
        } else {
            None
        }
    }
}

/// Parse an XLSX or XLS document.
pub fn open_workbook(bytes: &[u8]) -> ConvertResult<Workbook> {
    match DocumentFormat::sniff(bytes) {
        Some(DocumentFormat::Xlsx) => {
            XlsxReader::read(Cursor::new(bytes)).map_err(|e| ConvertError::Parse(e.to_string()))
        }
        Some(DocumentFormat::Xls) => {
            XlsReader::read(Cursor::new(bytes)).map_err(|e| ConvertError::Parse(e.to_string()))
        }
        None => Err(ConvertError::Parse(
            "not an XLSX or XLS document".to_string(),
        )),
    }
}

/// Serialize a workbook as XLSX.
pub fn save_workbook(workbook: &Workbook) -> ConvertResult<Vec<u8>> {
    Ok(XlsxWriter::write_to_vec(workbook)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff() {
        assert_eq!(DocumentFormat::sniff(b"PK\x03\x04rest"), Some(DocumentFormat::Xlsx));
        assert_eq!(DocumentFormat::sniff(CFB_MAGIC), Some(DocumentFormat::Xls));
        assert_eq!(DocumentFormat::sniff(b"name,url\n"), None);
        assert_eq!(DocumentFormat::sniff(b""), None);
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(matches!(open_workbook(b"hello"), Err(ConvertError::Parse(_))));
        assert!(matches!(
            open_workbook(b"PK\x03\x04truncated"),
            Err(ConvertError::Parse(_))
        ));
    }

    #[test]
    fn test_save_then_open() {
        let mut wb = Workbook::new();
        wb.worksheet_mut(0)
            .unwrap()
            .set_cell_value("A1", "hello")
            .unwrap();

        let bytes = save_workbook(&wb).unwrap();
        assert_eq!(DocumentFormat::sniff(&bytes), Some(DocumentFormat::Xlsx));
        let back = open_workbook(&bytes).unwrap();
        assert_eq!(
            back.worksheet(0).unwrap().get_value("A1").unwrap().as_string(),
            Some("hello")
        );
    }
}
