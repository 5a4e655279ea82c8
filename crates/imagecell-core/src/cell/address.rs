//! Cell address and range types

use crate::error::{Error, Result};
use crate::{MAX_COLS, MAX_ROWS};
use std::fmt;
use std::str::FromStr;

/// Location of a single cell.
///
/// Stored 0-based; displayed in A1 notation (column letters A-XFD followed by
/// a 1-based row number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellAddress {
    /// Row index (0-based)
    pub row: u32,
    /// Column index (0-based, A=0)
    pub col: u16,
}

impl CellAddress {
    /// Create a cell address from 0-based indices
    pub fn new(row: u32, col: u16) -> Self {
        Self { row, col }
    }

    /// Parse an A1-style address. `$` markers are accepted and ignored.
    ///
    /// # Examples
    /// ```
    /// use imagecell_core::CellAddress;
    ///
    /// let addr = CellAddress::parse("B2").unwrap();
    /// assert_eq!((addr.row, addr.col), (1, 1));
    ///
    /// let addr = CellAddress::parse("$AA$10").unwrap();
    /// assert_eq!((addr.row, addr.col), (9, 26));
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidAddress("empty address".into()));
        }

        let unmarked: String = s.chars().filter(|c| *c != '$').collect();
        let split = unmarked
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(unmarked.len());
        let (letters, digits) = unmarked.split_at(split);

        if letters.is_empty() {
            return Err(Error::InvalidAddress(format!("no column letters in '{}'", s)));
        }
        if digits.is_empty() {
            return Err(Error::InvalidAddress(format!("no row number in '{}'", s)));
        }

        let col = Self::letters_to_column(letters)?;
        let row: u32 = digits
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("invalid row number in '{}'", s)))?;

        if row == 0 {
            return Err(Error::InvalidAddress(format!(
                "row number must be >= 1 in '{}'",
                s
            )));
        }
        let row = row - 1;
        if row >= MAX_ROWS {
            return Err(Error::RowOutOfBounds(row, MAX_ROWS - 1));
        }

        Ok(Self { row, col })
    }

    /// Convert column index to letters (0 = A, 25 = Z, 26 = AA, etc.)
    pub fn column_to_letters(col: u16) -> String {
        let mut letters = Vec::with_capacity(3);
        let mut n = col as u32 + 1;

        while n > 0 {
            n -= 1;
            letters.push(b'A' + (n % 26) as u8);
            n /= 26;
        }

        letters.iter().rev().map(|&b| b as char).collect()
    }

    /// Convert column letters to index (A = 0, Z = 25, AA = 26, etc.)
    pub fn letters_to_column(letters: &str) -> Result<u16> {
        if letters.is_empty() {
            return Err(Error::InvalidAddress("empty column letters".into()));
        }

        let mut col: u32 = 0;
        for c in letters.chars() {
            if !c.is_ascii_alphabetic() {
                return Err(Error::InvalidAddress(format!(
                    "invalid column letter '{}'",
                    c
                )));
            }
            col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
            if col > MAX_COLS as u32 {
                return Err(Error::ColumnOutOfBounds(
                    col.min(u16::MAX as u32) as u16,
                    MAX_COLS - 1,
                ));
            }
        }

        Ok((col - 1) as u16)
    }

    /// Format as A1-style string
    pub fn to_a1_string(&self) -> String {
        format!("{}{}", Self::column_to_letters(self.col), self.row + 1)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::column_to_letters(self.col), self.row + 1)
    }
}

impl FromStr for CellAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A rectangular block of cells (e.g., "A1:B10"), normalized so `start` is
/// the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    /// Top-left cell
    pub start: CellAddress,
    /// Bottom-right cell
    pub end: CellAddress,
}

impl CellRange {
    /// Create a range from any two corners
    pub fn new(a: CellAddress, b: CellAddress) -> Self {
        Self {
            start: CellAddress::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellAddress::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Create a range from row/column indices
    pub fn from_indices(start_row: u32, start_col: u16, end_row: u32, end_col: u16) -> Self {
        Self::new(
            CellAddress::new(start_row, start_col),
            CellAddress::new(end_row, end_col),
        )
    }

    /// Parse "A1:B10" or a single "C3"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidRange("empty range".into()));
        }

        match s.split_once(':') {
            Some((first, last)) => Ok(Self::new(
                CellAddress::parse(first)?,
                CellAddress::parse(last)?,
            )),
            None => {
                let addr = CellAddress::parse(s)?;
                Ok(Self::new(addr, addr))
            }
        }
    }

    /// Check if a cell is within this range
    pub fn contains(&self, addr: &CellAddress) -> bool {
        (self.start.row..=self.end.row).contains(&addr.row)
            && (self.start.col..=self.end.col).contains(&addr.col)
    }

    /// Check if this range shares any cell with another
    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// Format as "A1:B10" ("A1" for a single cell)
    pub fn to_a1_string(&self) -> String {
        if self.start == self.end {
            self.start.to_a1_string()
        } else {
            format!("{}:{}", self.start, self.end)
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1_string())
    }
}

impl FromStr for CellRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_round_trip_boundaries() {
        assert_eq!(CellAddress::column_to_letters(0), "A");
        assert_eq!(CellAddress::column_to_letters(25), "Z");
        assert_eq!(CellAddress::column_to_letters(26), "AA");
        assert_eq!(CellAddress::column_to_letters(701), "ZZ");
        assert_eq!(CellAddress::column_to_letters(702), "AAA");
        assert_eq!(CellAddress::column_to_letters(16383), "XFD");

        assert_eq!(CellAddress::letters_to_column("a").unwrap(), 0);
        assert_eq!(CellAddress::letters_to_column("AB").unwrap(), 27);
        assert_eq!(CellAddress::letters_to_column("XFD").unwrap(), 16383);
        assert!(CellAddress::letters_to_column("XFE").is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(CellAddress::parse("A1").unwrap(), CellAddress::new(0, 0));
        assert_eq!(CellAddress::parse("b2").unwrap(), CellAddress::new(1, 1));
        assert_eq!(CellAddress::parse("$C$3").unwrap(), CellAddress::new(2, 2));
        assert_eq!(
            CellAddress::parse("XFD1048576").unwrap(),
            CellAddress::new(1_048_575, 16_383)
        );
    }

    #[test]
    fn test_parse_address_errors() {
        assert!(CellAddress::parse("").is_err());
        assert!(CellAddress::parse("A").is_err());
        assert!(CellAddress::parse("1").is_err());
        assert!(CellAddress::parse("A0").is_err());
        assert!(CellAddress::parse("A1048577").is_err());
        assert!(CellAddress::parse("A1B").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(CellAddress::new(0, 0).to_string(), "A1");
        assert_eq!(CellAddress::new(99, 2).to_string(), "C100");
        assert_eq!(CellAddress::new(1, 1).to_a1_string(), "B2");
    }

    #[test]
    fn test_range_parse_and_contains() {
        let range = CellRange::parse("D4:B2").unwrap();
        assert_eq!(range.start, CellAddress::new(1, 1));
        assert_eq!(range.end, CellAddress::new(3, 3));
        assert_eq!(range.to_string(), "B2:D4");

        assert!(range.contains(&CellAddress::new(2, 2)));
        assert!(!range.contains(&CellAddress::new(0, 0)));
        assert!(!range.contains(&CellAddress::new(4, 1)));

        let single = CellRange::parse("C3").unwrap();
        assert_eq!(single.to_string(), "C3");
    }

    #[test]
    fn test_range_overlaps() {
        let a = CellRange::parse("A1:C3").unwrap();
        assert!(a.overlaps(&CellRange::parse("C3:D4").unwrap()));
        assert!(!a.overlaps(&CellRange::parse("D1:E9").unwrap()));
    }
}
