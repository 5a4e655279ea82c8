//! Cell value types

use std::fmt;
use std::sync::Arc;

/// Represents the value stored in a cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    /// Empty cell (no value)
    #[default]
    Empty,

    /// Boolean value (TRUE/FALSE)
    Boolean(bool),

    /// Numeric value (all numbers stored as f64, including dates)
    Number(f64),

    /// String value
    String(SharedString),

    /// Error value (#VALUE!, #REF!, etc.)
    Error(CellError),

    /// Formula with the result last saved alongside it
    Formula {
        /// Formula text including the leading `=`
        text: String,
        /// Value cached by the application that saved the file
        cached_value: Option<Box<CellValue>>,
    },
}

impl CellValue {
    /// Create a new string value
    pub fn string<S: Into<String>>(s: S) -> Self {
        CellValue::String(SharedString::new(s.into()))
    }

    /// Create a new formula value without a cached result
    pub fn formula<S: Into<String>>(text: S) -> Self {
        CellValue::Formula {
            text: text.into(),
            cached_value: None,
        }
    }

    /// Create a formula carrying the result saved with it
    pub fn formula_with_cached<S: Into<String>>(text: S, cached: CellValue) -> Self {
        CellValue::Formula {
            text: text.into(),
            cached_value: Some(Box::new(cached)),
        }
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Check if the cell contains a formula
    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Formula { .. })
    }

    /// Try to get the value as a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Try to get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the string if this is a plain string cell
    pub fn as_string(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the formula text if this is a formula cell
    pub fn formula_text(&self) -> Option<&str> {
        match self {
            CellValue::Formula { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The text a user would see in the formula bar: string contents or
    /// formula source. `None` for numbers, booleans, errors and empty cells.
    pub fn text(&self) -> Option<&str> {
        self.as_string().or_else(|| self.formula_text())
    }

    /// Cached result of a formula, if one was saved
    pub fn cached_value(&self) -> Option<&CellValue> {
        match self {
            CellValue::Formula {
                cached_value: Some(v),
                ..
            } => Some(v),
            _ => None,
        }
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Boolean(_) => "boolean",
            CellValue::Number(_) => "number",
            CellValue::String(_) => "string",
            CellValue::Error(_) => "error",
            CellValue::Formula { .. } => "formula",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::String(s) => f.write_str(s.as_str()),
            CellValue::Error(e) => write!(f, "{}", e),
            CellValue::Formula { text, .. } => f.write_str(text),
        }
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::string(s)
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::string(s)
    }
}

impl From<CellError> for CellValue {
    fn from(e: CellError) -> Self {
        CellValue::Error(e)
    }
}

/// Excel error values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellError {
    /// #NULL!
    Null,
    /// #DIV/0!
    Div0,
    /// #VALUE!
    Value,
    /// #REF!
    Ref,
    /// #NAME?
    Name,
    /// #NUM!
    Num,
    /// #N/A
    Na,
    /// #GETTING_DATA
    GettingData,
}

impl CellError {
    /// Get the display string for this error
    pub fn as_str(&self) -> &'static str {
        match self {
            CellError::Null => "#NULL!",
            CellError::Div0 => "#DIV/0!",
            CellError::Value => "#VALUE!",
            CellError::Ref => "#REF!",
            CellError::Name => "#NAME?",
            CellError::Num => "#NUM!",
            CellError::Na => "#N/A",
            CellError::GettingData => "#GETTING_DATA",
        }
    }

    /// Parse the text form used in XLSX (`t="e"` cells)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "#NULL!" => Some(CellError::Null),
            "#DIV/0!" => Some(CellError::Div0),
            "#VALUE!" => Some(CellError::Value),
            "#REF!" => Some(CellError::Ref),
            "#NAME?" => Some(CellError::Name),
            "#NUM!" => Some(CellError::Num),
            "#N/A" => Some(CellError::Na),
            "#GETTING_DATA" => Some(CellError::GettingData),
            _ => None,
        }
    }

    /// Decode a BIFF error code (BOOLERR / FORMULA records)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(CellError::Null),
            0x07 => Some(CellError::Div0),
            0x0F => Some(CellError::Value),
            0x17 => Some(CellError::Ref),
            0x1D => Some(CellError::Name),
            0x24 => Some(CellError::Num),
            0x2A => Some(CellError::Na),
            0x2B => Some(CellError::GettingData),
            _ => None,
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference-counted string so repeated shared strings are stored once.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SharedString(Arc<str>);

impl SharedString {
    /// Create a new shared string
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        SharedString(Arc::from(s.as_ref()))
    }

    /// Get the string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the length of the string in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the string is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for SharedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SharedString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SharedString {
    fn from(s: &str) -> Self {
        SharedString::new(s)
    }
}

impl From<String> for SharedString {
    fn from(s: String) -> Self {
        SharedString::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_covers_strings_and_formulas() {
        assert_eq!(CellValue::string("hello").text(), Some("hello"));
        assert_eq!(
            CellValue::formula("=@IMAGE(\"u\")").text(),
            Some("=@IMAGE(\"u\")")
        );
        assert_eq!(CellValue::Number(1.0).text(), None);
        assert_eq!(CellValue::Boolean(true).text(), None);
        assert_eq!(CellValue::Empty.text(), None);
    }

    #[test]
    fn test_cached_value() {
        let v = CellValue::formula_with_cached("=1+1", CellValue::Number(2.0));
        assert_eq!(v.cached_value(), Some(&CellValue::Number(2.0)));
        assert_eq!(v.formula_text(), Some("=1+1"));
        assert!(CellValue::formula("=A1").cached_value().is_none());
    }

    #[test]
    fn test_cell_error_codes() {
        assert_eq!(CellError::parse("#n/a"), Some(CellError::Na));
        assert_eq!(CellError::parse("nope"), None);
        assert_eq!(CellError::from_code(0x07), Some(CellError::Div0));
        assert_eq!(CellError::from_code(0xFF), None);
        assert_eq!(CellError::Ref.to_string(), "#REF!");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(CellValue::from(42), CellValue::Number(42.0));
        assert_eq!(CellValue::from(true).as_bool(), Some(true));
        assert_eq!(CellValue::from("x").as_string(), Some("x"));
        assert_eq!(CellValue::from(CellError::Num).to_string(), "#NUM!");
    }
}
