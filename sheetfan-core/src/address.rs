//! Cell addressing in A1 notation

use crate::error::{WorkbookError, WorkbookResult};
use std::cmp::Ordering;
use std::fmt;

/// Largest column index accepted by Excel (`XFD`)
pub const MAX_COLUMNS: u32 = 16_384;
/// Largest row index accepted by Excel
pub const MAX_ROWS: u32 = 1_048_576;

/// Cell reference with 1-based column and row (e.g. `H5` is column 8, row 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub col: u32,
    pub row: u32,
}

impl CellRef {
    pub fn new(col: u32, row: u32) -> WorkbookResult<Self> {
        if !(1..=MAX_COLUMNS).contains(&col) {
            return Err(WorkbookError::Config(format!(
                "column {} is outside 1..={}",
                col, MAX_COLUMNS
            )));
        }
        if !(1..=MAX_ROWS).contains(&row) {
            return Err(WorkbookError::Config(format!(
                "row {} is outside 1..={}",
                row, MAX_ROWS
            )));
        }
        Ok(Self { col, row })
    }

    /// Parse a reference like `"H5"` or `"$H$5"`
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        let mut letters = String::new();
        let mut digits = String::new();

        for ch in reference.chars().filter(|c| *c != '$') {
            if ch.is_ascii_alphabetic() && digits.is_empty() {
                letters.push(ch);
            } else if ch.is_ascii_digit() && !letters.is_empty() {
                digits.push(ch);
            } else {
                return None;
            }
        }

        let col = column_index(&letters)?;
        let row = digits.parse::<u32>().ok()?;
        Self::new(col, row).ok()
    }

    /// Convert to Excel-style reference (e.g., "H5")
    pub fn to_excel_ref(&self) -> String {
        format!("{}{}", column_letters(self.col), self.row)
    }

    /// Zero-based `(row, col)` position as used by calamine ranges
    pub fn zero_based(&self) -> (u32, u32) {
        (self.row - 1, self.col - 1)
    }
}

impl PartialOrd for CellRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row.cmp(&other.row).then_with(|| self.col.cmp(&other.col))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_excel_ref())
    }
}

/// Convert a 1-based column number to letters (1 -> A, 27 -> AA)
pub fn column_letters(col: u32) -> String {
    let mut result = String::new();
    let mut col = col;
    while col > 0 {
        let rem = (col - 1) % 26;
        result.insert(0, (b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    result
}

/// Convert column letters to a 1-based column number (A -> 1, AA -> 27)
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }

    let mut col = 0u32;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }

    if col > MAX_COLUMNS { None } else { Some(col) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(8), "H");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(702), "ZZ");
        assert_eq!(column_letters(703), "AAA");
        assert_eq!(column_letters(MAX_COLUMNS), "XFD");
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A"), Some(1));
        assert_eq!(column_index("i"), Some(9));
        assert_eq!(column_index("AA"), Some(27));
        assert_eq!(column_index("XFD"), Some(MAX_COLUMNS));
        assert_eq!(column_index("XFE"), None);
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn test_parse_and_display() {
        let cell = CellRef::parse("H5").unwrap();
        assert_eq!(cell, CellRef { col: 8, row: 5 });
        assert_eq!(cell.to_string(), "H5");
        assert_eq!(cell.zero_based(), (4, 7));

        assert_eq!(CellRef::parse("$AB$12"), Some(CellRef { col: 28, row: 12 }));
        assert_eq!(CellRef::parse("5H"), None);
        assert_eq!(CellRef::parse("H0"), None);
        assert_eq!(CellRef::parse("H"), None);
    }

    #[test]
    fn test_ordering_is_row_major() {
        let a = CellRef::new(9, 1).unwrap();
        let b = CellRef::new(1, 2).unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(CellRef::new(0, 1).is_err());
        assert!(CellRef::new(1, 0).is_err());
        assert!(CellRef::new(MAX_COLUMNS + 1, 1).is_err());
        assert!(CellRef::new(1, MAX_ROWS + 1).is_err());
    }
}
