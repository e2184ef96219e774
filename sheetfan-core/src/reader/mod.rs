//! Cell reader using calamine
//!
//! Reads run against an in-memory snapshot of the package, so they see
//! sheets created earlier in the same run. calamine also resolves shared
//! formulas into per-cell formula text.

use crate::address::CellRef;
use crate::error::{WorkbookError, WorkbookResult};
use crate::package::Package;
use anyhow::{Context, Result};
use calamine::{Data, Range, Reader, Xlsx, open_workbook_from_rs};
use std::io::Cursor;
use tracing::debug;

/// Values and formulas of one sheet
#[derive(Debug, Clone)]
pub struct SheetCells {
    values: Option<Range<Data>>,
    formulas: Range<String>,
}

impl SheetCells {
    /// Formula text of a cell (without leading `=`), if any
    pub fn formula(&self, cell: CellRef) -> Option<&str> {
        self.formulas
            .get_value(cell.zero_based())
            .map(String::as_str)
            .filter(|formula| !formula.is_empty())
    }

    /// Cached value of a cell, formatted for display
    pub fn display_value(&self, cell: CellRef) -> String {
        self.values
            .as_ref()
            .and_then(|range| range.get_value(cell.zero_based()))
            .map(format_value)
            .unwrap_or_default()
    }
}

/// Read one sheet of the package
pub fn read_sheet_cells(package: &Package, sheet: &str) -> WorkbookResult<SheetCells> {
    package.sheet(sheet)?;
    read_from_snapshot(package, sheet).map_err(|e| WorkbookError::CellRead {
        sheet: sheet.to_string(),
        message: format!("{:#}", e),
    })
}

fn read_from_snapshot(package: &Package, sheet: &str) -> Result<SheetCells> {
    let bytes = package.to_bytes().context("Failed to snapshot workbook")?;
    let mut excel: Xlsx<_> =
        open_workbook_from_rs(Cursor::new(bytes)).context("Failed to parse workbook")?;

    // Values are informational; a sheet whose values cannot be read still
    // yields its formulas
    let values = match excel.worksheet_range(sheet) {
        Ok(range) => Some(range),
        Err(e) => {
            debug!(sheet, error = %e, "cached values unavailable");
            None
        }
    };
    let formulas = excel
        .worksheet_formula(sheet)
        .with_context(|| format!("Failed to read formulas of sheet '{}'", sheet))?;

    Ok(SheetCells {
        values,
        formulas,
    })
}

fn format_value(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::String(s) => s.clone(),
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::Error(e) => format!("{:?}", e),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}
