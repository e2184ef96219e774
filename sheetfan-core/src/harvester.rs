//! Formula harvesting from the pivot sheet's source column

use crate::address::CellRef;
use crate::config::TemplaterConfig;
use crate::error::WorkbookResult;
use crate::package::Package;
use crate::reader::{self, SheetCells};
use serde::Serialize;
use std::ops::Range;
use tracing::info;

/// Formula found on one row of the source column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormulaRecord {
    pub row: u32,
    /// Formula text without leading `=`; empty when the cell has none
    pub formula: String,
}

/// Read the pivot sheet's source column over the configured rows
pub fn harvest_formulas(
    package: &Package,
    config: &TemplaterConfig,
) -> WorkbookResult<Vec<FormulaRecord>> {
    let cells = reader::read_sheet_cells(package, &config.pivot_sheet)?;
    harvest_column(&cells, config.source_column, config.harvest_rows())
}

/// One record per row of `rows`, in row order, including rows without a formula
pub fn harvest_column(
    cells: &SheetCells,
    column: u32,
    rows: Range<u32>,
) -> WorkbookResult<Vec<FormulaRecord>> {
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        let address = CellRef::new(column, row)?;
        let value = cells.display_value(address);
        let formula = cells.formula(address).unwrap_or_default().to_string();
        info!(address = %address, value = %value, formula = %formula, "scanned");

        records.push(FormulaRecord { row, formula });
    }

    Ok(records)
}
