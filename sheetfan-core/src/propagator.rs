//! Formula propagation into the pivot sheet, one column per target sheet

use crate::address::{CellRef, MAX_COLUMNS, column_letters};
use crate::config::TemplaterConfig;
use crate::error::{WorkbookError, WorkbookResult};
use crate::harvester::FormulaRecord;
use crate::package::Package;
use crate::reader;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// A pivot column filled for one target sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivotColumn {
    pub sheet: String,
    /// Column letters, e.g. `I`
    pub column: String,
}

/// Outcome of a propagation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub columns: Vec<PivotColumn>,
    /// Formula cells written or cleared, labels excluded
    pub cells_written: usize,
    /// Targets that name the pivot, template or hidden sheet
    pub skipped: Vec<String>,
}

/// Replace every occurrence of the template sheet name in a formula
pub fn substitute_sheet_name(formula: &str, template: &str, target: &str) -> String {
    formula.replace(template, target)
}

/// Whether a sheet name must be quoted when referenced from a formula
pub fn needs_quoting(name: &str) -> bool {
    static PLAIN_NAME: OnceLock<Regex> = OnceLock::new();
    let re = PLAIN_NAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("sheet name pattern is valid")
    });
    !re.is_match(name)
}

/// Write the harvested formulas for every target into consecutive pivot
/// columns starting at `config.start_column`.
///
/// The first failed write aborts the pass; cells written before it stay.
pub fn propagate_formulas(
    package: &mut Package,
    records: &[FormulaRecord],
    targets: &[String],
    config: &TemplaterConfig,
) -> WorkbookResult<PropagationReport> {
    let pivot = config.pivot_sheet.as_str();
    let template = config.template_sheet.as_str();
    let mut report = PropagationReport::default();

    let mut qualifying = Vec::with_capacity(targets.len());
    for target in targets {
        if config.is_reserved(target) {
            debug!(sheet = %target, "reserved sheet, not propagating");
            report.skipped.push(target.clone());
        } else {
            qualifying.push(target.as_str());
        }
    }
    check_destination(config, qualifying.len())?;

    if !qualifying.is_empty() {
        let cells = reader::read_sheet_cells(package, pivot)?;
        let expanded = package
            .worksheet_mut(pivot)?
            .expand_shared_formulas(|cell| cells.formula(cell).map(str::to_string))?;
        if expanded > 0 {
            debug!(sheet = pivot, cells = expanded, "expanded shared formulas");
        }
    }

    let mut column = config.start_column;
    for target in qualifying {
        let letters = column_letters(column);
        info!(sheet = target, column = %letters, "propagating formulas");
        if needs_quoting(target) && !needs_quoting(template) {
            warn!(
                sheet = target,
                "sheet name needs quotes in formulas; substituted references will be unquoted"
            );
        }

        for record in records {
            let cell = CellRef::new(column, record.row)?;
            if record.formula.is_empty() {
                package.clear_cell_formula(pivot, cell)?;
            } else {
                let formula = substitute_sheet_name(&record.formula, template, target);
                package.set_cell_formula(pivot, cell, &formula)?;
            }
            report.cells_written += 1;
        }

        package.set_cell_text(pivot, CellRef::new(column, config.header_row)?, target)?;
        report.columns.push(PivotColumn {
            sheet: target.to_string(),
            column: letters,
        });
        column += 1;
    }

    Ok(report)
}

/// The destination columns must fit the sheet and leave the source column alone
fn check_destination(config: &TemplaterConfig, count: usize) -> WorkbookResult<()> {
    if count == 0 {
        return Ok(());
    }
    let first = config.start_column as u64;
    let last = first + count as u64 - 1;
    if last > MAX_COLUMNS as u64 {
        return Err(WorkbookError::Config(format!(
            "{} target columns starting at {} exceed the sheet width",
            count,
            column_letters(config.start_column)
        )));
    }
    if (first..=last).contains(&(config.source_column as u64)) {
        return Err(WorkbookError::Config(format!(
            "destination columns {}..{} overlap the source column {}",
            column_letters(config.start_column),
            column_letters(last as u32),
            column_letters(config.source_column)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_every_occurrence() {
        assert_eq!(
            substitute_sheet_name("=template!A1+template!B1", "template", "kg1"),
            "=kg1!A1+kg1!B1"
        );
        assert_eq!(
            substitute_sheet_name("VLOOKUP(A1,template!A:B,2)", "template", "kg2"),
            "VLOOKUP(A1,kg2!A:B,2)"
        );
        assert_eq!(substitute_sheet_name("SUM(A1:A3)", "template", "kg1"), "SUM(A1:A3)");
        assert_eq!(substitute_sheet_name("", "template", "kg1"), "");
    }

    #[test]
    fn test_needs_quoting() {
        assert!(!needs_quoting("kg1"));
        assert!(!needs_quoting("template"));
        assert!(needs_quoting("kg 1"));
        assert!(needs_quoting("доо1"));
        assert!(needs_quoting("1st"));
    }

    #[test]
    fn test_check_destination() {
        let config = TemplaterConfig::default();
        assert!(check_destination(&config, 0).is_ok());
        assert!(check_destination(&config, 5).is_ok());

        let config = TemplaterConfig {
            start_column: 6,
            ..TemplaterConfig::default()
        };
        assert!(check_destination(&config, 2).is_ok());
        assert!(check_destination(&config, 3).is_err(), "F..H would cover H");

        let config = TemplaterConfig {
            start_column: MAX_COLUMNS,
            ..TemplaterConfig::default()
        };
        assert!(check_destination(&config, 1).is_ok());
        assert!(check_destination(&config, 2).is_err());
    }
}
