//! Sheet duplication: one template copy per group

use crate::config::{ExistingSheetPolicy, TemplaterConfig};
use crate::error::{WorkbookError, WorkbookResult};
use crate::package::{Package, validate_sheet_name};
use serde::Serialize;
use tracing::{debug, info};

/// Outcome of duplicating the template for a list of groups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicationReport {
    /// Sheets added to the workbook, in creation order
    pub created: Vec<String>,
    /// Existing sheets whose content was replaced
    pub overwritten: Vec<String>,
    /// Groups left untouched
    pub skipped: Vec<String>,
}

/// Copy the template sheet once per group name, in order.
///
/// Every name is validated before the first copy is made. Any failure aborts
/// the whole operation; sheets copied before the failure are not removed.
pub fn duplicate_template(
    package: &mut Package,
    config: &TemplaterConfig,
    groups: &[String],
) -> WorkbookResult<DuplicationReport> {
    let template = config.template_sheet.as_str();
    package.sheet(template)?;
    for group in groups {
        validate_sheet_name(group)?;
    }

    let mut report = DuplicationReport::default();
    for group in groups {
        if is_reserved_ignoring_case(config, group) {
            debug!(sheet = %group, "group name matches a reserved sheet, not copying");
            report.skipped.push(group.clone());
            continue;
        }

        let existing = package.find_sheet(group).map(|entry| entry.name.clone());
        match (existing, config.on_existing) {
            (None, _) => {
                package.copy_sheet(template, group)?;
                info!(sheet = %group, "created sheet from template");
                report.created.push(group.clone());
            }
            (Some(existing), ExistingSheetPolicy::Skip) => {
                info!(sheet = %existing, "sheet exists, skipping");
                report.skipped.push(existing);
            }
            (Some(existing), ExistingSheetPolicy::Overwrite) => {
                package.overwrite_sheet(template, &existing)?;
                info!(sheet = %existing, "overwrote sheet with template");
                report.overwritten.push(existing);
            }
            (Some(existing), ExistingSheetPolicy::Error) => {
                return Err(WorkbookError::DuplicateSheet(existing));
            }
        }
    }

    Ok(report)
}

/// Create `count` template copies named `{prefix}1` to `{prefix}{count}`,
/// for building test workbooks
pub fn create_dummy_sheets(
    package: &mut Package,
    template: &str,
    count: usize,
    prefix: &str,
) -> WorkbookResult<Vec<String>> {
    let names: Vec<String> = (1..=count).map(|n| format!("{}{}", prefix, n)).collect();
    for name in &names {
        package.copy_sheet(template, name)?;
    }
    info!(count, prefix, "created dummy sheets");
    Ok(names)
}

fn is_reserved_ignoring_case(config: &TemplaterConfig, name: &str) -> bool {
    let lowered = name.to_lowercase();
    [
        Some(config.template_sheet.as_str()),
        Some(config.pivot_sheet.as_str()),
        config.hidden_sheet(),
    ]
    .into_iter()
    .flatten()
    .any(|reserved| reserved.to_lowercase() == lowered)
}
