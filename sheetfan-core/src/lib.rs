//! sheetfan: per-group worksheet templating for XLSX workbooks
//!
//! A template sheet is copied once per group, and the formulas of the pivot
//! sheet's source column are repeated in one pivot column per group with the
//! template's sheet name replaced by the group's.

pub mod address;
pub mod config;
pub mod duplicator;
pub mod error;
pub mod harvester;
pub mod package;
pub mod propagator;
pub mod reader;

pub use address::CellRef;
pub use config::{ExistingSheetPolicy, TargetOrder, TemplaterConfig};
pub use duplicator::DuplicationReport;
pub use error::{WorkbookError, WorkbookResult};
pub use harvester::FormulaRecord;
pub use package::Package;
pub use propagator::PropagationReport;

use package::SheetState;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Result of one templating run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub file: PathBuf,
    /// Where the workbook was saved; `None` on a dry run
    pub output: Option<PathBuf>,
    pub dummy_sheets: Vec<String>,
    pub duplication: DuplicationReport,
    pub harvested: usize,
    pub propagation: PropagationReport,
}

/// Options that change how a run behaves without changing the configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run every stage in memory and skip the save
    pub dry_run: bool,
    /// Number of test sheets to create from the template before duplicating
    pub dummy_sheets: usize,
    pub dummy_prefix: String,
}

/// Prefix of generated test sheets
pub const DEFAULT_DUMMY_PREFIX: &str = "доо";

/// Main templating interface
pub struct Templater {
    config: TemplaterConfig,
}

impl Templater {
    /// Create a templater with the default configuration
    pub fn new() -> Self {
        Self::with_config(TemplaterConfig::default())
    }

    /// Create a templater with a custom configuration
    pub fn with_config(config: TemplaterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TemplaterConfig {
        &self.config
    }

    /// Duplicate, harvest, propagate and save
    pub fn run(&self) -> WorkbookResult<RunSummary> {
        self.run_with(&RunOptions::default())
    }

    pub fn run_with(&self, options: &RunOptions) -> WorkbookResult<RunSummary> {
        self.config.validate()?;
        let mut package = Package::open(&self.config.file)?;

        let outcome = self.run_stages(&mut package, options);

        match (package.close(), &outcome) {
            (Ok(()), _) => {}
            (Err(WorkbookError::UnsavedChanges(_)), Ok(_)) if options.dry_run => {
                debug!("dry run, changes discarded");
            }
            (Err(e), _) => warn!(error = %e, "failed to close workbook"),
        }

        outcome
    }

    fn run_stages(
        &self,
        package: &mut Package,
        options: &RunOptions,
    ) -> WorkbookResult<RunSummary> {
        let config = &self.config;

        let dummy_sheets = if options.dummy_sheets > 0 {
            let prefix = if options.dummy_prefix.is_empty() {
                DEFAULT_DUMMY_PREFIX
            } else {
                options.dummy_prefix.as_str()
            };
            duplicator::create_dummy_sheets(
                package,
                &config.template_sheet,
                options.dummy_sheets,
                prefix,
            )?
        } else {
            Vec::new()
        };

        let duplication = duplicator::duplicate_template(package, config, &config.groups)?;
        info!(
            created = duplication.created.len(),
            overwritten = duplication.overwritten.len(),
            skipped = duplication.skipped.len(),
            "duplicated template"
        );

        let records = harvester::harvest_formulas(package, config)?;
        info!(rows = records.len(), "harvested formulas");

        let targets = self.targets(package, &dummy_sheets);
        let propagation = propagator::propagate_formulas(package, &records, &targets, config)?;
        info!(
            columns = propagation.columns.len(),
            cells = propagation.cells_written,
            "propagated formulas"
        );

        let output = if options.dry_run {
            info!("dry run, workbook not saved");
            None
        } else {
            package.refresh_calculation()?;
            let output = config.output_path().to_path_buf();
            package.save_as(&output)?;
            Some(output)
        };

        Ok(RunSummary {
            file: config.file.clone(),
            output,
            dummy_sheets,
            duplication,
            harvested: records.len(),
            propagation,
        })
    }

    /// Sheets that get a pivot column, in column order. Dummy sheets come
    /// first in group order, as they do in workbook order.
    fn targets(&self, package: &Package, dummy_sheets: &[String]) -> Vec<String> {
        match self.config.target_order {
            TargetOrder::Groups => dummy_sheets
                .iter()
                .chain(&self.config.groups)
                .map(|group| {
                    // Skipped groups may exist under a different case
                    package
                        .find_sheet(group)
                        .map(|entry| entry.name.clone())
                        .unwrap_or_else(|| group.clone())
                })
                .collect(),
            TargetOrder::Workbook => package
                .sheets()
                .iter()
                .filter(|entry| entry.state == SheetState::Visible)
                .map(|entry| entry.name.clone())
                .collect(),
        }
    }
}

impl Default for Templater {
    fn default() -> Self {
        Self::new()
    }
}
