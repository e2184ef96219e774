//! Configuration for a templating run

use crate::address::{MAX_COLUMNS, MAX_ROWS, column_index};
use crate::error::{WorkbookError, WorkbookResult};
use crate::package::validate_sheet_name;
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// What to do when a group's sheet already exists in the workbook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingSheetPolicy {
    /// Leave the existing sheet untouched
    #[default]
    Skip,
    /// Replace the existing sheet's content with a fresh template copy
    Overwrite,
    /// Abort the run
    Error,
}

/// Which sheets receive pivot columns, and in which order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOrder {
    /// The configured group list, in configured order
    #[default]
    Groups,
    /// Every sheet of the workbook, in workbook order
    Workbook,
}

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplaterConfig {
    /// Workbook to process
    pub file: PathBuf,
    /// Where to save the result (in place when unset)
    pub output: Option<PathBuf>,
    pub template_sheet: String,
    pub pivot_sheet: String,
    /// Sheet that is never modified (empty string disables it)
    pub hidden_sheet: Option<String>,
    /// First harvested row (1-based, inclusive)
    pub start_row: u32,
    /// Upper row bound (exclusive)
    pub max_row: u32,
    /// Pivot column holding the template formulas
    #[serde(deserialize_with = "deserialize_column")]
    pub source_column: u32,
    /// First pivot column written for the groups
    #[serde(deserialize_with = "deserialize_column")]
    pub start_column: u32,
    /// Row receiving the group label of each pivot column
    pub header_row: u32,
    pub groups: Vec<String>,
    pub on_existing: ExistingSheetPolicy,
    pub target_order: TargetOrder,
}

impl Default for TemplaterConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("test.xlsx"),
            output: None,
            template_sheet: "template".to_string(),
            pivot_sheet: "s".to_string(),
            hidden_sheet: Some("valid".to_string()),
            start_row: 1,
            max_row: 2074,
            source_column: 8,
            start_column: 9,
            header_row: 2,
            groups: ["kg1", "kg2", "kg3", "kg4", "kg5"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            on_existing: ExistingSheetPolicy::default(),
            target_order: TargetOrder::default(),
        }
    }
}

impl TemplaterConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: TemplaterConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// The hidden sheet name, if one is configured
    pub fn hidden_sheet(&self) -> Option<&str> {
        self.hidden_sheet.as_deref().filter(|name| !name.is_empty())
    }

    /// Whether `name` is the template, pivot or hidden sheet
    pub fn is_reserved(&self, name: &str) -> bool {
        name == self.template_sheet || name == self.pivot_sheet || self.hidden_sheet() == Some(name)
    }

    /// Rows scanned by the harvester
    pub fn harvest_rows(&self) -> Range<u32> {
        self.start_row..self.max_row
    }

    /// Path the workbook is saved to
    pub fn output_path(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.file)
    }

    /// Check bounds, sheet names and the group list
    pub fn validate(&self) -> WorkbookResult<()> {
        if self.start_row < 1 {
            return Err(config_error("start_row must be at least 1"));
        }
        if self.max_row <= self.start_row {
            return Err(config_error(format!(
                "max_row ({}) must be greater than start_row ({})",
                self.max_row, self.start_row
            )));
        }
        // max_row is exclusive
        if self.max_row > MAX_ROWS + 1 {
            return Err(config_error(format!(
                "max_row ({}) exceeds the sheet row limit",
                self.max_row
            )));
        }
        if !(1..=MAX_ROWS).contains(&self.header_row) {
            return Err(config_error(format!(
                "header_row ({}) is outside 1..={}",
                self.header_row, MAX_ROWS
            )));
        }
        for (key, col) in [
            ("source_column", self.source_column),
            ("start_column", self.start_column),
        ] {
            if !(1..=MAX_COLUMNS).contains(&col) {
                return Err(config_error(format!(
                    "{} ({}) is outside 1..={}",
                    key, col, MAX_COLUMNS
                )));
            }
        }

        if self.template_sheet == self.pivot_sheet {
            return Err(config_error(
                "template_sheet and pivot_sheet must be different sheets",
            ));
        }
        validate_sheet_name(&self.template_sheet)?;
        validate_sheet_name(&self.pivot_sheet)?;

        let mut seen = HashSet::new();
        for group in &self.groups {
            validate_sheet_name(group)?;
            if !seen.insert(group.to_lowercase()) {
                return Err(config_error(format!("Duplicate group name '{}'", group)));
            }
        }

        Ok(())
    }
}

/// Parse a column given either as a 1-based number or as letters
pub fn parse_column(value: &str) -> Option<u32> {
    match value.trim().parse::<u32>() {
        Ok(index) => Some(index),
        Err(_) => column_index(value.trim()),
    }
}

fn config_error(message: impl Into<String>) -> WorkbookError {
    WorkbookError::Config(message.into())
}

fn deserialize_column<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Column {
        Index(u32),
        Letters(String),
    }

    match Column::deserialize(deserializer)? {
        Column::Index(index) => Ok(index),
        Column::Letters(letters) => column_index(&letters)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid column '{}'", letters))),
    }
}
