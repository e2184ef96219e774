//! Error types for workbook operations

use std::path::PathBuf;
use thiserror::Error;

pub type WorkbookResult<T> = Result<T, WorkbookError>;

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("Failed to open workbook {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Sheet not found: '{0}'")]
    SheetNotFound(String),

    #[error("Sheet already exists: '{0}'")]
    DuplicateSheet(String),

    #[error("Invalid sheet name '{name}': {reason}")]
    InvalidSheetName { name: String, reason: String },

    #[error("Failed to copy sheet '{source_sheet}' to '{target}': {message}")]
    Copy {
        source_sheet: String,
        target: String,
        message: String,
    },

    #[error("Failed to read cells of sheet '{sheet}': {message}")]
    CellRead { sheet: String, message: String },

    #[error("Failed to write cell {sheet}!{cell}: {message}")]
    CellWrite {
        sheet: String,
        cell: String,
        message: String,
    },

    #[error("Malformed package part '{part}': {message}")]
    MalformedPart { part: String, message: String },

    #[error("XML error in '{part}': {source}")]
    Xml {
        part: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Failed to save workbook {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Workbook {0} closed with unsaved changes")]
    UnsavedChanges(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkbookError {
    pub(crate) fn malformed(part: &str, message: impl Into<String>) -> Self {
        WorkbookError::MalformedPart {
            part: part.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn xml(part: &str, source: impl Into<quick_xml::Error>) -> Self {
        WorkbookError::Xml {
            part: part.to_string(),
            source: source.into(),
        }
    }
}
