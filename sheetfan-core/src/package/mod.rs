//! XLSX package: open, edit sheets and cells, save
//!
//! The whole archive is read into memory when the workbook is opened, so no
//! file handle is held while the workbook is edited. Worksheets are parsed
//! on first write and serialized again when the package is written out.

pub mod manifest;
pub mod worksheet;

pub use manifest::SheetState;
pub use worksheet::Worksheet;

use crate::address::CellRef;
use crate::error::{WorkbookError, WorkbookResult};
use anyhow::{Context, Result};
use manifest::Relationship;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// Characters Excel does not accept in sheet names
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const MAX_SHEET_NAME_LEN: usize = 31;

/// A sheet of the workbook, in workbook order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    /// Zip path of the worksheet part
    pub part: String,
    pub state: SheetState,
}

/// An open workbook
#[derive(Debug)]
pub struct Package {
    path: PathBuf,
    /// Every zip entry, in archive order
    parts: Vec<(String, Vec<u8>)>,
    sheets: Vec<SheetEntry>,
    /// Worksheets parsed for editing, keyed by part path
    worksheets: HashMap<String, Worksheet>,
    modified: bool,
}

impl Package {
    /// Open an XLSX file
    pub fn open<P: AsRef<Path>>(path: P) -> WorkbookResult<Self> {
        let path = path.as_ref();
        let parts = read_parts(path).map_err(|source| WorkbookError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut package = Self {
            path: path.to_path_buf(),
            parts,
            sheets: Vec::new(),
            worksheets: HashMap::new(),
            modified: false,
        };
        package.sheets = package.read_sheet_list()?;

        info!(
            path = %path.display(),
            sheets = package.sheets.len(),
            "opened workbook"
        );
        Ok(package)
    }

    /// Whether the package has changes that were not saved
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Sheet names in workbook order
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// All sheets in workbook order
    pub fn sheets(&self) -> &[SheetEntry] {
        &self.sheets
    }

    /// Get a sheet by exact name
    pub fn sheet(&self, name: &str) -> WorkbookResult<&SheetEntry> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))
    }

    /// Zero-based position of a sheet in workbook order
    pub fn sheet_index(&self, name: &str) -> WorkbookResult<usize> {
        self.sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))
    }

    /// Find a sheet ignoring case, the way Excel compares sheet names
    pub fn find_sheet(&self, name: &str) -> Option<&SheetEntry> {
        let lowered = name.to_lowercase();
        self.sheets.iter().find(|s| s.name.to_lowercase() == lowered)
    }

    /// Add a new sheet `new_name` holding a copy of `source`, placed last
    pub fn copy_sheet(&mut self, source: &str, new_name: &str) -> WorkbookResult<&SheetEntry> {
        validate_sheet_name(new_name)?;
        if let Some(existing) = self.find_sheet(new_name) {
            return Err(WorkbookError::DuplicateSheet(existing.name.clone()));
        }
        let source_entry = self.sheet(source)?.clone();
        let copy_error = |message: String| WorkbookError::Copy {
            source_sheet: source.to_string(),
            target: new_name.to_string(),
            message,
        };

        let content = self.sheet_copy_content(&source_entry)?;
        let source_rels = self
            .part(&manifest::rels_part_for(&source_entry.part))
            .map(<[u8]>::to_vec);

        let part = self.next_worksheet_part();
        let sheet_id = self.sheets.iter().map(|s| s.sheet_id).max().unwrap_or(0) + 1;

        let rels_xml = self.part_text(WORKBOOK_RELS_PART)?;
        let relationships = manifest::parse_relationships(WORKBOOK_RELS_PART, &rels_xml)?;
        let relationship = Relationship {
            id: manifest::next_relationship_id(&relationships),
            rel_type: manifest::WORKSHEET_REL_TYPE.to_string(),
            target: part
                .strip_prefix("xl/")
                .ok_or_else(|| copy_error(format!("unexpected part path {}", part)))?
                .to_string(),
        };

        let workbook_xml = self.part_text(WORKBOOK_PART)?;
        let workbook_xml = manifest::append_sheet(
            WORKBOOK_PART,
            &workbook_xml,
            new_name,
            sheet_id,
            &relationship.id,
        )?;
        let rels_xml = manifest::append_relationship(WORKBOOK_RELS_PART, &rels_xml, &relationship)?;
        let content_types = self.part_text(CONTENT_TYPES_PART)?;
        let content_types = manifest::append_override(
            CONTENT_TYPES_PART,
            &content_types,
            &format!("/{}", part),
            manifest::WORKSHEET_CONTENT_TYPE,
        )?;

        // Nothing is written before every manifest edit succeeded
        self.set_part(WORKBOOK_PART, workbook_xml.into_bytes());
        self.set_part(WORKBOOK_RELS_PART, rels_xml.into_bytes());
        self.set_part(CONTENT_TYPES_PART, content_types.into_bytes());
        if let Some(rels) = source_rels {
            self.set_part(&manifest::rels_part_for(&part), rels);
        }
        self.set_part(&part, content.into_bytes());

        self.sheets.push(SheetEntry {
            name: new_name.to_string(),
            sheet_id,
            rel_id: relationship.id,
            part,
            state: SheetState::Visible,
        });
        self.modified = true;

        debug!(source, sheet = new_name, "copied sheet");
        let index = self.sheets.len() - 1;
        Ok(&self.sheets[index])
    }

    /// Replace the content of `target` with a copy of `source`; the target
    /// keeps its name and position
    pub fn overwrite_sheet(&mut self, source: &str, target: &str) -> WorkbookResult<()> {
        let source_entry = self.sheet(source)?.clone();
        let target_entry = self.sheet(target)?.clone();
        if source_entry.part == target_entry.part {
            return Err(WorkbookError::Copy {
                source_sheet: source.to_string(),
                target: target.to_string(),
                message: "a sheet cannot be overwritten with itself".to_string(),
            });
        }

        let content = self.sheet_copy_content(&source_entry)?;
        let source_rels = self
            .part(&manifest::rels_part_for(&source_entry.part))
            .map(<[u8]>::to_vec);
        let target_rels = manifest::rels_part_for(&target_entry.part);

        self.set_part(&target_entry.part, content.into_bytes());
        match source_rels {
            Some(rels) => self.set_part(&target_rels, rels),
            None => self.remove_part(&target_rels),
        }
        self.worksheets.remove(&target_entry.part);
        self.modified = true;

        debug!(source, sheet = target, "overwrote sheet");
        Ok(())
    }

    /// Editable worksheet, parsed on first access
    pub fn worksheet_mut(&mut self, name: &str) -> WorkbookResult<&mut Worksheet> {
        let part = self.sheet(name)?.part.clone();
        if !self.worksheets.contains_key(&part) {
            let xml = self.part_text(&part)?;
            let worksheet = Worksheet::parse(&part, &xml)?;
            self.worksheets.insert(part.clone(), worksheet);
        }
        self.worksheets
            .get_mut(&part)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))
    }

    /// Write a formula into a cell
    pub fn set_cell_formula(
        &mut self,
        sheet: &str,
        cell: CellRef,
        formula: &str,
    ) -> WorkbookResult<()> {
        self.worksheet_mut(sheet)
            .map_err(|e| cell_write_error(sheet, cell, e))?
            .set_formula(cell, formula);
        self.modified = true;
        Ok(())
    }

    /// Write a text value into a cell
    pub fn set_cell_text(&mut self, sheet: &str, cell: CellRef, text: &str) -> WorkbookResult<()> {
        self.worksheet_mut(sheet)
            .map_err(|e| cell_write_error(sheet, cell, e))?
            .set_text(cell, text);
        self.modified = true;
        Ok(())
    }

    /// Remove the formula and value of a cell
    pub fn clear_cell_formula(&mut self, sheet: &str, cell: CellRef) -> WorkbookResult<()> {
        self.worksheet_mut(sheet)
            .map_err(|e| cell_write_error(sheet, cell, e))?
            .clear_formula(cell);
        self.modified = true;
        Ok(())
    }

    /// Make the application rebuild every formula value on next open:
    /// request a full calculation and drop the calculation chain
    pub fn refresh_calculation(&mut self) -> WorkbookResult<()> {
        let workbook_xml = self.part_text(WORKBOOK_PART)?;
        let workbook_xml = manifest::set_full_calc_on_load(WORKBOOK_PART, &workbook_xml)?;
        self.set_part(WORKBOOK_PART, workbook_xml.into_bytes());

        if self.part(CALC_CHAIN_PART).is_some() {
            let rels_xml = self.part_text(WORKBOOK_RELS_PART)?;
            let rels_xml = manifest::remove_relationships_of_type(
                WORKBOOK_RELS_PART,
                &rels_xml,
                manifest::CALC_CHAIN_REL_TYPE,
            )?;
            let content_types = self.part_text(CONTENT_TYPES_PART)?;
            let content_types = manifest::remove_override(
                CONTENT_TYPES_PART,
                &content_types,
                &format!("/{}", CALC_CHAIN_PART),
            )?;
            self.set_part(WORKBOOK_RELS_PART, rels_xml.into_bytes());
            self.set_part(CONTENT_TYPES_PART, content_types.into_bytes());
            self.remove_part(CALC_CHAIN_PART);
            debug!("dropped calculation chain");
        }

        self.modified = true;
        Ok(())
    }

    /// Serialize the current state of the package into an in-memory zip
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip_writer = ZipWriter::new(Cursor::new(Vec::new()));
        self.write_parts(&mut zip_writer)?;
        let cursor = zip_writer.finish()?;
        Ok(cursor.into_inner())
    }

    /// Save over the file the workbook was opened from
    pub fn save(&mut self) -> WorkbookResult<()> {
        let path = self.path.clone();
        self.save_as(path)
    }

    /// Save to `path`, replacing it atomically
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> WorkbookResult<()> {
        let path = path.as_ref();
        self.write_file(path).map_err(|source| WorkbookError::Save {
            path: path.to_path_buf(),
            source,
        })?;

        // Fold edited worksheets back into their parts
        let edited: Vec<(String, String)> = self
            .worksheets
            .drain()
            .filter(|(_, worksheet)| worksheet.is_dirty())
            .map(|(part, worksheet)| (part, worksheet.to_xml()))
            .collect();
        for (part, xml) in edited {
            self.set_part(&part, xml.into_bytes());
        }
        self.modified = false;

        info!(path = %path.display(), "saved workbook");
        Ok(())
    }

    /// Release the workbook. Fails if it holds changes that were never saved.
    pub fn close(self) -> WorkbookResult<()> {
        if self.modified {
            return Err(WorkbookError::UnsavedChanges(self.path));
        }
        debug!(path = %self.path.display(), "closed workbook");
        Ok(())
    }

    fn read_sheet_list(&self) -> WorkbookResult<Vec<SheetEntry>> {
        let workbook_xml = self.part_text(WORKBOOK_PART)?;
        let rels_xml = self.part_text(WORKBOOK_RELS_PART)?;
        let records = manifest::parse_sheets(WORKBOOK_PART, &workbook_xml)?;
        let relationships = manifest::parse_relationships(WORKBOOK_RELS_PART, &rels_xml)?;

        records
            .into_iter()
            .map(|record| {
                let relationship = relationships
                    .iter()
                    .find(|r| r.id == record.rel_id)
                    .ok_or_else(|| {
                        WorkbookError::malformed(
                            WORKBOOK_RELS_PART,
                            format!(
                                "no relationship {} for sheet '{}'",
                                record.rel_id, record.name
                            ),
                        )
                    })?;
                Ok(SheetEntry {
                    part: manifest::resolve_workbook_target(&relationship.target),
                    name: record.name,
                    sheet_id: record.sheet_id,
                    rel_id: record.rel_id,
                    state: record.state,
                })
            })
            .collect()
    }

    /// Current XML of a sheet, prepared for use as a copy
    fn sheet_copy_content(&self, entry: &SheetEntry) -> WorkbookResult<String> {
        let xml = match self.worksheets.get(&entry.part) {
            Some(worksheet) => worksheet.to_xml(),
            None => self.part_text(&entry.part)?,
        };
        manifest::clear_tab_selected(&entry.part, &xml)
    }

    fn next_worksheet_part(&self) -> String {
        (1usize..)
            .map(|n| format!("xl/worksheets/sheet{}.xml", n))
            .find(|candidate| self.part(candidate).is_none())
            .unwrap_or_default()
    }

    fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(part, _)| part == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    fn part_text(&self, name: &str) -> WorkbookResult<String> {
        let bytes = self
            .part(name)
            .ok_or_else(|| WorkbookError::malformed(name, "part is missing from the package"))?;
        String::from_utf8(bytes.to_vec()).map_err(|e| WorkbookError::malformed(name, e.to_string()))
    }

    fn set_part(&mut self, name: &str, bytes: Vec<u8>) {
        match self.parts.iter_mut().find(|(part, _)| part == name) {
            Some((_, existing)) => *existing = bytes,
            None => self.parts.push((name.to_string(), bytes)),
        }
    }

    fn remove_part(&mut self, name: &str) {
        self.parts.retain(|(part, _)| part != name);
    }

    fn write_parts<W: Write + Seek>(&self, zip_writer: &mut ZipWriter<W>) -> Result<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, bytes) in &self.parts {
            zip_writer.start_file(name.as_str(), options)?;
            match self.worksheets.get(name) {
                Some(worksheet) if worksheet.is_dirty() => {
                    zip_writer.write_all(worksheet.to_xml().as_bytes())?
                }
                _ => zip_writer.write_all(bytes)?,
            }
        }

        Ok(())
    }

    fn write_file(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .context("Output path has no file name")?;
        let temp_path = path.with_file_name(format!(".{}.sheetfan-tmp", file_name));

        let file = File::create(&temp_path)
            .with_context(|| format!("Failed to create file: {}", temp_path.display()))?;
        let mut zip_writer = ZipWriter::new(BufWriter::new(file));

        let written = self.write_parts(&mut zip_writer).and_then(|_| {
            let mut inner = zip_writer.finish()?;
            inner.flush()?;
            Ok(())
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        fs::rename(&temp_path, path).with_context(|| {
            let _ = fs::remove_file(&temp_path);
            format!("Failed to replace {}", path.display())
        })
    }
}

/// Check a name against Excel's sheet naming rules
pub fn validate_sheet_name(name: &str) -> WorkbookResult<()> {
    let invalid = |reason: &str| WorkbookError::InvalidSheetName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(invalid("name is longer than 31 characters"));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_SHEET_CHARS.contains(c)) {
        return Err(invalid(&format!("character '{}' is not allowed", c)));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(invalid("name cannot start or end with an apostrophe"));
    }
    Ok(())
}

fn cell_write_error(sheet: &str, cell: CellRef, source: WorkbookError) -> WorkbookError {
    WorkbookError::CellWrite {
        sheet: sheet.to_string(),
        cell: cell.to_excel_ref(),
        message: source.to_string(),
    }
}

fn read_parts(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).context("Failed to open zip archive")?;

    let mut parts = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let mut buffer = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buffer)?;
        parts.push((entry.name().to_string(), buffer));
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sheet_name() {
        assert!(validate_sheet_name("kg1").is_ok());
        assert!(validate_sheet_name("доо1").is_ok());
        assert!(validate_sheet_name("Group 1 (north)").is_ok());
        assert!(validate_sheet_name("").is_err());
        assert!(validate_sheet_name("   ").is_err());
        assert!(validate_sheet_name("a/b").is_err());
        assert!(validate_sheet_name("[x]").is_err());
        assert!(validate_sheet_name("'quoted").is_err());
        assert!(validate_sheet_name(&"x".repeat(32)).is_err());
        assert!(validate_sheet_name(&"я".repeat(31)).is_ok());
    }
}
