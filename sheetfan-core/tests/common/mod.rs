#![allow(dead_code)]

use calamine::{Data, Reader, Xlsx, open_workbook};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// A worksheet of a mock workbook: name, optional state and raw `<sheetData>` content
pub struct MockSheet {
    pub name: &'static str,
    pub state: Option<&'static str>,
    pub rows: String,
}

impl MockSheet {
    pub fn new(name: &'static str, rows: impl Into<String>) -> Self {
        Self {
            name,
            state: None,
            rows: rows.into(),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.state = Some("hidden");
        self
    }
}

pub fn text_cell(reference: &str, text: &str) -> String {
    format!(r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#, reference, text)
}

pub fn formula_cell(reference: &str, formula: &str) -> String {
    format!(r#"<c r="{}"><f>{}</f></c>"#, reference, formula)
}

pub fn row(number: u32, cells: &[String]) -> String {
    format!(r#"<row r="{}">{}</row>"#, number, cells.concat())
}

/// The usual layout: a template, a pivot `s` with formulas in column H and a
/// hidden `valid` sheet
pub fn standard_sheets() -> Vec<MockSheet> {
    vec![
        MockSheet::new(
            "template",
            row(1, &[text_cell("A1", "tpl"), text_cell("B1", "1")]),
        ),
        MockSheet::new(
            "s",
            [
                row(2, &[formula_cell("H2", "template!A2")]),
                row(5, &[formula_cell("H5", "VLOOKUP(A1,template!A:B,2)")]),
                row(6, &[formula_cell("H6", "template!B1+template!C1")]),
                row(7, &[formula_cell("H7", "SUM(A1:A3)")]),
            ]
            .concat(),
        ),
        MockSheet::new("valid", row(1, &[text_cell("A1", "keep")])).hidden(),
    ]
}

// Helper to create a minimal valid XLSX file for testing
pub fn create_mock_xlsx(path: &Path, sheets: &[MockSheet], calc_chain: bool) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    // 1. [Content_Types].xml
    zip.start_file("[Content_Types].xml", options)?;
    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
"#,
    );
    for (i, _) in sheets.iter().enumerate() {
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            i + 1
        ));
    }
    if calc_chain {
        content_types.push_str(
            r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#,
        );
    }
    content_types.push_str("</Types>");
    zip.write_all(content_types.as_bytes())?;

    // 2. _rels/.rels
    zip.start_file("_rels/.rels", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#.as_bytes())?;

    // 3. xl/workbook.xml
    zip.start_file("xl/workbook.xml", options)?;
    let mut workbook_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets>
"#,
    );
    for (i, sheet) in sheets.iter().enumerate() {
        let state = sheet
            .state
            .map(|state| format!(r#" state="{}""#, state))
            .unwrap_or_default();
        workbook_xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}"{} r:id="rId{}"/>"#,
            sheet.name,
            i + 1,
            state,
            i + 1
        ));
    }
    workbook_xml.push_str("</sheets>");
    workbook_xml.push_str(r#"<calcPr calcId="191029"/>"#);
    workbook_xml.push_str("</workbook>");
    zip.write_all(workbook_xml.as_bytes())?;

    // 4. xl/_rels/workbook.xml.rels
    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    let mut rels_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
"#,
    );
    for (i, _) in sheets.iter().enumerate() {
        rels_xml.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            i + 1, i + 1
        ));
    }
    if calc_chain {
        rels_xml.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#,
            sheets.len() + 1
        ));
    }
    rels_xml.push_str("</Relationships>");
    zip.write_all(rels_xml.as_bytes())?;

    // 5. sheets
    for (i, sheet) in sheets.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetViews><sheetView tabSelected="{}" workbookViewId="0"/></sheetViews><sheetData>{}</sheetData></worksheet>"#,
            if i == 0 { 1 } else { 0 },
            sheet.rows
        );
        zip.write_all(xml.as_bytes())?;
    }

    // 6. calculation chain
    if calc_chain {
        zip.start_file("xl/calcChain.xml", options)?;
        zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="H5" i="2"/></calcChain>"#.as_bytes())?;
    }

    zip.finish()?;
    Ok(())
}

/// Sheet names of a saved workbook, as calamine sees them
pub fn sheet_names(path: &Path) -> anyhow::Result<Vec<String>> {
    let excel: Xlsx<_> = open_workbook(path)?;
    Ok(excel.sheet_names())
}

/// Formula at a 1-based (row, col), empty when the cell has none
pub fn formula_at(path: &Path, sheet: &str, row: u32, col: u32) -> anyhow::Result<String> {
    let mut excel: Xlsx<_> = open_workbook(path)?;
    let formulas = excel.worksheet_formula(sheet)?;
    Ok(formulas
        .get_value((row - 1, col - 1))
        .cloned()
        .unwrap_or_default())
}

/// Value at a 1-based (row, col)
pub fn value_at(path: &Path, sheet: &str, row: u32, col: u32) -> anyhow::Result<Data> {
    let mut excel: Xlsx<_> = open_workbook(path)?;
    let range = excel.worksheet_range(sheet)?;
    Ok(range
        .get_value((row - 1, col - 1))
        .cloned()
        .unwrap_or(Data::Empty))
}

/// Raw text of a zip entry, `None` when missing
pub fn zip_entry(path: &Path, name: &str) -> anyhow::Result<Option<String>> {
    let mut zip = zip::ZipArchive::new(File::open(path)?)?;
    let mut entry = match zip.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(Some(content))
}
