//! Editable model of a worksheet part
//!
//! Only `<sheetData>` is parsed. Everything before and after it is kept as
//! text, and the inner XML of each cell is kept verbatim until the cell is
//! written to.

use crate::address::CellRef;
use crate::error::{WorkbookError, WorkbookResult};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Worksheet {
    part: String,
    /// Namespace prefix used by the part's elements (`""` or `"x:"`)
    prefix: String,
    head: String,
    rows: BTreeMap<u32, Row>,
    tail: String,
    dirty: bool,
}

#[derive(Debug, Clone, Default)]
struct Row {
    attrs: Vec<(String, String)>,
    cells: BTreeMap<u32, CellXml>,
}

#[derive(Debug, Clone, Default)]
struct CellXml {
    attrs: Vec<(String, String)>,
    inner: String,
}

/// Formula element found inside a cell
#[derive(Debug, Clone, PartialEq, Eq)]
struct FormulaXml {
    shared: bool,
    #[cfg_attr(not(test), allow(dead_code))]
    text: String,
}

impl Worksheet {
    /// Parse a worksheet part
    pub fn parse(part: &str, xml: &str) -> WorkbookResult<Self> {
        let mut reader = Reader::from_str(xml);
        let mut head = None;
        let mut tail = None;
        let mut prefix = String::new();
        let mut rows = BTreeMap::new();
        let mut current: Option<(u32, Row)> = None;
        let mut last_row = 0u32;
        let mut last_col = 0u32;

        loop {
            let before = reader.buffer_position() as usize;
            let event = reader.read_event().map_err(|e| WorkbookError::xml(part, e))?;
            let after = reader.buffer_position() as usize;

            match event {
                Event::Start(e) if head.is_none() && e.local_name().as_ref() == b"sheetData" => {
                    prefix = element_prefix(&e);
                    head = Some(xml[..after].to_string());
                }
                Event::Empty(e) if head.is_none() && e.local_name().as_ref() == b"sheetData" => {
                    prefix = element_prefix(&e);
                    head = Some(format!("{}<{}sheetData>", &xml[..before], prefix));
                    tail = Some(format!("</{}sheetData>{}", prefix, &xml[after..]));
                    break;
                }
                Event::End(e) if head.is_some() && e.local_name().as_ref() == b"sheetData" => {
                    tail = Some(xml[before..].to_string());
                    break;
                }
                Event::Start(e) if head.is_some() && e.local_name().as_ref() == b"row" => {
                    let attrs = collect_attributes(part, &e)?;
                    last_row = row_number(&attrs).unwrap_or(last_row + 1);
                    last_col = 0;
                    current = Some((last_row, Row { attrs, cells: BTreeMap::new() }));
                }
                Event::Empty(e) if head.is_some() && e.local_name().as_ref() == b"row" => {
                    let attrs = collect_attributes(part, &e)?;
                    last_row = row_number(&attrs).unwrap_or(last_row + 1);
                    rows.insert(last_row, Row { attrs, cells: BTreeMap::new() });
                }
                Event::End(e) if e.local_name().as_ref() == b"row" => {
                    if let Some((number, row)) = current.take() {
                        rows.insert(number, row);
                    }
                }
                Event::Start(e) if current.is_some() && e.local_name().as_ref() == b"c" => {
                    let attrs = collect_attributes(part, &e)?;
                    let inner = reader
                        .read_text(e.name())
                        .map_err(|err| WorkbookError::xml(part, err))?
                        .into_owned();
                    last_col = column_number(&attrs).unwrap_or(last_col + 1);
                    if let Some((_, row)) = current.as_mut() {
                        row.cells.insert(last_col, CellXml { attrs, inner });
                    }
                }
                Event::Empty(e) if current.is_some() && e.local_name().as_ref() == b"c" => {
                    let attrs = collect_attributes(part, &e)?;
                    last_col = column_number(&attrs).unwrap_or(last_col + 1);
                    if let Some((_, row)) = current.as_mut() {
                        row.cells.insert(last_col, CellXml { attrs, inner: String::new() });
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let head = head.ok_or_else(|| WorkbookError::malformed(part, "missing <sheetData>"))?;
        let tail = tail.ok_or_else(|| WorkbookError::malformed(part, "unterminated <sheetData>"))?;

        Ok(Self {
            part: part.to_string(),
            prefix,
            head,
            rows,
            tail,
            dirty: false,
        })
    }

    /// Whether any cell was written since parsing
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write a formula; a leading `=` is dropped and the cached value discarded
    pub fn set_formula(&mut self, cell: CellRef, formula: &str) {
        let formula = formula.strip_prefix('=').unwrap_or(formula);
        let inner = format!("<{p}f>{}</{p}f>", escape(formula), p = self.prefix);
        let target = self.cell_mut(cell);
        target.attrs.retain(|(key, _)| key != "t" && key != "cm" && key != "vm");
        target.inner = inner;
    }

    /// Write a text value as an inline string
    pub fn set_text(&mut self, cell: CellRef, text: &str) {
        let inner = format!(
            r#"<{p}is><{p}t xml:space="preserve">{}</{p}t></{p}is>"#,
            escape(text),
            p = self.prefix
        );
        let target = self.cell_mut(cell);
        target.attrs.retain(|(key, _)| key != "t" && key != "cm" && key != "vm");
        target.attrs.push(("t".to_string(), "inlineStr".to_string()));
        target.inner = inner;
    }

    /// Remove any formula and value from a cell, keeping its style
    pub fn clear_formula(&mut self, cell: CellRef) {
        let exists = self
            .rows
            .get(&cell.row)
            .is_some_and(|row| row.cells.contains_key(&cell.col));
        if !exists {
            return;
        }
        let target = self.cell_mut(cell);
        target.attrs.retain(|(key, _)| key != "t" && key != "cm" && key != "vm");
        target.inner.clear();
    }

    /// Formula text of a cell, if it holds a plain (non-shared) formula
    #[cfg(test)]
    fn formula(&self, cell: CellRef) -> WorkbookResult<Option<String>> {
        match self.cell(cell) {
            Some(c) => Ok(parse_formula(&self.part, &c.inner)?
                .filter(|f| !f.shared)
                .map(|f| f.text)),
            None => Ok(None),
        }
    }

    /// Text of an inline string cell
    #[cfg(test)]
    fn inline_text(&self, cell: CellRef) -> WorkbookResult<Option<String>> {
        let Some(c) = self.cell(cell) else {
            return Ok(None);
        };
        if !c.attrs.iter().any(|(k, v)| k == "t" && v == "inlineStr") {
            return Ok(None);
        }

        let mut reader = Reader::from_str(&c.inner);
        let mut text = String::new();
        loop {
            match reader.read_event() {
                Ok(Event::Text(t)) => {
                    let unescaped = t.unescape().map_err(|e| WorkbookError::xml(&self.part, e))?;
                    text.push_str(&unescaped);
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(WorkbookError::xml(&self.part, e)),
                _ => {}
            }
        }
        Ok(Some(text))
    }

    /// Rewrite every cell that belongs to a shared formula group as a plain
    /// formula, taking the per-cell text from `formula_at`. Returns the
    /// number of rewritten cells.
    pub fn expand_shared_formulas<F>(&mut self, formula_at: F) -> WorkbookResult<usize>
    where
        F: Fn(CellRef) -> Option<String>,
    {
        let mut shared = Vec::new();
        for (row_number, row) in &self.rows {
            for (col_number, cell) in &row.cells {
                if let Some(formula) = parse_formula(&self.part, &cell.inner)? {
                    if formula.shared {
                        shared.push(CellRef {
                            col: *col_number,
                            row: *row_number,
                        });
                    }
                }
            }
        }

        let mut expanded = 0;
        for cell in shared {
            match formula_at(cell).filter(|text| !text.is_empty()) {
                Some(text) => {
                    self.set_formula(cell, &text);
                    expanded += 1;
                }
                None => {
                    return Err(WorkbookError::malformed(
                        &self.part,
                        format!("shared formula at {} could not be expanded", cell),
                    ));
                }
            }
        }

        Ok(expanded)
    }

    /// Serialize the worksheet back to XML
    pub fn to_xml(&self) -> String {
        let capacity = self.head.len() + self.tail.len() + self.rows.len() * 64;
        let mut out = String::with_capacity(capacity);
        out.push_str(&self.head);

        for row in self.rows.values() {
            out.push('<');
            out.push_str(&self.prefix);
            out.push_str("row");
            push_attributes(&mut out, &row.attrs);
            if row.cells.is_empty() {
                out.push_str("/>");
                continue;
            }
            out.push('>');

            for cell in row.cells.values() {
                out.push('<');
                out.push_str(&self.prefix);
                out.push('c');
                push_attributes(&mut out, &cell.attrs);
                if cell.inner.is_empty() {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    out.push_str(&cell.inner);
                    out.push_str("</");
                    out.push_str(&self.prefix);
                    out.push_str("c>");
                }
            }

            out.push_str("</");
            out.push_str(&self.prefix);
            out.push_str("row>");
        }

        out.push_str(&self.tail);
        out
    }

    fn cell(&self, cell: CellRef) -> Option<&CellXml> {
        self.rows.get(&cell.row)?.cells.get(&cell.col)
    }

    fn cell_mut(&mut self, cell: CellRef) -> &mut CellXml {
        self.dirty = true;
        let row = self.rows.entry(cell.row).or_insert_with(|| Row {
            attrs: vec![("r".to_string(), cell.row.to_string())],
            cells: BTreeMap::new(),
        });
        // spans is only a hint and goes stale once cells are added
        row.attrs.retain(|(key, _)| key != "spans");

        let target = row.cells.entry(cell.col).or_default();
        let reference = cell.to_excel_ref();
        match target.attrs.iter_mut().find(|(key, _)| key == "r") {
            Some((_, value)) => *value = reference,
            None => target.attrs.insert(0, ("r".to_string(), reference)),
        }
        target
    }
}

fn element_prefix(e: &BytesStart) -> String {
    match e.name().prefix() {
        Some(prefix) => format!("{}:", String::from_utf8_lossy(prefix.as_ref())),
        None => String::new(),
    }
}

fn collect_attributes(part: &str, e: &BytesStart) -> WorkbookResult<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| WorkbookError::xml(part, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| WorkbookError::xml(part, err))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}

fn push_attributes(out: &mut String, attrs: &[(String, String)]) {
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape(value.as_str()));
        out.push('"');
    }
}

fn row_number(attrs: &[(String, String)]) -> Option<u32> {
    attrs
        .iter()
        .find(|(key, _)| key == "r")
        .and_then(|(_, value)| value.parse().ok())
}

fn column_number(attrs: &[(String, String)]) -> Option<u32> {
    attrs
        .iter()
        .find(|(key, _)| key == "r")
        .and_then(|(_, value)| CellRef::parse(value))
        .map(|cell| cell.col)
}

/// Find the `<f>` element of a cell's inner XML
fn parse_formula(part: &str, inner: &str) -> WorkbookResult<Option<FormulaXml>> {
    if inner.is_empty() {
        return Ok(None);
    }

    let mut reader = Reader::from_str(inner);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"f" => {
                let shared = is_shared(part, &e)?;
                let text = reader
                    .read_text(e.name())
                    .map_err(|err| WorkbookError::xml(part, err))?;
                let text = quick_xml::escape::unescape(&text)
                    .map_err(|err| WorkbookError::xml(part, err))?
                    .into_owned();
                return Ok(Some(FormulaXml { shared, text }));
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"f" => {
                return Ok(Some(FormulaXml {
                    shared: is_shared(part, &e)?,
                    text: String::new(),
                }));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(WorkbookError::xml(part, e)),
            _ => {}
        }
    }
}

fn is_shared(part: &str, e: &BytesStart) -> WorkbookResult<bool> {
    Ok(collect_attributes(part, e)?
        .iter()
        .any(|(key, value)| key == "t" && value == "shared"))
}
