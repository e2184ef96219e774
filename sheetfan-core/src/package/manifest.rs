//! Package manifest parts: workbook.xml, its relationships and content types

use crate::error::{WorkbookError, WorkbookResult};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use std::io::Cursor;

pub const WORKSHEET_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub const CALC_CHAIN_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";
pub const WORKSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";

/// Elements that follow `calcPr` inside `<workbook>`
const CALC_PR_FOLLOWERS: &[&[u8]] = &[
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

/// Visibility of a sheet as declared in workbook.xml
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SheetState {
    Visible,
    Hidden,
    VeryHidden,
}

/// A `<sheet>` entry of workbook.xml
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRecord {
    pub name: String,
    pub sheet_id: u32,
    pub rel_id: String,
    pub state: SheetState,
}

/// A `<Relationship>` entry of a .rels part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
}

/// Parse the `<sheets>` list of workbook.xml, in workbook order
pub fn parse_sheets(part: &str, workbook_xml: &str) -> WorkbookResult<Vec<SheetRecord>> {
    let mut reader = Reader::from_str(workbook_xml);
    let mut sheets = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let mut name = String::new();
                let mut sheet_id = 0;
                let mut rel_id = String::new();
                let mut state = SheetState::Visible;

                for attr in e.attributes() {
                    let attr = attr.map_err(|err| WorkbookError::xml(part, err))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|err| WorkbookError::xml(part, err))?;
                    match attr.key.as_ref() {
                        b"name" => name = value.into_owned(),
                        b"sheetId" => {
                            sheet_id = value.parse().map_err(|_| {
                                WorkbookError::malformed(
                                    part,
                                    format!("invalid sheetId '{}'", value),
                                )
                            })?;
                        }
                        b"state" => {
                            state = match value.as_ref() {
                                "hidden" => SheetState::Hidden,
                                "veryHidden" => SheetState::VeryHidden,
                                _ => SheetState::Visible,
                            };
                        }
                        key if is_relationship_id(key) => rel_id = value.into_owned(),
                        _ => {}
                    }
                }

                if name.is_empty() || rel_id.is_empty() {
                    return Err(WorkbookError::malformed(
                        part,
                        "<sheet> without name or relationship id",
                    ));
                }

                sheets.push(SheetRecord {
                    name,
                    sheet_id,
                    rel_id,
                    state,
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::xml(part, e)),
            _ => {}
        }
    }

    Ok(sheets)
}

/// Parse every `<Relationship>` of a .rels part
pub fn parse_relationships(part: &str, rels_xml: &str) -> WorkbookResult<Vec<Relationship>> {
    let mut reader = Reader::from_str(rels_xml);
    let mut relationships = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut relationship = Relationship {
                    id: String::new(),
                    rel_type: String::new(),
                    target: String::new(),
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| WorkbookError::xml(part, err))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|err| WorkbookError::xml(part, err))?
                        .into_owned();
                    match attr.key.as_ref() {
                        b"Id" => relationship.id = value,
                        b"Type" => relationship.rel_type = value,
                        b"Target" => relationship.target = value,
                        _ => {}
                    }
                }
                relationships.push(relationship);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::xml(part, e)),
            _ => {}
        }
    }

    Ok(relationships)
}

/// First `rIdN` not used by any relationship
pub fn next_relationship_id(relationships: &[Relationship]) -> String {
    (1usize..)
        .map(|n| format!("rId{}", n))
        .find(|id| !relationships.iter().any(|r| &r.id == id))
        .unwrap_or_default()
}

/// Resolve a relationship target of workbook.xml.rels to a zip path
pub fn resolve_workbook_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

/// The .rels part belonging to a part (`xl/worksheets/sheet1.xml` ->
/// `xl/worksheets/_rels/sheet1.xml.rels`)
pub fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Append a `<sheet>` entry to the `<sheets>` list
pub fn append_sheet(
    part: &str,
    workbook_xml: &str,
    name: &str,
    sheet_id: u32,
    rel_id: &str,
) -> WorkbookResult<String> {
    let sheet_id = sheet_id.to_string();
    insert_before_end(part, workbook_xml, b"sheets", |prefix| {
        let mut elem = BytesStart::new(format!("{}sheet", prefix));
        elem.push_attribute(("name", name));
        elem.push_attribute(("sheetId", sheet_id.as_str()));
        elem.push_attribute(("r:id", rel_id));
        elem
    })
}

/// Append a `<Relationship>` to a .rels part
pub fn append_relationship(
    part: &str,
    rels_xml: &str,
    relationship: &Relationship,
) -> WorkbookResult<String> {
    insert_before_end(part, rels_xml, b"Relationships", |prefix| {
        let mut elem = BytesStart::new(format!("{}Relationship", prefix));
        elem.push_attribute(("Id", relationship.id.as_str()));
        elem.push_attribute(("Type", relationship.rel_type.as_str()));
        elem.push_attribute(("Target", relationship.target.as_str()));
        elem
    })
}

/// Add an `<Override>` for a part unless one already exists
pub fn append_override(
    part: &str,
    content_types_xml: &str,
    part_name: &str,
    content_type: &str,
) -> WorkbookResult<String> {
    if override_exists(part, content_types_xml, part_name)? {
        return Ok(content_types_xml.to_string());
    }
    insert_before_end(part, content_types_xml, b"Types", |prefix| {
        let mut elem = BytesStart::new(format!("{}Override", prefix));
        elem.push_attribute(("PartName", part_name));
        elem.push_attribute(("ContentType", content_type));
        elem
    })
}

/// Remove every relationship of the given type
pub fn remove_relationships_of_type(
    part: &str,
    rels_xml: &str,
    rel_type: &str,
) -> WorkbookResult<String> {
    filter_empty_elements(part, rels_xml, b"Relationship", |e| {
        Ok(attribute_value(part, e, b"Type")?.as_deref() != Some(rel_type))
    })
}

/// Remove the `<Override>` of a part
pub fn remove_override(
    part: &str,
    content_types_xml: &str,
    part_name: &str,
) -> WorkbookResult<String> {
    filter_empty_elements(part, content_types_xml, b"Override", |e| {
        Ok(attribute_value(part, e, b"PartName")?.as_deref() != Some(part_name))
    })
}

/// Make the application recalculate every formula when the workbook is opened
pub fn set_full_calc_on_load(part: &str, workbook_xml: &str) -> WorkbookResult<String> {
    let mut reader = Reader::from_str(workbook_xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut depth = 0usize;
    let mut done = false;
    let mut prefix = String::new();

    loop {
        let event = reader.read_event().map_err(|e| WorkbookError::xml(part, e))?;
        match event {
            Event::Empty(e) if !done && depth == 1 && e.local_name().as_ref() == b"calcPr" => {
                let elem = with_attribute(&e, b"fullCalcOnLoad", "1");
                writer.write_event(Event::Empty(elem)).map_err(io_error(part))?;
                done = true;
            }
            Event::Start(e) if !done && depth == 1 && e.local_name().as_ref() == b"calcPr" => {
                let elem = with_attribute(&e, b"fullCalcOnLoad", "1");
                depth += 1;
                writer.write_event(Event::Start(elem)).map_err(io_error(part))?;
                done = true;
            }
            Event::Start(e) => {
                if depth == 0 {
                    prefix = element_prefix(e.name());
                }
                if !done && depth == 1 && CALC_PR_FOLLOWERS.contains(&e.local_name().as_ref()) {
                    write_calc_pr(&mut writer, &prefix, part)?;
                    done = true;
                }
                depth += 1;
                writer.write_event(Event::Start(e)).map_err(io_error(part))?;
            }
            Event::Empty(e) => {
                if !done && depth == 1 && CALC_PR_FOLLOWERS.contains(&e.local_name().as_ref()) {
                    write_calc_pr(&mut writer, &prefix, part)?;
                    done = true;
                }
                writer.write_event(Event::Empty(e)).map_err(io_error(part))?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if !done && depth == 0 {
                    write_calc_pr(&mut writer, &prefix, part)?;
                    done = true;
                }
                writer.write_event(Event::End(e)).map_err(io_error(part))?;
            }
            Event::Eof => break,
            other => writer.write_event(other).map_err(io_error(part))?,
        }
    }

    into_string(part, writer)
}

/// Drop `tabSelected` from every `<sheetView>` of a worksheet
pub fn clear_tab_selected(part: &str, sheet_xml: &str) -> WorkbookResult<String> {
    let mut reader = Reader::from_str(sheet_xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    loop {
        let event = reader.read_event().map_err(|e| WorkbookError::xml(part, e))?;
        match event {
            Event::Start(e) if e.local_name().as_ref() == b"sheetView" => {
                let elem = without_attribute(&e, b"tabSelected");
                writer.write_event(Event::Start(elem)).map_err(io_error(part))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetView" => {
                let elem = without_attribute(&e, b"tabSelected");
                writer.write_event(Event::Empty(elem)).map_err(io_error(part))?;
            }
            Event::Eof => break,
            other => writer.write_event(other).map_err(io_error(part))?,
        }
    }

    into_string(part, writer)
}

// Helper functions

fn is_relationship_id(key: &[u8]) -> bool {
    // r:id, whatever the relationships namespace prefix is
    key.ends_with(b":id")
}

fn element_prefix(name: QName) -> String {
    match name.prefix() {
        Some(prefix) => format!("{}:", String::from_utf8_lossy(prefix.as_ref())),
        None => String::new(),
    }
}

fn io_error<E: Into<quick_xml::Error>>(part: &str) -> impl Fn(E) -> WorkbookError + '_ {
    move |e| WorkbookError::xml(part, e)
}

fn into_string(part: &str, writer: Writer<Cursor<Vec<u8>>>) -> WorkbookResult<String> {
    let result = writer.into_inner().into_inner();
    String::from_utf8(result).map_err(|e| WorkbookError::malformed(part, e.to_string()))
}

fn attribute_value(part: &str, e: &BytesStart, key: &[u8]) -> WorkbookResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| WorkbookError::xml(part, err))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| WorkbookError::xml(part, err))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn without_attribute(e: &BytesStart, key: &[u8]) -> BytesStart<'static> {
    let mut elem = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() != key {
            elem.push_attribute(attr);
        }
    }
    elem
}

fn with_attribute(e: &BytesStart, key: &[u8], value: &str) -> BytesStart<'static> {
    let mut elem = without_attribute(e, key);
    elem.push_attribute((String::from_utf8_lossy(key).as_ref(), value));
    elem
}

fn write_calc_pr(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    prefix: &str,
    part: &str,
) -> WorkbookResult<()> {
    let mut elem = BytesStart::new(format!("{}calcPr", prefix));
    elem.push_attribute(("fullCalcOnLoad", "1"));
    writer.write_event(Event::Empty(elem)).map_err(io_error(part))
}

fn override_exists(part: &str, content_types_xml: &str, part_name: &str) -> WorkbookResult<bool> {
    let mut reader = Reader::from_str(content_types_xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Override" => {
                if attribute_value(part, &e, b"PartName")?.as_deref() == Some(part_name) {
                    return Ok(true);
                }
            }
            Ok(Event::Eof) => return Ok(false),
            Err(e) => return Err(WorkbookError::xml(part, e)),
            _ => {}
        }
    }
}

/// Copy the document, writing `build(prefix)` as an empty element right before
/// the closing tag of `parent`
fn insert_before_end<F>(part: &str, xml: &str, parent: &[u8], build: F) -> WorkbookResult<String>
where
    F: FnOnce(&str) -> BytesStart<'static>,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut build = Some(build);

    loop {
        let event = reader.read_event().map_err(|e| WorkbookError::xml(part, e))?;
        match event {
            Event::End(e) if e.local_name().as_ref() == parent => {
                if let Some(build) = build.take() {
                    let elem = build(&element_prefix(e.name()));
                    writer.write_event(Event::Empty(elem)).map_err(io_error(part))?;
                }
                writer.write_event(Event::End(e)).map_err(io_error(part))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == parent => {
                // <sheets/> has to be opened up to hold the new child
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let prefix = element_prefix(e.name());
                writer
                    .write_event(Event::Start(e.clone()))
                    .map_err(io_error(part))?;
                if let Some(build) = build.take() {
                    writer
                        .write_event(Event::Empty(build(&prefix)))
                        .map_err(io_error(part))?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(name)))
                    .map_err(io_error(part))?;
            }
            Event::Eof => break,
            other => writer.write_event(other).map_err(io_error(part))?,
        }
    }

    if build.is_some() {
        return Err(WorkbookError::malformed(
            part,
            format!("missing <{}> element", String::from_utf8_lossy(parent)),
        ));
    }

    into_string(part, writer)
}

/// Copy the document, dropping empty elements named `element` for which
/// `keep` returns false
fn filter_empty_elements<F>(
    part: &str,
    xml: &str,
    element: &[u8],
    keep: F,
) -> WorkbookResult<String>
where
    F: Fn(&BytesStart) -> WorkbookResult<bool>,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    loop {
        let event = reader.read_event().map_err(|e| WorkbookError::xml(part, e))?;
        match event {
            Event::Empty(e) if e.local_name().as_ref() == element => {
                if keep(&e)? {
                    writer.write_event(Event::Empty(e)).map_err(io_error(part))?;
                }
            }
            Event::Eof => break,
            other => writer.write_event(other).map_err(io_error(part))?,
        }
    }

    into_string(part, writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="template" sheetId="1" r:id="rId1"/><sheet name="s" sheetId="2" r:id="rId2"/><sheet name="valid" sheetId="3" state="hidden" r:id="rId3"/></sheets><definedNames><definedName name="Area">s!$A$1</definedName></definedNames></workbook>"#;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet3.xml"/><Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/></Relationships>"#;

    #[test]
    fn test_parse_sheets() {
        let sheets = parse_sheets("xl/workbook.xml", WORKBOOK).unwrap();
        let names: Vec<_> = sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["template", "s", "valid"]);
        assert_eq!(sheets[1].sheet_id, 2);
        assert_eq!(sheets[1].rel_id, "rId2");
        assert_eq!(sheets[0].state, SheetState::Visible);
        assert_eq!(sheets[2].state, SheetState::Hidden);
    }

    #[test]
    fn test_parse_relationships_and_targets() {
        let rels = parse_relationships("rels", RELS).unwrap();
        assert_eq!(rels.len(), 3);
        assert_eq!(resolve_workbook_target(&rels[0].target), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_workbook_target(&rels[1].target), "xl/worksheets/sheet3.xml");
        assert_eq!(next_relationship_id(&rels), "rId2");
    }

    #[test]
    fn test_rels_part_for() {
        assert_eq!(
            rels_part_for("xl/worksheets/sheet4.xml"),
            "xl/worksheets/_rels/sheet4.xml.rels"
        );
    }

    #[test]
    fn test_append_sheet() {
        let xml = append_sheet("xl/workbook.xml", WORKBOOK, "kg1", 4, "rId10").unwrap();
        let sheets = parse_sheets("xl/workbook.xml", &xml).unwrap();
        assert_eq!(sheets.len(), 4);
        assert_eq!(sheets[3].name, "kg1");
        assert_eq!(sheets[3].sheet_id, 4);
        assert_eq!(sheets[3].rel_id, "rId10");
        // Defined names are untouched
        assert!(xml.contains(r#"<definedName name="Area">s!$A$1</definedName>"#));
    }

    #[test]
    fn test_append_sheet_escapes_name() {
        let xml = append_sheet("xl/workbook.xml", WORKBOOK, "R&D", 4, "rId10").unwrap();
        assert!(xml.contains("R&amp;D"));
        let sheets = parse_sheets("xl/workbook.xml", &xml).unwrap();
        assert_eq!(sheets[3].name, "R&D");
    }

    #[test]
    fn test_remove_relationships_of_type() {
        let xml = remove_relationships_of_type("rels", RELS, CALC_CHAIN_REL_TYPE).unwrap();
        let rels = parse_relationships("rels", &xml).unwrap();
        assert_eq!(rels.len(), 2);
        assert!(rels.iter().all(|r| r.rel_type == WORKSHEET_REL_TYPE));
    }

    #[test]
    fn test_overrides() {
        let types = r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/></Types>"#;

        const SHEET4: &str = "/xl/worksheets/sheet4.xml";
        let added = append_override("ct", types, SHEET4, WORKSHEET_CONTENT_TYPE).unwrap();
        assert!(added.contains(r#"PartName="/xl/worksheets/sheet4.xml""#));

        let again = append_override("ct", &added, SHEET4, WORKSHEET_CONTENT_TYPE).unwrap();
        assert_eq!(again.matches("sheet4.xml").count(), 1);

        let removed = remove_override("ct", &again, "/xl/calcChain.xml").unwrap();
        assert!(!removed.contains("calcChain"));
        assert!(removed.contains("sheet4.xml"));
    }

    #[test]
    fn test_set_full_calc_on_load_inserts() {
        let xml = set_full_calc_on_load("xl/workbook.xml", WORKBOOK).unwrap();
        assert!(xml.contains(r#"</definedNames><calcPr fullCalcOnLoad="1"/></workbook>"#));
    }

    #[test]
    fn test_set_full_calc_on_load_updates_existing() {
        let workbook = r#"<workbook><sheets><sheet name="a" sheetId="1" r:id="rId1"/></sheets><calcPr calcId="191029" fullCalcOnLoad="0"/><extLst/></workbook>"#;
        let xml = set_full_calc_on_load("xl/workbook.xml", workbook).unwrap();
        assert!(xml.contains(r#"<calcPr calcId="191029" fullCalcOnLoad="1"/>"#));
        assert_eq!(xml.matches("calcPr").count(), 1);
    }

    #[test]
    fn test_set_full_calc_on_load_before_followers() {
        let workbook = r#"<workbook><sheets/><extLst><ext uri="x"/></extLst></workbook>"#;
        let xml = set_full_calc_on_load("xl/workbook.xml", workbook).unwrap();
        assert!(xml.contains(r#"<sheets/><calcPr fullCalcOnLoad="1"/><extLst>"#));
    }

    #[test]
    fn test_clear_tab_selected() {
        let sheet = r#"<worksheet><sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews><sheetData/></worksheet>"#;
        let xml = clear_tab_selected("sheet", sheet).unwrap();
        assert!(xml.contains(r#"<sheetView workbookViewId="0"/>"#));
    }
}
