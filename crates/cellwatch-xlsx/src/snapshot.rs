use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use cellwatch_model::{CellEntry, CellModel, CellScalar, ExternalRefMap, Sheet};

use crate::cache::SnapshotCache;
use crate::error::SnapshotError;
use crate::external_refs::external_ref_map;
use crate::package::{resolve_target, WorkbookArchive};
use crate::properties::last_author;
use crate::shared_strings::{parse_shared_strings, read_text_runs};

/// Everything the monitor needs from one read of a document.
#[derive(Debug)]
pub struct DocumentSnapshot {
    pub cells: CellModel,
    pub external_refs: ExternalRefMap,
    pub last_author: Option<String>,
    /// On-disk size of the source document, for logging.
    pub byte_size: u64,
    pub worksheet_count: usize,
}

/// Deterministic extraction of a [`CellModel`] from a document path.
#[derive(Default)]
pub struct SnapshotEngine {
    cache: Option<SnapshotCache>,
}

impl SnapshotEngine {
    pub fn new() -> Self {
        SnapshotEngine { cache: None }
    }

    /// Route all reads through a copy-through cache directory.
    pub fn with_cache(dir: impl Into<PathBuf>) -> Self {
        SnapshotEngine {
            cache: Some(SnapshotCache::new(dir)),
        }
    }

    pub fn snapshot(&self, path: &Path) -> Result<DocumentSnapshot, SnapshotError> {
        let byte_size = fs::metadata(path)
            .map_err(|e| SnapshotError::Archive(format!("{}: {e}", path.display())))?
            .len();

        let local = match &self.cache {
            Some(cache) => cache.resolve(path),
            None => path.to_path_buf(),
        };

        let archive = WorkbookArchive::open(&local)?;

        let shared = match archive.part_str("xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(xml)?,
            None => Vec::new(),
        };

        let sheets = workbook_sheets(&archive)?;
        let worksheet_count = sheets.len();

        let mut cells = CellModel::new();
        for (name, part) in sheets {
            let xml = archive
                .part_str(&part)?
                .ok_or_else(|| SnapshotError::MissingPart(part.clone()))?;
            let sheet = parse_sheet_cells(xml, &shared)?;
            debug!(worksheet = %name, cells = sheet.len(), "extracted worksheet");
            cells.push_sheet(name, sheet);
        }

        let external_refs = external_ref_map(&archive);
        let last_author = last_author(&archive);

        Ok(DocumentSnapshot {
            cells,
            external_refs,
            last_author,
            byte_size,
            worksheet_count,
        })
    }
}

/// Worksheets in document order: `(sheet name, worksheet part name)`.
fn workbook_sheets(archive: &WorkbookArchive) -> Result<Vec<(String, String)>, SnapshotError> {
    let workbook_xml = archive
        .part_str("xl/workbook.xml")?
        .ok_or_else(|| SnapshotError::MissingPart("xl/workbook.xml".to_string()))?;

    let rels = workbook_relationships(archive)?;

    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name: Option<String> = None;
                let mut rel_id: Option<String> = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = attr.key.as_ref();
                    if key == b"name" {
                        name = Some(attr.unescape_value()?.into_owned());
                    } else if key == b"id" || key.ends_with(b":id") {
                        rel_id = Some(attr.unescape_value()?.into_owned());
                    }
                }
                let name =
                    name.ok_or_else(|| SnapshotError::Invalid("sheet without name".to_string()))?;
                let rel_id = rel_id
                    .ok_or_else(|| SnapshotError::Invalid(format!("sheet {name} without r:id")))?;
                let part = rels.get(&rel_id).cloned().ok_or_else(|| {
                    SnapshotError::Invalid(format!("sheet {name}: unresolved relationship {rel_id}"))
                })?;
                sheets.push((name, part));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

/// Relationship id → resolved part name, from `xl/_rels/workbook.xml.rels`.
fn workbook_relationships(
    archive: &WorkbookArchive,
) -> Result<HashMap<String, String>, SnapshotError> {
    let rels_xml = archive
        .part_str("xl/_rels/workbook.xml.rels")?
        .ok_or_else(|| SnapshotError::MissingPart("xl/_rels/workbook.xml.rels".to_string()))?;

    let doc = roxmltree::Document::parse(rels_xml)?;
    let mut rels = HashMap::new();
    for node in doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
    {
        let Some(id) = node.attribute("Id") else {
            continue;
        };
        let target = node.attribute("Target").unwrap_or_default();
        rels.insert(
            id.to_string(),
            resolve_target("xl/workbook.xml", target),
        );
    }
    Ok(rels)
}

#[derive(Default)]
struct PendingFormula {
    text: String,
    shared_index: Option<u32>,
}

#[derive(Default)]
struct PendingCell {
    label: String,
    t: Option<String>,
    formula: Option<PendingFormula>,
    value_text: Option<String>,
    inline_text: Option<String>,
}

/// Stream one worksheet part's `<sheetData>` into a coordinate-keyed sheet.
fn parse_sheet_cells(xml: &str, shared: &[String]) -> Result<Sheet, SnapshotError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut cells = Sheet::new();

    // Shared-formula masters appear at their group's top-left anchor, so in
    // the part's row-major stream they precede their textless followers.
    let mut shared_formulas: HashMap<u32, String> = HashMap::new();

    let mut in_sheet_data = false;
    let mut current: Option<PendingCell> = None;
    let mut in_v = false;
    let mut in_f = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => in_sheet_data = true,
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => in_sheet_data = false,

            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                let mut cell = PendingCell::default();
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"r" => cell.label = attr.unescape_value()?.into_owned(),
                        b"t" => cell.t = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                in_v = false;
                in_f = false;
                current = Some(cell);
            }
            // A self-closing <c/> carries no content (only style metadata).
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                drop(e);
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                if let Some(cell) = current.take() {
                    if !cell.label.is_empty() {
                        if let Some(entry) = finish_cell(cell, shared, &mut shared_formulas) {
                            cells.insert(entry.0, entry.1);
                        }
                    }
                }
                in_v = false;
                in_f = false;
            }

            Event::Start(e)
                if in_sheet_data && current.is_some() && e.local_name().as_ref() == b"f" =>
            {
                in_f = true;
                let formula = pending_formula_from_attrs(&e)?;
                if let Some(cell) = current.as_mut() {
                    cell.formula = Some(formula);
                }
            }
            Event::Empty(e)
                if in_sheet_data && current.is_some() && e.local_name().as_ref() == b"f" =>
            {
                let formula = pending_formula_from_attrs(&e)?;
                if let Some(cell) = current.as_mut() {
                    cell.formula = Some(formula);
                }
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"f" => in_f = false,
            Event::Text(t) if in_sheet_data && in_f => {
                if let Some(formula) = current.as_mut().and_then(|c| c.formula.as_mut()) {
                    formula.text.push_str(&t.unescape()?);
                }
            }

            Event::Start(e)
                if in_sheet_data && current.is_some() && e.local_name().as_ref() == b"v" =>
            {
                in_v = true;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"v" => in_v = false,
            Event::Text(t) if in_sheet_data && in_v => {
                if let Some(cell) = current.as_mut() {
                    cell.value_text
                        .get_or_insert_with(String::new)
                        .push_str(&t.unescape()?);
                }
            }

            Event::Start(e)
                if in_sheet_data && current.is_some() && e.local_name().as_ref() == b"is" =>
            {
                let text = read_text_runs(&mut reader, b"is")?;
                if let Some(cell) = current.as_mut() {
                    cell.inline_text = Some(text);
                }
            }
            Event::Empty(e)
                if in_sheet_data && current.is_some() && e.local_name().as_ref() == b"is" =>
            {
                if let Some(cell) = current.as_mut() {
                    cell.inline_text = Some(String::new());
                }
            }

            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(cells)
}

fn pending_formula_from_attrs(
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<PendingFormula, SnapshotError> {
    let mut formula = PendingFormula::default();
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"si" {
            formula.shared_index = attr.unescape_value()?.parse().ok();
        }
    }
    Ok(formula)
}

/// Reduce a streamed cell to its stored entry, or `None` for empty cells.
fn finish_cell(
    cell: PendingCell,
    shared: &[String],
    shared_formulas: &mut HashMap<u32, String>,
) -> Option<(String, CellEntry)> {
    if let Some(pending) = cell.formula {
        // Formula cell: record the text, never the cached value. Shared and
        // array formulas reduce to their shared text, so re-reading an
        // unchanged file always yields identical entries.
        let text = if !pending.text.is_empty() {
            if let Some(si) = pending.shared_index {
                shared_formulas
                    .entry(si)
                    .or_insert_with(|| pending.text.clone());
            }
            pending.text
        } else if let Some(master) = pending
            .shared_index
            .and_then(|si| shared_formulas.get(&si))
        {
            master.clone()
        } else {
            String::new()
        };

        let formula = if text.starts_with('=') {
            text
        } else {
            format!("={text}")
        };
        return Some((cell.label, CellEntry::formula(formula)));
    }

    let value = match cell.t.as_deref() {
        Some("s") => cell
            .value_text
            .as_deref()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .and_then(|idx| shared.get(idx))
            .cloned()
            .map(CellScalar::Text),
        Some("inlineStr") => cell.inline_text.map(CellScalar::Text),
        Some("b") => cell
            .value_text
            .as_deref()
            .map(|v| CellScalar::Bool(v.trim() == "1" || v.trim().eq_ignore_ascii_case("true"))),
        // `t="d"` payloads are already ISO-8601; errors and formula-result
        // strings stay text.
        Some("str") | Some("e") | Some("d") => cell.value_text.map(CellScalar::Text),
        _ => cell
            .value_text
            .as_deref()
            .and_then(CellScalar::from_numeric_text),
    }?;

    Some((cell.label, CellEntry::value(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sheet_xml(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{body}</sheetData></worksheet>"#
        )
    }

    #[test]
    fn formula_cells_record_text_and_drop_cached_value() {
        let xml = sheet_xml(r#"<row r="1"><c r="A1"><f>SUM(B1:B3)</f><v>42</v></c></row>"#);
        let cells = parse_sheet_cells(&xml, &[]).unwrap();
        assert_eq!(cells["A1"], CellEntry::formula("=SUM(B1:B3)"));
    }

    #[test]
    fn scalar_cells_coerce_by_storage_type() {
        let xml = sheet_xml(
            r#"<row r="1">
                <c r="A1"><v>7</v></c>
                <c r="B1"><v>2.5</v></c>
                <c r="C1" t="b"><v>1</v></c>
                <c r="D1" t="str"><v>plain</v></c>
                <c r="E1" t="d"><v>2025-07-10T16:29:38</v></c>
                <c r="F1" t="e"><v>#DIV/0!</v></c>
            </row>"#,
        );
        let cells = parse_sheet_cells(&xml, &[]).unwrap();
        assert_eq!(cells["A1"], CellEntry::value(7i64));
        assert_eq!(cells["B1"], CellEntry::value(2.5));
        assert_eq!(cells["C1"], CellEntry::value(true));
        assert_eq!(cells["D1"], CellEntry::value("plain"));
        assert_eq!(cells["E1"], CellEntry::value("2025-07-10T16:29:38"));
        assert_eq!(cells["F1"], CellEntry::value("#DIV/0!"));
    }

    #[test]
    fn shared_string_and_inline_string_cells() {
        let xml = sheet_xml(
            r#"<row r="1">
                <c r="A1" t="s"><v>0</v></c>
                <c r="B1" t="inlineStr"><is><t>inline</t></is></c>
            </row>"#,
        );
        let cells = parse_sheet_cells(&xml, &["hello".to_string()]).unwrap();
        assert_eq!(cells["A1"], CellEntry::value("hello"));
        assert_eq!(cells["B1"], CellEntry::value("inline"));
    }

    #[test]
    fn empty_cells_are_omitted() {
        let xml = sheet_xml(r#"<row r="1"><c r="A1" s="3"/><c r="B1"></c></row>"#);
        let cells = parse_sheet_cells(&xml, &[]).unwrap();
        assert!(cells.is_empty());
    }

    #[test]
    fn shared_formula_followers_inherit_master_text() {
        let xml = sheet_xml(
            r#"<row r="1"><c r="A1"><f t="shared" ref="A1:A3" si="0">B1*2</f><v>2</v></c></row>
               <row r="2"><c r="A2"><f t="shared" si="0"/><v>4</v></c></row>
               <row r="3"><c r="A3"><f t="shared" si="0"/><v>6</v></c></row>"#,
        );
        let cells = parse_sheet_cells(&xml, &[]).unwrap();
        assert_eq!(cells["A1"], CellEntry::formula("=B1*2"));
        assert_eq!(cells["A2"], CellEntry::formula("=B1*2"));
        assert_eq!(cells["A3"], CellEntry::formula("=B1*2"));
    }

    #[test]
    fn array_formulas_reduce_to_their_text() {
        let xml = sheet_xml(
            r#"<row r="2"><c r="B2"><f t="array" ref="B2:B4">SUM(A1:A3)</f><v>6</v></c></row>"#,
        );
        let first = parse_sheet_cells(&xml, &[]).unwrap();
        let second = parse_sheet_cells(&xml, &[]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first["B2"], CellEntry::formula("=SUM(A1:A3)"));
    }
}
