#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::FileOptions;
use zip::ZipWriter;

/// Assemble a workbook package from raw parts.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let cursor = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(cursor);
    let options =
        FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }

    zip.finish().unwrap().into_inner()
}

pub fn write_workbook(path: &Path, entries: &[(&str, &str)]) {
    std::fs::write(path, zip_bytes(entries)).unwrap();
}

pub fn workbook_xml(sheets: &[(&str, &str)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    for (idx, (name, rid)) in sheets.iter().enumerate() {
        xml.push_str(&format!(
            r#"<sheet name="{name}" sheetId="{}" r:id="{rid}"/>"#,
            idx + 1
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

pub fn workbook_rels(rels: &[(&str, &str, &str)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (id, type_suffix, target) in rels {
        xml.push_str(&format!(
            r#"<Relationship Id="{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/{type_suffix}" Target="{target}"/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

pub fn worksheet_xml(rows: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{rows}</sheetData></worksheet>"#
    )
}

pub fn core_props(last_modified_by: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:creator>setup</dc:creator><cp:lastModifiedBy>{last_modified_by}</cp:lastModifiedBy></cp:coreProperties>"#
    )
}

/// A minimal single-sheet workbook: `Sheet1` with the given `<sheetData>` rows.
pub fn single_sheet_workbook(rows: &str) -> Vec<(String, String)> {
    vec![
        ("xl/workbook.xml".to_string(), workbook_xml(&[("Sheet1", "rId1")])),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            workbook_rels(&[("rId1", "worksheet", "worksheets/sheet1.xml")]),
        ),
        ("xl/worksheets/sheet1.xml".to_string(), worksheet_xml(rows)),
    ]
}

pub fn write_single_sheet_workbook(path: &Path, rows: &str) {
    let parts = single_sheet_workbook(rows);
    let entries: Vec<(&str, &str)> = parts
        .iter()
        .map(|(name, content)| (name.as_str(), content.as_str()))
        .collect();
    write_workbook(path, &entries);
}
