mod common;

use cellwatch_model::{fingerprint, CellEntry};
use cellwatch_xlsx::{ErrorKind, SnapshotEngine};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use common::{core_props, workbook_rels, workbook_xml, worksheet_xml, write_workbook};

#[test]
fn snapshot_extracts_sheets_in_document_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Book.xlsx");

    write_workbook(
        &path,
        &[
            (
                "xl/workbook.xml",
                &workbook_xml(&[("Summary", "rId1"), ("Data", "rId2")]),
            ),
            (
                "xl/_rels/workbook.xml.rels",
                &workbook_rels(&[
                    ("rId1", "worksheet", "worksheets/sheet1.xml"),
                    ("rId2", "worksheet", "worksheets/sheet2.xml"),
                ]),
            ),
            (
                "xl/worksheets/sheet1.xml",
                &worksheet_xml(r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#),
            ),
            (
                "xl/worksheets/sheet2.xml",
                &worksheet_xml(
                    r#"<row r="1"><c r="A1"><v>10</v></c><c r="B1"><f>A1*2</f><v>20</v></c></row>"#,
                ),
            ),
            (
                "xl/sharedStrings.xml",
                r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><si><t>hello</t></si></sst>"#,
            ),
            ("docProps/core.xml", &core_props("kccheng")),
        ],
    );

    let snapshot = SnapshotEngine::new().snapshot(&path).unwrap();

    let names: Vec<_> = snapshot.cells.sheet_names().collect();
    assert_eq!(names, vec!["Summary", "Data"]);
    assert_eq!(snapshot.worksheet_count, 2);
    assert!(snapshot.byte_size > 0);
    assert_eq!(snapshot.last_author.as_deref(), Some("kccheng"));

    let summary = snapshot.cells.sheet("Summary").unwrap();
    assert_eq!(summary["A1"], CellEntry::value("hello"));

    let data = snapshot.cells.sheet("Data").unwrap();
    assert_eq!(data["A1"], CellEntry::value(10i64));
    assert_eq!(data["B1"], CellEntry::formula("=A1*2"));
}

#[test]
fn snapshot_is_deterministic_across_reads() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Stable.xlsx");
    common::write_single_sheet_workbook(
        &path,
        r#"<row r="2"><c r="B2"><f t="array" ref="B2:B4">SUM(A1:A3)</f><v>6</v></c></row>"#,
    );

    let engine = SnapshotEngine::new();
    let first = engine.snapshot(&path).unwrap();
    let second = engine.snapshot(&path).unwrap();

    assert_eq!(first.cells, second.cells);
    assert_eq!(fingerprint(&first.cells), fingerprint(&second.cells));
}

#[test]
fn missing_file_is_an_archive_error() {
    let dir = tempdir().unwrap();
    let err = SnapshotEngine::new()
        .snapshot(&dir.path().join("absent.xlsx"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Archive);
}

#[test]
fn non_zip_file_is_an_archive_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.xlsx");
    std::fs::write(&path, b"this is not a zip archive").unwrap();

    let err = SnapshotEngine::new().snapshot(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Archive);
}

#[test]
fn archive_without_workbook_part_is_a_read_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.xlsx");
    write_workbook(&path, &[("unrelated.txt", "nothing here")]);

    let err = SnapshotEngine::new().snapshot(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Read);
}
