use crate::package::WorkbookArchive;

/// The document's "last modified by" core property, if recorded.
///
/// Absent part, malformed XML or a missing element all yield `None`; author
/// attribution is informational and never fails a snapshot.
pub fn last_author(archive: &WorkbookArchive) -> Option<String> {
    let xml = std::str::from_utf8(archive.part("docProps/core.xml")?).ok()?;
    let doc = roxmltree::Document::parse(xml).ok()?;

    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "lastModifiedBy")
        .and_then(|n| n.text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
