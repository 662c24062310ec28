use cellwatch_model::ExternalRefMap;
use tracing::debug;

use crate::package::{resolve_target, WorkbookArchive};

/// Build the external-reference map `{ n → referenced workbook path }` from
/// the archive's `xl/externalLinks/externalLink<n>.xml` parts.
///
/// The `n` is the trailing integer of the part name — the same index that
/// appears as `[n]` in formula text. The target path comes from
/// `externalBookPr/@href` when present; producers that use
/// `externalBook/@r:id` indirection instead are resolved through the link
/// part's own relationships.
///
/// Extraction is best-effort: a malformed link part is skipped, never fatal.
pub fn external_ref_map(archive: &WorkbookArchive) -> ExternalRefMap {
    let mut map = ExternalRefMap::new();

    let link_parts: Vec<String> = archive
        .parts_with_prefix("xl/externalLinks/externalLink")
        .filter(|name| !name.contains("/_rels/"))
        .map(|name| name.to_string())
        .collect();

    for part in link_parts {
        let Some(index) = link_index(&part) else {
            continue;
        };
        match link_target(archive, &part) {
            Some(href) => {
                map.insert(index, href);
            }
            None => {
                debug!(part = %part, "external link part without resolvable target");
            }
        }
    }

    map
}

/// Trailing integer of `xl/externalLinks/externalLink<n>.xml`.
fn link_index(part: &str) -> Option<u32> {
    let stem = part
        .strip_prefix("xl/externalLinks/externalLink")?
        .strip_suffix(".xml")?;
    if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn link_target(archive: &WorkbookArchive, part: &str) -> Option<String> {
    let xml = std::str::from_utf8(archive.part(part)?).ok()?;
    let doc = roxmltree::Document::parse(xml).ok()?;

    // Common case: <externalBookPr href="..."/>.
    if let Some(href) = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "externalBookPr")
        .and_then(|n| n.attribute("href"))
    {
        if !href.is_empty() {
            return Some(href.to_string());
        }
    }

    // Fallback: <externalBook r:id="..."/> resolved through the link part's
    // relationships.
    let rel_id = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "externalBook")
        .and_then(|n| {
            n.attributes()
                .find(|a| a.name() == "id")
                .map(|a| a.value().to_string())
        })?;

    let rels_part = rels_part_name(part);
    let rels_xml = std::str::from_utf8(archive.part(&rels_part)?).ok()?;
    let rels_doc = roxmltree::Document::parse(rels_xml).ok()?;

    for node in rels_doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "Relationship")
    {
        if node.attribute("Id") != Some(rel_id.as_str()) {
            continue;
        }
        let target = node.attribute("Target").unwrap_or_default();
        if target.is_empty() {
            return None;
        }
        // External targets are workbook paths, not package parts; keep them
        // verbatim. Internal targets resolve relative to the link part.
        let external = node
            .attribute("TargetMode")
            .is_some_and(|mode| mode.eq_ignore_ascii_case("External"));
        return Some(if external {
            target.to_string()
        } else {
            resolve_target(part, target)
        });
    }

    None
}

fn rels_part_name(part: &str) -> String {
    let (dir, file) = part.rsplit_once('/').unwrap_or(("", part));
    if dir.is_empty() {
        format!("_rels/{file}.rels")
    } else {
        format!("{dir}/_rels/{file}.rels")
    }
}
